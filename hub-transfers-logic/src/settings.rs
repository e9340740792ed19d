use serde::Deserialize;
use serde_with::serde_as;
use std::time;
use url::Url;

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct IndexerSettings {
    /// LCD endpoint of the hub chain that is indexed.
    pub hub_lcd_url: Url,
    /// First height to index. When unset, indexing starts at the latest block.
    #[serde(default)]
    pub start_height: Option<u64>,
    #[serde(default = "default_polling_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub polling_interval: time::Duration,
    #[serde(default = "default_restart_delay")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub restart_delay: time::Duration,
    /// Endpoint that accepts `{module, path}` re-indexing requests for
    /// routed IBC transfers.
    #[serde(default)]
    pub requeue_api_url: Option<Url>,
    #[serde(default)]
    pub processor: ProcessorSettings,
}

fn default_polling_interval() -> time::Duration {
    time::Duration::from_secs(5)
}

fn default_restart_delay() -> time::Duration {
    time::Duration::from_secs(60)
}

impl IndexerSettings {
    pub fn new(hub_lcd_url: Url) -> Self {
        Self {
            hub_lcd_url,
            start_height: None,
            polling_interval: default_polling_interval(),
            restart_delay: default_restart_delay(),
            requeue_api_url: None,
            processor: ProcessorSettings::default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessorSettings {
    #[serde(default = "default_num_blocks_per_heartbeat")]
    pub num_blocks_per_heartbeat: u64,
    #[serde(default = "default_fraction_heartbeat_block")]
    pub fraction_heartbeat_block: u64,
    /// Pause before vote and poll writes so that the deposit confirmation
    /// documents produced by the same block become visible.
    #[serde(default = "default_vote_write_delay")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub vote_write_delay: time::Duration,
    /// `limit` used when searching a destination chain for the receive
    /// transaction.
    #[serde(default = "default_receive_query_limit")]
    pub receive_query_limit: u32,
}

fn default_num_blocks_per_heartbeat() -> u64 {
    50
}

fn default_fraction_heartbeat_block() -> u64 {
    1
}

fn default_vote_write_delay() -> time::Duration {
    time::Duration::from_millis(1000)
}

fn default_receive_query_limit() -> u32 {
    5
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            num_blocks_per_heartbeat: default_num_blocks_per_heartbeat(),
            fraction_heartbeat_block: default_fraction_heartbeat_block(),
            vote_write_delay: default_vote_write_delay(),
            receive_query_limit: default_receive_query_limit(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSettings {
    pub url: Url,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub timeout: time::Duration,
}

fn default_request_timeout() -> time::Duration {
    time::Duration::from_secs(10)
}

impl StoreSettings {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            username: None,
            password: None,
            timeout: default_request_timeout(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct LcdSettings {
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub timeout: time::Duration,
    #[serde(default = "default_request_per_second")]
    pub request_per_second: u32,
    /// How long to wait for a rate limiter permit before giving up.
    #[serde(default = "default_permit_timeout")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub permit_timeout: time::Duration,
    /// Page size used when fetching every transaction of a block.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

fn default_request_per_second() -> u32 {
    20
}

fn default_permit_timeout() -> time::Duration {
    time::Duration::from_millis(5000)
}

fn default_page_limit() -> u32 {
    100
}

impl Default for LcdSettings {
    fn default() -> Self {
        Self {
            timeout: default_request_timeout(),
            request_per_second: default_request_per_second(),
            permit_timeout: default_permit_timeout(),
            page_limit: default_page_limit(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct PriceSettings {
    /// Asset price service. Prices are not looked up when unset.
    #[serde(default)]
    pub url: Option<Url>,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub timeout: time::Duration,
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout: default_request_timeout(),
        }
    }
}
