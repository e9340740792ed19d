use blockscout_service_launcher::{
    launcher::{ConfigSettings, MetricsSettings, ServerSettings},
    tracing::{JaegerSettings, TracingSettings},
};
use hub_transfers_logic::settings::{IndexerSettings, LcdSettings, PriceSettings, StoreSettings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// JSON file with the hub, EVM and Cosmos chain metadata.
    pub chains_config: PathBuf,

    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub tracing: TracingSettings,
    #[serde(default)]
    pub jaeger: JaegerSettings,

    pub indexer: IndexerSettings,
    pub store: StoreSettings,
    #[serde(default)]
    pub lcd: LcdSettings,
    #[serde(default)]
    pub price: PriceSettings,
}

impl ConfigSettings for Settings {
    const SERVICE_NAME: &'static str = "HUB_TRANSFERS";

    fn validate(&self) -> anyhow::Result<()> {
        if self.indexer.processor.num_blocks_per_heartbeat == 0 {
            anyhow::bail!("indexer.processor.num_blocks_per_heartbeat must be positive");
        }
        Ok(())
    }
}
