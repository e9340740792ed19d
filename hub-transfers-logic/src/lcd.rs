//! Rate-limited client for Cosmos LCD (REST) endpoints.

use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use std::{fmt, num::NonZeroU32, sync::Arc};
use tokio::time::timeout;
use tracing::Instrument;
use url::Url;

use crate::{
    settings::LcdSettings,
    types::{de, TxsResponse},
};

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, thiserror::Error)]
pub enum LcdError {
    #[error("lcd request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("lcd responded with {status} for {url}")]
    Status { status: u16, url: String },
    #[error("invalid lcd response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("timed out waiting for a rate limiter permit")]
    RateLimited,
    #[error("unexpected lcd response: {0}")]
    UnexpectedResponse(String),
}

/// `{event}.{attribute}={value}` condition of a transaction search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    key: String,
    value: String,
    quoted: bool,
}

impl EventFilter {
    /// String condition, rendered as `key='value'`.
    pub fn text(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            quoted: true,
        }
    }

    /// Numeric condition, rendered as `key=value`.
    pub fn number(key: impl Into<String>, value: u64) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
            quoted: false,
        }
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.quoted {
            write!(f, "{}='{}'", self.key, self.value)
        } else {
            write!(f, "{}={}", self.key, self.value)
        }
    }
}

/// Transaction search on an arbitrary Cosmos chain.
#[async_trait]
pub trait TxSearch: Send + Sync {
    async fn search_txs(
        &self,
        endpoint: &Url,
        filters: &[EventFilter],
        limit: u32,
    ) -> Result<TxsResponse, LcdError>;
}

#[derive(Clone)]
pub struct LcdClient {
    http: HttpClient,
    settings: LcdSettings,
    limiter: Arc<Limiter>,
}

#[derive(Debug, Deserialize)]
struct LatestBlockResponse {
    block: Option<Block>,
}

#[derive(Debug, Deserialize)]
struct Block {
    header: Option<BlockHeader>,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    #[serde(default, deserialize_with = "de::u64_from_string_or_number")]
    height: u64,
}

impl LcdClient {
    pub fn new(settings: LcdSettings) -> Result<Self, LcdError> {
        let http = HttpClient::builder().timeout(settings.timeout).build()?;
        let rps = NonZeroU32::new(settings.request_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            http,
            settings,
            limiter,
        })
    }

    fn url(endpoint: &Url, path: &str) -> String {
        format!("{}{}", endpoint.as_str().trim_end_matches('/'), path)
    }

    async fn make_request(&self, request: RequestBuilder) -> Result<Response, LcdError> {
        timeout(self.settings.permit_timeout, self.limiter.until_ready())
            .await
            .map_err(|_| LcdError::RateLimited)?;
        Ok(request.send().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder, url: &str) -> Result<T, LcdError> {
        let response = self.make_request(request).await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            tracing::debug!(url, status, "bad lcd response");
            return Err(LcdError::Status {
                status,
                url: url.to_string(),
            });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn latest_height(&self, endpoint: &Url) -> Result<u64, LcdError> {
        let url = Self::url(endpoint, "/cosmos/base/tendermint/v1beta1/blocks/latest");
        let response: LatestBlockResponse = self
            .get_json(self.http.get(&url), &url)
            .instrument(tracing::debug_span!("latest_height", url = %url))
            .await?;
        response
            .block
            .and_then(|b| b.header)
            .map(|h| h.height)
            .filter(|h| *h > 0)
            .ok_or_else(|| LcdError::UnexpectedResponse("latest block has no height".into()))
    }

    /// Every transaction included at `height`, fetched page by page.
    pub async fn txs_at_height(&self, endpoint: &Url, height: u64) -> Result<TxsResponse, LcdError> {
        let filters = [EventFilter::number("tx.height", height)];
        let limit = self.settings.page_limit.max(1);
        let mut all = TxsResponse::default();

        for page in 1.. {
            let batch = self.search_page(endpoint, &filters, limit, page).await?;
            let received = batch.tx_responses.len();
            all.tx_responses.extend(batch.tx_responses);
            all.txs.extend(batch.txs);
            if received < limit as usize {
                break;
            }
        }
        Ok(all)
    }

    async fn search_page(
        &self,
        endpoint: &Url,
        filters: &[EventFilter],
        limit: u32,
        page: u32,
    ) -> Result<TxsResponse, LcdError> {
        let url = Self::url(endpoint, "/cosmos/tx/v1beta1/txs");
        let mut query: Vec<(&str, String)> = vec![
            ("limit", limit.to_string()),
            ("page", page.to_string()),
            ("order_by", "ORDER_BY_ASC".to_string()),
        ];
        query.extend(filters.iter().map(|f| ("events", f.to_string())));

        self.get_json(self.http.get(&url).query(&query), &url)
            .instrument(tracing::debug_span!("search_txs", url = %url, page))
            .await
    }
}

#[async_trait]
impl TxSearch for LcdClient {
    async fn search_txs(
        &self,
        endpoint: &Url,
        filters: &[EventFilter],
        limit: u32,
    ) -> Result<TxsResponse, LcdError> {
        self.search_page(endpoint, filters, limit, 1).await
    }
}
