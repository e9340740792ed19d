use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use url::Url;

use crate::settings::PriceSettings;

/// Historical asset price lookup.
#[async_trait]
pub trait AssetPriceProvider: Send + Sync {
    async fn price(&self, chain: &str, denom: &str, timestamp_ms: i64) -> anyhow::Result<Option<f64>>;
}

/// Provider used when no price service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrices;

#[async_trait]
impl AssetPriceProvider for NoPrices {
    async fn price(&self, _: &str, _: &str, _: i64) -> anyhow::Result<Option<f64>> {
        Ok(None)
    }
}

#[derive(Debug, Serialize)]
struct PriceRequest<'a> {
    chain: &'a str,
    denom: &'a str,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PriceResponse {
    List(Vec<PriceEntry>),
    Wrapped { data: Vec<PriceEntry> },
    Single(PriceEntry),
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    #[serde(default)]
    price: Option<f64>,
}

impl PriceResponse {
    fn first_price(self) -> Option<f64> {
        let entries = match self {
            PriceResponse::List(entries) | PriceResponse::Wrapped { data: entries } => entries,
            PriceResponse::Single(entry) => vec![entry],
        };
        entries
            .into_iter()
            .next()
            .and_then(|e| e.price)
            .filter(|p| p.is_finite() && *p > 0.0)
    }
}

/// Asks an HTTP price service for the price of `denom` at a point in time.
#[derive(Clone)]
pub struct HttpPriceProvider {
    http: HttpClient,
    url: Url,
}

impl HttpPriceProvider {
    pub fn new(url: Url, settings: &PriceSettings) -> anyhow::Result<Self> {
        let http = HttpClient::builder().timeout(settings.timeout).build()?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl AssetPriceProvider for HttpPriceProvider {
    async fn price(&self, chain: &str, denom: &str, timestamp_ms: i64) -> anyhow::Result<Option<f64>> {
        let response = self
            .http
            .post(self.url.clone())
            .json(&PriceRequest {
                chain,
                denom,
                timestamp: timestamp_ms,
            })
            .send()
            .instrument(tracing::debug_span!("asset_price", chain, denom))
            .await?
            .error_for_status()?;

        let parsed: PriceResponse = response.json().await?;
        Ok(parsed.first_price())
    }
}
