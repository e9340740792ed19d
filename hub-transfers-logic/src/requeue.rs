use reqwest::Client as HttpClient;
use serde_json::json;
use std::time::Duration;
use url::Url;

/// Asks the indexing API to re-process a hub transaction later. Used for
/// routed IBC transfers whose packet data only becomes queryable after the
/// routing transaction itself has been indexed.
#[derive(Clone)]
pub struct RequeueClient {
    http: HttpClient,
    url: Url,
}

impl RequeueClient {
    pub fn new(url: Url, timeout: Duration) -> anyhow::Result<Self> {
        let http = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }

    pub async fn requeue(&self, txhash: &str) -> anyhow::Result<()> {
        self.http
            .post(self.url.clone())
            .json(&json!({
                "module": "lcd",
                "path": format!("/cosmos/tx/v1beta1/txs/{txhash}"),
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Fires one request per transaction without waiting for the results.
    pub fn requeue_detached(&self, txhashes: Vec<String>) {
        for txhash in txhashes {
            let client = self.clone();
            tokio::spawn(async move {
                if let Err(err) = client.requeue(&txhash).await {
                    tracing::debug!(txhash = %txhash, err = ?err, "failed to requeue routed transfer");
                }
            });
        }
    }
}
