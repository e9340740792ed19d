use serde_json::Value;
use std::sync::Arc;

use crate::{
    correlator::Correlator, price::AssetPriceProvider, types::DepositAddress,
    writer::ReconciliationWriter,
};

/// Persists deposit-address links together with the asset price at the time
/// of linking.
pub struct LinkReconciler {
    correlator: Arc<Correlator>,
    writer: Arc<ReconciliationWriter>,
    prices: Arc<dyn AssetPriceProvider>,
}

impl LinkReconciler {
    pub fn new(
        correlator: Arc<Correlator>,
        writer: Arc<ReconciliationWriter>,
        prices: Arc<dyn AssetPriceProvider>,
    ) -> Self {
        Self {
            correlator,
            writer,
            prices,
        }
    }

    /// Price from the provider, or the one already stored on the deposit
    /// address when the provider has none.
    pub async fn price(&self, link: &DepositAddress) -> Option<f64> {
        let chain = link
            .original_sender_chain
            .as_deref()
            .or(link.sender_chain.as_deref());
        if let (Some(chain), Some(denom)) = (chain, link.denom()) {
            match self.prices.price(chain, denom, link.created_at.ms).await {
                Ok(Some(price)) => return Some(price),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(chain, denom, err = ?err, "failed to fetch asset price")
                }
            }
        }

        self.correlator
            .deposit_address(&link.id)
            .await
            .found()
            .and_then(|doc| doc.get("price").and_then(Value::as_f64))
    }

    /// Writes every link and returns how many were stored.
    pub async fn process(&self, links: Vec<DepositAddress>) -> usize {
        let mut written = 0;
        for mut link in links {
            link.price = self.price(&link).await;
            if self.writer.write_deposit_address(&link).await.is_ok() {
                written += 1;
            }
        }
        written
    }
}
