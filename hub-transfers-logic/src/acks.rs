use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::{
    correlator::{Correlator, Probe},
    poller::{ConfirmationPoller, PollOutcome, ReceiptRequest},
    types::AckRecord,
    writer::ReconciliationWriter,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckSummary {
    /// Acknowledgements matched to a stored transfer.
    pub matched: usize,
    /// Transfers whose receive transaction was found on the destination.
    pub received: usize,
}

/// Applies packet acknowledgements to the transfers they belong to and
/// looks for the matching receive transaction on the destination chain.
pub struct AckReconciler {
    correlator: Arc<Correlator>,
    writer: Arc<ReconciliationWriter>,
    poller: Arc<ConfirmationPoller>,
}

impl AckReconciler {
    pub fn new(
        correlator: Arc<Correlator>,
        writer: Arc<ReconciliationWriter>,
        poller: Arc<ConfirmationPoller>,
    ) -> Self {
        Self {
            correlator,
            writer,
            poller,
        }
    }

    /// Receipt searches run as separate tasks owned by this call. Dropping
    /// the returned future aborts the ones still in flight.
    pub async fn process(&self, acks: Vec<AckRecord>) -> AckSummary {
        let mut summary = AckSummary::default();
        let mut receipts = JoinSet::new();

        for ack in acks {
            let transfer = match self.correlator.transfer_for_ack(&ack).await {
                Probe::Found(transfer) => transfer,
                Probe::Miss | Probe::Transient(_) => {
                    tracing::debug!(txhash = %ack.txhash, "acknowledgement without transfer");
                    continue;
                }
            };
            let Some(key) = transfer.key() else {
                continue;
            };
            if self.writer.merge_transfer(&key, ack_patch(&ack)).await.is_err() {
                continue;
            }
            summary.matched += 1;

            if let Some(request) = ReceiptRequest::new(&ack, &transfer) {
                let poller = self.poller.clone();
                receipts.spawn(async move { poller.poll(&request).await });
            }
        }

        while let Some(joined) = receipts.join_next().await {
            match joined {
                Ok(PollOutcome::Received { .. }) => summary.received += 1,
                Ok(_) => {}
                Err(err) => tracing::warn!(err = ?err, "receipt search task failed"),
            }
        }
        summary
    }
}

/// `ibc_send` update for a matched acknowledgement. An acknowledgement
/// carrying a transfer id also clears a previously recorded send failure.
fn ack_patch(ack: &AckRecord) -> Map<String, Value> {
    let mut ibc_send = Map::new();
    ibc_send.insert("ack_txhash".into(), json!(ack.txhash));
    if ack.transfer_id.is_some() {
        ibc_send.insert("failed_txhash".into(), Value::Null);
    }
    let mut patch = Map::new();
    patch.insert("ibc_send".into(), Value::Object(ibc_send));
    patch
}
