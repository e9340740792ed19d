//! Confirms that an acknowledged IBC packet was received on its destination
//! chain by searching the chain's LCD endpoints for the receive transaction.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use url::Url;

use crate::{
    chains::ChainsTable,
    granularity::Granularity,
    lcd::{EventFilter, TxSearch},
    metrics,
    store::StoreError,
    types::{AckRecord, Transaction, Transfer, TxsResponse},
    writer::ReconciliationWriter,
};

/// Queries issued against one endpoint before moving on to the next.
pub const MAX_QUERIES_PER_ENDPOINT: usize = 2;

/// What to look for on the destination chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptRequest {
    pub transfer_key: String,
    pub recipient_chain: String,
    pub ack_txhash: String,
    pub packet_data_hex: String,
    pub packet_sequence: String,
    pub height: u64,
}

impl ReceiptRequest {
    /// A receipt can only be searched for once the destination height, the
    /// packet data and the recipient chain are all known. Packet data missing
    /// from the acknowledgement is taken from the stored send.
    pub fn new(ack: &AckRecord, transfer: &Transfer) -> Option<Self> {
        let height = ack.height?;
        let packet_data_hex = ack
            .packet_data_hex()
            .or_else(|| transfer.ibc_send.as_ref()?.packet_data_hex.as_deref())
            .filter(|hex| !hex.is_empty())?
            .to_string();
        let packet_sequence = ack.packet_sequence()?.to_string();
        let recipient_chain = transfer.recipient_chain()?.to_string();
        let transfer_key = transfer.key()?;

        Some(Self {
            transfer_key,
            recipient_chain,
            ack_txhash: ack.txhash.clone(),
            packet_data_hex,
            packet_sequence,
            height,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Received {
        recv_txhash: String,
        endpoint: Url,
        queries: usize,
    },
    NotFound {
        queries: usize,
    },
    /// The receive transaction was found but could not be stored.
    Unrecorded {
        recv_txhash: String,
        queries: usize,
    },
    /// The destination is not a known non-hub Cosmos chain.
    NoEndpoints,
}

impl PollOutcome {
    pub fn queries(&self) -> usize {
        match self {
            PollOutcome::Received { queries, .. }
            | PollOutcome::NotFound { queries }
            | PollOutcome::Unrecorded { queries, .. } => *queries,
            PollOutcome::NoEndpoints => 0,
        }
    }
}

pub struct ConfirmationPoller {
    search: Arc<dyn TxSearch>,
    writer: Arc<ReconciliationWriter>,
    chains: Arc<ChainsTable>,
    limit: u32,
}

impl ConfirmationPoller {
    pub fn new(
        search: Arc<dyn TxSearch>,
        writer: Arc<ReconciliationWriter>,
        chains: Arc<ChainsTable>,
        limit: u32,
    ) -> Self {
        Self {
            search,
            writer,
            chains,
            limit,
        }
    }

    /// Walks the destination chain's endpoints in configured order and stops
    /// at the first exact packet-sequence match, recording the receipt on
    /// the transfer. A failing endpoint is left for the next one.
    #[tracing::instrument(skip_all, fields(
        transfer = %request.transfer_key,
        chain = %request.recipient_chain,
        sequence = %request.packet_sequence,
    ))]
    pub async fn poll(&self, request: &ReceiptRequest) -> PollOutcome {
        let Some(chain) = self.chains.cosmos_chain(&request.recipient_chain) else {
            return PollOutcome::NoEndpoints;
        };
        let endpoints = chain.lcd_endpoints();
        if endpoints.is_empty() {
            return PollOutcome::NoEndpoints;
        }

        let mut queries = 0;
        for endpoint in endpoints {
            let attempts = [
                EventFilter::text("recv_packet.packet_data_hex", &request.packet_data_hex),
                EventFilter::text("recv_packet.packet_sequence", &request.packet_sequence),
            ];
            for filter in attempts.into_iter().take(MAX_QUERIES_PER_ENDPOINT) {
                queries += 1;
                let filters = [filter, EventFilter::number("tx.height", request.height)];
                let response = match self.search.search_txs(&endpoint, &filters, self.limit).await {
                    Ok(response) => response,
                    Err(err) => {
                        tracing::debug!(%endpoint, err = ?err, "receipt query failed");
                        metrics::RECEIVE_QUERIES
                            .with_label_values(&[request.recipient_chain.as_str(), "error"])
                            .inc();
                        break;
                    }
                };
                if response.is_empty() {
                    metrics::RECEIVE_QUERIES
                        .with_label_values(&[request.recipient_chain.as_str(), "empty"])
                        .inc();
                    continue;
                }
                // Non-empty answer: no second query on this endpoint.
                match find_receipt(&response, &request.packet_sequence) {
                    Some(tx) => {
                        metrics::RECEIVE_QUERIES
                            .with_label_values(&[request.recipient_chain.as_str(), "found"])
                            .inc();
                        return match self.record_receipt(request, &tx).await {
                            Ok(()) => PollOutcome::Received {
                                recv_txhash: tx.txhash,
                                endpoint,
                                queries,
                            },
                            Err(_) => PollOutcome::Unrecorded {
                                recv_txhash: tx.txhash,
                                queries,
                            },
                        };
                    }
                    None => break,
                }
            }
        }

        PollOutcome::NotFound { queries }
    }

    async fn record_receipt(
        &self,
        request: &ReceiptRequest,
        tx: &Transaction,
    ) -> Result<(), StoreError> {
        let mut ibc_send = Map::new();
        ibc_send.insert("ack_txhash".into(), json!(request.ack_txhash));
        ibc_send.insert("recv_txhash".into(), json!(tx.txhash));
        if let Some(received_at) = tx.timestamp.map(Granularity::from_datetime) {
            ibc_send.insert("received_at".into(), json!(received_at));
        }
        let mut patch = Map::new();
        patch.insert("ibc_send".into(), Value::Object(ibc_send));

        self.writer.merge_transfer(&request.transfer_key, patch).await
    }
}

/// First transaction whose first `recv_packet` event carries exactly
/// `packet_sequence`.
fn find_receipt(response: &TxsResponse, packet_sequence: &str) -> Option<Transaction> {
    response.transactions().into_iter().find(|tx| {
        !tx.txhash.is_empty()
            && tx
                .events()
                .find(|e| e.kind == "recv_packet")
                .and_then(|e| e.attribute("packet_sequence"))
                == Some(packet_sequence)
    })
}
