#![allow(dead_code)]

use async_trait::async_trait;
use hub_transfers_logic::{
    chains::{ChainEndpoints, ChainMetadata, ChainsConfig, ChainsTable},
    lcd::{EventFilter, LcdError, TxSearch},
    settings::ProcessorSettings,
    store::MemoryStore,
    time_spent::StoreTimeSpent,
    types::TxsResponse,
    writer::ReconciliationWriter,
    BatchProcessor,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use url::Url;

pub fn endpoint(n: usize) -> Url {
    format!("http://lcd-{n}.osmosis.test/").parse().unwrap()
}

/// Hub `axelarnet`, EVM `ethereum`, Cosmos `osmosis` with `endpoints` LCDs.
pub fn chains(endpoints: usize) -> Arc<ChainsTable> {
    let osmosis = ChainMetadata {
        prefix_address: Some("osmo".into()),
        endpoints: ChainEndpoints {
            lcd: None,
            lcds: (0..endpoints).map(endpoint).collect(),
        },
        ..ChainMetadata::new("osmosis")
    };
    let table = ChainsTable::new(ChainsConfig {
        hub: ChainMetadata {
            prefix_address: Some("axelar".into()),
            ..ChainMetadata::new("axelarnet")
        },
        evm: vec![ChainMetadata::new("ethereum")],
        cosmos: vec![osmosis],
    })
    .unwrap();
    Arc::new(table)
}

type Responder = dyn Fn(&Url, &[String]) -> Result<TxsResponse, LcdError> + Send + Sync;

/// [`TxSearch`] answering from a closure and remembering every query.
pub struct FakeSearch {
    responder: Box<Responder>,
    calls: Mutex<Vec<(Url, Vec<String>)>>,
}

impl FakeSearch {
    pub fn new(
        responder: impl Fn(&Url, &[String]) -> Result<TxsResponse, LcdError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(vec![]),
        })
    }

    pub fn empty() -> Arc<Self> {
        Self::new(|_, _| Ok(TxsResponse::default()))
    }

    pub fn calls(&self) -> Vec<(Url, Vec<String>)> {
        self.calls.lock().clone()
    }

    pub fn endpoints_queried(&self) -> Vec<Url> {
        self.calls().into_iter().map(|(url, _)| url).collect()
    }
}

#[async_trait]
impl TxSearch for FakeSearch {
    async fn search_txs(
        &self,
        endpoint: &Url,
        filters: &[EventFilter],
        _limit: u32,
    ) -> Result<TxsResponse, LcdError> {
        let filters: Vec<String> = filters.iter().map(ToString::to_string).collect();
        self.calls.lock().push((endpoint.clone(), filters.clone()));
        (self.responder)(endpoint, &filters)
    }
}

pub fn writer(store: &Arc<MemoryStore>) -> Arc<ReconciliationWriter> {
    Arc::new(ReconciliationWriter::new(
        store.clone(),
        Arc::new(StoreTimeSpent::new(store.clone())),
    ))
}

pub fn processor(
    store: &Arc<MemoryStore>,
    search: Arc<FakeSearch>,
    endpoints: usize,
) -> BatchProcessor {
    BatchProcessor::builder(chains(endpoints), store.clone(), search)
        .settings(ProcessorSettings {
            vote_write_delay: Duration::ZERO,
            ..Default::default()
        })
        .build()
}

/// LCD search response holding the given `(tx_response, tx)` pairs.
pub fn txs(pairs: Vec<(Value, Value)>) -> TxsResponse {
    let (tx_responses, txs): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
    serde_json::from_value(json!({ "tx_responses": tx_responses, "txs": txs })).unwrap()
}

/// Destination-chain transaction carrying a `recv_packet` event.
pub fn recv_tx(txhash: &str, packet_sequence: &str) -> (Value, Value) {
    (
        json!({
            "txhash": txhash,
            "height": "500",
            "timestamp": "2024-03-10T12:30:00Z",
            "logs": [{ "events": [{ "type": "recv_packet", "attributes": [
                { "key": "packet_sequence", "value": packet_sequence },
                { "key": "packet_data_hex", "value": "7b7d" }
            ]}]}]
        }),
        json!({ "body": { "messages": [{ "@type": "/ibc.core.channel.v1.MsgRecvPacket" }] } }),
    )
}

/// Hub acknowledgement transaction for packet `sequence` on channel-3.
pub fn ack_tx(txhash: &str, sequence: &str, transfer_id: Option<&str>) -> (Value, Value) {
    let mut events = vec![json!({ "type": "acknowledge_packet", "attributes": [
        { "key": "packet_sequence", "value": sequence },
        { "key": "packet_src_channel", "value": "channel-3" },
        { "key": "packet_dst_channel", "value": "channel-208" },
        { "key": "packet_timeout_height", "value": "0-0" },
        { "key": "packet_data_hex", "value": "7b7d" }
    ]})];
    if let Some(id) = transfer_id {
        events.push(json!({
            "type": "axelar.axelarnet.v1beta1.IBCTransferCompleted",
            "attributes": [{ "key": "id", "value": format!("\"{id}\"") }]
        }));
    }
    (
        json!({
            "txhash": txhash,
            "height": "1000",
            "timestamp": "2024-03-10T12:00:00Z",
            "logs": [{ "events": events }]
        }),
        json!({ "body": { "messages": [{
            "@type": "/ibc.core.channel.v1.MsgAcknowledgement",
            "proof_height": { "revision_number": "1", "revision_height": "501" }
        }]}}),
    )
}

/// Transfer document awaiting its acknowledgement.
pub fn sent_transfer(sequence: u64) -> Value {
    json!({
        "source": {
            "id": "0xDEP",
            "recipient_address": "osmo1Recipient",
            "recipient_chain": "osmosis",
            "created_at": { "ms": 1_710_072_000_000_i64 }
        },
        "ibc_send": {
            "packet_sequence": sequence,
            "packet_src_channel": "channel-3",
            "packet_dst_channel": "channel-208",
            "packet_timeout_height": "0-0",
            "created_at": { "ms": 1_710_072_060_000_i64 }
        }
    })
}
