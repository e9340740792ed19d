//! Turns a batch of hub transactions into typed records.
//!
//! Extraction is a pure function of each transaction and the chain table:
//! a transaction that does not match any known kind, or is missing parts of
//! the expected shape, contributes fewer records and never affects its
//! neighbours.

use itertools::Itertools;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::{
    chains::ChainsTable,
    granularity::Granularity,
    metrics,
    settings::ProcessorSettings,
    types::{
        de::{scalar_to_string, value_as_u64},
        lcd::{inner_message, short_type, type_url, Event},
        AckRecord, DepositAddress, Heartbeat, Transaction, TxsResponse, VoteKind, VoteRecord,
    },
    votes::{parse_poll_id, VoteContext, VotePayload},
};

const HEARTBEAT_TYPE: &str = "HeartBeatRequest";
const LINK_TYPE: &str = "LinkRequest";
const ROUTE_IBC_TYPE: &str = "RouteIBCTransfersRequest";
const ACK_TYPE: &str = "MsgAcknowledgement";
const ACK_EVENT: &str = "acknowledge_packet";
const TRANSFER_COMPLETED_EVENT: &str = "IBCTransferCompleted";
const NOT_ENOUGH_VOTES: &str = "not enough votes";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedBatch {
    pub heartbeats: Vec<Heartbeat>,
    pub deposit_addresses: Vec<DepositAddress>,
    pub votes: Vec<VoteRecord>,
    pub acks: Vec<AckRecord>,
    /// Hub transactions that routed pending IBC transfers.
    pub routed_ibc_txhashes: Vec<String>,
}

impl ExtractedBatch {
    pub fn is_empty(&self) -> bool {
        self.heartbeats.is_empty()
            && self.deposit_addresses.is_empty()
            && self.votes.is_empty()
            && self.acks.is_empty()
            && self.routed_ibc_txhashes.is_empty()
    }
}

pub struct EventExtractor {
    chains: Arc<ChainsTable>,
    settings: ProcessorSettings,
}

/// Type urls of a message and of the message it wraps, if any.
fn message_types(message: &Value) -> impl Iterator<Item = &str> {
    type_url(message)
        .into_iter()
        .chain(inner_message(message).and_then(type_url))
}

fn has_message_type(tx: &Transaction, needle: &str) -> bool {
    tx.messages
        .iter()
        .any(|m| message_types(m).any(|t| t.contains(needle)))
}

/// Attribute value with surrounding JSON quotes removed.
fn attribute(event: Option<&Event>, key: &str) -> Option<String> {
    event
        .and_then(|e| e.attribute(key))
        .map(|v| v.trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

fn text_field(message: &Value, key: &str) -> Option<String> {
    message.get(key).and_then(scalar_to_string)
}

impl EventExtractor {
    pub fn new(chains: Arc<ChainsTable>, settings: ProcessorSettings) -> Self {
        Self { chains, settings }
    }

    pub fn extract(&self, response: &TxsResponse) -> ExtractedBatch {
        let mut batch = ExtractedBatch::default();
        for tx in response.transactions() {
            self.extract_transaction(&tx, &mut batch);
        }

        for (kind, count) in [
            ("heartbeat", batch.heartbeats.len()),
            ("link", batch.deposit_addresses.len()),
            ("vote", batch.votes.len()),
            ("ack", batch.acks.len()),
            ("route_ibc", batch.routed_ibc_txhashes.len()),
        ] {
            metrics::RECORDS_EXTRACTED
                .with_label_values(&[kind])
                .inc_by(count as u64);
        }
        batch
    }

    /// Appends every record found in `tx`: at most one heartbeat, link and
    /// acknowledgement, and one vote per wrapped vote message.
    pub fn extract_transaction(&self, tx: &Transaction, batch: &mut ExtractedBatch) {
        if tx.is_success() {
            batch.heartbeats.extend(self.heartbeat(tx));
            batch.deposit_addresses.extend(self.deposit_address(tx));
            batch.acks.extend(self.ack(tx));
            if has_message_type(tx, ROUTE_IBC_TYPE) {
                batch.routed_ibc_txhashes.push(tx.txhash.clone());
            }
        }
        batch.votes.extend(self.votes(tx));
    }

    pub fn heartbeat(&self, tx: &Transaction) -> Option<Heartbeat> {
        if !tx.is_success() || !has_message_type(tx, HEARTBEAT_TYPE) {
            return None;
        }
        let sender = tx.messages.first().and_then(|m| {
            text_field(m, "sender").or_else(|| inner_message(m).and_then(|i| text_field(i, "sender")))
        })?;
        let key_ids = tx
            .messages
            .iter()
            .filter_map(inner_message)
            .filter_map(|inner| inner.get("key_ids").and_then(Value::as_array))
            .flatten()
            .filter_map(scalar_to_string)
            .unique()
            .collect();

        let blocks = self.settings.num_blocks_per_heartbeat.max(1);
        Some(Heartbeat {
            txhash: tx.txhash.clone(),
            height: tx.height,
            period_height: tx.height - tx.height % blocks + self.settings.fraction_heartbeat_block,
            timestamp: tx.timestamp_ms().unwrap_or_default(),
            sender,
            key_ids,
            signatures: tx.signatures.clone(),
        })
    }

    pub fn deposit_address(&self, tx: &Transaction) -> Option<DepositAddress> {
        if !tx.is_success() {
            return None;
        }
        let message = tx.messages.iter().find_map(|m| {
            if type_url(m).is_some_and(|t| t.contains(LINK_TYPE)) {
                Some(m)
            } else {
                inner_message(m).filter(|i| type_url(i).is_some_and(|t| t.contains(LINK_TYPE)))
            }
        })?;
        let link_event = tx.events().find(|e| e.kind == "link");

        let type_url = type_url(message).unwrap_or_default();
        let sender = text_field(message, "sender");
        let chain = text_field(message, "chain");
        let recipient_chain = text_field(message, "recipient_chain");
        let recipient_address = text_field(message, "recipient_addr");
        let deposit_address = attribute(link_event, "depositAddress");

        let sender_cosmos_chain = sender
            .as_deref()
            .and_then(|s| self.chains.cosmos_chain_by_address(s));
        let mut source_chain = attribute(link_event, "sourceChain");
        if source_chain.as_deref().is_some_and(|c| self.chains.is_hub(c)) {
            if let Some(c) = sender_cosmos_chain {
                source_chain = Some(c.current_id().to_string());
            }
        }
        let original_sender_chain = source_chain
            .as_deref()
            .or(chain.as_deref())
            .and_then(|c| self.chains.normalize_original_chain(c));
        let sender_chain = sender_cosmos_chain
            .map(|c| c.id.as_str())
            .or(source_chain.as_deref())
            .or(chain.as_deref())
            .and_then(|c| self.chains.normalize_chain(c));

        let mut rest: Map<String, Value> = message.as_object().cloned().unwrap_or_default();
        for key in ["@type", "sender", "chain", "recipient_addr"]
            .iter()
            .chain(DepositAddress::NAMED_FIELDS)
        {
            rest.remove(*key);
        }
        let kind = type_url
            .split('.')
            .next()
            .map(|head| head.replace('/', ""))
            .filter(|k| !k.is_empty());

        Some(DepositAddress {
            id: deposit_address.clone().unwrap_or_else(|| tx.txhash.clone()),
            kind,
            txhash: tx.txhash.clone(),
            height: tx.height,
            created_at: tx
                .timestamp
                .map(Granularity::from_datetime)
                .unwrap_or_default(),
            sender_chain,
            original_sender_chain,
            sender_address: sender,
            original_recipient_chain: recipient_chain
                .as_deref()
                .and_then(|c| self.chains.normalize_original_chain(c)),
            recipient_chain: recipient_chain
                .as_deref()
                .and_then(|c| self.chains.normalize_chain(c)),
            recipient_address,
            deposit_address,
            price: None,
            message: rest,
        })
    }

    pub fn votes(&self, tx: &Transaction) -> Vec<VoteRecord> {
        let unconfirmed = tx.log_contains(NOT_ENOUGH_VOTES);
        if !tx.is_success() && !unconfirmed {
            return vec![];
        }

        let mut records = vec![];
        for (i, message) in tx.messages.iter().enumerate() {
            let payload = inner_message(message).unwrap_or(message);
            let Some(kind) = type_url(payload)
                .map(short_type)
                .and_then(VoteKind::from_short_type)
            else {
                continue;
            };
            let events = tx.logs.get(i).map(|l| l.events.as_slice()).unwrap_or_default();
            match self.vote(tx, kind, payload, events, unconfirmed) {
                Some(record) => records.push(record),
                None => tracing::debug!(txhash = %tx.txhash, index = i, "vote message without poll id"),
            }
        }
        records
    }

    fn vote(
        &self,
        tx: &Transaction,
        kind: VoteKind,
        payload: &Value,
        events: &[Event],
        unconfirmed: bool,
    ) -> Option<VoteRecord> {
        let confirmation_event = events.iter().find(|e| e.kind.contains("depositConfirmation"));
        let vote_event = events.iter().find(|e| e.kind.contains("vote"));

        let poll_id = text_field(payload, "poll_id")
            .or_else(|| {
                payload
                    .get("poll_key")
                    .and_then(poll_id_from)
                    .or_else(|| {
                        [confirmation_event, vote_event]
                            .into_iter()
                            .flatten()
                            .find_map(|e| e.attribute("poll"))
                            .and_then(|raw| poll_id_from(&Value::String(raw.to_string())))
                    })
            })?;

        let parsed = VotePayload::parse(kind, payload);
        let outcome = parsed.outcome(VoteContext {
            confirmation_event: confirmation_event.is_some(),
            confirm_action: attribute(confirmation_event, "action").as_deref() == Some("confirm"),
            vote_event: vote_event.is_some(),
        });

        let sender_chain = parsed
            .chain()
            .map(String::from)
            .or_else(|| match kind {
                VoteKind::VoteConfirmDeposit => attribute(confirmation_event, "sourceChain")
                    .or_else(|| attribute(confirmation_event, "chain")),
                VoteKind::Vote => None,
            })
            .or_else(|| {
                self.chains
                    .evm_chain_prefixing(&poll_id)
                    .map(|c| c.id.clone())
            })
            .and_then(|c| self.chains.normalize_chain(&c));

        let (poll_tx_id, poll_deposit) = parse_poll_id(&poll_id, sender_chain.as_deref());
        let transaction_id = parsed
            .transaction_id()
            .map(String::from)
            .or_else(|| attribute(confirmation_event, "txID"))
            .or(poll_tx_id)
            .filter(|id| *id != poll_id);
        let deposit_address = parsed
            .deposit_address()
            .map(String::from)
            .or_else(|| attribute(confirmation_event, "depositAddress"))
            .or(poll_deposit);

        Some(VoteRecord {
            txhash: tx.txhash.clone(),
            kind: Some(kind),
            status_code: tx.code,
            height: tx.height,
            created_at: tx
                .timestamp
                .map(Granularity::from_datetime)
                .unwrap_or_default(),
            voter: text_field(payload, "sender").unwrap_or_default(),
            sender_chain,
            recipient_chain: attribute(confirmation_event, "destinationChain")
                .and_then(|c| self.chains.normalize_chain(&c)),
            transaction_id,
            deposit_address,
            transfer_id: attribute(confirmation_event, "transferID")
                .and_then(|id| value_as_u64(&Value::String(id))),
            participants: None,
            vote: outcome.vote,
            confirmation: outcome.confirmation,
            late: outcome.late,
            unconfirmed,
            poll_id,
        })
    }

    pub fn ack(&self, tx: &Transaction) -> Option<AckRecord> {
        if !tx.is_success() {
            return None;
        }
        let (log, ack_event) = tx
            .logs
            .iter()
            .find_map(|log| log.event(ACK_EVENT).map(|e| (log, e)))?;
        let attributes = ack_event.flatten();
        attributes.get("packet_sequence")?;

        let transfer_id = log
            .events
            .iter()
            .find(|e| e.short_kind().eq_ignore_ascii_case(TRANSFER_COMPLETED_EVENT))
            .and_then(|e| attribute(Some(e), "id"));
        let height = tx
            .messages
            .iter()
            .find(|m| type_url(m).is_some_and(|t| short_type(t) == ACK_TYPE))
            .and_then(|m| m.get("proof_height"))
            .and_then(|h| h.get("revision_height"))
            .and_then(value_as_u64)
            .and_then(|h| h.checked_sub(1))
            .filter(|h| *h > 0);

        Some(AckRecord {
            txhash: tx.txhash.clone(),
            height,
            transfer_id,
            attributes,
        })
    }
}

/// `id` of a poll key given either as an object or as its JSON text.
fn poll_id_from(value: &Value) -> Option<String> {
    match value {
        Value::Object(_) => value.get("id").and_then(scalar_to_string),
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_object)
            .and_then(|v| v.get("id").and_then(scalar_to_string)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{ChainMetadata, ChainsConfig};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn extractor() -> EventExtractor {
        let chains = ChainsTable::new(ChainsConfig {
            hub: ChainMetadata {
                prefix_address: Some("axelar".into()),
                ..ChainMetadata::new("axelarnet")
            },
            evm: vec![ChainMetadata::new("ethereum")],
            cosmos: vec![ChainMetadata {
                prefix_address: Some("osmo".into()),
                ..ChainMetadata::new("osmosis")
            }],
        })
        .unwrap();
        EventExtractor::new(Arc::new(chains), ProcessorSettings::default())
    }

    fn batch(tx_response: Value, tx: Value) -> TxsResponse {
        serde_json::from_value(json!({ "tx_responses": [tx_response], "txs": [tx] })).unwrap()
    }

    #[test]
    fn heartbeat_period_and_keys() {
        let response = batch(
            json!({ "txhash": "HB", "height": "1234", "code": 0, "timestamp": "2023-01-01T00:00:00Z" }),
            json!({
                "body": { "messages": [{
                    "@type": "/axelar.reward.v1beta1.RefundMsgRequest",
                    "sender": "axelar1val",
                    "inner_message": { "@type": "/axelar.tss.v1beta1.HeartBeatRequest", "key_ids": ["k1", "k2", "k1"] }
                }]},
                "signatures": ["sig"]
            }),
        );

        let extracted = extractor().extract(&response);
        assert_eq!(extracted.heartbeats.len(), 1);
        let hb = &extracted.heartbeats[0];
        assert_eq!(hb.period_height, 1201);
        assert_eq!(hb.key(), "axelar1val_1201");
        assert_eq!(hb.key_ids, vec!["k1".to_string(), "k2".to_string()]);
        assert_eq!(hb.signatures, vec!["sig".to_string()]);
    }

    #[test]
    fn failed_transactions_yield_nothing_but_unconfirmed_votes() {
        let response: TxsResponse = serde_json::from_value(json!({
            "tx_responses": [
                { "txhash": "F1", "height": "10", "code": 5, "raw_log": "out of gas" },
                { "txhash": "F2", "height": "10", "code": 1, "raw_log": "failed: not enough votes to confirm" }
            ],
            "txs": [
                { "body": { "messages": [{ "@type": "/axelar.tss.v1beta1.HeartBeatRequest", "sender": "x" }] } },
                { "body": { "messages": [{
                    "@type": "/axelar.reward.v1beta1.RefundMsgRequest",
                    "inner_message": {
                        "@type": "/axelar.evm.v1beta1.VoteConfirmDepositRequest",
                        "sender": "axelar1voter",
                        "chain": "Ethereum",
                        "poll_id": "ethereum_0xtx_0xdep",
                        "confirmed": true
                    }
                }]}}
            ]
        }))
        .unwrap();

        let extracted = extractor().extract(&response);
        assert!(extracted.heartbeats.is_empty());
        assert_eq!(extracted.votes.len(), 1);
        let vote = &extracted.votes[0];
        assert!(vote.unconfirmed);
        assert_eq!(vote.status(), "failed");
        assert_eq!(vote.transaction_id.as_deref(), Some("0xtx"));
        assert_eq!(vote.deposit_address.as_deref(), Some("0xdep"));
        assert_eq!(vote.sender_chain.as_deref(), Some("ethereum"));
    }

    #[test]
    fn link_resolves_source_chain_from_sender_prefix() {
        let response = batch(
            json!({
                "txhash": "LINK",
                "height": "20",
                "timestamp": "2023-05-01T00:00:00Z",
                "logs": [{ "events": [{ "type": "link", "attributes": [
                    { "key": "sourceChain", "value": "Axelarnet" },
                    { "key": "depositAddress", "value": "axelar1deposit" }
                ]}]}]
            }),
            json!({ "body": { "messages": [{
                "@type": "/axelar.axelarnet.v1beta1.LinkRequest",
                "sender": "osmo1sender",
                "recipient_addr": "0xRecipient",
                "recipient_chain": "Ethereum",
                "asset": "uosmo"
            }]}}),
        );

        let extracted = extractor().extract(&response);
        let link = &extracted.deposit_addresses[0];
        assert_eq!(link.id, "axelar1deposit");
        assert_eq!(link.kind.as_deref(), Some("axelar"));
        assert_eq!(link.sender_chain.as_deref(), Some("osmosis"));
        assert_eq!(link.original_sender_chain.as_deref(), Some("osmosis"));
        assert_eq!(link.recipient_chain.as_deref(), Some("ethereum"));
        assert_eq!(link.recipient_address.as_deref(), Some("0xRecipient"));
        assert_eq!(link.sender_address.as_deref(), Some("osmo1sender"));
        assert_eq!(link.denom(), Some("uosmo"));
        assert!(!link.message.contains_key("sender"));
    }

    #[test]
    fn ack_reads_packet_and_transfer_id() {
        let response = batch(
            json!({
                "txhash": "ACK",
                "height": "30",
                "logs": [{ "events": [
                    { "type": "acknowledge_packet", "attributes": [
                        { "key": "packet_sequence", "value": "77" },
                        { "key": "packet_src_channel", "value": "channel-3" },
                        { "key": "packet_dst_channel", "value": "channel-208" },
                        { "key": "packet_timeout_height", "value": "0-0" },
                        { "key": "", "value": "junk" }
                    ]},
                    { "type": "axelar.axelarnet.v1beta1.IBCTransferCompleted", "attributes": [
                        { "key": "id", "value": "\"15\"" }
                    ]}
                ]}]
            }),
            json!({ "body": { "messages": [{
                "@type": "/ibc.core.channel.v1.MsgAcknowledgement",
                "proof_height": { "revision_number": "1", "revision_height": "5000" }
            }]}}),
        );

        let extracted = extractor().extract(&response);
        let ack = &extracted.acks[0];
        assert_eq!(ack.packet_sequence(), Some("77"));
        assert_eq!(ack.transfer_id.as_deref(), Some("15"));
        assert_eq!(ack.height, Some(4999));
        assert_eq!(ack.attributes.len(), 4);
    }

    #[test]
    fn ack_without_proof_height_has_no_height() {
        let response = batch(
            json!({ "txhash": "ACK", "height": "30", "logs": [{ "events": [
                { "type": "acknowledge_packet", "attributes": [{ "key": "packet_sequence", "value": "1" }] }
            ]}]}),
            json!({ "body": { "messages": [{ "@type": "/ibc.core.channel.v1.MsgAcknowledgement" }] } }),
        );
        assert_eq!(extractor().extract(&response).acks[0].height, None);
    }

    #[test]
    fn vote_poll_id_from_event_attribute() {
        let response = batch(
            json!({
                "txhash": "V",
                "height": "40",
                "logs": [{ "events": [
                    { "type": "depositConfirmation", "attributes": [
                        { "key": "poll", "value": "{\"chain\":\"Ethereum\",\"id\":\"ethereum_0xabc_0xdef\"}" },
                        { "key": "action", "value": "confirm" },
                        { "key": "transferID", "value": "\"12\"" },
                        { "key": "destinationChain", "value": "\"Osmosis\"" }
                    ]}
                ]}]
            }),
            json!({ "body": { "messages": [{
                "@type": "/axelar.reward.v1beta1.RefundMsgRequest",
                "inner_message": {
                    "@type": "/axelar.evm.v1beta1.VoteConfirmDepositRequest",
                    "sender": "axelar1voter",
                    "confirmed": true
                }
            }]}}),
        );

        let vote = extractor().extract(&response).votes.remove(0);
        assert_eq!(vote.poll_id, "ethereum_0xabc_0xdef");
        assert!(vote.vote);
        assert!(vote.confirmation);
        assert_eq!(vote.sender_chain.as_deref(), Some("ethereum"));
        assert_eq!(vote.recipient_chain.as_deref(), Some("osmosis"));
        assert_eq!(vote.transfer_id, Some(12));
        assert_eq!(vote.transaction_id.as_deref(), Some("0xabc"));
        assert_eq!(vote.voter, "axelar1voter");
    }

    #[test]
    fn routed_ibc_transfers_are_collected() {
        let response = batch(
            json!({ "txhash": "ROUTE", "height": "50" }),
            json!({ "body": { "messages": [{ "@type": "/axelar.axelarnet.v1beta1.RouteIBCTransfersRequest" }] } }),
        );
        assert_eq!(extractor().extract(&response).routed_ibc_txhashes, vec!["ROUTE".to_string()]);
    }
}
