//! Finds existing documents that a new observation belongs to.
//!
//! Every lookup is best-effort: a missing document and a failing store both
//! end the lookup without a result, but are reported separately through
//! [`Probe`] so that callers and metrics can tell them apart.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::{
    metrics,
    store::{Collection, DocumentStore, Query, ReadOptions, Sort, StoreError},
    types::{de::scalar_to_string, AckRecord, Transfer},
};

/// Outcome of a single store lookup.
#[derive(Debug)]
pub enum Probe<T> {
    Found(T),
    Miss,
    Transient(StoreError),
}

impl<T> Probe<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Probe::Found(value) => Some(value),
            Probe::Miss | Probe::Transient(_) => None,
        }
    }

    /// Keeps a found value only when `f` yields something.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Option<U>) -> Probe<U> {
        match self {
            Probe::Found(value) => f(value).map_or(Probe::Miss, Probe::Found),
            Probe::Miss => Probe::Miss,
            Probe::Transient(err) => Probe::Transient(err),
        }
    }
}

/// Fields of a vote that may be recovered from documents written earlier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoteBackfill {
    pub transaction_id: Option<String>,
    pub deposit_address: Option<String>,
    pub participants: Option<Value>,
    pub sender_chain: Option<String>,
}

impl VoteBackfill {
    /// Copies every field of `other` that is still missing here.
    pub fn fill_missing(&mut self, other: VoteBackfill) {
        fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
            if slot.is_none() {
                *slot = value;
            }
        }
        fill(&mut self.transaction_id, other.transaction_id);
        fill(&mut self.deposit_address, other.deposit_address);
        fill(&mut self.participants, other.participants);
        fill(&mut self.sender_chain, other.sender_chain);
    }
}

/// Vote backfill lookups, in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteLookup {
    TransferByPollId,
    VoteByPollId,
    PollById,
    DepositAddressByAddress,
}

pub const VOTE_LOOKUP_ORDER: [VoteLookup; 4] = [
    VoteLookup::TransferByPollId,
    VoteLookup::VoteByPollId,
    VoteLookup::PollById,
    VoteLookup::DepositAddressByAddress,
];

impl VoteLookup {
    /// Whether the lookup can still contribute anything to `known`.
    pub fn is_needed(&self, known: &VoteBackfill) -> bool {
        match self {
            VoteLookup::TransferByPollId => {
                known.transaction_id.is_none()
                    || known.deposit_address.is_none()
                    || known.participants.is_none()
            }
            VoteLookup::VoteByPollId => known.transaction_id.is_none(),
            VoteLookup::PollById => known.sender_chain.is_none(),
            VoteLookup::DepositAddressByAddress => {
                known.sender_chain.is_none() && known.deposit_address.is_some()
            }
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            VoteLookup::TransferByPollId => "transfer_by_poll_id",
            VoteLookup::VoteByPollId => "vote_by_poll_id",
            VoteLookup::PollById => "poll_by_id",
            VoteLookup::DepositAddressByAddress => "deposit_address_by_address",
        }
    }
}

/// Packet fields an acknowledgement must carry to be matched to a send.
const ACK_PACKET_FIELDS: [&str; 4] = [
    "packet_timeout_height",
    "packet_sequence",
    "packet_src_channel",
    "packet_dst_channel",
];

const TRANSFER_CREATED_AT: &str = "source.created_at.ms";
const CREATED_AT: &str = "created_at.ms";

pub struct Correlator {
    store: Arc<dyn DocumentStore>,
}

impl Correlator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn first(
        &self,
        collection: Collection,
        query: Query,
        sort: Sort,
    ) -> Probe<Value> {
        match self
            .store
            .read(collection, &query, &ReadOptions::first(sort))
            .await
        {
            Ok(response) => response.data.into_iter().next().map_or(Probe::Miss, Probe::Found),
            Err(err) => {
                tracing::warn!(%collection, err = ?err, "correlation lookup failed");
                metrics::STORE_ERRORS
                    .with_label_values(&[collection.as_str(), "read"])
                    .inc();
                Probe::Transient(err)
            }
        }
    }

    async fn by_id(&self, collection: Collection, id: &str) -> Probe<Value> {
        match self.store.get(collection, id).await {
            Ok(Some(doc)) => Probe::Found(doc),
            Ok(None) => Probe::Miss,
            Err(err) => {
                tracing::warn!(%collection, id, err = ?err, "correlation lookup failed");
                metrics::STORE_ERRORS
                    .with_label_values(&[collection.as_str(), "get"])
                    .inc();
                Probe::Transient(err)
            }
        }
    }

    /// Most recent transfer whose outbound packet matches the
    /// acknowledgement. An acknowledgement missing any packet field is
    /// never matched.
    pub async fn transfer_for_ack(&self, ack: &AckRecord) -> Probe<Transfer> {
        let mut query = Query::bool();
        for field in ACK_PACKET_FIELDS {
            let Some(value) = ack.attribute(field) else {
                tracing::debug!(txhash = %ack.txhash, field, "acknowledgement lacks packet field");
                let probe = Probe::Miss;
                record_probe("transfer_for_ack", &probe);
                return probe;
            };
            query = query.must(Query::match_value(format!("ibc_send.{field}"), value));
        }

        query = match &ack.transfer_id {
            Some(transfer_id) => query
                .should(Query::match_value("confirm_deposit.transfer_id", transfer_id.as_str()))
                .should(Query::match_value("vote.transfer_id", transfer_id.as_str()))
                .should(Query::match_value("transfer_id", transfer_id.as_str())),
            None => query
                .should(Query::match_value("ibc_send.ack_txhash", ack.txhash.as_str()))
                .should(
                    Query::bool()
                        .must_not(Query::exists("ibc_send.ack_txhash"))
                        .build(),
                ),
        };
        let query = query.minimum_should_match(1).build();

        let probe = self
            .first(Collection::Transfers, query, Sort::desc(TRANSFER_CREATED_AT))
            .await;
        record_probe("transfer_for_ack", &probe);
        probe.and_then(decode::<Transfer>)
    }

    /// Recovers missing vote fields from earlier documents of the same
    /// poll. Lookups run in [`VOTE_LOOKUP_ORDER`]; one that is not needed
    /// any more is skipped and a failing one is passed over.
    pub async fn backfill_vote(&self, poll_id: &str, known: &mut VoteBackfill) {
        for lookup in VOTE_LOOKUP_ORDER {
            if !lookup.is_needed(known) {
                continue;
            }
            let probe = self.lookup(lookup, poll_id, known).await;
            record_probe(lookup.as_str(), &probe);
            if let Probe::Found(found) = probe {
                known.fill_missing(found);
            }
        }
    }

    async fn lookup(
        &self,
        lookup: VoteLookup,
        poll_id: &str,
        known: &VoteBackfill,
    ) -> Probe<VoteBackfill> {
        match lookup {
            VoteLookup::TransferByPollId => {
                let query = Query::bool()
                    .must(Query::match_value("confirm_deposit.poll_id", poll_id))
                    .must_not(Query::match_value("confirm_deposit.transaction_id", poll_id))
                    .build();
                self.first(Collection::Transfers, query, Sort::desc(TRANSFER_CREATED_AT))
                    .await
                    .and_then(|doc| {
                        let confirm = doc.get("confirm_deposit")?;
                        Some(VoteBackfill {
                            transaction_id: string_field(confirm, "transaction_id"),
                            deposit_address: string_field(confirm, "deposit_address"),
                            participants: confirm.get("participants").filter(|p| !p.is_null()).cloned(),
                            sender_chain: None,
                        })
                    })
            }
            VoteLookup::VoteByPollId => {
                let query = Query::bool()
                    .must(Query::match_value("poll_id", poll_id))
                    .must(Query::exists("transaction_id"))
                    .must_not(Query::match_value("transaction_id", poll_id))
                    .build();
                self.first(Collection::Votes, query, Sort::desc(CREATED_AT))
                    .await
                    .and_then(|doc| {
                        string_field(&doc, "transaction_id").map(|transaction_id| VoteBackfill {
                            transaction_id: Some(transaction_id),
                            ..Default::default()
                        })
                    })
            }
            VoteLookup::PollById => self.by_id(Collection::Polls, poll_id).await.and_then(|doc| {
                string_field(&doc, "sender_chain").map(|sender_chain| VoteBackfill {
                    sender_chain: Some(sender_chain),
                    ..Default::default()
                })
            }),
            VoteLookup::DepositAddressByAddress => {
                let Some(address) = known.deposit_address.as_deref() else {
                    return Probe::Miss;
                };
                let query = Query::bool()
                    .must(Query::match_value("deposit_address", address))
                    .build();
                self.first(Collection::DepositAddresses, query, Sort::desc(CREATED_AT))
                    .await
                    .and_then(|doc| {
                        string_field(&doc, "sender_chain").map(|sender_chain| VoteBackfill {
                            sender_chain: Some(sender_chain),
                            ..Default::default()
                        })
                    })
            }
        }
    }

    /// Stored deposit-address document, used to keep a previously known
    /// price when the price service is unavailable.
    pub async fn deposit_address(&self, id: &str) -> Probe<Value> {
        self.by_id(Collection::DepositAddresses, id).await
    }
}

fn string_field(doc: &Value, key: &str) -> Option<String> {
    doc.get(key).and_then(scalar_to_string)
}

fn decode<T: DeserializeOwned>(doc: Value) -> Option<T> {
    serde_json::from_value(doc)
        .inspect_err(|err| tracing::debug!(err = ?err, "skipping undecodable document"))
        .ok()
}

fn record_probe<T>(lookup: &str, probe: &Probe<T>) {
    let outcome = match probe {
        Probe::Found(_) => "found",
        Probe::Miss => "miss",
        Probe::Transient(_) => "error",
    };
    metrics::CORRELATION_LOOKUPS
        .with_label_values(&[lookup, outcome])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreRequest};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn ack(transfer_id: Option<&str>) -> AckRecord {
        AckRecord {
            txhash: "ACK1".into(),
            height: Some(99),
            transfer_id: transfer_id.map(String::from),
            attributes: BTreeMap::from([
                ("packet_sequence".to_string(), "7".to_string()),
                ("packet_src_channel".to_string(), "channel-3".to_string()),
                ("packet_dst_channel".to_string(), "channel-208".to_string()),
                ("packet_timeout_height".to_string(), "0-0".to_string()),
            ]),
        }
    }

    fn transfer(id: &str, ms: i64, ack_txhash: Option<&str>) -> Value {
        json!({
            "source": { "id": id, "recipient_address": "osmo1rcpt", "created_at": { "ms": ms } },
            "ibc_send": {
                "packet_sequence": 7,
                "packet_src_channel": "channel-3",
                "packet_dst_channel": "channel-208",
                "packet_timeout_height": "0-0",
                "ack_txhash": ack_txhash
            }
        })
    }

    #[tokio::test]
    async fn ack_prefers_latest_unacknowledged_transfer() {
        let store = Arc::new(MemoryStore::new());
        store.insert(Collection::Transfers, "old_osmo1rcpt", transfer("old", 1, None));
        store.insert(Collection::Transfers, "new_osmo1rcpt", transfer("new", 2, None));
        store.insert(
            Collection::Transfers,
            "done_osmo1rcpt",
            transfer("done", 3, Some("OTHER")),
        );
        let correlator = Correlator::new(store);

        let found = correlator.transfer_for_ack(&ack(None)).await.found().unwrap();
        assert_eq!(found.key().as_deref(), Some("new_osmo1rcpt"));
    }

    #[tokio::test]
    async fn ack_matches_by_transfer_id() {
        let store = Arc::new(MemoryStore::new());
        let mut doc = transfer("a", 1, Some("OTHER"));
        doc["confirm_deposit"] = json!({ "transfer_id": 15 });
        store.insert(Collection::Transfers, "a_osmo1rcpt", doc);
        store.insert(Collection::Transfers, "b_osmo1rcpt", transfer("b", 2, None));
        let correlator = Correlator::new(store);

        let found = correlator
            .transfer_for_ack(&ack(Some("15")))
            .await
            .found()
            .unwrap();
        assert_eq!(found.key().as_deref(), Some("a_osmo1rcpt"));
    }

    #[tokio::test]
    async fn ack_missing_a_packet_field_is_not_matched() {
        let store = Arc::new(MemoryStore::new());
        let mut other_channel = transfer("x", 1, None);
        other_channel["ibc_send"]["packet_src_channel"] = json!("channel-99");
        store.insert(Collection::Transfers, "x_osmo1", other_channel);
        let correlator = Correlator::new(store.clone());

        let mut partial = ack(None);
        partial.attributes.retain(|key, _| key == "packet_sequence");

        assert!(correlator.transfer_for_ack(&partial).await.found().is_none());
        assert_eq!(store.lookups(Collection::Transfers), 0);
    }

    #[tokio::test]
    async fn backfill_prefers_most_recent_transfer_of_the_poll() {
        let store = Arc::new(MemoryStore::new());
        for (key, ms, tx) in [("a_old", 1, "OLD"), ("b_new", 100, "NEW")] {
            store.insert(
                Collection::Transfers,
                key,
                json!({
                    "source": { "created_at": { "ms": ms } },
                    "confirm_deposit": { "poll_id": "p1", "transaction_id": tx }
                }),
            );
        }
        let correlator = Correlator::new(store);

        let mut known = VoteBackfill::default();
        correlator.backfill_vote("p1", &mut known).await;

        assert_eq!(known.transaction_id.as_deref(), Some("NEW"));
    }

    #[tokio::test]
    async fn backfill_prefers_most_recent_vote_and_deposit_address() {
        let store = Arc::new(MemoryStore::new());
        for (key, ms, tx) in [("p1_a", 5, "0xold"), ("p1_b", 50, "0xnew")] {
            store.insert(
                Collection::Votes,
                key,
                json!({ "poll_id": "p1", "transaction_id": tx, "created_at": { "ms": ms } }),
            );
        }
        for (key, ms, chain) in [("d1", 10, "polygon"), ("d2", 20, "avalanche")] {
            store.insert(
                Collection::DepositAddresses,
                key,
                json!({ "deposit_address": "0xdep", "sender_chain": chain, "created_at": { "ms": ms } }),
            );
        }
        let correlator = Correlator::new(store);

        let mut known = VoteBackfill {
            deposit_address: Some("0xdep".into()),
            participants: Some(json!([])),
            ..Default::default()
        };
        correlator.backfill_vote("p1", &mut known).await;

        assert_eq!(known.transaction_id.as_deref(), Some("0xnew"));
        assert_eq!(known.sender_chain.as_deref(), Some("avalanche"));
    }

    #[tokio::test]
    async fn backfill_runs_lookups_in_order_and_stops_when_complete() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            Collection::Transfers,
            "t",
            json!({ "confirm_deposit": {
                "poll_id": "ethereum_0xtx_1",
                "transaction_id": "0xtx",
                "deposit_address": "0xdep",
                "participants": ["v1", "v2"]
            }}),
        );
        store.insert(
            Collection::Polls,
            "ethereum_0xtx_1",
            json!({ "sender_chain": "ethereum" }),
        );
        let correlator = Correlator::new(store.clone());

        let mut known = VoteBackfill::default();
        correlator.backfill_vote("ethereum_0xtx_1", &mut known).await;

        assert_eq!(
            known,
            VoteBackfill {
                transaction_id: Some("0xtx".into()),
                deposit_address: Some("0xdep".into()),
                participants: Some(json!(["v1", "v2"])),
                sender_chain: Some("ethereum".into()),
            }
        );
        let order: Vec<_> = store
            .journal()
            .into_iter()
            .map(|r| match r {
                StoreRequest::Read { collection, .. } | StoreRequest::Get { collection, .. } => {
                    collection
                }
                StoreRequest::Write { collection, .. } => collection,
            })
            .collect();
        assert_eq!(order, vec![Collection::Transfers, Collection::Polls]);
    }

    #[tokio::test]
    async fn failing_lookup_falls_through_to_next() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(Collection::Polls, true);
        store.insert(
            Collection::DepositAddresses,
            "0xdep",
            json!({ "deposit_address": "0xDEP", "sender_chain": "avalanche" }),
        );
        let correlator = Correlator::new(store.clone());

        let mut known = VoteBackfill {
            transaction_id: Some("0xtx".into()),
            deposit_address: Some("0xdep".into()),
            participants: Some(json!([])),
            sender_chain: None,
        };
        correlator.backfill_vote("avalanche_0xtx_1", &mut known).await;

        assert_eq!(known.sender_chain.as_deref(), Some("avalanche"));
        assert_eq!(store.lookups(Collection::Polls), 1);
        assert_eq!(store.lookups(Collection::Transfers), 0);
    }
}
