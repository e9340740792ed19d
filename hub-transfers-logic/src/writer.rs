use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{
    metrics,
    store::{Collection, DocumentStore, StoreError},
    time_spent::TimeSpentRecorder,
    types::{DepositAddress, Heartbeat, PollPatch, VoteDocument},
};

/// Stages whose update changes the lifecycle timings of a transfer.
const TIMED_STAGES: &[&str] = &["confirm_deposit", "vote", "ibc_send"];

/// Persists reconciled records. Writes to the same document are serialized
/// in-process so that concurrent merges of disjoint fields never race.
pub struct ReconciliationWriter {
    store: Arc<dyn DocumentStore>,
    time_spent: Arc<dyn TimeSpentRecorder>,
    locks: DashMap<(Collection, String), Arc<Mutex<()>>>,
}

impl ReconciliationWriter {
    pub fn new(store: Arc<dyn DocumentStore>, time_spent: Arc<dyn TimeSpentRecorder>) -> Self {
        Self {
            store,
            time_spent,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn vote_key(poll_id: &str, voter: &str) -> String {
        format!("{poll_id}_{voter}").to_lowercase()
    }

    fn lock_for(&self, collection: Collection, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((collection, key.to_string()))
            .or_default()
            .clone()
    }

    /// Drops the lock entry once nobody else is holding or waiting on it.
    fn release(&self, collection: Collection, key: &str, lock: Arc<Mutex<()>>) {
        self.locks
            .remove_if(&(collection, key.to_string()), |_, held| {
                Arc::ptr_eq(held, &lock) && Arc::strong_count(held) == 2
            });
    }

    async fn put(
        &self,
        collection: Collection,
        key: &str,
        document: Value,
        merge: bool,
    ) -> Result<(), StoreError> {
        let lock = self.lock_for(collection, key);
        let result = {
            let _guard = lock.lock().await;
            self.write_locked(collection, key, document, merge).await
        };
        self.release(collection, key, lock);
        result
    }

    async fn write_locked(
        &self,
        collection: Collection,
        key: &str,
        document: Value,
        merge: bool,
    ) -> Result<(), StoreError> {
        let result = self.store.write(collection, key, document, merge).await;
        let outcome = match &result {
            Ok(()) => "ok",
            Err(err) => {
                tracing::warn!(%collection, key, err = ?err, "failed to write document");
                metrics::STORE_ERRORS
                    .with_label_values(&[collection.as_str(), "write"])
                    .inc();
                "error"
            }
        };
        metrics::DOCUMENTS_WRITTEN
            .with_label_values(&[collection.as_str(), outcome])
            .inc();
        result
    }

    pub async fn write_heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), StoreError> {
        self.put(
            Collection::Heartbeats,
            &heartbeat.key(),
            to_document(heartbeat)?,
            false,
        )
        .await
    }

    pub async fn write_deposit_address(&self, doc: &DepositAddress) -> Result<(), StoreError> {
        self.put(Collection::DepositAddresses, &doc.id, to_document(doc)?, false)
            .await
    }

    pub async fn write_poll(&self, poll: &PollPatch) -> Result<(), StoreError> {
        self.put(Collection::Polls, &poll.id, to_document(poll)?, true)
            .await
    }

    pub async fn write_vote(&self, vote: &VoteDocument) -> Result<(), StoreError> {
        let key = Self::vote_key(&vote.poll_id, &vote.voter);
        self.put(Collection::Votes, &key, to_document(vote)?, false)
            .await
    }

    /// Deep-merges `patch` into the transfer stored under `key`
    /// (lowercased). When the patch touches a timed stage the lifecycle
    /// timings are recomputed under the same lock.
    pub async fn merge_transfer(&self, key: &str, patch: Map<String, Value>) -> Result<(), StoreError> {
        let key = key.to_lowercase();
        let timed = TIMED_STAGES.iter().any(|stage| patch.contains_key(*stage));

        let lock = self.lock_for(Collection::Transfers, &key);
        let result = {
            let _guard = lock.lock().await;
            let written = self
                .write_locked(Collection::Transfers, &key, Value::Object(patch), true)
                .await;
            if written.is_ok() && timed {
                if let Err(err) = self.time_spent.record(&key).await {
                    tracing::warn!(key = %key, err = ?err, "failed to update transfer time spent");
                }
            }
            written
        };
        self.release(Collection::Transfers, &key, lock);
        result
    }
}

fn to_document<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingTimeSpent {
        keys: SyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl TimeSpentRecorder for RecordingTimeSpent {
        async fn record(&self, transfer_key: &str) -> Result<(), StoreError> {
            self.keys.lock().push(transfer_key.to_string());
            Ok(())
        }
    }

    fn patch(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn concurrent_merges_of_disjoint_fields_keep_both() {
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(RecordingTimeSpent::default());
        let writer = Arc::new(ReconciliationWriter::new(store.clone(), recorder.clone()));

        let a = {
            let writer = writer.clone();
            tokio::spawn(async move {
                writer
                    .merge_transfer("0xABC_Osmo1", patch(json!({ "ibc_send": { "ack_txhash": "A" } })))
                    .await
            })
        };
        let b = {
            let writer = writer.clone();
            tokio::spawn(async move {
                writer
                    .merge_transfer("0xabc_osmo1", patch(json!({ "ibc_send": { "recv_txhash": "R" } })))
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(
            store.document(Collection::Transfers, "0xabc_osmo1").unwrap(),
            json!({ "ibc_send": { "ack_txhash": "A", "recv_txhash": "R" } })
        );
        assert_eq!(recorder.keys.lock().len(), 2);
    }

    #[tokio::test]
    async fn vote_key_is_case_normalized_and_rewrite_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let writer = ReconciliationWriter::new(store.clone(), Arc::new(RecordingTimeSpent::default()));
        let vote = VoteDocument {
            txhash: "TX".into(),
            status: "success".into(),
            height: 1,
            created_at: Default::default(),
            sender_chain: Some("ethereum".into()),
            recipient_chain: None,
            poll_id: "Ethereum_0xAB_1".into(),
            transaction_id: None,
            deposit_address: None,
            transfer_id: None,
            voter: "axelarvaloper1X".into(),
            vote: true,
            confirmation: false,
            late: false,
            unconfirmed: false,
        };

        writer.write_vote(&vote).await.unwrap();
        let first = store.documents(Collection::Votes);
        writer.write_vote(&vote).await.unwrap();

        assert_eq!(store.documents(Collection::Votes), first);
        assert!(first.contains_key("ethereum_0xab_1_axelarvaloper1x"));
    }
}
