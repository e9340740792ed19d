use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::{
    store::{Collection, DocumentStore, StoreError},
    types::Transfer,
};

/// Recomputes derived lifecycle timings of a transfer after one of its
/// stages changed.
#[async_trait]
pub trait TimeSpentRecorder: Send + Sync {
    async fn record(&self, transfer_key: &str) -> Result<(), StoreError>;
}

/// Seconds spent between consecutive transfer stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeSpent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_confirm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirm_vote: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_ibc_send: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ibc_send_receive: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
}

impl TimeSpent {
    pub fn of(transfer: &Transfer) -> Self {
        let source = transfer
            .source
            .as_ref()
            .and_then(|s| s.created_at)
            .map(|g| g.ms);
        let confirm = transfer
            .confirm_deposit
            .as_ref()
            .and_then(|c| c.created_at)
            .map(|g| g.ms);
        let vote = transfer.vote.as_ref().and_then(|v| v.created_at).map(|g| g.ms);
        let ibc_send = transfer
            .ibc_send
            .as_ref()
            .and_then(|i| i.created_at)
            .map(|g| g.ms);
        let received = transfer
            .ibc_send
            .as_ref()
            .and_then(|i| i.received_at)
            .map(|g| g.ms);

        let last = [received, ibc_send, vote, confirm].into_iter().flatten().next();
        Self {
            source_confirm: seconds_between(source, confirm),
            confirm_vote: seconds_between(confirm, vote),
            vote_ibc_send: seconds_between(vote, ibc_send),
            ibc_send_receive: seconds_between(ibc_send, received),
            total: seconds_between(source, last),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn seconds_between(from: Option<i64>, to: Option<i64>) -> Option<f64> {
    match (from, to) {
        (Some(from), Some(to)) if to >= from => Some((to - from) as f64 / 1000.0),
        _ => None,
    }
}

/// Reads the transfer back and merges its `time_spent` breakdown.
pub struct StoreTimeSpent {
    store: Arc<dyn DocumentStore>,
}

impl StoreTimeSpent {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TimeSpentRecorder for StoreTimeSpent {
    async fn record(&self, transfer_key: &str) -> Result<(), StoreError> {
        let Some(doc) = self.store.get(Collection::Transfers, transfer_key).await? else {
            return Ok(());
        };
        let transfer: Transfer = serde_json::from_value(doc)?;
        let time_spent = TimeSpent::of(&transfer);
        if time_spent.is_empty() {
            return Ok(());
        }
        self.store
            .write(
                Collection::Transfers,
                transfer_key,
                json!({ "time_spent": time_spent }),
                true,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn computes_stage_durations() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            Collection::Transfers,
            "k",
            json!({
                "source": { "created_at": { "ms": 1_000 } },
                "confirm_deposit": { "created_at": { "ms": 31_000 } },
                "ibc_send": { "created_at": { "ms": 61_000 }, "received_at": { "ms": 71_500 } }
            }),
        );

        StoreTimeSpent::new(store.clone()).record("k").await.unwrap();

        let doc = store.document(Collection::Transfers, "k").unwrap();
        assert_eq!(
            doc["time_spent"],
            json!({
                "source_confirm": 30.0,
                "ibc_send_receive": 10.5,
                "total": 70.5
            })
        );
    }

    #[tokio::test]
    async fn missing_transfer_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        StoreTimeSpent::new(store.clone()).record("none").await.unwrap();
        assert!(store.writes().is_empty());
    }
}
