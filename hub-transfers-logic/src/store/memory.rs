use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap, HashSet},
};

use super::{
    query::{compare, lookup},
    with_id, Collection, DocumentStore, Query, ReadOptions, ReadResponse, StoreError,
};

#[derive(Debug, Clone, PartialEq)]
pub enum StoreRequest {
    Read { collection: Collection, query: Query },
    Get { collection: Collection, id: String },
    Write {
        collection: Collection,
        id: String,
        document: Value,
        merge: bool,
    },
}

/// In-process [`DocumentStore`] used by tests and local runs. Records every
/// request in a journal and can simulate an unavailable collection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, BTreeMap<String, Value>>>,
    journal: RwLock<Vec<StoreRequest>>,
    unavailable: RwLock<HashSet<Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: Collection, id: impl Into<String>, document: Value) {
        self.collections
            .write()
            .entry(collection)
            .or_default()
            .insert(id.into(), document);
    }

    pub fn document(&self, collection: Collection, id: &str) -> Option<Value> {
        self.collections
            .read()
            .get(&collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    pub fn documents(&self, collection: Collection) -> BTreeMap<String, Value> {
        self.collections
            .read()
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn journal(&self) -> Vec<StoreRequest> {
        self.journal.read().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.write().clear();
    }

    /// Number of reads or gets issued against `collection`.
    pub fn lookups(&self, collection: Collection) -> usize {
        self.journal
            .read()
            .iter()
            .filter(|r| match r {
                StoreRequest::Read { collection: c, .. } | StoreRequest::Get { collection: c, .. } => {
                    *c == collection
                }
                StoreRequest::Write { .. } => false,
            })
            .count()
    }

    pub fn writes(&self) -> Vec<(Collection, String)> {
        self.journal
            .read()
            .iter()
            .filter_map(|r| match r {
                StoreRequest::Write { collection, id, .. } => Some((*collection, id.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn set_unavailable(&self, collection: Collection, unavailable: bool) {
        let mut set = self.unavailable.write();
        if unavailable {
            set.insert(collection);
        } else {
            set.remove(&collection);
        }
    }

    fn check_available(&self, collection: Collection) -> Result<(), StoreError> {
        if self.unavailable.read().contains(&collection) {
            return Err(StoreError::Unavailable(collection.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(
        &self,
        collection: Collection,
        query: &Query,
        options: &ReadOptions,
    ) -> Result<ReadResponse, StoreError> {
        self.journal.write().push(StoreRequest::Read {
            collection,
            query: query.clone(),
        });
        self.check_available(collection)?;

        let mut hits: Vec<Value> = self
            .collections
            .read()
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, doc)| with_id(doc.clone(), id))
                    .filter(|doc| query.matches(doc))
                    .collect()
            })
            .unwrap_or_default();

        hits.sort_by(|a, b| {
            options.sort.iter().fold(Ordering::Equal, |acc, sort| {
                acc.then_with(|| {
                    match (lookup(a, &sort.field), lookup(b, &sort.field)) {
                        (Some(x), Some(y)) => compare(y, x).unwrap_or(Ordering::Equal),
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    }
                })
            })
        });

        let total = hits.len() as u64;
        if let Some(size) = options.size {
            hits.truncate(size);
        }
        Ok(ReadResponse {
            data: hits,
            total,
            aggs: None,
        })
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        self.journal.write().push(StoreRequest::Get {
            collection,
            id: id.to_string(),
        });
        self.check_available(collection)?;
        Ok(self.document(collection, id).map(|doc| with_id(doc, id)))
    }

    async fn write(
        &self,
        collection: Collection,
        id: &str,
        document: Value,
        merge: bool,
    ) -> Result<(), StoreError> {
        self.journal.write().push(StoreRequest::Write {
            collection,
            id: id.to_string(),
            document: document.clone(),
            merge,
        });
        self.check_available(collection)?;

        let mut collections = self.collections.write();
        let docs = collections.entry(collection).or_default();
        match docs.get_mut(id) {
            Some(existing) if merge => merge_document(existing, document),
            _ => {
                docs.insert(id.to_string(), document);
            }
        }
        Ok(())
    }
}

/// Deep-merges `patch` into `target`. Objects are merged key by key; any
/// other value, `null` included, replaces what was there.
pub fn merge_document(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_document(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Sort;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn merge_keeps_disjoint_fields_and_applies_nulls() {
        let mut doc = json!({
            "source": { "id": "a" },
            "ibc_send": { "packet_sequence": 1, "failed_txhash": "F" }
        });
        merge_document(
            &mut doc,
            json!({ "ibc_send": { "ack_txhash": "A", "failed_txhash": null } }),
        );
        assert_eq!(
            doc,
            json!({
                "source": { "id": "a" },
                "ibc_send": { "packet_sequence": 1, "ack_txhash": "A", "failed_txhash": null }
            })
        );
    }

    #[tokio::test]
    async fn read_sorts_and_limits() {
        let store = MemoryStore::new();
        for (id, ms) in [("a", 1), ("b", 3), ("c", 2)] {
            store.insert(
                Collection::Transfers,
                id,
                json!({ "source": { "created_at": { "ms": ms } }, "kind": "x" }),
            );
        }

        let response = store
            .read(
                Collection::Transfers,
                &Query::match_value("kind", "X"),
                &ReadOptions::first(Sort::desc("source.created_at.ms")),
            )
            .await
            .unwrap();

        assert_eq!(response.total, 3);
        assert_eq!(response.data.len(), 1);
        assert_eq!(response.data[0]["id"], json!("b"));
    }

    #[tokio::test]
    async fn unavailable_collection_fails_but_is_journaled() {
        let store = MemoryStore::new();
        store.set_unavailable(Collection::Polls, true);

        let err = store.get(Collection::Polls, "p").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.lookups(Collection::Polls), 1);
    }
}
