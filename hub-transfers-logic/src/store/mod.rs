mod memory;
mod query;
mod search_index;

pub use memory::{merge_document, MemoryStore, StoreRequest};
pub use query::{lookup, BoolQuery, Query};
pub use search_index::SearchIndexStore;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Transfers,
    DepositAddresses,
    Polls,
    Votes,
    Heartbeats,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Transfers => "transfers",
            Collection::DepositAddresses => "deposit_addresses",
            Collection::Polls => "evm_polls",
            Collection::Votes => "evm_votes",
            Collection::Heartbeats => "heartbeats",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descending order on a field. Documents without the field come last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
}

impl Sort {
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOptions {
    pub size: Option<usize>,
    pub sort: Vec<Sort>,
    /// Passed through verbatim to backends that support aggregations.
    pub aggs: Option<Value>,
}

impl ReadOptions {
    pub fn first(sort: Sort) -> Self {
        Self {
            size: Some(1),
            sort: vec![sort],
            aggs: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadResponse {
    /// Matching documents, each with its key injected as `id` when the
    /// stored document has none.
    pub data: Vec<Value>,
    pub total: u64,
    pub aggs: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("document store responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid document store response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid document store url: {0}")]
    Url(#[from] url::ParseError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed JSON document store with a boolean query language.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read(
        &self,
        collection: Collection,
        query: &Query,
        options: &ReadOptions,
    ) -> Result<ReadResponse, StoreError>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError>;

    /// Writes `document` under `id`. With `merge` the document is deep-merged
    /// into the existing one (explicit `null`s overwrite), otherwise it
    /// replaces it.
    async fn write(
        &self,
        collection: Collection,
        id: &str,
        document: Value,
        merge: bool,
    ) -> Result<(), StoreError>;
}

pub(crate) fn with_id(mut document: Value, id: &str) -> Value {
    if let Value::Object(fields) = &mut document {
        fields
            .entry("id")
            .or_insert_with(|| Value::String(id.to_string()));
    }
    document
}
