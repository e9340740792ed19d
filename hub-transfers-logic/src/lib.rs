pub mod acks;
pub mod chains;
pub mod correlator;
pub mod extractor;
pub mod granularity;
pub mod indexer;
pub mod lcd;
pub mod links;
pub mod metrics;
pub mod poller;
pub mod price;
pub mod processor;
pub mod requeue;
pub mod settings;
pub mod store;
pub mod time_spent;
pub mod types;
pub mod votes;
pub mod writer;

pub use chains::{ChainsConfig, ChainsTable};
pub use extractor::{EventExtractor, ExtractedBatch};
pub use indexer::HubIndexer;
pub use processor::{BatchProcessor, BatchSummary};
pub use store::{Collection, DocumentStore, MemoryStore, SearchIndexStore};
