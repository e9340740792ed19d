use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};

// Keep labels low-cardinality: collection, record kind, lookup name, outcome.
lazy_static! {
    /// Records extracted from hub transactions, by kind.
    pub static ref RECORDS_EXTRACTED: IntCounterVec = register_int_counter_vec!(
        "hub_transfers_records_extracted_total",
        "records extracted from hub transactions",
        &["kind"],
    )
    .unwrap();

    /// Correlation lookups with result label {found, miss, error}.
    pub static ref CORRELATION_LOOKUPS: IntCounterVec = register_int_counter_vec!(
        "hub_transfers_correlation_lookups_total",
        "document store lookups made to correlate new records",
        &["lookup", "result"],
    )
    .unwrap();

    pub static ref DOCUMENTS_WRITTEN: IntCounterVec = register_int_counter_vec!(
        "hub_transfers_documents_written_total",
        "document store writes",
        &["collection", "result"],
    )
    .unwrap();

    pub static ref STORE_ERRORS: IntCounterVec = register_int_counter_vec!(
        "hub_transfers_store_errors_total",
        "failed document store requests",
        &["collection", "operation"],
    )
    .unwrap();

    /// Receive-confirmation queries against destination chains with result
    /// label {found, empty, error}.
    pub static ref RECEIVE_QUERIES: IntCounterVec = register_int_counter_vec!(
        "hub_transfers_receive_queries_total",
        "destination chain queries made to confirm packet receipt",
        &["chain", "result"],
    )
    .unwrap();

    /// Batches handed to the processor, with result label {ok, error}.
    pub static ref BATCHES_PROCESSED: IntCounterVec = register_int_counter_vec!(
        "hub_transfers_batches_processed_total",
        "hub transaction batches processed",
        &["result"],
    )
    .unwrap();

    pub static ref BATCH_DURATION: HistogramVec = register_histogram_vec!(
        "hub_transfers_batch_duration_seconds",
        "time spent reconciling a batch of hub transactions",
        &["stage"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
    )
    .unwrap();

    /// Last hub height that was fully processed.
    pub static ref INDEXED_HEIGHT: IntGauge = register_int_gauge!(
        "hub_transfers_indexed_height",
        "last hub block height processed"
    )
    .unwrap();
}
