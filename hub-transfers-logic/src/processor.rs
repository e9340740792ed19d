use std::sync::Arc;

use crate::{
    acks::{AckReconciler, AckSummary},
    chains::ChainsTable,
    correlator::Correlator,
    extractor::EventExtractor,
    lcd::TxSearch,
    links::LinkReconciler,
    metrics,
    poller::ConfirmationPoller,
    price::{AssetPriceProvider, NoPrices},
    requeue::RequeueClient,
    settings::ProcessorSettings,
    store::DocumentStore,
    time_spent::{StoreTimeSpent, TimeSpentRecorder},
    types::{Heartbeat, TxsResponse},
    votes::{VoteAggregator, VoteSummary},
    writer::ReconciliationWriter,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub transactions: usize,
    pub heartbeats: usize,
    pub links: usize,
    pub votes: VoteSummary,
    pub acks: AckSummary,
    pub requeued: usize,
}

pub struct BatchProcessorBuilder {
    chains: Arc<ChainsTable>,
    store: Arc<dyn DocumentStore>,
    search: Arc<dyn TxSearch>,
    settings: ProcessorSettings,
    prices: Option<Arc<dyn AssetPriceProvider>>,
    time_spent: Option<Arc<dyn TimeSpentRecorder>>,
    requeue: Option<RequeueClient>,
}

impl BatchProcessorBuilder {
    pub fn settings(mut self, settings: ProcessorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn prices(mut self, prices: Arc<dyn AssetPriceProvider>) -> Self {
        self.prices = Some(prices);
        self
    }

    pub fn time_spent(mut self, time_spent: Arc<dyn TimeSpentRecorder>) -> Self {
        self.time_spent = Some(time_spent);
        self
    }

    pub fn requeue(mut self, requeue: Option<RequeueClient>) -> Self {
        self.requeue = requeue;
        self
    }

    pub fn build(self) -> BatchProcessor {
        let time_spent = self
            .time_spent
            .unwrap_or_else(|| Arc::new(StoreTimeSpent::new(self.store.clone())));
        let prices = self.prices.unwrap_or_else(|| Arc::new(NoPrices));
        let writer = Arc::new(ReconciliationWriter::new(self.store.clone(), time_spent));
        let correlator = Arc::new(Correlator::new(self.store));
        let poller = Arc::new(ConfirmationPoller::new(
            self.search,
            writer.clone(),
            self.chains.clone(),
            self.settings.receive_query_limit,
        ));

        BatchProcessor {
            extractor: EventExtractor::new(self.chains, self.settings.clone()),
            links: LinkReconciler::new(correlator.clone(), writer.clone(), prices),
            votes: VoteAggregator::new(
                correlator.clone(),
                writer.clone(),
                self.settings.vote_write_delay,
            ),
            acks: AckReconciler::new(correlator, writer.clone(), poller),
            writer,
            requeue: self.requeue,
        }
    }
}

/// Runs one batch of hub transactions through extraction and every
/// reconciliation stage.
pub struct BatchProcessor {
    extractor: EventExtractor,
    writer: Arc<ReconciliationWriter>,
    links: LinkReconciler,
    votes: VoteAggregator,
    acks: AckReconciler,
    requeue: Option<RequeueClient>,
}

impl BatchProcessor {
    pub fn builder(
        chains: Arc<ChainsTable>,
        store: Arc<dyn DocumentStore>,
        search: Arc<dyn TxSearch>,
    ) -> BatchProcessorBuilder {
        BatchProcessorBuilder {
            chains,
            store,
            search,
            settings: ProcessorSettings::default(),
            prices: None,
            time_spent: None,
            requeue: None,
        }
    }

    /// Per-record failures are logged and counted but never fail the
    /// batch; re-delivering the same batch is safe.
    #[tracing::instrument(skip_all, fields(transactions = response.len()))]
    pub async fn process(&self, response: &TxsResponse) -> BatchSummary {
        let batch = {
            let _timer = metrics::BATCH_DURATION
                .with_label_values(&["extract"])
                .start_timer();
            self.extractor.extract(response)
        };
        let mut summary = BatchSummary {
            transactions: response.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return summary;
        }

        {
            let _timer = metrics::BATCH_DURATION
                .with_label_values(&["heartbeats"])
                .start_timer();
            summary.heartbeats = self.write_heartbeats(&batch.heartbeats).await;
        }
        {
            let _timer = metrics::BATCH_DURATION
                .with_label_values(&["links"])
                .start_timer();
            summary.links = self.links.process(batch.deposit_addresses).await;
        }
        {
            let _timer = metrics::BATCH_DURATION
                .with_label_values(&["votes"])
                .start_timer();
            summary.votes = self.votes.process(batch.votes).await;
        }
        {
            let _timer = metrics::BATCH_DURATION
                .with_label_values(&["acks"])
                .start_timer();
            summary.acks = self.acks.process(batch.acks).await;
        }

        if let Some(requeue) = &self.requeue {
            summary.requeued = batch.routed_ibc_txhashes.len();
            requeue.requeue_detached(batch.routed_ibc_txhashes);
        }

        tracing::debug!(?summary, "batch reconciled");
        summary
    }

    async fn write_heartbeats(&self, heartbeats: &[Heartbeat]) -> usize {
        let mut written = 0;
        for heartbeat in heartbeats {
            if self.writer.write_heartbeat(heartbeat).await.is_ok() {
                written += 1;
            }
        }
        written
    }
}
