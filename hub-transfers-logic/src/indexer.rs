use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::Instrument;

use crate::{
    lcd::{LcdClient, LcdError},
    metrics,
    processor::{BatchProcessor, BatchSummary},
    settings::IndexerSettings,
};

/// Follows the hub chain block by block and hands every block's
/// transactions to the batch processor.
///
/// The cursor lives in memory only. After a restart of the same instance
/// indexing resumes right after the last processed height.
pub struct HubIndexer {
    lcd: LcdClient,
    processor: Arc<BatchProcessor>,
    settings: IndexerSettings,
    /// Next height to process; zero until the first run picks a start.
    next_height: AtomicU64,
}

impl HubIndexer {
    pub fn new(lcd: LcdClient, processor: Arc<BatchProcessor>, settings: IndexerSettings) -> Self {
        let next_height = AtomicU64::new(settings.start_height.unwrap_or_default());
        Self {
            lcd,
            processor,
            settings,
            next_height,
        }
    }

    pub fn next_height(&self) -> u64 {
        self.next_height.load(Ordering::Acquire)
    }

    /// Runs until a node request fails.
    pub async fn run(&self) -> Result<(), LcdError> {
        let endpoint = &self.settings.hub_lcd_url;
        if self.next_height() == 0 {
            let latest = self.lcd.latest_height(endpoint).await?;
            tracing::info!(height = latest, "starting from the latest hub block");
            self.next_height.store(latest, Ordering::Release);
        }

        loop {
            let latest = self.lcd.latest_height(endpoint).await?;
            self.catch_up(latest).await?;
            tokio::time::sleep(self.settings.polling_interval).await;
        }
    }

    /// Processes every height from the cursor up to `latest` inclusive.
    pub async fn catch_up(&self, latest: u64) -> Result<usize, LcdError> {
        let mut processed = 0;
        while self.next_height() <= latest {
            let height = self.next_height();
            self.process_height(height).await?;
            self.next_height.store(height + 1, Ordering::Release);
            metrics::INDEXED_HEIGHT.set(height as i64);
            processed += 1;
        }
        Ok(processed)
    }

    pub async fn process_height(&self, height: u64) -> Result<BatchSummary, LcdError> {
        let txs = match self
            .lcd
            .txs_at_height(&self.settings.hub_lcd_url, height)
            .await
        {
            Ok(txs) => txs,
            Err(err) => {
                metrics::BATCHES_PROCESSED.with_label_values(&["error"]).inc();
                return Err(err);
            }
        };
        let summary = self
            .processor
            .process(&txs)
            .instrument(tracing::info_span!("hub_block", height))
            .await;
        metrics::BATCHES_PROCESSED.with_label_values(&["ok"]).inc();
        if summary.transactions > 0 {
            tracing::info!(height, transactions = summary.transactions, "processed hub block");
        }
        Ok(summary)
    }
}
