//! Batched publication of counter rows to an external table
//!
//! The external publisher accepts at most `bulk_cap` rows per insert;
//! flushes emit intermediate batches once the cap is reached.

use crate::counter::CounterRegistry;
use crate::report::{ReportBuilder, StatsRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coracle_core::constants::{STATS_BULK_ROWS_COUNT_MAX, STATS_TABLE_INIT_TIMEOUT_MS};
use coracle_core::{ClientError, Result, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// External statistics table publisher
#[async_trait]
pub trait StatsTablePublisher: Send + Sync {
    /// Create the backing table if needed
    async fn init_table(&self) -> Result<()>;

    /// Insert a batch of rows; the batch never exceeds `bulk_cap`
    async fn bulk_insert(&self, rows: &[StatsRow]) -> Result<()>;

    /// Maximum rows per `bulk_insert` call
    fn bulk_cap(&self) -> usize {
        STATS_BULK_ROWS_COUNT_MAX
    }
}

/// Adapter between the counter registry and a table publisher
pub struct StatsPublisherAdapter {
    registry: Arc<CounterRegistry>,
    report: ReportBuilder,
    publisher: Arc<dyn StatsTablePublisher>,
    time: Arc<dyn TimeProvider>,
}

impl StatsPublisherAdapter {
    pub fn new(
        registry: Arc<CounterRegistry>,
        report: ReportBuilder,
        publisher: Arc<dyn StatsTablePublisher>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            registry,
            report,
            publisher,
            time,
        }
    }

    /// Initialize the backing table, bounded by the creation timeout
    pub async fn init(&self) -> Result<()> {
        tokio::time::timeout(
            Duration::from_millis(STATS_TABLE_INIT_TIMEOUT_MS),
            self.publisher.init_table(),
        )
        .await
        .map_err(|_| {
            ClientError::internal(format!(
                "statistics table init exceeded {}ms",
                STATS_TABLE_INIT_TIMEOUT_MS
            ))
        })?
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.time.now_ms() as i64).unwrap_or_default()
    }

    /// Snapshot counters and publish them in capped batches
    ///
    /// Returns the number of rows written.
    pub async fn flush(&self) -> Result<usize> {
        let rows = self.report.rows(&self.registry.snapshot(), self.now());
        if rows.is_empty() {
            return Ok(0);
        }

        let cap = self.publisher.bulk_cap().max(1);
        for batch in rows.chunks(cap) {
            self.publisher.bulk_insert(batch).await?;
        }

        debug!(rows = rows.len(), "statistics flushed");
        Ok(rows.len())
    }
}

/// Periodic flush task driving a [`StatsPublisherAdapter`]
pub struct StatsFlushTask;

impl StatsFlushTask {
    /// Spawn the flush loop; cancel the token to stop it
    ///
    /// A final flush runs on cancellation so shutdown does not lose the
    /// last interval's counters. Flush failures are logged, never fatal.
    pub fn spawn(
        adapter: Arc<StatsPublisherAdapter>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = adapter.time.sleep(interval) => {
                        if let Err(e) = adapter.flush().await {
                            warn!(error = %e, "statistics flush failed");
                        }
                    }
                }
            }
            if let Err(e) = adapter.flush().await {
                warn!(error = %e, "final statistics flush failed");
            }
        })
    }
}

/// In-memory publisher recording batches, for tests
#[derive(Debug, Default)]
pub struct MemoryStatsPublisher {
    batches: std::sync::Mutex<Vec<Vec<StatsRow>>>,
    cap: usize,
}

impl MemoryStatsPublisher {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            batches: std::sync::Mutex::new(Vec::new()),
            cap,
        }
    }

    /// Batches received so far, in insertion order
    pub fn batches(&self) -> Vec<Vec<StatsRow>> {
        self.batches.lock().expect("publisher poisoned").clone()
    }
}

#[async_trait]
impl StatsTablePublisher for MemoryStatsPublisher {
    async fn init_table(&self) -> Result<()> {
        Ok(())
    }

    async fn bulk_insert(&self, rows: &[StatsRow]) -> Result<()> {
        debug_assert!(rows.len() <= self.cap, "batch exceeds bulk cap");
        self.batches
            .lock()
            .expect("publisher poisoned")
            .push(rows.to_vec());
        Ok(())
    }

    fn bulk_cap(&self) -> usize {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::StorageClass;
    use coracle_core::WallClockTime;

    fn adapter_with(
        counter_count: usize,
        zero_counter: bool,
        cap: usize,
    ) -> (Arc<StatsPublisherAdapter>, Arc<MemoryStatsPublisher>) {
        let registry = Arc::new(CounterRegistry::new());
        for i in 0..counter_count {
            let c = registry.register(format!("counter.{}", i), StorageClass::LogAndTable);
            c.add(i as u64 + 1);
        }
        if zero_counter {
            registry.register("counter.zero", StorageClass::LogAndTable);
        }

        let publisher = Arc::new(MemoryStatsPublisher::with_cap(cap));
        let adapter = Arc::new(StatsPublisherAdapter::new(
            registry,
            ReportBuilder::new("dep", "host", Some(-1)),
            publisher.clone(),
            Arc::new(WallClockTime::new()),
        ));
        (adapter, publisher)
    }

    #[tokio::test]
    async fn test_flush_batches_respect_bulk_cap() {
        // 17 live counters plus one zero counter, cap 10: batches of 10 and 6.
        let (adapter, publisher) = adapter_with(17, true, 10);

        let written = adapter.flush().await.unwrap();
        assert_eq!(written, 17);

        let batches = publisher.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 10);
        assert_eq!(batches[1].len(), 6);

        // No "0" row anywhere.
        assert!(batches.iter().flatten().all(|r| r.value != "0"));

        // Row keys monotone within the partition.
        let keys: Vec<_> = batches.iter().flatten().map(|r| r.row_key.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[tokio::test]
    async fn test_flush_with_nothing_to_publish() {
        let (adapter, publisher) = adapter_with(0, true, 10);
        assert_eq!(adapter.flush().await.unwrap(), 0);
        assert!(publisher.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_task_runs_and_stops() {
        let (adapter, publisher) = adapter_with(3, false, 10);
        let token = CancellationToken::new();

        let task = StatsFlushTask::spawn(adapter, Duration::from_secs(60), token.clone());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!publisher.batches().is_empty());

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_init_runs_within_timeout() {
        let (adapter, _publisher) = adapter_with(1, false, 10);
        adapter.init().await.unwrap();
    }
}
