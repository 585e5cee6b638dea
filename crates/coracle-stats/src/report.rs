//! Statistics table rows and key construction
//!
//! The partition/row key format is a compatibility contract: partition
//! `"{deployment_id}:{YYYY-MM-DD}"`, row `"{name}[:{epoch}]:{seq}"` with a
//! zero-padded six-digit sequence. Dates are ISO, calendar-invariant.

use crate::counter::{CounterSnapshot, StorageClass};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// One row bound for the statistics table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsRow {
    pub partition_key: String,
    pub row_key: String,
    pub name: String,
    pub value: String,
    pub host: String,
}

/// Builds table rows from counter snapshots
#[derive(Debug)]
pub struct ReportBuilder {
    deployment_id: String,
    host_name: String,
    /// Client generation; present for client publishers, absent for silos
    client_epoch: Option<i64>,
    sequence: AtomicU64,
}

impl ReportBuilder {
    pub fn new(
        deployment_id: impl Into<String>,
        host_name: impl Into<String>,
        client_epoch: Option<i64>,
    ) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            host_name: host_name.into(),
            client_epoch,
            sequence: AtomicU64::new(0),
        }
    }

    fn partition_key(&self, now: DateTime<Utc>) -> String {
        format!("{}:{}", self.deployment_id, now.format("%Y-%m-%d"))
    }

    fn row_key(&self, name: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        match self.client_epoch {
            Some(epoch) => format!("{}:{}:{:06}", name, epoch, seq),
            None => format!("{}:{:06}", name, seq),
        }
    }

    /// Build rows for every publishable counter in `snapshots`
    ///
    /// Counters stored log-only and counters whose rendered value is "0"
    /// produce no row.
    pub fn rows(&self, snapshots: &[CounterSnapshot], now: DateTime<Utc>) -> Vec<StatsRow> {
        let partition = self.partition_key(now);
        snapshots
            .iter()
            .filter(|s| s.storage == StorageClass::LogAndTable)
            .filter(|s| s.value != "0")
            .map(|s| StatsRow {
                partition_key: partition.clone(),
                row_key: self.row_key(&s.name),
                name: s.name.clone(),
                value: s.value.clone(),
                host: self.host_name.clone(),
            })
            .collect()
    }
}
