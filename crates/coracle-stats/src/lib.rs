//! Coracle Stats
//!
//! Client-side statistics: named counters with storage classes, table row
//! construction with the compatibility key format, and the batched
//! publisher adapter that hands rows to an external table within its bulk
//! write cap.

pub mod counter;
pub mod publisher;
pub mod report;

pub use counter::{Counter, CounterRegistry, CounterSnapshot, StorageClass};
pub use publisher::{
    MemoryStatsPublisher, StatsFlushTask, StatsPublisherAdapter, StatsTablePublisher,
};
pub use report::{ReportBuilder, StatsRow};
