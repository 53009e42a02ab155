//! Task-scoped state shared with monitoring, and the shutdown signal.

use crate::reader::ReaderStats;
use llkv_tablet::{TabletId, TxnId};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

/// Monotonic completion estimate in percent.
#[derive(Debug, Default)]
pub struct Progress {
    value: AtomicI32,
}

impl Progress {
    #[inline]
    pub fn value(&self) -> i32 {
        self.value.load(Ordering::Relaxed)
    }

    /// Raise progress to `value`, clamped to `0..=100`. Lower values are
    /// ignored.
    #[inline]
    pub fn update(&self, value: i32) {
        self.value.fetch_max(value.clamp(0, 100), Ordering::Relaxed);
    }
}

/// Cumulative statistics of one compaction task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionTaskStats {
    pub reader: ReaderStats,
    pub reader_time_ns: u64,
    pub segment_write_ns: u64,
    pub bytes_written: u64,
    pub input_rows: u64,
    pub input_bytes: u64,
    pub input_segments: u64,
    pub output_rows: u64,
    pub column_groups: u64,
}

/// State of one compaction, readable while it runs.
#[derive(Debug)]
pub struct CompactionTaskContext {
    pub tablet_id: TabletId,
    pub txn_id: TxnId,
    pub version: i64,
    pub progress: Progress,
    stats: Mutex<CompactionTaskStats>,
}

impl CompactionTaskContext {
    pub fn new(tablet_id: TabletId, txn_id: TxnId, version: i64) -> Self {
        Self {
            tablet_id,
            txn_id,
            version,
            progress: Progress::default(),
            stats: Mutex::new(CompactionTaskStats::default()),
        }
    }

    pub fn stats(&self) -> CompactionTaskStats {
        *self.stats.lock().expect("compaction stats lock poisoned")
    }

    pub(crate) fn update_stats(&self, f: impl FnOnce(&mut CompactionTaskStats)) {
        f(&mut self.stats.lock().expect("compaction stats lock poisoned"));
    }
}

/// Process-wide "background workers stopped" flag.
///
/// Cloned into every task; raising it makes running compactions fail with
/// `Cancelled` at their next check.
#[derive(Debug, Clone, Default)]
pub struct BackgroundWorkerSignal(Arc<AtomicBool>);

impl BackgroundWorkerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
