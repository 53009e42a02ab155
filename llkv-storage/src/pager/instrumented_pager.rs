use crate::pager::{BatchGet, BatchPut, GetResult, Pager};
use crate::types::PhysicalKey;
use llkv_result::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! io_counters {
    ($($(#[$doc:meta])* $field:ident,)*) => {
        /// Live pager traffic counters, shared between an [`InstrumentedPager`]
        /// and whoever inspects it.
        ///
        /// A vertical compaction reads its input segments once per column group
        /// and stores one part blob per group and output segment before
        /// stitching, so the put counters grow with the number of groups.
        #[derive(Debug, Default)]
        pub struct IoStats {
            $($(#[$doc])* pub $field: AtomicU64,)*
        }

        /// Point-in-time copy of [`IoStats`].
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct IoStatsSnapshot {
            $($(#[$doc])* pub $field: u64,)*
        }

        impl IoStats {
            pub fn snapshot(&self) -> IoStatsSnapshot {
                IoStatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }

            /// Zero every counter.
            pub fn reset(&self) {
                $(self.$field.store(0, Ordering::Relaxed);)*
            }
        }

        impl IoStatsSnapshot {
            /// Counter growth from `older` to `self`, saturating at zero.
            pub fn delta_since(&self, older: &Self) -> Self {
                Self {
                    $($field: self.$field.saturating_sub(older.$field),)*
                }
            }
        }
    };
}

io_counters! {
    /// Keys requested through `batch_get`.
    physical_gets,
    /// Requested keys that held no blob.
    missing_gets,
    physical_puts,
    physical_frees,
    physical_allocs,
    /// `batch_get` calls.
    get_batches,
    /// `batch_put` calls.
    put_batches,
    /// `free_many` calls.
    free_batches,
    get_bytes,
    put_bytes,
}

impl IoStatsSnapshot {
    /// Mean number of keys per `batch_get` call.
    pub fn gets_per_batch(&self) -> f64 {
        match self.get_batches {
            0 => 0.0,
            n => self.physical_gets as f64 / n as f64,
        }
    }

    /// Blobs stored minus blobs freed. Negative when frees target keys that
    /// were written before the counters started.
    pub fn net_puts(&self) -> i64 {
        self.physical_puts as i64 - self.physical_frees as i64
    }
}

/// Pager decorator that records the traffic flowing into `inner`.
#[derive(Debug)]
pub struct InstrumentedPager<P: Pager> {
    inner: P,
    stats: Arc<IoStats>,
}

impl<P: Pager> InstrumentedPager<P> {
    /// Wrap `inner`. The returned handle keeps observing the counters after
    /// the pager has been moved into a tablet manager.
    pub fn new(inner: P) -> (Self, Arc<IoStats>) {
        let stats = Arc::new(IoStats::default());
        let pager = Self {
            inner,
            stats: Arc::clone(&stats),
        };
        (pager, stats)
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn stats(&self) -> &Arc<IoStats> {
        &self.stats
    }

    #[inline]
    fn bump(counter: &AtomicU64, by: usize) {
        counter.fetch_add(by as u64, Ordering::Relaxed);
    }
}

impl<P: Pager> Pager for InstrumentedPager<P> {
    type Blob = P::Blob;

    fn alloc_many(&self, n: usize) -> Result<Vec<PhysicalKey>> {
        Self::bump(&self.stats.physical_allocs, n);
        self.inner.alloc_many(n)
    }

    fn batch_get(&self, gets: &[BatchGet]) -> Result<Vec<GetResult<Self::Blob>>> {
        Self::bump(&self.stats.get_batches, 1);
        Self::bump(&self.stats.physical_gets, gets.len());
        let results = self.inner.batch_get(gets)?;
        for result in &results {
            match result {
                GetResult::Raw { bytes, .. } => {
                    Self::bump(&self.stats.get_bytes, bytes.as_ref().len())
                }
                GetResult::Missing { .. } => Self::bump(&self.stats.missing_gets, 1),
            }
        }
        Ok(results)
    }

    fn batch_put(&self, puts: &[BatchPut]) -> Result<()> {
        Self::bump(&self.stats.put_batches, 1);
        Self::bump(&self.stats.physical_puts, puts.len());
        Self::bump(&self.stats.put_bytes, puts.iter().map(BatchPut::len).sum());
        self.inner.batch_put(puts)
    }

    fn free_many(&self, keys: &[PhysicalKey]) -> Result<()> {
        Self::bump(&self.stats.free_batches, 1);
        Self::bump(&self.stats.physical_frees, keys.len());
        self.inner.free_many(keys)
    }

    fn enumerate_keys(&self) -> Result<Vec<PhysicalKey>> {
        self.inner.enumerate_keys()
    }
}
