//! Shared caches for segment footers and segment data.

use bytes::Bytes;
use llkv_storage::types::PhysicalKey;
use parquet::arrow::arrow_reader::ArrowReaderMetadata;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};

/// Default byte budget of the segment data cache.
pub const DEFAULT_DATA_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

/// Options controlling how segment opens interact with the caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LakeIoOptions {
    /// Insert fetched segment blobs into the data cache.
    pub fill_data_cache: bool,
}

/// Process-wide cache shared by readers of every tablet.
///
/// Footers are small and cached without a bound once a caller asks for them.
/// Segment blobs go through a FIFO cache bounded by bytes.
pub struct SegmentCache {
    metas: RwLock<FxHashMap<PhysicalKey, ArrowReaderMetadata>>,
    data: Mutex<DataCache>,
}

struct DataCache {
    capacity: usize,
    used: usize,
    entries: FxHashMap<PhysicalKey, Bytes>,
    order: VecDeque<PhysicalKey>,
}

impl DataCache {
    fn insert(&mut self, key: PhysicalKey, data: Bytes) {
        if data.len() > self.capacity || self.entries.contains_key(&key) {
            return;
        }
        while self.used + data.len() > self.capacity {
            let Some(victim) = self.order.pop_front() else {
                break;
            };
            if let Some(old) = self.entries.remove(&victim) {
                self.used -= old.len();
            }
        }
        self.used += data.len();
        self.order.push_back(key);
        self.entries.insert(key, data);
    }

    fn remove(&mut self, key: PhysicalKey) {
        if let Some(old) = self.entries.remove(&key) {
            self.used -= old.len();
            self.order.retain(|k| *k != key);
        }
    }
}

impl Default for SegmentCache {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_CACHE_CAPACITY)
    }
}

impl SegmentCache {
    pub fn new(data_capacity: usize) -> Self {
        Self {
            metas: RwLock::new(FxHashMap::default()),
            data: Mutex::new(DataCache {
                capacity: data_capacity,
                used: 0,
                entries: FxHashMap::default(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn lookup_meta(&self, key: PhysicalKey) -> Option<ArrowReaderMetadata> {
        self.metas
            .read()
            .expect("segment meta cache lock poisoned")
            .get(&key)
            .cloned()
    }

    pub fn insert_meta(&self, key: PhysicalKey, meta: ArrowReaderMetadata) {
        self.metas
            .write()
            .expect("segment meta cache lock poisoned")
            .insert(key, meta);
    }

    pub fn lookup_data(&self, key: PhysicalKey) -> Option<Bytes> {
        self.data
            .lock()
            .expect("segment data cache lock poisoned")
            .entries
            .get(&key)
            .cloned()
    }

    pub fn insert_data(&self, key: PhysicalKey, data: Bytes) {
        self.data
            .lock()
            .expect("segment data cache lock poisoned")
            .insert(key, data);
    }

    /// Drop every cached entry for `key`.
    pub fn evict(&self, key: PhysicalKey) {
        self.metas
            .write()
            .expect("segment meta cache lock poisoned")
            .remove(&key);
        self.data
            .lock()
            .expect("segment data cache lock poisoned")
            .remove(key);
    }

    pub fn meta_entries(&self) -> usize {
        self.metas
            .read()
            .expect("segment meta cache lock poisoned")
            .len()
    }

    pub fn data_entries(&self) -> usize {
        self.data
            .lock()
            .expect("segment data cache lock poisoned")
            .entries
            .len()
    }

    pub fn data_bytes(&self) -> usize {
        self.data
            .lock()
            .expect("segment data cache lock poisoned")
            .used
    }
}

impl std::fmt::Debug for SegmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentCache")
            .field("meta_entries", &self.meta_entries())
            .field("data_entries", &self.data_entries())
            .field("data_bytes", &self.data_bytes())
            .finish()
    }
}
