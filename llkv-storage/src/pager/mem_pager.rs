use super::*;
use crate::constants::CATALOG_ROOT_PKEY;
use crate::types::PhysicalKey;
use bytes::Bytes;
use llkv_result::{Error, Result};
use rustc_hash::FxHashMap;
use std::sync::{
    RwLock, RwLockReadGuard, RwLockWriteGuard,
    atomic::{AtomicU64, Ordering},
};

/// Blob table of a [`MemPager`] together with its running payload size.
#[derive(Default)]
struct BlobTable {
    blobs: FxHashMap<PhysicalKey, Bytes>,
    bytes: usize,
}

impl BlobTable {
    fn insert(&mut self, key: PhysicalKey, blob: Bytes) {
        self.bytes += blob.len();
        if let Some(old) = self.blobs.insert(key, blob) {
            self.bytes -= old.len();
        }
    }

    fn remove(&mut self, key: PhysicalKey) {
        if let Some(old) = self.blobs.remove(&key) {
            self.bytes -= old.len();
        }
    }
}

/// Pager that keeps every catalog, segment, part and txn log blob in process
/// memory.
///
/// Blobs are stored as [`Bytes`], so a read hands out a shared view of the
/// stored buffer instead of a copy.
#[allow(clippy::module_name_repetitions)]
pub struct MemPager {
    next_key: AtomicU64,
    table: RwLock<BlobTable>,
}

impl Default for MemPager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemPager {
    /// Empty pager. Allocation starts right after the catalog root key.
    pub fn new() -> Self {
        Self {
            next_key: AtomicU64::new(CATALOG_ROOT_PKEY + 1),
            table: RwLock::new(BlobTable::default()),
        }
    }

    fn read_table(&self) -> RwLockReadGuard<'_, BlobTable> {
        self.table.read().expect("MemPager blob table lock poisoned")
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, BlobTable> {
        self.table.write().expect("MemPager blob table lock poisoned")
    }

    pub fn len(&self) -> usize {
        self.read_table().blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload bytes held across all stored blobs.
    pub fn total_bytes(&self) -> usize {
        self.read_table().bytes
    }
}

impl Pager for MemPager {
    type Blob = Bytes;

    fn alloc_many(&self, n: usize) -> Result<Vec<PhysicalKey>> {
        let count = n as u64;
        let first = self
            .next_key
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                next.checked_add(count)
            })
            .map_err(|_| Error::Internal("pager ran out of physical keys".into()))?;
        Ok((first..first + count).collect())
    }

    fn batch_put(&self, puts: &[BatchPut]) -> Result<()> {
        let mut table = self.write_table();
        for put in puts {
            let BatchPut::Raw { key, bytes } = put;
            table.insert(*key, bytes.clone());
        }
        Ok(())
    }

    fn batch_get(&self, gets: &[BatchGet]) -> Result<Vec<GetResult<Self::Blob>>> {
        let table = self.read_table();
        Ok(gets
            .iter()
            .map(|&BatchGet::Raw { key }| match table.blobs.get(&key) {
                Some(blob) => GetResult::Raw {
                    key,
                    bytes: blob.clone(),
                },
                None => GetResult::Missing { key },
            })
            .collect())
    }

    fn free_many(&self, keys: &[PhysicalKey]) -> Result<()> {
        let mut table = self.write_table();
        keys.iter().for_each(|&key| table.remove(key));
        Ok(())
    }

    fn enumerate_keys(&self) -> Result<Vec<PhysicalKey>> {
        let mut keys: Vec<PhysicalKey> = self.read_table().blobs.keys().copied().collect();
        keys.sort_unstable();
        Ok(keys)
    }
}
