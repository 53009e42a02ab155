//! Minimal pager trait + in-memory implementation returning `Bytes` blobs.
//!
//! Returning `bytes::Bytes` lets the Parquet reader borrow segment blobs
//! straight out of pager memory without copying them.

use crate::types::PhysicalKey;
use bytes::Bytes;
use llkv_result::Result;

pub mod instrumented_pager;
pub use instrumented_pager::*;

pub mod mem_pager;
pub use mem_pager::*;

#[derive(Clone, Debug)]
pub enum BatchPut {
    Raw { key: PhysicalKey, bytes: Bytes },
}

impl BatchPut {
    #[inline]
    pub fn key(&self) -> PhysicalKey {
        match self {
            BatchPut::Raw { key, .. } => *key,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            BatchPut::Raw { bytes, .. } => bytes.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug)]
pub enum BatchGet {
    Raw { key: PhysicalKey },
}

#[derive(Clone, Debug)]
pub enum GetResult<B> {
    Raw { key: PhysicalKey, bytes: B },
    Missing { key: PhysicalKey },
}

impl<B> GetResult<B> {
    /// Returns the blob, or `None` when the key was missing.
    pub fn into_blob(self) -> Option<B> {
        match self {
            GetResult::Raw { bytes, .. } => Some(bytes),
            GetResult::Missing { .. } => None,
        }
    }
}

pub trait Pager: Send + Sync + 'static {
    type Blob: AsRef<[u8]> + Clone + Send + Sync + 'static;

    /// Allocate `n` new physical keys.
    fn alloc_many(&self, n: usize) -> Result<Vec<PhysicalKey>>;

    /// Batch get blobs; returns one `GetResult` per request in order.
    fn batch_get(&self, gets: &[BatchGet]) -> Result<Vec<GetResult<Self::Blob>>>;

    /// Batch put blobs at fixed keys.
    fn batch_put(&self, puts: &[BatchPut]) -> Result<()>;

    /// Batch free physical keys (best-effort). Implementations may ignore
    /// unknown keys.
    fn free_many(&self, keys: &[PhysicalKey]) -> Result<()>;

    /// List every key currently holding a blob, in ascending order.
    fn enumerate_keys(&self) -> Result<Vec<PhysicalKey>>;

    /// Convenience wrapper around [`Pager::batch_get`] for a single key.
    fn get_raw(&self, key: PhysicalKey) -> Result<Option<Self::Blob>> {
        let mut res = self.batch_get(&[BatchGet::Raw { key }])?;
        Ok(res.pop().and_then(GetResult::into_blob))
    }
}
