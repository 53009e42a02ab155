//! Persistent catalog of tablets and stored transaction logs.

use crate::metadata::TabletMetadata;
use crate::schema::TabletSchema;
use crate::types::{FileId, TabletId, TxnId};
use llkv_result::{Error, Result};
use rustc_hash::FxHashMap;

/// Key of a stored transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, bitcode::Encode, bitcode::Decode)]
pub struct TxnLogKey {
    pub tablet_id: TabletId,
    pub txn_id: TxnId,
}

/// Catalog mapping tablet ids to their metadata.
///
/// The catalog is persisted as a single blob in the pager at a reserved key.
/// Transaction logs live in their own blobs; the catalog only records where.
#[derive(Debug, Clone, bitcode::Encode, bitcode::Decode)]
pub struct TabletCatalog {
    pub(crate) tablets: FxHashMap<TabletId, TabletMetadata>,
    pub(crate) txn_logs: FxHashMap<TxnLogKey, FileId>,
    pub(crate) next_tablet_id: u64,
}

impl Default for TabletCatalog {
    fn default() -> Self {
        Self {
            tablets: FxHashMap::default(),
            txn_logs: FxHashMap::default(),
            next_tablet_id: 1, // Reserve 0 for system use
        }
    }
}

impl TabletCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize the catalog to bytes using bitcode.
    pub fn to_bytes(&self) -> Vec<u8> {
        bitcode::encode(self)
    }

    /// Deserialize the catalog from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bitcode::decode(bytes)
            .map_err(|e| Error::CatalogError(format!("catalog decode failed: {}", e)))
    }

    pub fn create_tablet(&mut self, schema: TabletSchema) -> TabletId {
        let id = TabletId(self.next_tablet_id);
        self.next_tablet_id += 1;
        self.tablets.insert(id, TabletMetadata::new(id, schema));
        id
    }

    pub fn get_tablet(&self, id: TabletId) -> Result<&TabletMetadata> {
        self.tablets.get(&id).ok_or(Error::NotFound)
    }

    pub fn get_tablet_mut(&mut self, id: TabletId) -> Result<&mut TabletMetadata> {
        self.tablets.get_mut(&id).ok_or(Error::NotFound)
    }

    /// Records where the log for `key` is stored, returning the blob of a log
    /// it replaces.
    pub fn put_txn_log(&mut self, key: TxnLogKey, file: FileId) -> Option<FileId> {
        self.txn_logs.insert(key, file)
    }

    pub fn txn_log_file(&self, key: TxnLogKey) -> Option<FileId> {
        self.txn_logs.get(&key).copied()
    }

    /// Stored logs of one tablet, ordered by transaction id.
    pub fn txn_logs_of(&self, tablet_id: TabletId) -> Vec<(TxnId, FileId)> {
        let mut logs: Vec<_> = self
            .txn_logs
            .iter()
            .filter(|(k, _)| k.tablet_id == tablet_id)
            .map(|(k, f)| (k.txn_id, *f))
            .collect();
        logs.sort_unstable();
        logs
    }
}
