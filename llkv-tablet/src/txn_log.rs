//! Transaction logs: the durable record of a finished compaction.

use crate::metadata::{FileInfo, RowsetMetadata};
use crate::types::{RowsetId, TabletId, TxnId};
use llkv_result::{Error, Result};

/// Inputs and output of one compaction.
#[derive(Debug, Clone, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct OpCompaction {
    /// Rowsets consumed by the compaction, in merge order.
    pub input_rowsets: Vec<RowsetId>,
    /// The produced rowset. Its id is assigned on publish; `overlapped` is
    /// always false.
    pub output_rowset: RowsetMetadata,
    /// `(rssid << 32) | rowid` of every output row, in output order. Only
    /// written for primary-key tablets.
    pub rows_mapper: Option<FileInfo>,
}

/// An operation record appended to a tablet's metadata log.
#[derive(Debug, Clone, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct TxnLog {
    pub tablet_id: TabletId,
    pub txn_id: TxnId,
    pub op_compaction: OpCompaction,
}

impl TxnLog {
    pub fn to_bytes(&self) -> Vec<u8> {
        bitcode::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bitcode::decode(bytes)
            .map_err(|e| Error::CatalogError(format!("txn log decode failed: {}", e)))
    }
}
