//! Core identifiers shared by the tablet layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a tablet.
///
/// This is a simple wrapper around `u64` to keep tablet ids from being mixed
/// up with physical keys, rowset ids or transaction ids.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    bitcode::Encode,
    bitcode::Decode,
)]
pub struct TabletId(pub u64);

impl From<u64> for TabletId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<TabletId> for u64 {
    fn from(id: TabletId) -> Self {
        id.0
    }
}

impl fmt::Display for TabletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a rowset within its tablet.
///
/// A rowset with `n` segments reserves the id range `id..id + n`, so
/// `id + segment_index` (an rssid) names one segment uniquely in the tablet.
pub type RowsetId = u32;

/// Rowset id plus segment index. See [`RowsetId`].
pub type Rssid = u32;

/// Transaction identifier assigned by the scheduler.
pub type TxnId = i64;

/// Unique identifier for a blob stored in the pager.
pub type FileId = llkv_storage::types::PhysicalKey;

/// Packs a segment-qualified row position into one `u64`: `(rssid << 32) | rowid`.
#[inline]
pub fn rssid_rowid(rssid: Rssid, rowid: u32) -> u64 {
    (u64::from(rssid) << 32) | u64::from(rowid)
}

/// Inverse of [`rssid_rowid`].
#[inline]
pub fn split_rssid_rowid(packed: u64) -> (Rssid, u32) {
    ((packed >> 32) as Rssid, packed as u32)
}
