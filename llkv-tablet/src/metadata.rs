//! Persisted descriptions of files, rowsets and tablets.

use crate::schema::TabletSchema;
use crate::types::{FileId, RowsetId, TabletId};

/// A blob in the pager that backs one logical file.
#[derive(Debug, Clone, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct FileInfo {
    /// Human readable file name, unique within the tablet.
    pub name: String,
    /// Physical key in the pager where the blob is stored.
    pub key: FileId,
    /// Blob size in bytes.
    pub size: u64,
}

/// Metadata of one immutable rowset.
#[derive(Debug, Clone, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct RowsetMetadata {
    /// Assigned when the rowset becomes visible; `0` for a compaction output
    /// that has not been published yet.
    pub id: RowsetId,
    /// Segment files in row order.
    pub segments: Vec<FileInfo>,
    pub num_rows: u64,
    pub data_size: u64,
    /// Whether the rows may interleave with rows of sibling rowsets. Segments
    /// of an overlapped rowset are each sorted but not sorted relative to each
    /// other.
    pub overlapped: bool,
    /// Tablet version that made this rowset visible.
    pub version: i64,
}

impl RowsetMetadata {
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Number of rowset ids this rowset occupies (one per segment, at least one).
    pub fn id_span(&self) -> u32 {
        self.segments.len().max(1) as u32
    }
}

/// Metadata for a single tablet.
///
/// Tracks the tablet's schema, its visible rowsets and the version counter
/// bumped by every publish.
#[derive(Debug, Clone, bitcode::Encode, bitcode::Decode)]
pub struct TabletMetadata {
    pub id: TabletId,
    pub version: i64,
    pub schema: TabletSchema,
    /// Visible rowsets, oldest first.
    pub rowsets: Vec<RowsetMetadata>,
    pub next_rowset_id: RowsetId,
}

impl TabletMetadata {
    pub fn new(id: TabletId, schema: TabletSchema) -> Self {
        Self {
            id,
            version: 1,
            schema,
            rowsets: Vec::new(),
            next_rowset_id: 1,
        }
    }

    pub fn num_rows(&self) -> u64 {
        self.rowsets.iter().map(|r| r.num_rows).sum()
    }

    pub fn find_rowset(&self, id: RowsetId) -> Option<&RowsetMetadata> {
        self.rowsets.iter().find(|r| r.id == id)
    }

    /// Assigns the next rowset id to `rowset` and appends it as the newest
    /// rowset.
    pub(crate) fn append_rowset(&mut self, mut rowset: RowsetMetadata) -> RowsetId {
        let id = self.next_rowset_id;
        self.next_rowset_id += rowset.id_span();
        self.version += 1;
        rowset.id = id;
        rowset.version = self.version;
        self.rowsets.push(rowset);
        id
    }
}
