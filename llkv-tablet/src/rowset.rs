//! Read-side handle over one rowset.

use crate::cache::{LakeIoOptions, SegmentCache};
use crate::metadata::RowsetMetadata;
use crate::segment::Segment;
use crate::types::{RowsetId, Rssid};
use bytes::Bytes;
use llkv_result::Result;
use llkv_storage::pager::Pager;
use std::sync::Arc;

/// An immutable rowset of a tablet together with what is needed to open its
/// segments.
pub struct Rowset<P>
where
    P: Pager<Blob = Bytes>,
{
    pager: Arc<P>,
    cache: Arc<SegmentCache>,
    metadata: RowsetMetadata,
}

impl<P> Clone for Rowset<P>
where
    P: Pager<Blob = Bytes>,
{
    fn clone(&self) -> Self {
        Self {
            pager: Arc::clone(&self.pager),
            cache: Arc::clone(&self.cache),
            metadata: self.metadata.clone(),
        }
    }
}

impl<P> Rowset<P>
where
    P: Pager<Blob = Bytes>,
{
    pub fn new(pager: Arc<P>, cache: Arc<SegmentCache>, metadata: RowsetMetadata) -> Self {
        Self {
            pager,
            cache,
            metadata,
        }
    }

    #[inline]
    pub fn id(&self) -> RowsetId {
        self.metadata.id
    }

    #[inline]
    pub fn num_rows(&self) -> u64 {
        self.metadata.num_rows
    }

    #[inline]
    pub fn data_size(&self) -> u64 {
        self.metadata.data_size
    }

    #[inline]
    pub fn num_segments(&self) -> usize {
        self.metadata.num_segments()
    }

    #[inline]
    pub fn is_overlapped(&self) -> bool {
        self.metadata.overlapped
    }

    pub fn metadata(&self) -> &RowsetMetadata {
        &self.metadata
    }

    /// Rssid of the segment at `index`.
    #[inline]
    pub fn rssid(&self, index: usize) -> Rssid {
        self.metadata.id + index as Rssid
    }

    /// Open every segment of the rowset, in row order.
    pub fn segments(&self, io_opts: LakeIoOptions, fill_meta_cache: bool) -> Result<Vec<Arc<Segment>>> {
        self.metadata
            .segments
            .iter()
            .map(|file| {
                Segment::open(
                    self.pager.as_ref(),
                    file,
                    &self.cache,
                    io_opts,
                    fill_meta_cache,
                )
            })
            .collect()
    }
}

impl<P> std::fmt::Debug for Rowset<P>
where
    P: Pager<Blob = Bytes>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rowset")
            .field("metadata", &self.metadata)
            .finish()
    }
}
