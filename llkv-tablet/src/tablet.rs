//! Snapshot handle over one tablet.

use crate::metadata::TabletMetadata;
use crate::rowset::Rowset;
use crate::schema::TabletSchema;
use crate::tablet_manager::TabletManager;
use crate::tablet_writer::{TabletWriterOptions, VerticalTabletWriter};
use crate::txn_log::TxnLog;
use crate::types::{RowsetId, TabletId, TxnId};
use bytes::Bytes;
use llkv_result::{Error, Result};
use llkv_storage::pager::Pager;
use std::sync::Arc;

/// A tablet as of one metadata version.
///
/// The handle does not observe later publishes; fetch a new one from the
/// [`TabletManager`] for that.
pub struct Tablet<P>
where
    P: Pager<Blob = Bytes>,
{
    manager: TabletManager<P>,
    metadata: Arc<TabletMetadata>,
}

impl<P> Clone for Tablet<P>
where
    P: Pager<Blob = Bytes>,
{
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            metadata: Arc::clone(&self.metadata),
        }
    }
}

impl<P> Tablet<P>
where
    P: Pager<Blob = Bytes>,
{
    pub(crate) fn new(manager: TabletManager<P>, metadata: TabletMetadata) -> Self {
        Self {
            manager,
            metadata: Arc::new(metadata),
        }
    }

    #[inline]
    pub fn id(&self) -> TabletId {
        self.metadata.id
    }

    #[inline]
    pub fn version(&self) -> i64 {
        self.metadata.version
    }

    pub fn schema(&self) -> &TabletSchema {
        &self.metadata.schema
    }

    pub fn metadata(&self) -> &TabletMetadata {
        &self.metadata
    }

    pub fn tablet_manager(&self) -> &TabletManager<P> {
        &self.manager
    }

    fn to_rowset(&self, meta: &crate::metadata::RowsetMetadata) -> Rowset<P> {
        Rowset::new(
            Arc::clone(self.manager.pager()),
            Arc::clone(self.manager.segment_cache()),
            meta.clone(),
        )
    }

    /// Every visible rowset, oldest first.
    pub fn rowsets(&self) -> Vec<Rowset<P>> {
        self.metadata
            .rowsets
            .iter()
            .map(|m| self.to_rowset(m))
            .collect()
    }

    /// The rowsets `ids`, in the order given.
    pub fn get_rowsets(&self, ids: &[RowsetId]) -> Result<Vec<Rowset<P>>> {
        ids.iter()
            .map(|&id| {
                self.metadata
                    .find_rowset(id)
                    .map(|m| self.to_rowset(m))
                    .ok_or_else(|| {
                        Error::InvalidArgumentError(format!(
                            "rowset {id} does not belong to tablet {} at version {}",
                            self.id(),
                            self.version()
                        ))
                    })
            })
            .collect()
    }

    /// Create a vertical writer producing a new rowset of this tablet.
    pub fn new_writer(&self, opts: TabletWriterOptions) -> VerticalTabletWriter<P> {
        VerticalTabletWriter::new(
            Arc::clone(self.manager.pager()),
            self.id(),
            self.metadata.schema.clone(),
            self.manager.writer_config().clone(),
            opts,
        )
    }

    pub fn put_txn_log(&self, log: &TxnLog) -> Result<()> {
        if log.tablet_id != self.id() {
            return Err(Error::InvalidArgumentError(format!(
                "txn log of tablet {} written through tablet {}",
                log.tablet_id,
                self.id()
            )));
        }
        self.manager.put_txn_log(log)
    }

    pub fn get_txn_log(&self, txn_id: TxnId) -> Result<TxnLog> {
        self.manager.get_txn_log(self.id(), txn_id)
    }
}

impl<P> std::fmt::Debug for Tablet<P>
where
    P: Pager<Blob = Bytes>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tablet")
            .field("id", &self.id())
            .field("version", &self.version())
            .field("rowsets", &self.metadata.rowsets.len())
            .finish()
    }
}
