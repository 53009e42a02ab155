//! Core TabletManager implementation.

use crate::cache::SegmentCache;
use crate::catalog::{TabletCatalog, TxnLogKey};
use crate::metadata::{FileInfo, RowsetMetadata};
use crate::schema::TabletSchema;
use crate::tablet::Tablet;
use crate::txn_log::TxnLog;
use crate::types::{FileId, RowsetId, TabletId, TxnId};
use crate::writer::{WriterConfig, write_parquet_to_memory_with_config};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use llkv_result::{Error, Result};
use llkv_storage::constants::CATALOG_ROOT_PKEY;
use llkv_storage::pager::{BatchPut, Pager};
use llkv_storage::types::PhysicalKey;
use rustc_hash::FxHashSet;
use std::sync::{Arc, RwLock};

/// Main interface for tablet metadata and rowset files.
///
/// `TabletManager` owns the catalog of tablets (persisted at the pager's
/// reserved root key), stores segment files and transaction logs as blobs, and
/// hands out [`Tablet`] snapshots. Clones share the same catalog and caches.
pub struct TabletManager<P>
where
    P: Pager<Blob = Bytes>,
{
    pager: Arc<P>,
    catalog: Arc<RwLock<TabletCatalog>>,
    segment_cache: Arc<SegmentCache>,
    writer_config: WriterConfig,
}

impl<P> Clone for TabletManager<P>
where
    P: Pager<Blob = Bytes>,
{
    fn clone(&self) -> Self {
        Self {
            pager: Arc::clone(&self.pager),
            catalog: Arc::clone(&self.catalog),
            segment_cache: Arc::clone(&self.segment_cache),
            writer_config: self.writer_config.clone(),
        }
    }
}

impl<P> TabletManager<P>
where
    P: Pager<Blob = Bytes>,
{
    /// Open or create a TabletManager using the provided pager with default
    /// configuration.
    pub fn open(pager: Arc<P>) -> Result<Self> {
        Self::open_with_config(pager, WriterConfig::default(), Arc::default())
    }

    /// Open or create a TabletManager with custom writer configuration and a
    /// shared segment cache.
    ///
    /// Loads the catalog from the pager's reserved key, or initializes
    /// an empty catalog if none exists.
    pub fn open_with_config(
        pager: Arc<P>,
        writer_config: WriterConfig,
        segment_cache: Arc<SegmentCache>,
    ) -> Result<Self> {
        let catalog = match pager.get_raw(CATALOG_ROOT_PKEY)? {
            Some(bytes) => TabletCatalog::from_bytes(bytes.as_ref())?,
            None => {
                // Initialize empty catalog and reserve its key by writing it immediately
                let catalog = TabletCatalog::default();
                pager.batch_put(&[BatchPut::Raw {
                    key: CATALOG_ROOT_PKEY,
                    bytes: Bytes::from(catalog.to_bytes()),
                }])?;
                catalog
            }
        };

        Ok(Self {
            pager,
            catalog: Arc::new(RwLock::new(catalog)),
            segment_cache,
            writer_config,
        })
    }

    pub fn pager(&self) -> &Arc<P> {
        &self.pager
    }

    pub fn segment_cache(&self) -> &Arc<SegmentCache> {
        &self.segment_cache
    }

    pub fn writer_config(&self) -> &WriterConfig {
        &self.writer_config
    }

    /// Persist the catalog to the pager.
    fn save_catalog(&self) -> Result<()> {
        let bytes = {
            let catalog = self.catalog.read().expect("tablet catalog lock poisoned");
            catalog.to_bytes()
        };

        self.pager.batch_put(&[BatchPut::Raw {
            key: CATALOG_ROOT_PKEY,
            bytes: Bytes::from(bytes),
        }])
    }

    /// Register a new tablet.
    pub fn create_tablet(&self, schema: TabletSchema) -> Result<TabletId> {
        let tablet_id = {
            let mut catalog = self.catalog.write().expect("tablet catalog lock poisoned");
            catalog.create_tablet(schema)
        };
        self.save_catalog()?;
        tracing::debug!(tablet = %tablet_id, "created tablet");
        Ok(tablet_id)
    }

    /// Snapshot of the tablet's current metadata.
    pub fn get_tablet(&self, tablet_id: TabletId) -> Result<Tablet<P>> {
        let metadata = {
            let catalog = self.catalog.read().expect("tablet catalog lock poisoned");
            catalog.get_tablet(tablet_id)?.clone()
        };
        Ok(Tablet::new(self.clone(), metadata))
    }

    /// Ingest `batches` as one new rowset, one segment per batch.
    ///
    /// Every batch must match the tablet schema and be sorted by the sort
    /// key. Unless `overlapped` is set, the segments must also be sorted
    /// relative to each other. Parquet encoding is parallelized across batches
    /// using Rayon.
    pub fn write_rowset(
        &self,
        tablet_id: TabletId,
        batches: Vec<RecordBatch>,
        overlapped: bool,
    ) -> Result<RowsetId> {
        let schema = {
            let catalog = self.catalog.read().expect("tablet catalog lock poisoned");
            catalog.get_tablet(tablet_id)?.schema.clone()
        };
        for batch in &batches {
            schema.check_arrow_schema(batch.schema().as_ref())?;
        }
        let batches: Vec<RecordBatch> = batches.into_iter().filter(|b| b.num_rows() > 0).collect();

        let file_ids = self.pager.alloc_many(batches.len())?;

        use rayon::prelude::*;
        let encoded = batches
            .par_iter()
            .map(|batch| write_parquet_to_memory_with_config(batch, &self.writer_config))
            .collect::<Result<Vec<_>>>()?;

        let mut puts = Vec::with_capacity(encoded.len());
        let mut segments = Vec::with_capacity(encoded.len());
        for (idx, (file_id, bytes)) in file_ids.iter().zip(encoded).enumerate() {
            segments.push(FileInfo {
                name: format!("{:016x}_{:016x}_{}.parquet", tablet_id.0, file_id, idx),
                key: *file_id,
                size: bytes.len() as u64,
            });
            puts.push(BatchPut::Raw {
                key: *file_id,
                bytes,
            });
        }
        self.pager.batch_put(&puts)?;

        let rowset = RowsetMetadata {
            id: 0,
            num_rows: batches.iter().map(|b| b.num_rows() as u64).sum(),
            data_size: segments.iter().map(|s| s.size).sum(),
            segments,
            overlapped: overlapped && batches.len() > 1,
            version: 0,
        };
        let rowset_id = {
            let mut catalog = self.catalog.write().expect("tablet catalog lock poisoned");
            catalog.get_tablet_mut(tablet_id)?.append_rowset(rowset)
        };
        self.save_catalog()?;
        tracing::debug!(tablet = %tablet_id, rowset = rowset_id, "wrote rowset");
        Ok(rowset_id)
    }

    /// Store a transaction log. A log previously stored for the same
    /// transaction is replaced.
    pub fn put_txn_log(&self, log: &TxnLog) -> Result<()> {
        let key = self.pager.alloc_many(1)?[0];
        self.pager.batch_put(&[BatchPut::Raw {
            key,
            bytes: Bytes::from(log.to_bytes()),
        }])?;
        let replaced = {
            let mut catalog = self.catalog.write().expect("tablet catalog lock poisoned");
            catalog.get_tablet(log.tablet_id)?;
            catalog.put_txn_log(
                TxnLogKey {
                    tablet_id: log.tablet_id,
                    txn_id: log.txn_id,
                },
                key,
            )
        };
        self.save_catalog()?;
        if let Some(old) = replaced {
            self.pager.free_many(&[old])?;
        }
        tracing::debug!(tablet = %log.tablet_id, txn_id = log.txn_id, "stored txn log");
        Ok(())
    }

    pub fn get_txn_log(&self, tablet_id: TabletId, txn_id: TxnId) -> Result<TxnLog> {
        let file = {
            let catalog = self.catalog.read().expect("tablet catalog lock poisoned");
            catalog
                .txn_log_file(TxnLogKey { tablet_id, txn_id })
                .ok_or(Error::NotFound)?
        };
        let bytes = self.pager.get_raw(file)?.ok_or(Error::NotFound)?;
        TxnLog::from_bytes(bytes.as_ref())
    }

    /// Every stored log of a tablet, ordered by transaction id.
    pub fn txn_logs(&self, tablet_id: TabletId) -> Result<Vec<TxnLog>> {
        let files = {
            let catalog = self.catalog.read().expect("tablet catalog lock poisoned");
            catalog.get_tablet(tablet_id)?;
            catalog.txn_logs_of(tablet_id)
        };
        files
            .into_iter()
            .map(|(_, file)| {
                let bytes = self.pager.get_raw(file)?.ok_or(Error::NotFound)?;
                TxnLog::from_bytes(bytes.as_ref())
            })
            .collect()
    }

    /// Apply the compaction recorded in a stored log: drop its input rowsets
    /// and make its output visible as the newest rowset.
    ///
    /// Returns the id assigned to the output rowset.
    pub fn publish_compaction(&self, tablet_id: TabletId, txn_id: TxnId) -> Result<RowsetId> {
        let log = self.get_txn_log(tablet_id, txn_id)?;
        let op = log.op_compaction;

        let (rowset_id, removed) = {
            let mut catalog = self.catalog.write().expect("tablet catalog lock poisoned");
            let tablet = catalog.get_tablet_mut(tablet_id)?;
            if let Some(missing) = op
                .input_rowsets
                .iter()
                .find(|id| tablet.find_rowset(**id).is_none())
            {
                return Err(Error::InvalidState(format!(
                    "input rowset {missing} of txn {txn_id} is no longer part of tablet {tablet_id}"
                )));
            }
            let inputs: FxHashSet<RowsetId> = op.input_rowsets.iter().copied().collect();
            let mut removed = Vec::new();
            tablet.rowsets.retain(|r| {
                let keep = !inputs.contains(&r.id);
                if !keep {
                    removed.extend(r.segments.iter().map(|s| s.key));
                }
                keep
            });
            let mut output = op.output_rowset;
            output.overlapped = false;
            (tablet.append_rowset(output), removed)
        };
        self.save_catalog()?;

        // Input files stay in the pager; only cached copies go.
        for key in removed {
            self.segment_cache.evict(key);
        }
        tracing::info!(tablet = %tablet_id, txn_id, rowset = rowset_id, "published compaction");
        Ok(rowset_id)
    }

    /// Collect all physical keys currently referenced by the catalog.
    ///
    /// Returns a set containing:
    /// - The catalog root key
    /// - All segment file keys of visible rowsets
    /// - All stored txn logs and the files they reference
    pub fn collect_reachable_keys(&self) -> Result<FxHashSet<PhysicalKey>> {
        let (mut reachable, logs) = {
            let catalog = self.catalog.read().expect("tablet catalog lock poisoned");
            let mut reachable = FxHashSet::default();
            reachable.insert(CATALOG_ROOT_PKEY);
            for tablet in catalog.tablets.values() {
                for rowset in &tablet.rowsets {
                    reachable.extend(rowset.segments.iter().map(|s| s.key));
                }
            }
            let logs: Vec<FileId> = catalog.txn_logs.values().copied().collect();
            (reachable, logs)
        };
        for file in logs {
            reachable.insert(file);
            if let Some(bytes) = self.pager.get_raw(file)? {
                let op = TxnLog::from_bytes(bytes.as_ref())?.op_compaction;
                reachable.extend(op.output_rowset.segments.iter().map(|s| s.key));
                reachable.extend(op.rows_mapper.iter().map(|f| f.key));
            }
        }
        Ok(reachable)
    }
}
