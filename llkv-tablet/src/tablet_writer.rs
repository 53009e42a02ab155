//! Writers that turn chunks into the segment files of a new rowset.
//!
//! [`VerticalTabletWriter`] receives the rows of a rowset one column group at
//! a time. Each group is cut into per-segment *parts* (Parquet blobs holding
//! only that group's columns); the key group decides where segment boundaries
//! fall and every later group must line up with them. `finish` stitches the
//! parts of each segment into one full-schema segment file.

use crate::chunk::chunk_memory_usage;
use crate::metadata::FileInfo;
use crate::schema::TabletSchema;
use crate::types::{FileId, TabletId, TxnId};
use crate::writer::{WriterConfig, read_parquet_from_memory, write_parquet_to_memory_with_config};
use arrow::array::ArrayRef;
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use llkv_result::{Error, Result};
use llkv_storage::pager::{BatchGet, BatchPut, GetResult, Pager};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::Instant;

/// Counters reported by a tablet writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Time spent encoding and storing blobs.
    pub segment_write_ns: u64,
    /// Bytes handed to the pager, parts and final segments included.
    pub bytes_written: u64,
    pub parts_written: u64,
}

/// Options for a new tablet writer.
#[derive(Debug, Clone, Copy)]
pub struct TabletWriterOptions {
    pub txn_id: TxnId,
    /// Upper bound on the rows of one output segment.
    pub max_rows_per_segment: usize,
    /// Compaction writers persist the `(rssid, rowid)` list of the key group
    /// as a rows-mapper file.
    pub is_compaction: bool,
}

/// Sink for the rows of one new rowset, written column group by column group.
pub trait TabletWriter: Send {
    fn open(&mut self) -> Result<()>;

    /// Append a chunk holding the columns `column_indexes` of the tablet
    /// schema. `rssid_rowids`, when given, carries one packed source position
    /// per row of a key-group chunk.
    fn write_columns(
        &mut self,
        data: &RecordBatch,
        column_indexes: &[usize],
        is_key: bool,
        rssid_rowids: Option<&[u64]>,
    ) -> Result<()>;

    /// Seal the column group currently being written.
    fn flush_columns(&mut self) -> Result<()>;

    /// Seal the rowset.
    fn finish(&mut self) -> Result<()>;

    /// Release resources. Safe after any failure and idempotent; blobs of an
    /// unfinished writer are freed.
    fn close(&mut self);

    fn txn_id(&self) -> TxnId;

    fn files(&self) -> &[FileInfo];

    fn num_rows(&self) -> u64;

    fn data_size(&self) -> u64;

    fn rows_mapper(&self) -> Option<&FileInfo>;

    fn stats(&self) -> WriterStats;

    /// Bytes of row data and row ids held in memory, not yet stored.
    fn buffered_bytes(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Created,
    Open,
    Finished,
    Closed,
}

#[derive(Debug, Clone)]
struct Part {
    column_indexes: Vec<usize>,
    key: FileId,
}

#[derive(Debug, Default)]
struct SegmentParts {
    num_rows: usize,
    parts: Vec<Part>,
}

/// Column group currently receiving chunks.
struct ActiveGroup {
    column_indexes: Vec<usize>,
    is_key: bool,
    pending: Vec<RecordBatch>,
    pending_rows: usize,
    /// Index of the segment the next part belongs to.
    segment_idx: usize,
    rows_written: u64,
}

/// Pager-backed [`TabletWriter`] for vertical compaction.
pub struct VerticalTabletWriter<P>
where
    P: Pager<Blob = Bytes>,
{
    pager: Arc<P>,
    tablet_id: TabletId,
    schema: TabletSchema,
    config: WriterConfig,
    opts: TabletWriterOptions,
    state: WriterState,
    segments: Vec<SegmentParts>,
    active: Option<ActiveGroup>,
    key_rows: Option<u64>,
    flushed_columns: Vec<bool>,
    rssid_rowids: Vec<u64>,
    /// Every blob this writer has stored and not yet freed.
    owned_keys: Vec<FileId>,
    files: Vec<FileInfo>,
    rows_mapper: Option<FileInfo>,
    num_rows: u64,
    data_size: u64,
    stats: WriterStats,
}

impl<P> VerticalTabletWriter<P>
where
    P: Pager<Blob = Bytes>,
{
    pub fn new(
        pager: Arc<P>,
        tablet_id: TabletId,
        schema: TabletSchema,
        config: WriterConfig,
        opts: TabletWriterOptions,
    ) -> Self {
        let num_columns = schema.num_columns();
        Self {
            pager,
            tablet_id,
            schema,
            config,
            opts: TabletWriterOptions {
                max_rows_per_segment: opts.max_rows_per_segment.max(1),
                ..opts
            },
            state: WriterState::Created,
            segments: Vec::new(),
            active: None,
            key_rows: None,
            flushed_columns: vec![false; num_columns],
            rssid_rowids: Vec::new(),
            owned_keys: Vec::new(),
            files: Vec::new(),
            rows_mapper: None,
            num_rows: 0,
            data_size: 0,
            stats: WriterStats::default(),
        }
    }

    fn check_open(&self, op: &str) -> Result<()> {
        if self.state != WriterState::Open {
            return Err(Error::InvalidState(format!(
                "tablet writer {op} in state {:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn begin_group(&mut self, column_indexes: &[usize], is_key: bool) -> Result<()> {
        if column_indexes.is_empty() {
            return Err(Error::InvalidArgumentError("empty column group".into()));
        }
        for &cid in column_indexes {
            self.schema.column(cid)?;
            if self.flushed_columns[cid] {
                return Err(Error::InvalidState(format!(
                    "column {cid} was already written"
                )));
            }
        }
        match (is_key, self.key_rows.is_some()) {
            (true, true) => {
                return Err(Error::InvalidState("key column group written twice".into()));
            }
            (false, false) => {
                return Err(Error::InvalidState(
                    "non-key column group written before the key group".into(),
                ));
            }
            _ => {}
        }
        self.active = Some(ActiveGroup {
            column_indexes: column_indexes.to_vec(),
            is_key,
            pending: Vec::new(),
            pending_rows: 0,
            segment_idx: 0,
            rows_written: 0,
        });
        Ok(())
    }

    /// Row count the next part of `group` must have, or `None` if the key
    /// group still decides.
    fn target_rows(&self, group: &ActiveGroup) -> Result<Option<usize>> {
        if group.is_key {
            return Ok(None);
        }
        match self.segments.get(group.segment_idx) {
            Some(seg) => Ok(Some(seg.num_rows)),
            None => Err(Error::Internal(format!(
                "column group {:?} has more rows than the key group ({} segments)",
                group.column_indexes,
                self.segments.len()
            ))),
        }
    }

    /// Cut full parts out of the pending chunks. With `drain`, whatever is
    /// left also becomes a part.
    fn cut_parts(&mut self, drain: bool) -> Result<()> {
        loop {
            let Some(group) = self.active.as_ref() else {
                return Ok(());
            };
            if group.pending_rows == 0 {
                return Ok(());
            }
            let target = self
                .target_rows(group)?
                .unwrap_or(self.opts.max_rows_per_segment);
            if group.pending_rows < target && !drain {
                return Ok(());
            }
            if group.pending_rows < target && !group.is_key {
                return Err(Error::Internal(format!(
                    "column group {:?} ended with {} rows for a segment of {} rows",
                    group.column_indexes, group.pending_rows, target
                )));
            }
            let take = group.pending_rows.min(target);
            self.write_part(take)?;
        }
    }

    fn write_part(&mut self, rows: usize) -> Result<()> {
        let Some(group) = self.active.as_mut() else {
            return Err(Error::Internal("no active column group".into()));
        };
        let schema = group.pending[0].schema();
        let merged = concat_batches(&schema, &group.pending)?;
        let part = merged.slice(0, rows);
        let rest = merged.slice(rows, merged.num_rows() - rows);
        group.pending.clear();
        group.pending_rows = rest.num_rows();
        if rest.num_rows() > 0 {
            group.pending.push(rest);
        }
        let segment_idx = group.segment_idx;
        group.segment_idx += 1;
        group.rows_written += rows as u64;
        let is_key = group.is_key;
        let column_indexes = group.column_indexes.clone();

        let start = Instant::now();
        let bytes = write_parquet_to_memory_with_config(&part, &self.config)?;
        let key = self.store_blob(bytes)?;
        self.stats.segment_write_ns += start.elapsed().as_nanos() as u64;
        self.stats.parts_written += 1;

        if is_key {
            self.segments.push(SegmentParts {
                num_rows: rows,
                parts: Vec::new(),
            });
        }
        self.segments[segment_idx].parts.push(Part {
            column_indexes,
            key,
        });
        tracing::trace!(
            tablet = %self.tablet_id,
            segment = segment_idx,
            rows,
            "wrote column group part"
        );
        Ok(())
    }

    fn store_blob(&mut self, bytes: Bytes) -> Result<FileId> {
        let key = self.pager.alloc_many(1)?[0];
        let len = bytes.len() as u64;
        self.pager.batch_put(&[BatchPut::Raw { key, bytes }])?;
        self.owned_keys.push(key);
        self.stats.bytes_written += len;
        Ok(key)
    }

    /// Load the parts of one segment and assemble them into a full-schema
    /// Parquet file.
    fn stitch_segment(&self, seg: &SegmentParts) -> Result<Bytes> {
        let gets: Vec<BatchGet> = seg
            .parts
            .iter()
            .map(|p| BatchGet::Raw { key: p.key })
            .collect();
        let blobs = self.pager.batch_get(&gets)?;

        let mut columns: Vec<Option<ArrayRef>> = vec![None; self.schema.num_columns()];
        for (part, blob) in seg.parts.iter().zip(blobs) {
            let bytes = match blob {
                GetResult::Raw { bytes, .. } => bytes,
                GetResult::Missing { key } => {
                    tracing::error!(key, "column group part missing");
                    return Err(Error::NotFound);
                }
            };
            let batch = read_parquet_from_memory(bytes)?;
            if batch.num_rows() != seg.num_rows {
                return Err(Error::Internal(format!(
                    "part with columns {:?} has {} rows, segment has {}",
                    part.column_indexes,
                    batch.num_rows(),
                    seg.num_rows
                )));
            }
            for (pos, &cid) in part.column_indexes.iter().enumerate() {
                columns[cid] = Some(Arc::clone(batch.column(pos)));
            }
        }

        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(cid, c)| {
                c.ok_or_else(|| Error::Internal(format!("column {cid} missing from segment")))
            })
            .collect::<Result<Vec<_>>>()?;
        let batch = RecordBatch::try_new(self.schema.to_arrow_schema(), columns)?;
        write_parquet_to_memory_with_config(&batch, &self.config)
    }

    fn free_owned(&mut self) {
        if self.owned_keys.is_empty() {
            return;
        }
        let keys = std::mem::take(&mut self.owned_keys);
        if let Err(e) = self.pager.free_many(&keys) {
            tracing::warn!(
                tablet = %self.tablet_id,
                txn_id = self.opts.txn_id,
                error = %e,
                "failed to free blobs of an unfinished tablet writer"
            );
        }
    }
}

impl<P> TabletWriter for VerticalTabletWriter<P>
where
    P: Pager<Blob = Bytes>,
{
    fn open(&mut self) -> Result<()> {
        if self.state != WriterState::Created {
            return Err(Error::InvalidState(format!(
                "tablet writer opened in state {:?}",
                self.state
            )));
        }
        self.state = WriterState::Open;
        Ok(())
    }

    fn write_columns(
        &mut self,
        data: &RecordBatch,
        column_indexes: &[usize],
        is_key: bool,
        rssid_rowids: Option<&[u64]>,
    ) -> Result<()> {
        self.check_open("write_columns")?;
        if data.num_columns() != column_indexes.len() {
            return Err(Error::InvalidArgumentError(format!(
                "chunk has {} columns, column group has {}",
                data.num_columns(),
                column_indexes.len()
            )));
        }
        match &self.active {
            None => self.begin_group(column_indexes, is_key)?,
            Some(group) if group.column_indexes != column_indexes || group.is_key != is_key => {
                return Err(Error::InvalidState(format!(
                    "column group {:?} written before group {:?} was flushed",
                    column_indexes, group.column_indexes
                )));
            }
            Some(_) => {}
        }
        if let Some(ids) = rssid_rowids {
            if !is_key {
                return Err(Error::InvalidArgumentError(
                    "row ids are only accepted with the key column group".into(),
                ));
            }
            if ids.len() != data.num_rows() {
                return Err(Error::InvalidArgumentError(format!(
                    "{} row ids for a chunk of {} rows",
                    ids.len(),
                    data.num_rows()
                )));
            }
            if self.opts.is_compaction {
                self.rssid_rowids.extend_from_slice(ids);
            }
        }
        if data.num_rows() == 0 {
            return Ok(());
        }
        if let Some(group) = self.active.as_mut() {
            group.pending_rows += data.num_rows();
            group.pending.push(data.clone());
        }
        self.cut_parts(false)
    }

    fn flush_columns(&mut self) -> Result<()> {
        self.check_open("flush_columns")?;
        if self.active.is_none() {
            return Err(Error::InvalidState("no column group to flush".into()));
        }
        self.cut_parts(true)?;
        let Some(group) = self.active.take() else {
            return Err(Error::Internal("no active column group".into()));
        };

        match self.key_rows {
            None if group.is_key => self.key_rows = Some(group.rows_written),
            Some(expected) if group.rows_written != expected => {
                tracing::error!(
                    tablet = %self.tablet_id,
                    group = ?group.column_indexes,
                    rows = group.rows_written,
                    expected,
                    "column group row count mismatch"
                );
                return Err(Error::Internal(format!(
                    "column group {:?} wrote {} rows but the key group wrote {}",
                    group.column_indexes, group.rows_written, expected
                )));
            }
            _ => {}
        }
        for &cid in &group.column_indexes {
            self.flushed_columns[cid] = true;
        }
        tracing::debug!(
            tablet = %self.tablet_id,
            group = ?group.column_indexes,
            rows = group.rows_written,
            "flushed column group"
        );
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.check_open("finish")?;
        if let Some(group) = &self.active {
            return Err(Error::InvalidState(format!(
                "column group {:?} not flushed before finish",
                group.column_indexes
            )));
        }
        if let Some(missing) = self.flushed_columns.iter().position(|done| !done) {
            return Err(Error::InvalidState(format!(
                "column {missing} was never written"
            )));
        }

        let start = Instant::now();
        let stitched: Vec<Bytes> = self
            .segments
            .par_iter()
            .map(|seg| self.stitch_segment(seg))
            .collect::<Result<Vec<_>>>()?;

        let part_keys: Vec<FileId> = self
            .segments
            .iter()
            .flat_map(|s| s.parts.iter().map(|p| p.key))
            .collect();
        let part_key_set: FxHashSet<FileId> = part_keys.iter().copied().collect();

        let keys = self.pager.alloc_many(stitched.len())?;
        let mut puts = Vec::with_capacity(stitched.len());
        let mut files = Vec::with_capacity(stitched.len());
        for (idx, (key, bytes)) in keys.iter().zip(stitched).enumerate() {
            files.push(FileInfo {
                name: format!("{:016x}_{}_{}.parquet", self.tablet_id.0, self.opts.txn_id, idx),
                key: *key,
                size: bytes.len() as u64,
            });
            self.stats.bytes_written += bytes.len() as u64;
            puts.push(BatchPut::Raw { key: *key, bytes });
        }
        self.pager.batch_put(&puts)?;
        self.owned_keys.extend_from_slice(&keys);

        if !self.rssid_rowids.is_empty() {
            let mut buf = Vec::with_capacity(self.rssid_rowids.len() * 8);
            for id in &self.rssid_rowids {
                buf.extend_from_slice(&id.to_le_bytes());
            }
            let size = buf.len() as u64;
            let key = self.store_blob(Bytes::from(buf))?;
            self.rows_mapper = Some(FileInfo {
                name: format!("{:016x}_{}.crm", self.tablet_id.0, self.opts.txn_id),
                key,
                size,
            });
        }

        // Parts are folded into the segment files now.
        self.pager.free_many(&part_keys)?;
        self.owned_keys.retain(|k| !part_key_set.contains(k));

        self.num_rows = self.key_rows.unwrap_or(0);
        self.data_size = files.iter().map(|f| f.size).sum();
        self.files = files;
        self.stats.segment_write_ns += start.elapsed().as_nanos() as u64;
        self.state = WriterState::Finished;
        tracing::debug!(
            tablet = %self.tablet_id,
            txn_id = self.opts.txn_id,
            segments = self.files.len(),
            rows = self.num_rows,
            bytes = self.data_size,
            "tablet writer finished"
        );
        Ok(())
    }

    fn close(&mut self) {
        match self.state {
            WriterState::Closed => return,
            WriterState::Finished => {}
            WriterState::Created | WriterState::Open => self.free_owned(),
        }
        self.active = None;
        self.rssid_rowids = Vec::new();
        self.state = WriterState::Closed;
    }

    fn txn_id(&self) -> TxnId {
        self.opts.txn_id
    }

    fn files(&self) -> &[FileInfo] {
        &self.files
    }

    fn num_rows(&self) -> u64 {
        self.num_rows
    }

    fn data_size(&self) -> u64 {
        self.data_size
    }

    fn rows_mapper(&self) -> Option<&FileInfo> {
        self.rows_mapper.as_ref()
    }

    fn stats(&self) -> WriterStats {
        self.stats
    }

    fn buffered_bytes(&self) -> usize {
        let pending: usize = self
            .active
            .as_ref()
            .map_or(0, |g| g.pending.iter().map(chunk_memory_usage).sum());
        pending + self.rssid_rowids.capacity() * size_of::<u64>()
    }
}

/// Decode a rows-mapper file written by a compaction writer.
pub fn read_rows_mapper<P>(pager: &P, file: &FileInfo) -> Result<Vec<u64>>
where
    P: Pager<Blob = Bytes>,
{
    let bytes = pager.get_raw(file.key)?.ok_or(Error::NotFound)?;
    if bytes.len() % 8 != 0 {
        return Err(Error::CatalogError(format!(
            "rows mapper {} has a truncated entry",
            file.name
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(c);
            u64::from_le_bytes(raw)
        })
        .collect())
}
