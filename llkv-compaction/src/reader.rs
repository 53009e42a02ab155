//! Merge reader over the input rowsets of a compaction.
//!
//! The reader is opened once per column group. On the key group it performs a
//! k-way merge by sort key and records one [`RowSourceMask`] per consumed row,
//! flagging rows superseded by a newer source. On every other group it reads
//! no keys at all: it replays the recorded masks to pull rows from the same
//! sources in the same order and drops the flagged ones.

use crate::mask_buffer::RowSourceMaskBuffer;
use crate::row_source_mask::{RowSourceMask, check_source_count};
use arrow::array::{Array, ArrayRef};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow::row::{OwnedRow, RowConverter, Rows, SortField};
use bytes::Bytes;
use llkv_result::{Error, Result};
use llkv_storage::pager::Pager;
use llkv_tablet::{
    LakeIoOptions, Rowset, Rssid, Segment, SegmentReader, TabletSchema, chunk_memory_usage,
    rssid_rowid,
};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

/// Options for [`TabletReader::open`].
#[derive(Debug, Clone, Copy)]
pub struct TabletReaderParams {
    /// Maximum rows per returned chunk.
    pub chunk_size: usize,
    /// Insert segment blobs into the shared data cache. Compaction reads are
    /// one-shot, so this is normally off.
    pub fill_data_cache: bool,
}

/// Counters accumulated by a reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Rows decoded from segments, duplicates included.
    pub raw_rows_read: u64,
    pub rows_returned: u64,
    pub duplicate_rows: u64,
    pub segments_read: u64,
    /// In-memory bytes of decoded batches.
    pub bytes_read: u64,
}

impl ReaderStats {
    pub fn merge(&mut self, other: &ReaderStats) {
        self.raw_rows_read += other.raw_rows_read;
        self.rows_returned += other.rows_returned;
        self.duplicate_rows += other.duplicate_rows;
        self.segments_read += other.segments_read;
        self.bytes_read += other.bytes_read;
    }
}

/// A decoded batch of one source, with its sort keys on the key pass.
struct LoadedBatch {
    batch: RecordBatch,
    keys: Option<Rows>,
    rssid: Rssid,
    first_rowid: u32,
}

/// One sorted input stream: a whole non-overlapped rowset, or a single
/// segment of an overlapped one.
struct MergeSource {
    segments: VecDeque<(Rssid, Arc<Segment>)>,
    reader: Option<SegmentReader>,
    current: Option<Arc<LoadedBatch>>,
    pos: usize,
    rssid: Rssid,
    next_rowid: u32,
    stats: ReaderStats,
}

impl MergeSource {
    fn new(segments: VecDeque<(Rssid, Arc<Segment>)>) -> Self {
        Self {
            segments,
            reader: None,
            current: None,
            pos: 0,
            rssid: 0,
            next_rowid: 0,
            stats: ReaderStats::default(),
        }
    }

    fn next_row(
        &mut self,
        column_ids: &[usize],
        chunk_size: usize,
        keys: Option<(&RowConverter, &[usize])>,
    ) -> Result<Option<(Arc<LoadedBatch>, usize)>> {
        loop {
            if let Some(current) = &self.current
                && self.pos < current.batch.num_rows()
            {
                let row = self.pos;
                self.pos += 1;
                return Ok(Some((Arc::clone(current), row)));
            }
            if !self.load_next_batch(column_ids, chunk_size, keys)? {
                return Ok(None);
            }
        }
    }

    fn load_next_batch(
        &mut self,
        column_ids: &[usize],
        chunk_size: usize,
        keys: Option<(&RowConverter, &[usize])>,
    ) -> Result<bool> {
        loop {
            if let Some(reader) = self.reader.as_mut() {
                match reader.next() {
                    Some(batch) => {
                        let batch = batch?;
                        let rows = batch.num_rows();
                        if rows == 0 {
                            continue;
                        }
                        let keys = keys
                            .map(|(converter, positions)| {
                                let cols: Vec<ArrayRef> = positions
                                    .iter()
                                    .map(|&p| Arc::clone(batch.column(p)))
                                    .collect();
                                converter.convert_columns(&cols)
                            })
                            .transpose()?;
                        self.stats.raw_rows_read += rows as u64;
                        self.stats.bytes_read += chunk_memory_usage(&batch) as u64;
                        self.current = Some(Arc::new(LoadedBatch {
                            batch,
                            keys,
                            rssid: self.rssid,
                            first_rowid: self.next_rowid,
                        }));
                        self.next_rowid += rows as u32;
                        self.pos = 0;
                        return Ok(true);
                    }
                    None => self.reader = None,
                }
            }
            let Some((rssid, segment)) = self.segments.pop_front() else {
                self.current = None;
                return Ok(false);
            };
            self.reader = Some(segment.read_columns(column_ids, chunk_size)?);
            self.rssid = rssid;
            self.next_rowid = 0;
            self.stats.segments_read += 1;
        }
    }

    fn buffered_bytes(&self) -> usize {
        self.current.as_ref().map_or(0, |b| {
            chunk_memory_usage(&b.batch) + b.keys.as_ref().map_or(0, Rows::size)
        })
    }
}

/// Head row of a source in the merge heap.
struct HeapItem {
    key: OwnedRow,
    source: usize,
    batch: Arc<LoadedBatch>,
    row: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, o: &Self) -> bool {
        self.key == o.key && self.source == o.source
    }
}
impl Eq for HeapItem {}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, o: &Self) -> Option<Ordering> {
        Some(self.cmp(o))
    }
}
// Reverse ordering turns BinaryHeap into a min-heap on (key, source): older
// sources pop first, so the newest copy of a key is the last one popped.
impl Ord for HeapItem {
    fn cmp(&self, o: &Self) -> Ordering {
        o.key.cmp(&self.key).then_with(|| o.source.cmp(&self.source))
    }
}

/// Rows selected for the chunk being built, as `(batch, row)` pairs.
#[derive(Default)]
struct ChunkBuilder {
    batches: Vec<Arc<LoadedBatch>>,
    slots: FxHashMap<usize, usize>,
    indices: Vec<(usize, usize)>,
}

impl ChunkBuilder {
    fn push(&mut self, batch: &Arc<LoadedBatch>, row: usize) {
        let addr = Arc::as_ptr(batch) as usize;
        let slot = *self.slots.entry(addr).or_insert_with(|| {
            self.batches.push(Arc::clone(batch));
            self.batches.len() - 1
        });
        self.indices.push((slot, row));
    }

    #[inline]
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn build(self, schema: &SchemaRef) -> Result<Option<RecordBatch>> {
        if self.indices.is_empty() {
            return Ok(None);
        }
        let columns = (0..schema.fields().len())
            .map(|c| {
                let arrays: Vec<&dyn Array> = self
                    .batches
                    .iter()
                    .map(|b| b.batch.column(c).as_ref())
                    .collect();
                arrow::compute::interleave(&arrays, &self.indices)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Some(RecordBatch::try_new(Arc::clone(schema), columns)?))
    }
}

/// Reads one column group of the merged input rowsets.
pub struct TabletReader<'a, P>
where
    P: Pager<Blob = Bytes>,
{
    column_ids: Vec<usize>,
    projected: SchemaRef,
    rowsets: &'a [Rowset<P>],
    is_key: bool,
    dedup: bool,
    mask_buffer: &'a mut RowSourceMaskBuffer,
    converter: Option<RowConverter>,
    sort_positions: Vec<usize>,
    sources: Vec<MergeSource>,
    heap: BinaryHeap<HeapItem>,
    /// Last popped row on a deduplicating key pass; emitted once the next
    /// pop shows whether a newer copy of its key follows.
    pending: Option<HeapItem>,
    chunk_size: usize,
    opened: bool,
    rows_returned: u64,
    duplicate_rows: u64,
}

impl<'a, P> TabletReader<'a, P>
where
    P: Pager<Blob = Bytes>,
{
    /// `column_ids` is the column group to read, in output order. The key
    /// group must contain every sort key column.
    pub fn new(
        schema: &TabletSchema,
        column_ids: Vec<usize>,
        rowsets: &'a [Rowset<P>],
        is_key: bool,
        mask_buffer: &'a mut RowSourceMaskBuffer,
    ) -> Result<Self> {
        let projected = schema.project(&column_ids)?;
        let (converter, sort_positions) = if is_key {
            let mut positions = Vec::new();
            let mut fields = Vec::new();
            for cid in schema.sort_key_idxes() {
                let pos = column_ids.iter().position(|&c| c == cid).ok_or_else(|| {
                    Error::InvalidArgumentError(format!(
                        "key column group {column_ids:?} lacks sort key column {cid}"
                    ))
                })?;
                positions.push(pos);
                fields.push(SortField::new(projected.field(pos).data_type().clone()));
            }
            (Some(RowConverter::new(fields)?), positions)
        } else {
            (None, Vec::new())
        };

        Ok(Self {
            column_ids,
            projected,
            rowsets,
            is_key,
            dedup: is_key && schema.keys_type().deduplicates(),
            mask_buffer,
            converter,
            sort_positions,
            sources: Vec::new(),
            heap: BinaryHeap::new(),
            pending: None,
            chunk_size: 1,
            opened: false,
            rows_returned: 0,
            duplicate_rows: 0,
        })
    }

    /// Open every input segment and, on the key pass, seed the merge heap.
    pub fn open(&mut self, params: TabletReaderParams) -> Result<()> {
        if self.opened {
            return Err(Error::InvalidState("tablet reader opened twice".into()));
        }
        let io_opts = LakeIoOptions {
            fill_data_cache: params.fill_data_cache,
        };
        let mut sources = Vec::new();
        for rowset in self.rowsets {
            let segments = rowset.segments(io_opts, true)?;
            if rowset.is_overlapped() {
                for (idx, seg) in segments.into_iter().enumerate() {
                    sources.push(MergeSource::new(VecDeque::from([(rowset.rssid(idx), seg)])));
                }
            } else {
                sources.push(MergeSource::new(
                    segments
                        .into_iter()
                        .enumerate()
                        .map(|(idx, seg)| (rowset.rssid(idx), seg))
                        .collect(),
                ));
            }
        }
        check_source_count(sources.len())?;
        self.sources = sources;
        self.chunk_size = params.chunk_size.max(1);
        self.opened = true;

        if self.is_key {
            for source in 0..self.sources.len() {
                self.push_next(source)?;
            }
        }
        tracing::trace!(
            columns = ?self.column_ids,
            is_key = self.is_key,
            sources = self.sources.len(),
            chunk_size = self.chunk_size,
            "opened merge reader"
        );
        Ok(())
    }

    /// Pull the next row of `source` into the merge heap.
    fn push_next(&mut self, source: usize) -> Result<()> {
        let keys = self
            .converter
            .as_ref()
            .map(|c| (c, self.sort_positions.as_slice()));
        let next = self.sources[source].next_row(&self.column_ids, self.chunk_size, keys)?;
        if let Some((batch, row)) = next {
            let key = match &batch.keys {
                Some(rows) => rows.row(row).owned(),
                None => return Err(Error::Internal("key pass batch without sort keys".into())),
            };
            self.heap.push(HeapItem {
                key,
                source,
                batch,
                row,
            });
        }
        Ok(())
    }

    /// Produce the next chunk, or `None` at end of input.
    ///
    /// On the key pass, `source_masks` receives one mask per consumed row
    /// (duplicates included) and `rssid_rowids` one packed position per
    /// returned row. Both are ignored on other passes.
    pub fn get_next(
        &mut self,
        source_masks: Option<&mut Vec<RowSourceMask>>,
        rssid_rowids: Option<&mut Vec<u64>>,
    ) -> Result<Option<RecordBatch>> {
        if !self.opened {
            return Err(Error::InvalidState("tablet reader used before open".into()));
        }
        if self.is_key {
            self.next_key_chunk(source_masks, rssid_rowids)
        } else {
            self.next_masked_chunk()
        }
    }

    fn next_key_chunk(
        &mut self,
        mut source_masks: Option<&mut Vec<RowSourceMask>>,
        mut rssid_rowids: Option<&mut Vec<u64>>,
    ) -> Result<Option<RecordBatch>> {
        let mut chunk = ChunkBuilder::default();
        let mut consumed = 0usize;
        let mut emit = |item: HeapItem, duplicate: bool, chunk: &mut ChunkBuilder| {
            consumed += 1;
            if let Some(masks) = source_masks.as_deref_mut() {
                masks.push(RowSourceMask::new(item.source as u16, duplicate));
            }
            if duplicate {
                return 1u64;
            }
            if let Some(ids) = rssid_rowids.as_deref_mut() {
                ids.push(rssid_rowid(
                    item.batch.rssid,
                    item.batch.first_rowid + item.row as u32,
                ));
            }
            chunk.push(&item.batch, item.row);
            0
        };

        let mut duplicates = 0u64;
        while chunk.len() < self.chunk_size {
            let Some(item) = self.heap.pop() else {
                if let Some(last) = self.pending.take() {
                    duplicates += emit(last, false, &mut chunk);
                }
                break;
            };
            self.push_next(item.source)?;
            if !self.dedup {
                duplicates += emit(item, false, &mut chunk);
                continue;
            }
            if let Some(prev) = self.pending.take() {
                let superseded = prev.key == item.key;
                duplicates += emit(prev, superseded, &mut chunk);
            }
            self.pending = Some(item);
        }

        let returned = chunk.len();
        if returned == 0 && consumed > 0 {
            return Err(Error::Internal(format!(
                "merge consumed {consumed} rows without producing output"
            )));
        }
        self.duplicate_rows += duplicates;
        self.rows_returned += returned as u64;
        chunk.build(&self.projected)
    }

    fn next_masked_chunk(&mut self) -> Result<Option<RecordBatch>> {
        let mut chunk = ChunkBuilder::default();
        while chunk.len() < self.chunk_size && self.mask_buffer.has_remaining() {
            let mask = self.mask_buffer.next_mask()?;
            let source_idx = mask.source() as usize;
            let Some(source) = self.sources.get_mut(source_idx) else {
                return Err(Error::Internal(format!(
                    "row source mask names source {source_idx} of {}",
                    self.sources.len()
                )));
            };
            let Some((batch, row)) = source.next_row(&self.column_ids, self.chunk_size, None)?
            else {
                tracing::error!(source = source_idx, "row source mask names an exhausted source");
                return Err(Error::Internal(format!(
                    "row source mask names exhausted source {source_idx}"
                )));
            };
            if mask.is_duplicate() {
                self.duplicate_rows += 1;
                continue;
            }
            chunk.push(&batch, row);
        }

        if chunk.len() == 0 {
            // End of the masks: every source must be drained as well.
            for (idx, source) in self.sources.iter_mut().enumerate() {
                if source.next_row(&self.column_ids, self.chunk_size, None)?.is_some() {
                    tracing::error!(source = idx, "rows left over after the last row source mask");
                    return Err(Error::Internal(format!(
                        "source {idx} has rows not covered by the row source masks"
                    )));
                }
            }
            return Ok(None);
        }
        self.rows_returned += chunk.len() as u64;
        chunk.build(&self.projected)
    }

    pub fn mask_buffer(&self) -> &RowSourceMaskBuffer {
        self.mask_buffer
    }

    pub fn mask_buffer_mut(&mut self) -> &mut RowSourceMaskBuffer {
        &mut *self.mask_buffer
    }

    pub fn column_ids(&self) -> &[usize] {
        &self.column_ids
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Bytes of decoded input currently held.
    pub fn buffered_bytes(&self) -> usize {
        self.sources.iter().map(MergeSource::buffered_bytes).sum::<usize>()
            + self.heap.iter().map(|h| h.key.row().as_ref().len()).sum::<usize>()
    }

    pub fn stats(&self) -> ReaderStats {
        let mut stats = ReaderStats {
            rows_returned: self.rows_returned,
            duplicate_rows: self.duplicate_rows,
            ..ReaderStats::default()
        };
        for source in &self.sources {
            stats.merge(&source.stats);
        }
        stats
    }
}
