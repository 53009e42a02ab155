//! Vertical compaction task.
//!
//! A task merges its input rowsets into one non-overlapping rowset, one column
//! group at a time. The key group runs first and records a
//! [`RowSourceMask`](crate::RowSourceMask) per merged row; every later group
//! replays those masks so all groups agree on which rows survive.

use crate::config::CompactionConfig;
use crate::context::{BackgroundWorkerSignal, CompactionTaskContext};
use crate::mask_buffer::RowSourceMaskBuffer;
use crate::mem_tracker::MemTracker;
use crate::reader::{TabletReader, TabletReaderParams};
use crate::row_source_mask::RowSourceMask;
use crate::update_manager::{CompactionStatePreloader, NoopCompactionStatePreloader};
use crate::utils::{get_read_chunk_size, get_segment_max_rows, split_column_into_groups};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use llkv_result::{Error, Result};
use llkv_storage::pager::Pager;
use llkv_tablet::{
    LakeIoOptions, OpCompaction, Rowset, RowsetId, RowsetMetadata, Tablet, TabletId,
    TabletManager, TabletSchema, TabletWriter, TabletWriterOptions, TxnId, TxnLog,
    pad_char_columns,
};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Task-scoped cancellation predicate, polled at every group boundary and on
/// every chunk.
pub type CancelFn<'a> = &'a dyn Fn() -> bool;

/// Closes the wrapped writer on every exit path.
struct CloseOnDrop<W: TabletWriter>(W);

impl<W: TabletWriter> Deref for CloseOnDrop<W> {
    type Target = W;

    fn deref(&self) -> &W {
        &self.0
    }
}

impl<W: TabletWriter> DerefMut for CloseOnDrop<W> {
    fn deref_mut(&mut self) -> &mut W {
        &mut self.0
    }
}

impl<W: TabletWriter> Drop for CloseOnDrop<W> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Compacts a fixed set of rowsets of one tablet.
pub struct VerticalCompactionTask<P>
where
    P: Pager<Blob = Bytes>,
{
    tablet: Tablet<P>,
    input_rowsets: Vec<Rowset<P>>,
    tablet_schema: TabletSchema,
    context: Arc<CompactionTaskContext>,
    config: CompactionConfig,
    bg_signal: BackgroundWorkerSignal,
    preloader: Arc<dyn CompactionStatePreloader<P>>,
    mem_tracker: Arc<MemTracker>,
    total_num_rows: u64,
    total_data_size: u64,
    total_input_segs: usize,
}

impl<P> VerticalCompactionTask<P>
where
    P: Pager<Blob = Bytes>,
{
    /// `input_rowsets` must be ordered oldest first: on equal keys the later
    /// rowset wins.
    pub fn new(
        tablet: Tablet<P>,
        input_rowsets: Vec<Rowset<P>>,
        context: Arc<CompactionTaskContext>,
        config: CompactionConfig,
    ) -> Self {
        let tablet_schema = tablet.schema().clone();
        let mem_tracker = Arc::new(MemTracker::new(
            "compaction worker",
            i64::try_from(config.compaction_memory_limit_per_worker).unwrap_or(i64::MAX),
        ));
        let total_num_rows = input_rowsets.iter().map(Rowset::num_rows).sum();
        let total_data_size = input_rowsets.iter().map(Rowset::data_size).sum();
        let total_input_segs = input_rowsets
            .iter()
            .map(|r| if r.is_overlapped() { r.num_segments() } else { 1 })
            .sum();
        Self {
            tablet,
            input_rowsets,
            tablet_schema,
            context,
            config,
            bg_signal: BackgroundWorkerSignal::default(),
            preloader: Arc::new(NoopCompactionStatePreloader),
            mem_tracker,
            total_num_rows,
            total_data_size,
            total_input_segs,
        }
    }

    pub fn with_background_signal(mut self, signal: BackgroundWorkerSignal) -> Self {
        self.bg_signal = signal;
        self
    }

    pub fn with_preloader(mut self, preloader: Arc<dyn CompactionStatePreloader<P>>) -> Self {
        self.preloader = preloader;
        self
    }

    /// Report into `tracker` instead of a private one. Tasks running
    /// concurrently on one worker may share it; each task accounts by delta.
    pub fn with_mem_tracker(mut self, tracker: Arc<MemTracker>) -> Self {
        self.mem_tracker = tracker;
        self
    }

    pub fn context(&self) -> &Arc<CompactionTaskContext> {
        &self.context
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.mem_tracker
    }

    /// Run the compaction and store its transaction log.
    ///
    /// On any error, including cancellation, nothing is stored and the blobs
    /// written so far are freed.
    pub fn execute(&self, cancel: CancelFn<'_>) -> Result<TxnLog> {
        let start = Instant::now();
        if self.input_rowsets.is_empty() {
            return Err(Error::InvalidArgumentError(format!(
                "compaction of tablet {} has no input rowsets",
                self.tablet.id()
            )));
        }
        self.check_cancelled(cancel)?;

        let max_rows_per_segment = get_segment_max_rows(
            self.config.max_segment_file_size as u64,
            self.total_num_rows,
            self.total_data_size,
        );
        let mut writer = CloseOnDrop(self.tablet.new_writer(TabletWriterOptions {
            txn_id: self.context.txn_id,
            max_rows_per_segment: max_rows_per_segment as usize,
            is_compaction: true,
        }));
        writer.open()?;

        let column_groups = split_column_into_groups(
            self.tablet_schema.num_columns(),
            &self.tablet_schema.sort_key_idxes(),
            self.config.vertical_compaction_max_columns_per_group,
        );
        debug!(
            tablet = %self.tablet.id(),
            txn_id = self.context.txn_id,
            inputs = self.input_rowsets.len(),
            input_rows = self.total_num_rows,
            max_rows_per_segment,
            column_groups = column_groups.len(),
            "starting vertical compaction"
        );
        self.context.update_stats(|s| {
            s.input_rows = self.total_num_rows;
            s.input_bytes = self.total_data_size;
            s.input_segments = self.total_input_segs as u64;
            s.column_groups = column_groups.len() as u64;
        });

        let mut mask_buffer = RowSourceMaskBuffer::new(
            self.tablet.id(),
            self.config.mask_buffer_memory_limit,
            self.config.stream_buffer_size,
            &self.config.spill_dir,
        );
        for (group_index, column_group) in column_groups.iter().enumerate() {
            self.check_cancelled(cancel)?;
            let is_key = group_index == 0;
            if !is_key {
                mask_buffer.flip_to_read()?;
            }
            self.compact_column_group(
                is_key,
                group_index,
                column_groups.len(),
                column_group,
                &mut *writer,
                &mut mask_buffer,
                cancel,
            )?;
        }

        writer.finish()?;
        let txn_log = TxnLog {
            tablet_id: self.tablet.id(),
            txn_id: self.context.txn_id,
            op_compaction: OpCompaction {
                input_rowsets: self.input_rowsets.iter().map(Rowset::id).collect(),
                output_rowset: RowsetMetadata {
                    id: 0,
                    segments: writer.files().to_vec(),
                    num_rows: writer.num_rows(),
                    data_size: writer.data_size(),
                    overlapped: false,
                    version: 0,
                },
                rows_mapper: writer.rows_mapper().cloned(),
            },
        };
        self.tablet.put_txn_log(&txn_log)?;
        self.context.progress.update(100);

        let writer_stats = writer.stats();
        self.context.update_stats(|s| {
            s.segment_write_ns = writer_stats.segment_write_ns;
            s.bytes_written = writer_stats.bytes_written;
            s.output_rows = txn_log.op_compaction.output_rowset.num_rows;
        });

        if self.tablet_schema.is_primary_key()
            && let Err(e) =
                self.preloader
                    .preload_compaction_state(&txn_log, &self.tablet, &self.tablet_schema)
        {
            warn!(
                tablet = %self.tablet.id(),
                txn_id = self.context.txn_id,
                error = %e,
                "failed to preload compaction state"
            );
        }

        let stats = self.context.stats();
        info!(
            tablet = %self.tablet.id(),
            txn_id = self.context.txn_id,
            input_rows = stats.input_rows,
            output_rows = stats.output_rows,
            duplicate_rows = stats.reader.duplicate_rows,
            segments = txn_log.op_compaction.output_rowset.num_segments(),
            bytes_written = stats.bytes_written,
            reader_ms = stats.reader_time_ns / 1_000_000,
            write_ms = stats.segment_write_ns / 1_000_000,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "vertical compaction finished"
        );
        Ok(txn_log)
    }

    #[allow(clippy::too_many_arguments)]
    fn compact_column_group(
        &self,
        is_key: bool,
        group_index: usize,
        group_count: usize,
        column_group: &[usize],
        writer: &mut dyn TabletWriter,
        mask_buffer: &mut RowSourceMaskBuffer,
        cancel: CancelFn<'_>,
    ) -> Result<()> {
        let chunk_size = self.calculate_chunk_size_for_column_group(column_group)?;
        debug!(
            tablet = %self.tablet.id(),
            group = group_index,
            columns = ?column_group,
            chunk_size,
            "compacting column group"
        );

        let mut reader = TabletReader::new(
            &self.tablet_schema,
            column_group.to_vec(),
            &self.input_rowsets,
            is_key,
            mask_buffer,
        )?;
        reader.open(TabletReaderParams {
            chunk_size,
            fill_data_cache: self.config.fill_data_cache,
        })?;

        let collect_rowids = is_key
            && self.tablet_schema.is_primary_key()
            && self.config.enable_light_pk_compaction_publish;
        let mut source_masks: Vec<RowSourceMask> = Vec::new();
        let mut rssid_rowids: Vec<u64> = Vec::new();
        let mut reader_time = Duration::ZERO;
        let mut wrote_chunk = false;
        let mut reservation = self.mem_tracker.reservation();

        loop {
            self.check_cancelled(cancel)?;

            let used = reader.buffered_bytes()
                + reader.mask_buffer().memory_usage()
                + source_masks.capacity() * size_of::<RowSourceMask>()
                + rssid_rowids.capacity() * size_of::<u64>()
                + writer.buffered_bytes();
            reservation.set(i64::try_from(used).unwrap_or(i64::MAX));
            if self.config.memory_check_enabled {
                self.mem_tracker.check_mem_limit("compacting column group")?;
            }

            let read_start = Instant::now();
            let chunk = reader.get_next(
                is_key.then_some(&mut source_masks),
                collect_rowids.then_some(&mut rssid_rowids),
            )?;
            reader_time += read_start.elapsed();
            let Some(chunk) = chunk else {
                break;
            };

            let chunk = pad_char_columns(&self.tablet_schema, column_group, chunk)?;
            writer.write_columns(
                &chunk,
                column_group,
                is_key,
                collect_rowids.then_some(rssid_rowids.as_slice()),
            )?;
            rssid_rowids.clear();
            wrote_chunk = true;

            if is_key && !source_masks.is_empty() {
                reader.mask_buffer_mut().write(&source_masks)?;
                source_masks.clear();
            }

            let rows_read = reader.stats().raw_rows_read;
            let group_pct = if self.total_num_rows > 0 {
                (100 * rows_read / self.total_num_rows).min(100)
            } else {
                100
            };
            let progress = (100 * group_index as u64 + group_pct) / group_count as u64;
            self.context.progress.update(progress.min(99) as i32);
            trace!(
                tablet = %self.tablet.id(),
                group = group_index,
                rows_read,
                progress = self.context.progress.value(),
                "compaction progress"
            );
        }

        let reader_stats = reader.stats();
        drop(reader);
        drop(reservation);

        if !wrote_chunk {
            // Every input row was filtered out; the group still has to exist.
            let empty = RecordBatch::new_empty(self.tablet_schema.project(column_group)?);
            writer.write_columns(&empty, column_group, is_key, None)?;
        }
        writer.flush_columns()?;
        if is_key {
            mask_buffer.flush()?;
        }

        self.context.update_stats(|s| {
            s.reader.merge(&reader_stats);
            s.reader_time_ns += reader_time.as_nanos() as u64;
        });
        Ok(())
    }

    /// Rows per chunk so that one chunk per merge source of `column_group`
    /// fits the worker memory limit.
    fn calculate_chunk_size_for_column_group(&self, column_group: &[usize]) -> Result<usize> {
        let io_opts = LakeIoOptions {
            fill_data_cache: self.config.fill_data_cache,
        };
        let mut total_mem_footprint = 0u64;
        for rowset in &self.input_rowsets {
            for segment in rowset.segments(io_opts, true)? {
                total_mem_footprint += column_group
                    .iter()
                    .filter_map(|&cid| segment.column_mem_footprint(cid))
                    .sum::<u64>();
            }
        }
        Ok(get_read_chunk_size(
            self.config.compaction_memory_limit_per_worker as u64,
            self.config.vector_chunk_size,
            self.total_num_rows,
            total_mem_footprint,
            self.total_input_segs,
        ))
    }

    fn check_cancelled(&self, cancel: CancelFn<'_>) -> Result<()> {
        if self.bg_signal.is_stopped() {
            info!(
                tablet = %self.tablet.id(),
                txn_id = self.context.txn_id,
                "background workers stopped, cancelling compaction"
            );
            return Err(Error::cancelled("background worker stopped"));
        }
        if cancel() {
            info!(
                tablet = %self.tablet.id(),
                txn_id = self.context.txn_id,
                "compaction cancelled"
            );
            return Err(Error::cancelled(format!(
                "compaction of tablet {} cancelled",
                self.tablet.id()
            )));
        }
        Ok(())
    }
}

/// Inputs of one compaction, as handed over by a scheduler.
#[derive(Debug, Clone)]
pub struct CompactionRequest {
    pub tablet_id: TabletId,
    pub txn_id: TxnId,
    /// Oldest first.
    pub input_rowsets: Vec<RowsetId>,
    /// Schema id the scheduler planned against.
    pub schema_version: i64,
}

/// Resolve `request` against the tablet's current metadata and run it.
pub fn compact_tablet<P>(
    manager: &TabletManager<P>,
    request: &CompactionRequest,
    config: CompactionConfig,
    bg_signal: BackgroundWorkerSignal,
    preloader: Arc<dyn CompactionStatePreloader<P>>,
    cancel: CancelFn<'_>,
) -> Result<TxnLog>
where
    P: Pager<Blob = Bytes>,
{
    let tablet = manager.get_tablet(request.tablet_id)?;
    if tablet.schema().id() != request.schema_version {
        return Err(Error::InvalidArgumentError(format!(
            "compaction of tablet {} planned against schema {}, tablet has schema {}",
            request.tablet_id,
            request.schema_version,
            tablet.schema().id()
        )));
    }
    if request.input_rowsets.is_empty() {
        return Err(Error::InvalidArgumentError(format!(
            "compaction of tablet {} has no input rowsets",
            request.tablet_id
        )));
    }
    let input_rowsets = tablet.get_rowsets(&request.input_rowsets)?;
    let context = Arc::new(CompactionTaskContext::new(
        request.tablet_id,
        request.txn_id,
        tablet.version(),
    ));
    VerticalCompactionTask::new(tablet, input_rowsets, context, config)
        .with_background_signal(bg_signal)
        .with_preloader(preloader)
        .execute(cancel)
}
