//! Vertical compaction of LLKV tablets.
//!
//! Merges a set of rowsets of one tablet into a single non-overlapping rowset,
//! processing the schema's columns in groups rather than whole rows.
//!
//! # Architecture
//!
//! - [`VerticalCompactionTask`]: splits the columns into groups (sort key
//!   first) and drives one merge pass per group into a
//!   [`llkv_tablet::TabletWriter`]
//! - [`TabletReader`]: k-way merge on the key pass, mask replay on the others
//! - [`RowSourceMaskBuffer`]: the per-row provenance written by the key pass
//!   and read back by every later pass, spilled to disk past a memory limit
//! - [`CompactionTaskContext`]: progress and statistics visible while a task
//!   runs
//!
//! The result is a [`llkv_tablet::TxnLog`] stored on the tablet. The output
//! rowset becomes visible once the log is published with
//! [`llkv_tablet::TabletManager::publish_compaction`].
//!
//! # Usage Example
//!
//! ```rust
//! use llkv_compaction::{
//!     BackgroundWorkerSignal, CompactionConfig, CompactionRequest,
//!     NoopCompactionStatePreloader, compact_tablet,
//! };
//! use llkv_storage::pager::MemPager;
//! use llkv_tablet::{ColumnType, KeysType, TabletColumn, TabletManager, TabletSchema};
//! use std::sync::Arc;
//!
//! # fn main() -> llkv_result::Result<()> {
//! let manager = TabletManager::open(Arc::new(MemPager::new()))?;
//! let schema = TabletSchema::new(
//!     1,
//!     KeysType::DupKeys,
//!     vec![TabletColumn::key("k", ColumnType::Int64)],
//! )?;
//! let tablet_id = manager.create_tablet(schema.clone())?;
//! let batch = arrow::record_batch::RecordBatch::try_new(
//!     schema.to_arrow_schema(),
//!     vec![Arc::new(arrow::array::Int64Array::from(vec![1, 2, 3]))],
//! )?;
//! let a = manager.write_rowset(tablet_id, vec![batch.clone()], false)?;
//! let b = manager.write_rowset(tablet_id, vec![batch], false)?;
//!
//! let request = CompactionRequest {
//!     tablet_id,
//!     txn_id: 7,
//!     input_rowsets: vec![a, b],
//!     schema_version: 1,
//! };
//! let log = compact_tablet(
//!     &manager,
//!     &request,
//!     CompactionConfig::default(),
//!     BackgroundWorkerSignal::new(),
//!     Arc::new(NoopCompactionStatePreloader),
//!     &|| false,
//! )?;
//! assert_eq!(log.op_compaction.output_rowset.num_rows, 6);
//! manager.publish_compaction(tablet_id, 7)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod config;
mod context;
mod mask_buffer;
mod mem_tracker;
mod reader;
mod row_source_mask;
mod task;
mod update_manager;
pub mod utils;

pub use config::CompactionConfig;
pub use context::{BackgroundWorkerSignal, CompactionTaskContext, CompactionTaskStats, Progress};
pub use mask_buffer::RowSourceMaskBuffer;
pub use mem_tracker::{MemReservation, MemTracker};
pub use reader::{ReaderStats, TabletReader, TabletReaderParams};
pub use row_source_mask::{MAX_ROW_SOURCE_MASK_SOURCE, RowSourceMask, check_source_count};
pub use task::{CancelFn, CompactionRequest, VerticalCompactionTask, compact_tablet};
pub use update_manager::{CompactionStatePreloader, NoopCompactionStatePreloader};
