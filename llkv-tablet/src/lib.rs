//! Parquet-backed tablets for LLKV.
//!
//! A tablet is one shard of a table: a schema plus an ordered list of
//! immutable rowsets, each made of sorted Parquet segment files stored as
//! blobs within the [`llkv_storage`] pager abstraction.
//!
//! # Architecture
//!
//! - [`TabletManager`]: owns the persistent [`TabletCatalog`], ingests rowsets,
//!   stores and publishes transaction logs
//! - [`Tablet`] / [`Rowset`] / [`Segment`]: read-side handles
//! - [`VerticalTabletWriter`]: builds a new rowset one column group at a time
//! - [`SegmentCache`]: shared cache of segment footers and blobs
//!
//! A rowset becomes visible only through [`TabletManager::write_rowset`] or
//! [`TabletManager::publish_compaction`]; files written by a writer that was
//! never published are not referenced by any metadata.
//!
//! # Usage Example
//!
//! ```rust
//! use llkv_storage::pager::MemPager;
//! use llkv_tablet::{ColumnType, KeysType, TabletColumn, TabletManager, TabletSchema};
//! use std::sync::Arc;
//!
//! # fn main() -> llkv_result::Result<()> {
//! let manager = TabletManager::open(Arc::new(MemPager::new()))?;
//! let schema = TabletSchema::new(
//!     1,
//!     KeysType::PrimaryKeys,
//!     vec![
//!         TabletColumn::key("id", ColumnType::Int64),
//!         TabletColumn::value("name", ColumnType::Varchar),
//!     ],
//! )?;
//! let tablet_id = manager.create_tablet(schema)?;
//! assert!(manager.get_tablet(tablet_id)?.rowsets().is_empty());
//! # Ok(())
//! # }
//! ```

mod cache;
mod catalog;
mod chunk;
mod metadata;
mod rowset;
mod schema;
mod segment;
mod tablet;
mod tablet_manager;
mod tablet_writer;
mod txn_log;
mod types;
mod writer;

pub use cache::{DEFAULT_DATA_CACHE_CAPACITY, LakeIoOptions, SegmentCache};
pub use catalog::{TabletCatalog, TxnLogKey};
pub use chunk::{chunk_memory_usage, pad_char_columns};
pub use metadata::{FileInfo, RowsetMetadata, TabletMetadata};
pub use rowset::Rowset;
pub use schema::{ColumnType, KeysType, TabletColumn, TabletSchema};
pub use segment::{Segment, SegmentReader};
pub use tablet::Tablet;
pub use tablet_manager::TabletManager;
pub use tablet_writer::{
    TabletWriter, TabletWriterOptions, VerticalTabletWriter, WriterStats, read_rows_mapper,
};
pub use txn_log::{OpCompaction, TxnLog};
pub use types::{FileId, RowsetId, Rssid, TabletId, TxnId, rssid_rowid, split_rssid_rowid};
pub use writer::{WriterConfig, read_parquet_from_memory, write_parquet_to_memory_with_config};

// Re-export common types for convenience
pub use arrow::datatypes::SchemaRef;
pub use arrow::record_batch::RecordBatch;
