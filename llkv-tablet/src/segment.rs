//! Segment files: one Parquet blob holding a sorted run of rows.

use crate::cache::{LakeIoOptions, SegmentCache};
use crate::metadata::FileInfo;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use llkv_result::{Error, Result};
use llkv_storage::pager::Pager;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::{
    ArrowReaderMetadata, ArrowReaderOptions, ParquetRecordBatchReader,
    ParquetRecordBatchReaderBuilder,
};
use std::sync::Arc;

/// An opened segment: the blob plus its decoded footer.
#[derive(Debug)]
pub struct Segment {
    file: FileInfo,
    data: Bytes,
    metadata: ArrowReaderMetadata,
}

impl Segment {
    /// Fetch the blob behind `file` and decode its footer.
    ///
    /// The footer is looked up in (and, with `fill_meta_cache`, stored into)
    /// the shared cache. The blob itself only enters the cache when
    /// `io_opts.fill_data_cache` is set.
    pub fn open<P>(
        pager: &P,
        file: &FileInfo,
        cache: &SegmentCache,
        io_opts: LakeIoOptions,
        fill_meta_cache: bool,
    ) -> Result<Arc<Self>>
    where
        P: Pager<Blob = Bytes>,
    {
        let data = match cache.lookup_data(file.key) {
            Some(data) => data,
            None => {
                let data = pager.get_raw(file.key)?.ok_or_else(|| {
                    tracing::error!(file = %file.name, key = file.key, "segment blob missing");
                    Error::NotFound
                })?;
                if io_opts.fill_data_cache {
                    cache.insert_data(file.key, data.clone());
                }
                data
            }
        };

        let metadata = match cache.lookup_meta(file.key) {
            Some(meta) => meta,
            None => {
                let meta = ArrowReaderMetadata::load(&data, ArrowReaderOptions::default())
                    .map_err(|e| {
                        Error::Internal(format!("failed to load footer of {}: {}", file.name, e))
                    })?;
                if fill_meta_cache {
                    cache.insert_meta(file.key, meta.clone());
                }
                meta
            }
        };

        Ok(Arc::new(Self {
            file: file.clone(),
            data,
            metadata,
        }))
    }

    pub fn file(&self) -> &FileInfo {
        &self.file
    }

    pub fn num_rows(&self) -> usize {
        self.metadata.metadata().file_metadata().num_rows().max(0) as usize
    }

    pub fn num_columns(&self) -> usize {
        self.metadata
            .metadata()
            .file_metadata()
            .schema_descr()
            .num_columns()
    }

    /// Decoded in-memory size of one column: the sum of its uncompressed
    /// column chunks over all row groups. `None` when the segment has no such
    /// column.
    pub fn column_mem_footprint(&self, column_index: usize) -> Option<u64> {
        if column_index >= self.num_columns() {
            return None;
        }
        Some(
            self.metadata
                .metadata()
                .row_groups()
                .iter()
                .map(|rg| rg.column(column_index).uncompressed_size().max(0) as u64)
                .sum(),
        )
    }

    /// Stream the columns `column_ids`, in that order, `batch_size` rows at a
    /// time.
    pub fn read_columns(&self, column_ids: &[usize], batch_size: usize) -> Result<SegmentReader> {
        let num_columns = self.num_columns();
        let mut sorted = column_ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != column_ids.len() || column_ids.is_empty() {
            return Err(Error::InvalidArgumentError(format!(
                "invalid column projection {column_ids:?}"
            )));
        }
        if let Some(&bad) = sorted.iter().find(|&&c| c >= num_columns) {
            return Err(Error::InvalidArgumentError(format!(
                "column {bad} not present in segment {} ({num_columns} columns)",
                self.file.name
            )));
        }

        let builder =
            ParquetRecordBatchReaderBuilder::new_with_metadata(self.data.clone(), self.metadata.clone());
        let mask = ProjectionMask::leaves(builder.parquet_schema(), sorted.iter().copied());
        let inner = builder
            .with_projection(mask)
            .with_batch_size(batch_size.max(1))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build Parquet reader: {}", e)))?;

        // Parquet yields projected columns in file order.
        let reorder = if sorted == column_ids {
            None
        } else {
            Some(
                column_ids
                    .iter()
                    .map(|cid| sorted.binary_search(cid).unwrap_or_default())
                    .collect(),
            )
        };

        Ok(SegmentReader { inner, reorder })
    }
}

/// Iterator over the batches of one segment, restricted to a projection.
pub struct SegmentReader {
    inner: ParquetRecordBatchReader,
    reorder: Option<Vec<usize>>,
}

impl Iterator for SegmentReader {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = match self.inner.next()? {
            Ok(batch) => batch,
            Err(e) => {
                return Some(Err(Error::Internal(format!(
                    "failed to read Parquet batch: {}",
                    e
                ))));
            }
        };
        Some(match &self.reorder {
            Some(order) => batch.project(order).map_err(Error::from),
            None => Ok(batch),
        })
    }
}
