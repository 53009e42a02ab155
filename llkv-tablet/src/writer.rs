//! Parquet encoding of segment files and column-group parts.

use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use llkv_result::{Error, Result};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::{EnabledStatistics, WriterProperties};

/// Parquet writer settings used for every blob the tablet layer produces.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub compression: Compression,
    pub max_row_group_size: usize,
    pub enable_statistics: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            compression: Compression::SNAPPY,
            max_row_group_size: 8192,
            enable_statistics: true,
        }
    }
}

impl WriterConfig {
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_max_row_group_size(mut self, rows: usize) -> Self {
        self.max_row_group_size = rows.max(1);
        self
    }

    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.enable_statistics = enabled;
        self
    }

    fn properties(&self) -> WriterProperties {
        let stats = if self.enable_statistics {
            EnabledStatistics::Chunk
        } else {
            EnabledStatistics::None
        };
        WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.max_row_group_size)
            .set_statistics_enabled(stats)
            .build()
    }
}

/// Write a RecordBatch to an in-memory Parquet file.
///
/// Returns the serialized Parquet bytes ready to store in the pager.
pub fn write_parquet_to_memory_with_config(
    batch: &RecordBatch,
    config: &WriterConfig,
) -> Result<Bytes> {
    let mut buffer = Vec::new();

    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(config.properties()))
        .map_err(|e| Error::Internal(format!("failed to create Parquet writer: {}", e)))?;

    writer
        .write(batch)
        .map_err(|e| Error::Internal(format!("failed to write RecordBatch to Parquet: {}", e)))?;

    writer
        .close()
        .map_err(|e| Error::Internal(format!("failed to close Parquet writer: {}", e)))?;

    Ok(Bytes::from(buffer))
}

/// Decode a whole in-memory Parquet file into a single batch.
pub fn read_parquet_from_memory(bytes: Bytes) -> Result<RecordBatch> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| Error::Internal(format!("failed to create Parquet reader: {}", e)))?;
    let schema = builder.schema().clone();
    let reader = builder
        .build()
        .map_err(|e| Error::Internal(format!("failed to build Parquet reader: {}", e)))?;

    let mut batches = Vec::new();
    for batch_result in reader {
        let batch = batch_result
            .map_err(|e| Error::Internal(format!("failed to read Parquet batch: {}", e)))?;
        batches.push(batch);
    }
    Ok(arrow::compute::concat_batches(&schema, &batches)?)
}
