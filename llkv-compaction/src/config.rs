//! Compaction configuration.

use std::path::PathBuf;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;
const GIB: usize = 1024 * MIB;

/// Knobs recognised by the vertical compaction engine.
///
/// Passed explicitly to every task; there is no process-wide configuration.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Target ceiling for the size of one output segment file, in bytes.
    pub max_segment_file_size: usize,
    /// Maximum number of non-key columns compacted together in one pass.
    pub vertical_compaction_max_columns_per_group: usize,
    /// Memory budget of one compaction worker in bytes. `0` lifts the bound
    /// on chunk size and disables the per-iteration limit check.
    pub compaction_memory_limit_per_worker: usize,
    /// Upper bound on the rows of one chunk.
    pub vector_chunk_size: usize,
    /// Whether compaction reads populate the shared segment data cache.
    pub fill_data_cache: bool,
    /// Buffer size for streaming reads and writes of mask spill files.
    pub stream_buffer_size: usize,
    /// Bytes of row source masks kept in memory before spilling to disk.
    pub mask_buffer_memory_limit: usize,
    /// Directory for mask spill files.
    pub spill_dir: PathBuf,
    /// Record `(rssid, rowid)` of every output row of primary-key tablets.
    pub enable_light_pk_compaction_publish: bool,
    /// Check the worker memory limit on every chunk.
    pub memory_check_enabled: bool,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_segment_file_size: GIB,
            vertical_compaction_max_columns_per_group: 5,
            compaction_memory_limit_per_worker: 2 * GIB,
            vector_chunk_size: 4096,
            fill_data_cache: false,
            stream_buffer_size: MIB,
            mask_buffer_memory_limit: 16 * MIB,
            spill_dir: std::env::temp_dir(),
            enable_light_pk_compaction_publish: true,
            memory_check_enabled: true,
        }
    }
}

impl CompactionConfig {
    pub fn with_max_segment_file_size(mut self, bytes: usize) -> Self {
        self.max_segment_file_size = bytes;
        self
    }

    pub fn with_max_columns_per_group(mut self, columns: usize) -> Self {
        self.vertical_compaction_max_columns_per_group = columns.max(1);
        self
    }

    pub fn with_memory_limit_per_worker(mut self, bytes: usize) -> Self {
        self.compaction_memory_limit_per_worker = bytes;
        self
    }

    pub fn with_vector_chunk_size(mut self, rows: usize) -> Self {
        self.vector_chunk_size = rows.max(1);
        self
    }

    pub fn with_fill_data_cache(mut self, fill: bool) -> Self {
        self.fill_data_cache = fill;
        self
    }

    pub fn with_stream_buffer_size(mut self, bytes: usize) -> Self {
        self.stream_buffer_size = bytes.max(KIB);
        self
    }

    pub fn with_mask_buffer_memory_limit(mut self, bytes: usize) -> Self {
        self.mask_buffer_memory_limit = bytes;
        self
    }

    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = dir.into();
        self
    }

    pub fn with_light_pk_compaction_publish(mut self, enabled: bool) -> Self {
        self.enable_light_pk_compaction_publish = enabled;
        self
    }

    pub fn with_memory_check(mut self, enabled: bool) -> Self {
        self.memory_check_enabled = enabled;
        self
    }
}
