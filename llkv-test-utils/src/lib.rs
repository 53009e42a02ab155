//! Shared helpers for LLKV test binaries.

use std::sync::{Arc, Once};

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

static INIT: Once = Once::new();

/// Default filter when `RUST_LOG` is unset. Compaction logs per chunk at
/// `trace`, which drowns test output.
const DEFAULT_TEST_FILTER: &str = "info";

/// Initialize tracing for test binaries. Safe to call multiple times.
pub fn init_tracing_for_tests() {
    INIT.call_once(|| {
        use tracing_subscriber::filter::EnvFilter;
        use tracing_subscriber::fmt;
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER));
        // `try_init` so a binary that installed its own subscriber keeps it.
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}

/// Builds a batch of non-nullable `Int64` columns, one per `(name, values)`.
///
/// # Panics
///
/// Panics when the columns have different lengths.
pub fn int64_batch(columns: &[(&str, Vec<i64>)]) -> RecordBatch {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, _)| Field::new(*name, DataType::Int64, false))
        .collect();
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|(_, values)| Arc::new(Int64Array::from(values.clone())) as ArrayRef)
        .collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).expect("int64 test batch")
}

/// Collects an `Int64` column of `batch` into a vector, treating nulls as a
/// test failure.
pub fn int64_column(batch: &RecordBatch, name: &str) -> Vec<i64> {
    let col = batch
        .column_by_name(name)
        .unwrap_or_else(|| panic!("column {name} missing"));
    let arr = col
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap_or_else(|| panic!("column {name} is not Int64"));
    arr.iter()
        .map(|v| v.unwrap_or_else(|| panic!("null in column {name}")))
        .collect()
}

/// Collects a `Utf8` column of `batch` into owned strings.
pub fn utf8_column(batch: &RecordBatch, name: &str) -> Vec<String> {
    let col = batch
        .column_by_name(name)
        .unwrap_or_else(|| panic!("column {name} missing"));
    let arr = col
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap_or_else(|| panic!("column {name} is not Utf8"));
    arr.iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect()
}

#[cfg(feature = "auto-init")]
mod auto {
    // Runs at binary init time so individual tests need not call init.
    use ctor::ctor;

    #[ctor]
    fn init() {
        super::init_tracing_for_tests();
    }
}
