//! Helpers applied to chunks on their way from a reader to a writer.

use crate::schema::TabletSchema;
use arrow::array::{Array, ArrayRef, AsArray, StringBuilder};
use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result};
use std::sync::Arc;

/// Right-pads every `Char(n)` column of `batch` with `\0` bytes up to `n`.
///
/// `batch` holds the columns `column_ids` of `schema`, in that order. Segment
/// files may store CHAR values without their trailing padding; the output of a
/// compaction always carries the full declared width. Values already at or
/// beyond the width and nulls are left untouched.
pub fn pad_char_columns(
    schema: &TabletSchema,
    column_ids: &[usize],
    batch: RecordBatch,
) -> Result<RecordBatch> {
    if batch.num_columns() != column_ids.len() {
        return Err(Error::Internal(format!(
            "chunk has {} columns but its column group has {}",
            batch.num_columns(),
            column_ids.len()
        )));
    }
    let char_fields = schema.char_field_indexes(column_ids);
    if char_fields.is_empty() || batch.num_rows() == 0 {
        return Ok(batch);
    }

    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    let mut changed = false;
    for (pos, width) in char_fields {
        let values = columns[pos].as_string_opt::<i32>().ok_or_else(|| {
            Error::Internal(format!("CHAR column at position {pos} is not Utf8"))
        })?;
        let needs_padding = values
            .iter()
            .any(|v| v.is_some_and(|s| s.len() < width));
        if !needs_padding {
            continue;
        }

        let mut builder = StringBuilder::with_capacity(values.len(), values.len() * width);
        let mut padded = String::with_capacity(width);
        for v in values.iter() {
            match v {
                Some(s) if s.len() < width => {
                    padded.clear();
                    padded.push_str(s);
                    padded.extend(std::iter::repeat_n('\0', width - s.len()));
                    builder.append_value(&padded);
                }
                Some(s) => builder.append_value(s),
                None => builder.append_null(),
            }
        }
        columns[pos] = Arc::new(builder.finish());
        changed = true;
    }

    if !changed {
        return Ok(batch);
    }
    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}

/// Approximate heap footprint of a chunk.
#[inline]
pub fn chunk_memory_usage(batch: &RecordBatch) -> usize {
    batch
        .columns()
        .iter()
        .map(|c| c.get_array_memory_size())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, KeysType, TabletColumn};
    use arrow::array::{Int64Array, StringArray};

    #[test]
    fn pads_short_char_values() {
        let schema = TabletSchema::new(
            1,
            KeysType::DupKeys,
            vec![
                TabletColumn::key("k", ColumnType::Int64),
                TabletColumn::value("c", ColumnType::Char(3)),
            ],
        )
        .unwrap();
        let projected = schema.project(&[1, 0]).unwrap();
        let batch = RecordBatch::try_new(
            projected,
            vec![
                Arc::new(StringArray::from(vec![Some("a"), None, Some("abcd")])),
                Arc::new(Int64Array::from(vec![1, 2, 3])),
            ],
        )
        .unwrap();

        let out = pad_char_columns(&schema, &[1, 0], batch).unwrap();
        let col = out.column(0).as_string::<i32>();
        assert_eq!(col.value(0), "a\0\0");
        assert!(col.is_null(1));
        assert_eq!(col.value(2), "abcd");
    }

    #[test]
    fn leaves_non_char_chunks_alone() {
        let schema = TabletSchema::new(
            1,
            KeysType::DupKeys,
            vec![TabletColumn::key("k", ColumnType::Int64)],
        )
        .unwrap();
        let batch = RecordBatch::try_new(
            schema.to_arrow_schema(),
            vec![Arc::new(Int64Array::from(vec![1, 2]))],
        )
        .unwrap();
        let out = pad_char_columns(&schema, &[0], batch.clone()).unwrap();
        assert_eq!(out, batch);
        assert!(pad_char_columns(&schema, &[0, 0], batch).is_err());
    }
}
