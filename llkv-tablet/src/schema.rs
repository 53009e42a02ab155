//! Tablet schemas: column definitions, key model and column-group projection.

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use llkv_result::{Error, Result};
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// How rows with equal sort keys are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, bitcode::Encode, bitcode::Decode)]
pub enum KeysType {
    /// Duplicate keys are kept; rows are only sorted.
    DupKeys,
    /// The newest row for a key replaces older ones.
    UniqueKeys,
    /// Like `UniqueKeys`, with delete vectors maintained by the delta subsystem.
    PrimaryKeys,
}

impl KeysType {
    /// Whether merging must collapse rows with equal sort keys.
    #[inline]
    pub fn deduplicates(self) -> bool {
        matches!(self, KeysType::UniqueKeys | KeysType::PrimaryKeys)
    }
}

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, bitcode::Encode, bitcode::Decode)]
pub enum ColumnType {
    Boolean,
    Int32,
    Int64,
    Float64,
    Varchar,
    /// Fixed-width text padded to `len` bytes with `\0`.
    Char(u16),
}

impl ColumnType {
    pub fn arrow_type(self) -> DataType {
        match self {
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Int32 => DataType::Int32,
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::Varchar | ColumnType::Char(_) => DataType::Utf8,
        }
    }

    /// Declared width for `Char` columns.
    #[inline]
    pub fn char_len(self) -> Option<usize> {
        match self {
            ColumnType::Char(len) => Some(len as usize),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct TabletColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub is_key: bool,
    pub nullable: bool,
}

impl TabletColumn {
    pub fn key(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            is_key: true,
            nullable: false,
        }
    }

    pub fn value(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            is_key: false,
            nullable: true,
        }
    }

    pub fn to_arrow_field(&self) -> Field {
        Field::new(&self.name, self.column_type.arrow_type(), self.nullable)
    }
}

/// Schema of a tablet at one schema version.
///
/// Column order is significant: segment files store columns in this order and
/// column groups refer to columns by their index here.
#[derive(Debug, Clone, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct TabletSchema {
    id: i64,
    keys_type: KeysType,
    columns: Vec<TabletColumn>,
    /// Explicit sort key; empty means "the key columns".
    sort_key_idxes: Vec<u32>,
}

impl TabletSchema {
    /// Builds a schema. Column names must be unique and at least one column
    /// must be a key column.
    pub fn new(id: i64, keys_type: KeysType, columns: Vec<TabletColumn>) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::InvalidArgumentError(
                "tablet schema needs at least one column".into(),
            ));
        }
        let mut names = FxHashSet::default();
        for col in &columns {
            if !names.insert(col.name.as_str()) {
                return Err(Error::InvalidArgumentError(format!(
                    "duplicate column name '{}'",
                    col.name
                )));
            }
        }
        if !columns.iter().any(|c| c.is_key) {
            return Err(Error::InvalidArgumentError(
                "tablet schema needs at least one key column".into(),
            ));
        }
        Ok(Self {
            id,
            keys_type,
            columns,
            sort_key_idxes: Vec::new(),
        })
    }

    /// Sets an explicit sort key, overriding the key columns for ordering and
    /// for the first column group.
    pub fn with_sort_key_idxes(mut self, idxes: Vec<usize>) -> Result<Self> {
        if idxes.is_empty() {
            return Err(Error::InvalidArgumentError("empty sort key".into()));
        }
        let mut seen = FxHashSet::default();
        for &idx in &idxes {
            if idx >= self.columns.len() || !seen.insert(idx) {
                return Err(Error::InvalidArgumentError(format!(
                    "invalid sort key column index {idx}"
                )));
            }
        }
        if self.keys_type.deduplicates() {
            // Duplicates are detected on the sort key, so it must be exactly
            // the key columns.
            let keys = self.key_column_idxes();
            let mut sorted = idxes.clone();
            sorted.sort_unstable();
            if sorted != keys {
                return Err(Error::InvalidArgumentError(format!(
                    "{:?} schema must sort by its key columns {keys:?}, got {idxes:?}",
                    self.keys_type
                )));
            }
        }
        self.sort_key_idxes = idxes.into_iter().map(|i| i as u32).collect();
        Ok(self)
    }

    #[inline]
    pub fn id(&self) -> i64 {
        self.id
    }

    #[inline]
    pub fn keys_type(&self) -> KeysType {
        self.keys_type
    }

    #[inline]
    pub fn is_primary_key(&self) -> bool {
        self.keys_type == KeysType::PrimaryKeys
    }

    #[inline]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[TabletColumn] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> Result<&TabletColumn> {
        self.columns.get(idx).ok_or_else(|| {
            Error::InvalidArgumentError(format!(
                "column index {idx} out of range for schema with {} columns",
                self.columns.len()
            ))
        })
    }

    pub fn num_key_columns(&self) -> usize {
        self.columns.iter().filter(|c| c.is_key).count()
    }

    #[inline]
    pub fn has_explicit_sort_key(&self) -> bool {
        !self.sort_key_idxes.is_empty()
    }

    /// Columns that define row order: the explicit sort key if present,
    /// otherwise the key columns in schema order.
    pub fn sort_key_idxes(&self) -> Vec<usize> {
        if self.has_explicit_sort_key() {
            self.sort_key_idxes.iter().map(|&i| i as usize).collect()
        } else {
            self.key_column_idxes()
        }
    }

    fn key_column_idxes(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_key)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn to_arrow_schema(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.columns
                .iter()
                .map(TabletColumn::to_arrow_field)
                .collect::<Vec<_>>(),
        ))
    }

    /// Arrow schema restricted to `column_ids`, in the requested order.
    pub fn project(&self, column_ids: &[usize]) -> Result<SchemaRef> {
        if column_ids.is_empty() {
            return Err(Error::InvalidArgumentError("empty column projection".into()));
        }
        let fields = column_ids
            .iter()
            .map(|&cid| self.column(cid).map(TabletColumn::to_arrow_field))
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(Schema::new(fields)))
    }

    pub fn sort_key_schema(&self) -> Result<SchemaRef> {
        self.project(&self.sort_key_idxes())
    }

    /// `(position in column_ids, declared width)` for every `Char` column in
    /// the projection.
    pub fn char_field_indexes(&self, column_ids: &[usize]) -> Vec<(usize, usize)> {
        column_ids
            .iter()
            .enumerate()
            .filter_map(|(pos, &cid)| {
                self.columns
                    .get(cid)
                    .and_then(|c| c.column_type.char_len())
                    .map(|len| (pos, len))
            })
            .collect()
    }

    /// Checks that `schema` has the same column names and types as this
    /// tablet schema, in the same order.
    pub fn check_arrow_schema(&self, schema: &Schema) -> Result<()> {
        let expected = self.to_arrow_schema();
        let matches = expected.fields().len() == schema.fields().len()
            && expected
                .fields()
                .iter()
                .zip(schema.fields())
                .all(|(a, b)| a.name() == b.name() && a.data_type() == b.data_type());
        if !matches {
            return Err(Error::InvalidArgumentError(format!(
                "batch schema {schema:?} does not match tablet schema {expected:?}"
            )));
        }
        Ok(())
    }
}
