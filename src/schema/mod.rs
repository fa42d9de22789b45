//! Schema DTOs: primitive types, columns, and table definitions.
//!
//! The storage core consumes column lists and a primary-key column list; it
//! does not interpret constraints beyond that. Definitions are serde-derived
//! so the engine can persist them as catalog rows.

use crate::error::{Result, StorageError};
use crate::types::{DataValue, Key};
use serde::{Deserialize, Serialize};

/// Primitive column types understood by the record serializer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveType {
    Boolean,
    Int,
    BigInt,
    Float,
    DateTime,
    Decimal,
    Varchar,
    Blob,
}

impl PrimitiveType {
    /// Serialized width of a fixed-size type, or `None` for variable-size
    /// types (`Varchar`, `Blob`).
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            PrimitiveType::Boolean => Some(1),
            PrimitiveType::Int => Some(4),
            PrimitiveType::BigInt => Some(8),
            PrimitiveType::Float => Some(8),
            PrimitiveType::DateTime => Some(8),
            PrimitiveType::Decimal => Some(16),
            PrimitiveType::Varchar | PrimitiveType::Blob => None,
        }
    }

    /// Whether values of this type are stored in the length-prefixed
    /// variable section
    pub fn is_variable(self) -> bool {
        self.fixed_width().is_none()
    }

    /// Whether a value matches this type (`Null` matches every type)
    pub fn matches(self, value: &DataValue) -> bool {
        matches!(
            (self, value),
            (_, DataValue::Null)
                | (PrimitiveType::Boolean, DataValue::Boolean(_))
                | (PrimitiveType::Int, DataValue::Int(_))
                | (PrimitiveType::BigInt, DataValue::BigInt(_))
                | (PrimitiveType::Float, DataValue::Float(_))
                | (PrimitiveType::DateTime, DataValue::DateTime(_))
                | (PrimitiveType::Decimal, DataValue::Decimal(_))
                | (PrimitiveType::Varchar, DataValue::Varchar(_))
                | (PrimitiveType::Blob, DataValue::Blob(_))
        )
    }
}

/// A single column of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: PrimitiveType,
    /// Declared maximum length for variable-size types; informational at the
    /// storage layer
    pub max_length: Option<u32>,
    pub nullable: bool,
}

impl Column {
    /// A non-nullable column without a declared maximum length
    pub fn new(name: impl Into<String>, data_type: PrimitiveType) -> Self {
        Self {
            name: name.into(),
            data_type,
            max_length: None,
            nullable: false,
        }
    }

    /// Builder-style nullable flag
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Builder-style maximum length
    pub fn max_length(mut self, len: u32) -> Self {
        self.max_length = Some(len);
        self
    }
}

/// A table definition: identity, columns in physical order, and the
/// primary-key column names in declaration order.
///
/// The primary key may be any subset of the columns, in any ordinal order;
/// key extraction follows the declaration order, not the physical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub table_id: i32,
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
}

impl TableDefinition {
    pub fn new(
        table_id: i32,
        name: impl Into<String>,
        columns: Vec<Column>,
        primary_key: Vec<String>,
    ) -> Self {
        Self {
            table_id,
            name: name.into(),
            columns,
            primary_key,
        }
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Resolve the primary-key column names to physical column ordinals, in
    /// primary-key declaration order. A name that resolves to no column is an
    /// `InvalidOperation`; this is checked once when a tree is opened.
    pub fn primary_key_ordinals(&self) -> Result<Vec<usize>> {
        if self.primary_key.is_empty() {
            return Err(StorageError::invalid_operation(format!(
                "table '{}' has no primary key",
                self.name
            )));
        }
        self.primary_key
            .iter()
            .map(|name| {
                self.columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| {
                        StorageError::invalid_operation(format!(
                            "primary key column '{}' is not a column of table '{}'",
                            name, self.name
                        ))
                    })
            })
            .collect()
    }

    /// The primary-key columns themselves, in declaration order
    pub fn primary_key_columns(&self) -> Result<Vec<Column>> {
        Ok(self
            .primary_key_ordinals()?
            .into_iter()
            .map(|i| self.columns[i].clone())
            .collect())
    }

    /// Extract the key of a full row. Fails with `InvalidOperation` on arity
    /// mismatch or a null primary-key value: key columns must be non-null at
    /// the storage layer.
    pub fn key_of_row(&self, row: &[DataValue]) -> Result<Key> {
        if row.len() != self.columns.len() {
            return Err(StorageError::invalid_operation(format!(
                "row has {} values but table '{}' has {} columns",
                row.len(),
                self.name,
                self.columns.len()
            )));
        }
        let mut values = Vec::with_capacity(self.primary_key.len());
        for ordinal in self.primary_key_ordinals()? {
            let value = &row[ordinal];
            if value.is_null() {
                return Err(StorageError::invalid_operation(format!(
                    "primary key column '{}' may not be null",
                    self.columns[ordinal].name
                )));
            }
            values.push(value.clone());
        }
        Ok(Key::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableDefinition {
        TableDefinition::new(
            1,
            "users",
            vec![
                Column::new("id", PrimitiveType::Int),
                Column::new("name", PrimitiveType::Varchar)
                    .max_length(100)
                    .nullable(true),
                Column::new("joined", PrimitiveType::DateTime).nullable(true),
            ],
            vec!["id".into()],
        )
    }

    #[test]
    fn test_fixed_widths() {
        assert_eq!(PrimitiveType::Boolean.fixed_width(), Some(1));
        assert_eq!(PrimitiveType::Decimal.fixed_width(), Some(16));
        assert_eq!(PrimitiveType::Varchar.fixed_width(), None);
        assert!(PrimitiveType::Blob.is_variable());
    }

    #[test]
    fn test_primary_key_resolution() {
        let t = users();
        assert_eq!(t.primary_key_ordinals().unwrap(), vec![0]);

        // PK declaration order need not match physical order.
        let t2 = TableDefinition::new(
            2,
            "events",
            vec![
                Column::new("payload", PrimitiveType::Blob).nullable(true),
                Column::new("seq", PrimitiveType::BigInt),
                Column::new("source", PrimitiveType::Varchar),
            ],
            vec!["source".into(), "seq".into()],
        );
        assert_eq!(t2.primary_key_ordinals().unwrap(), vec![2, 1]);
    }

    #[test]
    fn test_unknown_pk_column() {
        let mut t = users();
        t.primary_key = vec!["nope".into()];
        assert!(t.primary_key_ordinals().is_err());
    }

    #[test]
    fn test_key_of_row() {
        let t = users();
        let key = t
            .key_of_row(&[
                DataValue::Int(7),
                DataValue::Varchar("ada".into()),
                DataValue::Null,
            ])
            .unwrap();
        assert_eq!(key, Key::new(vec![DataValue::Int(7)]));

        // Null key value is rejected before anything reaches a page.
        assert!(t
            .key_of_row(&[DataValue::Null, DataValue::Null, DataValue::Null])
            .is_err());
        // Arity mismatch.
        assert!(t.key_of_row(&[DataValue::Int(7)]).is_err());
    }

    #[test]
    fn test_definition_json_roundtrip() {
        let t = users();
        let json = serde_json::to_string(&t).unwrap();
        let back: TableDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
