//! Record serialization: the bijective encoding of rows and keys.
//!
//! A serialized record is laid out as:
//!
//! ```text
//! [ null bitmap: ceil(n_columns / 8) bytes ]
//! [ each non-null fixed-size column, physical order, raw little-endian ]
//! [ each non-null variable-size column, physical order, (i32 length)(bytes) ]
//! ```
//!
//! Bit `i` of the bitmap set means column `i` is absent from both sections.
//! There is no padding anywhere. Internal B+Tree entries reuse this format
//! for the key columns, followed by an `i32` child page index.

use crate::error::{Result, StorageError};
use crate::schema::{Column, PrimitiveType, TableDefinition};
use crate::types::{DataValue, Key};

/// Serialize a row against its column list.
///
/// The row arity must match the column list, and every non-null value must
/// match its column's type.
pub fn serialize(columns: &[Column], row: &[DataValue]) -> Result<Vec<u8>> {
    if row.len() != columns.len() {
        return Err(StorageError::invalid_operation(format!(
            "row has {} values but {} columns were given",
            row.len(),
            columns.len()
        )));
    }
    for (column, value) in columns.iter().zip(row.iter()) {
        if !column.data_type.matches(value) {
            return Err(StorageError::invalid_operation(format!(
                "value {value} does not match type {:?} of column '{}'",
                column.data_type, column.name
            )));
        }
    }

    let bitmap_len = bitmap_len(columns.len());
    let mut out = vec![0u8; bitmap_len];
    for (i, value) in row.iter().enumerate() {
        if value.is_null() {
            out[i / 8] |= 1 << (i % 8);
        }
    }

    // Fixed-size section, physical column order.
    for (column, value) in columns.iter().zip(row.iter()) {
        if value.is_null() || column.data_type.is_variable() {
            continue;
        }
        match value {
            DataValue::Boolean(v) => out.push(*v as u8),
            DataValue::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            DataValue::BigInt(v) | DataValue::DateTime(v) => {
                out.extend_from_slice(&v.to_le_bytes())
            }
            DataValue::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            DataValue::Decimal(v) => out.extend_from_slice(&v.to_le_bytes()),
            DataValue::Null | DataValue::Varchar(_) | DataValue::Blob(_) => {
                return Err(StorageError::invalid_operation(format!(
                    "value {value} in fixed-size column '{}'",
                    column.name
                )))
            }
        }
    }

    // Variable-size section, physical column order, length-prefixed.
    for (column, value) in columns.iter().zip(row.iter()) {
        if value.is_null() || !column.data_type.is_variable() {
            continue;
        }
        let bytes: &[u8] = match value {
            DataValue::Varchar(v) => v.as_bytes(),
            DataValue::Blob(v) => v,
            other => {
                return Err(StorageError::invalid_operation(format!(
                    "value {other} in variable-size column '{}'",
                    column.name
                )))
            }
        };
        out.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
        out.extend_from_slice(bytes);
    }

    Ok(out)
}

/// Deserialize a full row. The buffer must contain exactly one record;
/// trailing bytes are `InvalidData`.
pub fn deserialize(columns: &[Column], bytes: &[u8]) -> Result<Vec<DataValue>> {
    let (row, consumed) = read_row(columns, bytes)?;
    if consumed != bytes.len() {
        return Err(StorageError::invalid_data(format!(
            "{} trailing bytes after record",
            bytes.len() - consumed
        )));
    }
    Ok(row)
}

/// Deserialize a row that may be followed by more data (an internal-node
/// entry's child pointer). Returns the row and the number of bytes consumed.
pub fn read_row(columns: &[Column], bytes: &[u8]) -> Result<(Vec<DataValue>, usize)> {
    let mut cursor = Cursor::new(bytes);
    let bitmap = cursor.take(bitmap_len(columns.len()))?.to_vec();

    let mut row = vec![DataValue::Null; columns.len()];

    for (i, column) in columns.iter().enumerate() {
        if is_null(&bitmap, i) || column.data_type.is_variable() {
            continue;
        }
        row[i] = cursor.read_fixed(column.data_type)?;
    }
    for (i, column) in columns.iter().enumerate() {
        if is_null(&bitmap, i) || !column.data_type.is_variable() {
            continue;
        }
        row[i] = cursor.read_variable(column.data_type)?;
    }

    Ok((row, cursor.position()))
}

/// Extract the primary key of a serialized row without materializing the
/// non-key columns. Values are emitted in primary-key declaration order.
///
/// A key column whose null bit is set can only come from corrupt bytes and
/// fails with `InvalidData`.
pub fn deserialize_primary_key(table: &TableDefinition, bytes: &[u8]) -> Result<Key> {
    let ordinals = table.primary_key_ordinals()?;
    let mut cursor = Cursor::new(bytes);
    let bitmap = cursor.take(bitmap_len(table.columns.len()))?.to_vec();

    for &ordinal in &ordinals {
        if is_null(&bitmap, ordinal) {
            return Err(StorageError::invalid_data(format!(
                "primary key column '{}' is marked null on disk",
                table.columns[ordinal].name
            )));
        }
    }

    let mut found = vec![None; table.columns.len()];
    let wanted = |i: usize| ordinals.contains(&i);

    for (i, column) in table.columns.iter().enumerate() {
        if is_null(&bitmap, i) || column.data_type.is_variable() {
            continue;
        }
        if wanted(i) {
            found[i] = Some(cursor.read_fixed(column.data_type)?);
        } else {
            cursor.skip(column.data_type.fixed_width().unwrap_or(0))?;
        }
    }
    for (i, column) in table.columns.iter().enumerate() {
        if is_null(&bitmap, i) || !column.data_type.is_variable() {
            continue;
        }
        if wanted(i) {
            found[i] = Some(cursor.read_variable(column.data_type)?);
        } else {
            cursor.skip_variable()?;
        }
    }

    let mut values = Vec::with_capacity(ordinals.len());
    for ordinal in ordinals {
        match found[ordinal].take() {
            Some(value) => values.push(value),
            None => {
                return Err(StorageError::invalid_data(format!(
                    "primary key column '{}' missing from record",
                    table.columns[ordinal].name
                )))
            }
        }
    }
    Ok(Key::new(values))
}

/// Serialize a key against the primary-key columns. Key values must be
/// non-null.
pub fn serialize_key(pk_columns: &[Column], key: &Key) -> Result<Vec<u8>> {
    for value in key.values() {
        if value.is_null() {
            return Err(StorageError::invalid_operation(
                "primary key values may not be null",
            ));
        }
    }
    serialize(pk_columns, key.values())
}

/// Decode a key serialized by [`serialize_key`], returning it together with
/// the number of bytes consumed.
pub fn read_key(pk_columns: &[Column], bytes: &[u8]) -> Result<(Key, usize)> {
    let (values, consumed) = read_row(pk_columns, bytes)?;
    if values.iter().any(DataValue::is_null) {
        return Err(StorageError::invalid_data(
            "primary key value is marked null on disk",
        ));
    }
    Ok((Key::new(values), consumed))
}

fn bitmap_len(n_columns: usize) -> usize {
    n_columns.div_ceil(8)
}

fn is_null(bitmap: &[u8], i: usize) -> bool {
    bitmap[i / 8] & (1 << (i % 8)) != 0
}

/// Bounds-checked forward reader over a record buffer
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| StorageError::invalid_data("truncated record"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    fn read_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_fixed(&mut self, data_type: PrimitiveType) -> Result<DataValue> {
        let value = match data_type {
            PrimitiveType::Boolean => DataValue::Boolean(self.take(1)?[0] != 0),
            PrimitiveType::Int => DataValue::Int(self.read_i32()?),
            PrimitiveType::BigInt => DataValue::BigInt(self.read_le_i64()?),
            PrimitiveType::DateTime => DataValue::DateTime(self.read_le_i64()?),
            PrimitiveType::Float => {
                let b = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                DataValue::Float(f64::from_le_bytes(raw))
            }
            PrimitiveType::Decimal => {
                let b = self.take(16)?;
                let mut raw = [0u8; 16];
                raw.copy_from_slice(b);
                DataValue::Decimal(i128::from_le_bytes(raw))
            }
            PrimitiveType::Varchar | PrimitiveType::Blob => {
                return Err(StorageError::invalid_data(
                    "variable-size type in fixed section",
                ))
            }
        };
        Ok(value)
    }

    fn read_le_i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_le_bytes(raw))
    }

    fn read_variable(&mut self, data_type: PrimitiveType) -> Result<DataValue> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(StorageError::invalid_data(format!(
                "negative length {len} in variable section"
            )));
        }
        let bytes = self.take(len as usize)?;
        match data_type {
            PrimitiveType::Varchar => {
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| StorageError::invalid_data("invalid UTF-8 in varchar"))?;
                Ok(DataValue::Varchar(s.to_string()))
            }
            PrimitiveType::Blob => Ok(DataValue::Blob(bytes.to_vec())),
            _ => Err(StorageError::invalid_data(
                "fixed-size type in variable section",
            )),
        }
    }

    fn skip_variable(&mut self) -> Result<()> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(StorageError::invalid_data(format!(
                "negative length {len} in variable section"
            )));
        }
        self.skip(len as usize)
    }
}
