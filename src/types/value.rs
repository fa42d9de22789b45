//! Boxed column values and composite keys.

use crate::error::{Result, StorageError};
use std::cmp::Ordering;
use std::fmt;

/// A single column value as held in memory.
///
/// Each variant corresponds to one primitive type of the schema layer;
/// `Null` stands for an absent value regardless of the declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Null,
    Boolean(bool),
    Int(i32),
    BigInt(i64),
    Float(f64),
    /// Ticks since the epoch
    DateTime(i64),
    /// 128-bit fixed-point decimal, stored as its raw integer representation
    Decimal(i128),
    Varchar(String),
    Blob(Vec<u8>),
}

impl DataValue {
    /// Whether this value is `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// Compare two values of the same column.
    ///
    /// `Null` sorts before any non-null value. Comparing values of two
    /// different non-null variants can only happen when on-disk bytes were
    /// decoded against the wrong schema, so it surfaces as `InvalidData`.
    pub fn compare(&self, other: &DataValue) -> Result<Ordering> {
        use DataValue::*;
        let ord = match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (BigInt(a), BigInt(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Decimal(a), Decimal(b)) => a.cmp(b),
            (Varchar(a), Varchar(b)) => a.cmp(b),
            (Blob(a), Blob(b)) => a.cmp(b),
            (a, b) => {
                return Err(StorageError::invalid_data(format!(
                    "cannot compare values of mismatched types: {a} vs {b}"
                )))
            }
        };
        Ok(ord)
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => write!(f, "NULL"),
            DataValue::Boolean(v) => write!(f, "{v}"),
            DataValue::Int(v) => write!(f, "{v}"),
            DataValue::BigInt(v) => write!(f, "{v}"),
            DataValue::Float(v) => write!(f, "{v}"),
            DataValue::DateTime(v) => write!(f, "datetime({v})"),
            DataValue::Decimal(v) => write!(f, "decimal({v})"),
            DataValue::Varchar(v) => write!(f, "'{v}'"),
            DataValue::Blob(v) => write!(f, "blob[{}]", v.len()),
        }
    }
}

/// A primary key: the ordered tuple of a row's primary-key column values.
///
/// Keys compare lexicographically component-wise.
#[derive(Debug, Clone, PartialEq)]
pub struct Key(pub Vec<DataValue>);

impl Key {
    /// Create a key from its component values
    pub fn new(values: Vec<DataValue>) -> Self {
        Self(values)
    }

    /// The component values
    pub fn values(&self) -> &[DataValue] {
        &self.0
    }

    /// Component-wise lexicographic comparison.
    ///
    /// Comparing keys of different arity is a schema mixup and surfaces as
    /// `InvalidData`.
    pub fn compare(&self, other: &Key) -> Result<Ordering> {
        if self.0.len() != other.0.len() {
            return Err(StorageError::invalid_data(format!(
                "cannot compare keys of different arity: {} vs {}",
                self.0.len(),
                other.0.len()
            )));
        }
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.compare(b)? {
                Ordering::Equal => continue,
                unequal => return Ok(unequal),
            }
        }
        Ok(Ordering::Equal)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

impl From<DataValue> for Key {
    fn from(value: DataValue) -> Self {
        Key(vec![value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(
            DataValue::Null.compare(&DataValue::Int(i32::MIN)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            DataValue::Int(0).compare(&DataValue::Null).unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            DataValue::Null.compare(&DataValue::Null).unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn test_same_type_ordering() {
        assert_eq!(
            DataValue::Int(1).compare(&DataValue::Int(2)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            DataValue::Varchar("b".into())
                .compare(&DataValue::Varchar("a".into()))
                .unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            DataValue::Float(1.5).compare(&DataValue::Float(1.5)).unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn test_mismatched_types_error() {
        assert!(DataValue::Int(1)
            .compare(&DataValue::Varchar("1".into()))
            .is_err());
    }

    #[test]
    fn test_key_lexicographic() {
        let a = Key::new(vec![DataValue::Int(1), DataValue::Varchar("x".into())]);
        let b = Key::new(vec![DataValue::Int(1), DataValue::Varchar("y".into())]);
        let c = Key::new(vec![DataValue::Int(2), DataValue::Varchar("a".into())]);

        assert_eq!(a.compare(&b).unwrap(), Ordering::Less);
        assert_eq!(b.compare(&c).unwrap(), Ordering::Less);
        assert_eq!(a.compare(&a.clone()).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_key_arity_mismatch() {
        let a = Key::new(vec![DataValue::Int(1)]);
        let b = Key::new(vec![DataValue::Int(1), DataValue::Int(2)]);
        assert!(a.compare(&b).is_err());
    }

    #[test]
    fn test_key_display() {
        let k = Key::new(vec![DataValue::Int(7), DataValue::Varchar("hi".into())]);
        assert_eq!(format!("{k}"), "(7, 'hi')");
    }
}
