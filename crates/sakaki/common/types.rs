//! Field types and owned runtime values.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::lob::LobReference;
use crate::time::{Date, TimeOfDay, TimeOfDayWithOffset, TimePoint, TimePointWithOffset};

/// Type of a record field.
///
/// Varlen kinds (character, octet) are stored in records as references into
/// a varlen arena; everything else is stored inline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Boolean,
    Int4,
    Int8,
    Float4,
    Float8,
    Decimal { precision: Option<u8>, scale: Option<u8> },
    Character { varying: bool, length: Option<u32> },
    Octet { varying: bool, length: Option<u32> },
    Date,
    TimeOfDay { with_offset: bool },
    TimePoint { with_offset: bool },
    Blob,
    Clob,
    /// Type of an untyped NULL literal.
    Unknown,
    /// Raw pointer slot used internally by exchanges.
    Pointer,
}

impl FieldType {
    pub fn character(length: Option<u32>) -> Self {
        FieldType::Character { varying: true, length }
    }

    pub fn decimal(precision: Option<u8>, scale: Option<u8>) -> Self {
        FieldType::Decimal { precision, scale }
    }

    /// Bytes the field occupies inside a record buffer.
    pub fn value_size(&self) -> usize {
        match self {
            FieldType::Boolean | FieldType::Unknown => 1,
            FieldType::Int4 | FieldType::Float4 => 4,
            FieldType::Int8 | FieldType::Float8 | FieldType::Date | FieldType::Pointer => 8,
            FieldType::TimeOfDay { with_offset: false } => 8,
            FieldType::TimeOfDay { with_offset: true } => 16,
            FieldType::TimePoint { .. } => 16,
            FieldType::Decimal { .. } => 16,
            FieldType::Character { .. } | FieldType::Octet { .. } => 16,
            FieldType::Blob | FieldType::Clob => 16,
        }
    }

    /// Alignment of the field inside a record buffer.
    pub fn value_alignment(&self) -> usize {
        match self {
            FieldType::Boolean | FieldType::Unknown => 1,
            FieldType::Int4 | FieldType::Float4 => 4,
            _ => 8,
        }
    }

    /// True when record slots hold a reference to arena-resident bytes.
    pub fn is_varlen(&self) -> bool {
        matches!(self, FieldType::Character { .. } | FieldType::Octet { .. })
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Int4
                | FieldType::Int8
                | FieldType::Float4
                | FieldType::Float8
                | FieldType::Decimal { .. }
        )
    }
}

/// Owned value used by expression evaluation and plan parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    Boolean(bool),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Decimal(Decimal),
    Character(String),
    Octet(Vec<u8>),
    Date(Date),
    TimeOfDay(TimeOfDay),
    TimePoint(TimePoint),
    TimeOfDayWithOffset(TimeOfDayWithOffset),
    TimePointWithOffset(TimePointWithOffset),
    Blob(LobReference),
    Clob(LobReference),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The field type this value naturally maps to.
    ///
    /// NULL maps to [`FieldType::Unknown`]; its effective type is decided by
    /// the promotion rules at the point of use.
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Null => FieldType::Unknown,
            Value::Boolean(_) => FieldType::Boolean,
            Value::Int4(_) => FieldType::Int4,
            Value::Int8(_) => FieldType::Int8,
            Value::Float4(_) => FieldType::Float4,
            Value::Float8(_) => FieldType::Float8,
            Value::Decimal(_) => FieldType::Decimal { precision: None, scale: None },
            Value::Character(_) => FieldType::Character { varying: true, length: None },
            Value::Octet(_) => FieldType::Octet { varying: true, length: None },
            Value::Date(_) => FieldType::Date,
            Value::TimeOfDay(_) => FieldType::TimeOfDay { with_offset: false },
            Value::TimePoint(_) => FieldType::TimePoint { with_offset: false },
            Value::TimeOfDayWithOffset(_) => FieldType::TimeOfDay { with_offset: true },
            Value::TimePointWithOffset(_) => FieldType::TimePoint { with_offset: true },
            Value::Blob(_) => FieldType::Blob,
            Value::Clob(_) => FieldType::Clob,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_and_alignment() {
        assert_eq!(FieldType::Int4.value_size(), 4);
        assert_eq!(FieldType::Int8.value_alignment(), 8);
        assert_eq!(FieldType::Character { varying: true, length: None }.value_size(), 16);
        assert!(FieldType::Octet { varying: false, length: Some(8) }.is_varlen());
        assert!(!FieldType::Blob.is_varlen());
    }

    #[test]
    fn null_has_unknown_type() {
        assert_eq!(Value::Null.field_type(), FieldType::Unknown);
        assert!(Value::Null.is_null());
        assert!(!Value::Int4(0).is_null());
    }
}
