//! Field values for roundel records.
//!
//! Every record slot holds either a 64-bit signed integer or a 64-bit IEEE-754
//! float. Which of the two a given slot contains is always derivable from the
//! schema's field-type sequence at that index, so the tag here exists only to
//! keep the two payloads in one array without runtime type inspection.

use std::fmt;

use crate::schema::FieldType;

/// Width in bytes of every encoded field, integer or float.
pub const FIELD_WIDTH: usize = 8;

/// One field value of a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// A 64-bit signed integer field.
    Int(i64),
    /// A 64-bit IEEE-754 float field.
    Float(f64),
}

impl Value {
    /// Returns the field type this value carries.
    pub fn field_type(self) -> FieldType {
        match self {
            Self::Int(_) => FieldType::Int64,
            Self::Float(_) => FieldType::Float64,
        }
    }

    /// The all-zero default for a field of the given type, used to fill
    /// freshly created files.
    pub fn default_for(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Int64 => Self::Int(0),
            FieldType::Float64 => Self::Float(0.0),
        }
    }

    /// Encodes this value into 8 big-endian bytes.
    ///
    /// Integers are two's complement, floats are IEEE-754 bit patterns. The
    /// on-disk format is big-endian throughout, so files are portable across
    /// architectures.
    pub fn encode(self) -> [u8; FIELD_WIDTH] {
        match self {
            Self::Int(v) => v.to_be_bytes(),
            Self::Float(v) => v.to_be_bytes(),
        }
    }

    /// Decodes 8 big-endian bytes as a field of the given type.
    pub fn decode(field_type: FieldType, bytes: [u8; FIELD_WIDTH]) -> Self {
        match field_type {
            FieldType::Int64 => Self::Int(i64::from_be_bytes(bytes)),
            FieldType::Float64 => Self::Float(f64::from_be_bytes(bytes)),
        }
    }

    /// Returns the integer payload, or `None` for a float field.
    pub fn as_int(self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(v),
            Self::Float(_) => None,
        }
    }

    /// Returns the float payload, or `None` for an integer field.
    pub fn as_float(self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(v),
            Self::Int(_) => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}
