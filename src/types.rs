//! Core data types for zarrkit

use crate::error::{Result, ZarrError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-width scalar element types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Boolean stored as one byte
    Bool,
    /// Signed 8-bit integer
    Int8,
    /// Signed 16-bit integer
    Int16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 8-bit integer
    UInt8,
    /// Unsigned 16-bit integer
    UInt16,
    /// Unsigned 32-bit integer
    UInt32,
    /// Unsigned 64-bit integer
    UInt64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
}

impl DataType {
    /// Size in bytes of this data type
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        }
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Check if this is a signed integer type
    pub fn is_signed_integer(&self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    /// Check if this is an unsigned integer type
    pub fn is_unsigned_integer(&self) -> bool {
        matches!(
            self,
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64
        )
    }

    /// The identifier used in array metadata
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }

    /// Fail with a dtype error unless `T` is the element type of this data type
    pub fn check_element<T: Element>(&self) -> Result<()> {
        if T::DATA_TYPE == *self {
            Ok(())
        } else {
            Err(ZarrError::Dtype(format!(
                "element type {} does not match array data type {}",
                T::DATA_TYPE,
                self
            )))
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A Rust scalar that can be stored as an array element.
///
/// Elements are always laid out little-endian in decoded chunk buffers.
pub trait Element: Copy + Send + Sync + 'static {
    /// The data type this element maps to
    const DATA_TYPE: DataType;

    /// Append the little-endian bytes of this element
    fn write_le(&self, out: &mut Vec<u8>);

    /// Read an element from exactly `DATA_TYPE.size_in_bytes()` bytes
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($t:ty, $dt:expr) => {
        impl Element for $t {
            const DATA_TYPE: DataType = $dt;

            fn write_le(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_le_bytes(buf)
            }
        }
    };
}

impl_element!(i8, DataType::Int8);
impl_element!(i16, DataType::Int16);
impl_element!(i32, DataType::Int32);
impl_element!(i64, DataType::Int64);
impl_element!(u8, DataType::UInt8);
impl_element!(u16, DataType::UInt16);
impl_element!(u32, DataType::UInt32);
impl_element!(u64, DataType::UInt64);
impl_element!(f32, DataType::Float32);
impl_element!(f64, DataType::Float64);

impl Element for bool {
    const DATA_TYPE: DataType = DataType::Bool;

    fn write_le(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_sizes() {
        assert_eq!(DataType::UInt8.size_in_bytes(), 1);
        assert_eq!(DataType::Int16.size_in_bytes(), 2);
        assert_eq!(DataType::Float32.size_in_bytes(), 4);
        assert_eq!(DataType::Float64.size_in_bytes(), 8);
        assert_eq!(DataType::Bool.size_in_bytes(), 1);
    }

    #[test]
    fn test_data_type_names() {
        let parsed: DataType = serde_json::from_str("\"uint16\"").unwrap();
        assert_eq!(parsed, DataType::UInt16);
        assert_eq!(
            serde_json::to_string(&DataType::Float32).unwrap(),
            "\"float32\""
        );
        assert!(serde_json::from_str::<DataType>("\"complex64\"").is_err());
    }

    #[test]
    fn test_element_le_layout() {
        let mut out = Vec::new();
        0x0102_0304u32.write_le(&mut out);
        assert_eq!(out, vec![4, 3, 2, 1]);
        assert_eq!(u32::read_le(&out), 0x0102_0304);

        let mut out = Vec::new();
        (-1.5f64).write_le(&mut out);
        assert_eq!(f64::read_le(&out), -1.5);
    }

    #[test]
    fn test_check_element() {
        assert!(DataType::Float32.check_element::<f32>().is_ok());
        assert!(matches!(
            DataType::Float32.check_element::<f64>(),
            Err(ZarrError::Dtype(_))
        ));
    }
}
