//! Zarr data types.

use crate::error::ExplorerError;
use crate::types::ByteOrder;

use serde::Deserialize;
use strum_macros::Display;

/// Primitive numeric type of the stored array elements.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum DType {
    /// [i8]
    Int8,
    /// [u8]
    Uint8,
    /// [i16]
    Int16,
    /// [u16]
    Uint16,
    /// [i32]
    Int32,
    /// [u32]
    Uint32,
    /// [i64]
    Int64,
    /// [u64]
    Uint64,
    /// [f32]
    Float32,
    /// [f64]
    Float64,
}

impl DType {
    /// Returns the size of the associated type in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Int64 | Self::Uint64 | Self::Float64 => 8,
        }
    }

    fn from_kind_and_size(kind: char, size: usize) -> Option<Self> {
        match (kind, size) {
            ('i', 1) => Some(Self::Int8),
            ('u', 1) => Some(Self::Uint8),
            ('i', 2) => Some(Self::Int16),
            ('u', 2) => Some(Self::Uint16),
            ('i', 4) => Some(Self::Int32),
            ('u', 4) => Some(Self::Uint32),
            ('i', 8) => Some(Self::Int64),
            ('u', 8) => Some(Self::Uint64),
            ('f', 4) => Some(Self::Float32),
            ('f', 8) => Some(Self::Float64),
            _ => None,
        }
    }
}

/// A Zarr v2 `dtype` such as `"<f4"` or `"|u1"`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(try_from = "String")]
pub struct DataType {
    pub byte_order: ByteOrder,
    pub dtype: DType,
}

impl DataType {
    pub fn size_of(&self) -> usize {
        self.dtype.size_of()
    }
}

impl TryFrom<String> for DataType {
    type Error = ExplorerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DataType::try_from(value.as_str())
    }
}

impl TryFrom<&str> for DataType {
    type Error = ExplorerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let unsupported = || ExplorerError::UnsupportedDType {
            dtype: value.to_string(),
        };
        let mut chars = value.chars();
        let byte_order = chars
            .next()
            .and_then(ByteOrder::from_prefix)
            .ok_or_else(unsupported)?;
        let kind = chars.next().ok_or_else(unsupported)?;
        let size: usize = chars.as_str().parse().map_err(|_| unsupported())?;
        let dtype = DType::from_kind_and_size(kind, size).ok_or_else(unsupported)?;
        // Multi-byte types must declare their byte order.
        if byte_order == ByteOrder::NotApplicable && size > 1 {
            return Err(unsupported());
        }
        Ok(DataType { byte_order, dtype })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_test::{assert_de_tokens, assert_de_tokens_error, Token};

    #[test]
    fn test_parse_dtypes() {
        let cases = [
            ("<f4", ByteOrder::Little, DType::Float32),
            (">f8", ByteOrder::Big, DType::Float64),
            ("<i8", ByteOrder::Little, DType::Int64),
            ("|u1", ByteOrder::NotApplicable, DType::Uint8),
            ("|i1", ByteOrder::NotApplicable, DType::Int8),
            (">u2", ByteOrder::Big, DType::Uint16),
        ];
        for (text, byte_order, dtype) in cases {
            assert_eq!(
                DataType { byte_order, dtype },
                DataType::try_from(text).unwrap(),
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_size_of() {
        assert_eq!(1, DType::Uint8.size_of());
        assert_eq!(4, DataType::try_from("<i4").unwrap().size_of());
        assert_eq!(8, DataType::try_from("<f8").unwrap().size_of());
    }

    #[test]
    fn test_unsupported_dtypes() {
        for text in ["", "<", "<f", "<f3", "<c8", "|f8", "=f4", "<M8[ns]", "|S10"] {
            match DataType::try_from(text).unwrap_err() {
                ExplorerError::UnsupportedDType { dtype } => assert_eq!(text, dtype),
                err => panic!("unexpected error {}", err),
            }
        }
    }

    #[test]
    fn test_deserialise() {
        assert_de_tokens(
            &DataType {
                byte_order: ByteOrder::Little,
                dtype: DType::Float32,
            },
            &[Token::Str("<f4")],
        );
    }

    #[test]
    fn test_deserialise_unsupported() {
        assert_de_tokens_error::<DataType>(&[Token::Str("<U4")], "unsupported data type <U4");
    }

    #[test]
    fn test_display() {
        assert_eq!("float32", DType::Float32.to_string());
        assert_eq!("uint8", DType::Uint8.to_string());
    }
}
