use serde::Deserialize;

#[cfg(target_endian = "big")]
pub const NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Big;

#[cfg(target_endian = "little")]
pub const NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Little;

/// Byte order / endianness.
///
/// Zarr encodes the byte order as the first character of the dtype string.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Big Endian
    Big,
    /// Little Endian
    Little,
    /// Single byte types, for which byte order is irrelevant
    NotApplicable,
}

impl ByteOrder {
    /// Returns the byte order for a Zarr dtype prefix character, if recognised.
    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            '<' => Some(ByteOrder::Little),
            '>' => Some(ByteOrder::Big),
            '|' => Some(ByteOrder::NotApplicable),
            _ => None,
        }
    }

    /// Returns whether values stored in this byte order must be swapped before use on this host.
    pub fn needs_swap(self) -> bool {
        match self {
            ByteOrder::NotApplicable => false,
            order => order != NATIVE_BYTE_ORDER,
        }
    }
}

/// Values whose byte representation may be reversed.
pub trait SwapBytes: Copy {
    fn swap_bytes(self) -> Self;
}

macro_rules! impl_swap_bytes_int {
    ($($t:ty),*) => {
        $(impl SwapBytes for $t {
            fn swap_bytes(self) -> Self {
                <$t>::swap_bytes(self)
            }
        })*
    };
}

impl_swap_bytes_int!(i8, u8, i16, u16, i32, u32, i64, u64);

impl SwapBytes for f32 {
    fn swap_bytes(self) -> Self {
        f32::from_bits(self.to_bits().swap_bytes())
    }
}

impl SwapBytes for f64 {
    fn swap_bytes(self) -> Self {
        f64::from_bits(self.to_bits().swap_bytes())
    }
}
