//! Filter implementations.

pub mod shuffle;

use bytes::Bytes;

/// A Zarr filter that this crate can decode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Filter {
    /// Byte shuffle (numcodecs id `shuffle`)
    Shuffle { element_size: usize },
}

/// Decodes some bytes using the specified filter and returns the result.
///
/// # Arguments
///
/// * `filter`: Filter algorithm
/// * `data`: Filtered data [Bytes]
pub fn decode(filter: &Filter, data: &Bytes) -> Bytes {
    match filter {
        Filter::Shuffle { element_size } => shuffle::deshuffle(data, *element_size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_shuffle() {
        let data = [1, 2, 3, 4, 5, 6, 7, 8];
        let shuffled = shuffle::shuffle(&data, 4);
        let filter = Filter::Shuffle { element_size: 4 };
        let result = decode(&filter, &shuffled);
        assert_eq!(data.as_ref(), result);
    }
}
