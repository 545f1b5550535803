//! Byte shuffle filter

use bytes::Bytes;

/// Decode the byte shuffle filter.
///
/// The byte shuffle filter encodes data by reordering bytes with the aim of improving compression
/// ratio. For an array of N elements where each element is M bytes, the filter writes the 0th byte
/// of each element first, followed by the 1st byte of each element, and so on. This function
/// inverts the shuffle filter. Trailing bytes that do not form a whole element are left in place,
/// as numcodecs does.
///
/// # Arguments
///
/// * `data`: `Bytes` to deshuffle.
/// * `element_size`: Size of each element in bytes.
pub fn deshuffle(data: &Bytes, element_size: usize) -> Bytes {
    let num_elements = data.len() / element_size.max(1);
    if element_size <= 1 || num_elements == 0 {
        return data.clone();
    }
    let body = num_elements * element_size;
    let mut result = vec![0u8; data.len()];
    // Each plane holds one byte position of every element.
    for (byte, plane) in data[..body].chunks_exact(num_elements).enumerate() {
        for (dest, value) in result[..body]
            .iter_mut()
            .skip(byte)
            .step_by(element_size)
            .zip(plane)
        {
            *dest = *value;
        }
    }
    result[body..].copy_from_slice(&data[body..]);
    result.into()
}

/// Encode the byte shuffle filter. This is the inverse of [deshuffle].
pub fn shuffle(data: &[u8], element_size: usize) -> Bytes {
    let num_elements = data.len() / element_size.max(1);
    if element_size <= 1 || num_elements == 0 {
        return Bytes::copy_from_slice(data);
    }
    let body = num_elements * element_size;
    let mut result = Vec::with_capacity(data.len());
    for byte in 0..element_size {
        result.extend(data[..body].iter().skip(byte).step_by(element_size));
    }
    result.extend_from_slice(&data[body..]);
    result.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deshuffle_2() {
        let shuffled = [0, 2, 4, 6, 1, 3, 5, 7];
        let bytes = Bytes::copy_from_slice(&shuffled);
        let result = deshuffle(&bytes, 2);
        let expected = [0, 1, 2, 3, 4, 5, 6, 7];
        assert_eq!(expected.as_ref(), result);
    }

    #[test]
    fn test_deshuffle_4() {
        let shuffled = [0, 4, 1, 5, 2, 6, 3, 7];
        let bytes = Bytes::copy_from_slice(&shuffled);
        let result = deshuffle(&bytes, 4);
        let expected = [0, 1, 2, 3, 4, 5, 6, 7];
        assert_eq!(expected.as_ref(), result);
    }

    #[test]
    fn test_deshuffle_8() {
        let shuffled = [0, 8, 1, 9, 2, 10, 3, 11, 4, 12, 5, 13, 6, 14, 7, 15];
        let bytes = Bytes::copy_from_slice(&shuffled);
        let result = deshuffle(&bytes, 8);
        let expected = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];
        assert_eq!(expected.as_ref(), result);
    }

    #[test]
    fn test_deshuffle_trailing_bytes() {
        let shuffled = [0, 2, 1, 3, 9];
        let bytes = Bytes::copy_from_slice(&shuffled);
        let result = deshuffle(&bytes, 2);
        assert_eq!([0, 1, 2, 3, 9].as_ref(), result);
    }

    #[test]
    fn test_deshuffle_single_byte_elements() {
        let bytes = Bytes::from_static(&[3, 2, 1]);
        assert_eq!(bytes, deshuffle(&bytes, 1));
    }

    #[test]
    fn test_shuffle_4() {
        let data = [0, 1, 2, 3, 4, 5, 6, 7];
        let result = shuffle(&data, 4);
        let expected = [0, 4, 1, 5, 2, 6, 3, 7];
        assert_eq!(expected.as_ref(), result);
    }

    #[test]
    fn test_shuffle_inverse() {
        let data: Vec<u8> = (0..=255).collect();
        let shuffled = shuffle(&data, 8);
        assert_ne!(data.as_slice(), shuffled.as_ref());
        assert_eq!(data.as_slice(), deshuffle(&shuffled, 8).as_ref());
    }
}
