//! (De)compression support.

use crate::error::ExplorerError;

use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;
use zune_inflate::{DeflateDecoder, DeflateOptions};

/// Compression algorithm of a Zarr `compressor`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Compression {
    /// Gzip (numcodecs id `gzip`)
    Gzip,
    /// Zlib (numcodecs id `zlib`)
    Zlib,
}

/// Decompresses some Bytes and returns the uncompressed data.
///
/// # Arguments
///
/// * `compression`: Compression algorithm
/// * `data`: Compressed data [Bytes](bytes::Bytes)
/// * `size_hint`: Expected size of the uncompressed data in bytes
pub fn decompress(
    compression: Compression,
    data: &Bytes,
    size_hint: usize,
) -> Result<Bytes, ExplorerError> {
    match compression {
        Compression::Gzip => decompress_flate2_gzip(data, size_hint),
        Compression::Zlib => decompress_zune_zlib(data, size_hint),
    }
}

fn decompress_flate2_gzip(data: &Bytes, size_hint: usize) -> Result<Bytes, ExplorerError> {
    let mut decoder = GzDecoder::<&[u8]>::new(data);
    // Reserve the full decoded chunk size up front so that the buffer is not reallocated, which
    // would lose the 8 byte alignment needed to reinterpret the data as 64-bit numbers.
    let mut buf = maligned::align_first::<u8, maligned::A8>(size_hint.max(data.len()));
    decoder
        .read_to_end(&mut buf)
        .map_err(ExplorerError::DecompressionFlate2)?;
    Ok(buf.into())
}

fn decompress_zune_zlib(data: &Bytes, size_hint: usize) -> Result<Bytes, ExplorerError> {
    let options = DeflateOptions::default().set_size_hint(size_hint);
    let mut decoder = DeflateDecoder::new_with_options(data, options);
    let data = decoder.decode_zlib()?;
    Ok(data.into())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::read::{GzEncoder, ZlibEncoder};
    use zune_inflate::errors::DecodeErrorStatus;

    pub(crate) fn compress_gzip(input: &[u8]) -> Vec<u8> {
        let mut result = Vec::<u8>::new();
        let mut deflater = GzEncoder::new(input, flate2::Compression::fast());
        deflater.read_to_end(&mut result).unwrap();
        result
    }

    pub(crate) fn compress_zlib(input: &[u8]) -> Vec<u8> {
        let mut result = Vec::<u8>::new();
        let mut deflater = ZlibEncoder::new(input, flate2::Compression::fast());
        deflater.read_to_end(&mut result).unwrap();
        result
    }

    #[test]
    fn test_decompress_gzip() {
        let compressed = compress_gzip(b"hello world");
        let result = decompress(Compression::Gzip, &compressed.into(), 11).unwrap();
        assert_eq!(result, b"hello world".as_ref());
        assert_eq!(result.as_ptr().align_offset(8), 0);
    }

    #[test]
    fn test_decompress_gzip_large() {
        // Larger than the compressed input, so the size hint decides the capacity.
        let input = vec![7u8; 4096];
        let compressed = compress_gzip(&input);
        assert!(compressed.len() < input.len());
        let result = decompress(Compression::Gzip, &compressed.into(), input.len()).unwrap();
        assert_eq!(result, input);
        assert_eq!(result.as_ptr().align_offset(8), 0);
    }

    #[test]
    fn test_decompress_zlib() {
        let compressed = compress_zlib(b"hello world");
        let result = decompress(Compression::Zlib, &compressed.into(), 11).unwrap();
        assert_eq!(result, b"hello world".as_ref());
    }

    #[test]
    fn test_decompress_invalid_gzip() {
        let invalid = b"invalid format";
        let err = decompress(Compression::Gzip, &invalid.as_ref().into(), 16).unwrap_err();
        match err {
            ExplorerError::DecompressionFlate2(io_err) => {
                assert_eq!(io_err.kind(), std::io::ErrorKind::InvalidInput);
                assert_eq!(io_err.to_string(), "invalid gzip header");
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn test_decompress_invalid_zlib() {
        let invalid = b"invalid format";
        let err = decompress(Compression::Zlib, &invalid.as_ref().into(), 16).unwrap_err();
        match err {
            ExplorerError::DecompressionZune(zune_err) => match zune_err.error {
                DecodeErrorStatus::GenericStr(message) => {
                    assert_eq!(message, "Unknown zlib compression method 9");
                }
                err => panic!("unexpected zune error {:?}", err),
            },
            err => panic!("unexpected error {}", err),
        }
    }
}
