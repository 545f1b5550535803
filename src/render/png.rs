//! Minimal PNG encoder for 8-bit RGB images.

use crate::error::ExplorerError;

use flate2::write::ZlibEncoder;
use flate2::{Compression, Crc};
use std::io::Write;

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

fn encode_error(err: std::io::Error) -> ExplorerError {
    ExplorerError::Render {
        plot: "png",
        reason: err.to_string(),
    }
}

/// Appends a chunk with its length and CRC.
fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) -> Result<(), ExplorerError> {
    let length = u32::try_from(data.len())?;
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(data);
    out.extend_from_slice(&crc.sum().to_be_bytes());
    Ok(())
}

/// Encodes RGB pixels, row by row from the top, as a PNG image.
///
/// # Arguments
///
/// * `width`: Image width in pixels
/// * `height`: Image height in pixels
/// * `rgb`: Three bytes per pixel
/// * `text`: Keyword and value pairs stored as `tEXt` chunks
pub fn encode(
    width: usize,
    height: usize,
    rgb: &[u8],
    text: &[(&str, String)],
) -> Result<Vec<u8>, ExplorerError> {
    if width == 0 || height == 0 || rgb.len() != width * height * 3 {
        return Err(ExplorerError::Render {
            plot: "png",
            reason: format!("{} bytes do not fill {}x{} pixels", rgb.len(), width, height),
        });
    }
    let mut out = SIGNATURE.to_vec();

    let mut header = Vec::with_capacity(13);
    header.extend_from_slice(&u32::try_from(width)?.to_be_bytes());
    header.extend_from_slice(&u32::try_from(height)?.to_be_bytes());
    // Bit depth 8, truecolour, deflate, adaptive filtering, no interlace.
    header.extend_from_slice(&[8, 2, 0, 0, 0]);
    write_chunk(&mut out, b"IHDR", &header)?;

    for (keyword, value) in text {
        let mut data = Vec::with_capacity(keyword.len() + 1 + value.len());
        data.extend_from_slice(keyword.as_bytes());
        data.push(0);
        data.extend_from_slice(value.as_bytes());
        write_chunk(&mut out, b"tEXt", &data)?;
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    for row in rgb.chunks(width * 3) {
        // Filter type None.
        encoder.write_all(&[0]).map_err(encode_error)?;
        encoder.write_all(row).map_err(encode_error)?;
    }
    let data = encoder.finish().map_err(encode_error)?;
    write_chunk(&mut out, b"IDAT", &data)?;
    write_chunk(&mut out, b"IEND", &[])?;
    Ok(out)
}
