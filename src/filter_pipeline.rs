//! Compression and filter pipeline.

use crate::compression::{self, Compression};
use crate::error::ExplorerError;
use crate::filters::{self, Filter};

use bytes::Bytes;

/// Alignment of decoded chunk data, sufficient for every supported data type.
const CHUNK_ALIGNMENT: usize = 8;

/// The codecs used to encode the chunks of an array.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkCodecs {
    /// Optional compressor
    pub compression: Option<Compression>,
    /// Filters, in the order that they were applied when the data was written
    pub filters: Vec<Filter>,
}

/// Returns data after applying a filter pipeline.
///
/// The pipeline is applied in the reverse order to when the data was written: decompression
/// first, then each filter from last to first. The returned data is 8 byte aligned.
///
/// # Arguments
///
/// * `codecs`: Codecs used to encode the chunk
/// * `data`: Data to apply filter pipeline to.
/// * `decoded_size`: Expected size of the decoded chunk in bytes
pub fn filter_pipeline(
    codecs: &ChunkCodecs,
    data: &Bytes,
    decoded_size: usize,
) -> Result<Bytes, ExplorerError> {
    let mut data = if let Some(compression) = codecs.compression {
        compression::decompress(compression, data, decoded_size)?
    } else {
        data.clone()
    };
    for filter in codecs.filters.iter().rev() {
        data = filters::decode(filter, &data);
    }
    Ok(aligned(data))
}

/// Returns the data in a buffer aligned to [CHUNK_ALIGNMENT], copying only if necessary.
fn aligned(data: Bytes) -> Bytes {
    if data.as_ptr().align_offset(CHUNK_ALIGNMENT) == 0 {
        return data;
    }
    let mut buf = maligned::align_first::<u8, maligned::A8>(data.len());
    buf.extend_from_slice(&data);
    buf.into()
}
