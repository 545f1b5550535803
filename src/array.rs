//! Functions and utilities for turning stored chunks into [ndarray] objects.

use crate::error::ExplorerError;
use crate::filter_pipeline::{filter_pipeline, ChunkCodecs};
use crate::metadata::{ArrayMetadata, Attributes, Order};
use crate::types::byte_order::SwapBytes;
use crate::types::missing::mask_missing;
use crate::types::{ByteOrder, DType, DataType, Missing};

use bytes::Bytes;
use ndarray::prelude::*;
use ndarray::ShapeBuilder;
use num_traits::AsPrimitive;

/// Trait for stored array elements.
pub trait Element: Copy + SwapBytes + zerocopy::FromBytes + AsPrimitive<f64> {}

/// Blanket implementation of Element.
impl<T> Element for T where T: Copy + SwapBytes + zerocopy::FromBytes + AsPrimitive<f64> {}

/// Convert from Bytes to `&[T]`.
///
/// Zerocopy provides a mechanism for converting between types.
/// Correct alignment of the data is necessary.
///
/// # Arguments
///
/// * `data`: Bytes containing data to convert.
fn from_bytes<T: zerocopy::FromBytes>(data: &Bytes) -> Result<&[T], ExplorerError> {
    let layout = zerocopy::LayoutVerified::<_, [T]>::new_slice(&data[..]).ok_or(
        ExplorerError::FromBytes {
            type_name: std::any::type_name::<T>(),
        },
    )?;
    Ok(layout.into_slice())
}

/// Converts stored elements of type `T` to `f64`, swapping bytes if required.
fn to_f64s<T: Element>(data: &Bytes, byte_order: ByteOrder) -> Result<Vec<f64>, ExplorerError> {
    let values = from_bytes::<T>(data)?;
    let result = if byte_order.needs_swap() {
        values.iter().map(|value| value.swap_bytes().as_()).collect()
    } else {
        values.iter().map(|value| value.as_()).collect()
    };
    Ok(result)
}

/// Converts decoded chunk bytes to `f64` values according to the Zarr `dtype`.
///
/// # Arguments
///
/// * `dtype`: Data type of the stored elements
/// * `data`: Decoded chunk data, 8 byte aligned
pub fn decode_values(dtype: DataType, data: &Bytes) -> Result<Vec<f64>, ExplorerError> {
    let order = dtype.byte_order;
    match dtype.dtype {
        DType::Int8 => to_f64s::<i8>(data, order),
        DType::Uint8 => to_f64s::<u8>(data, order),
        DType::Int16 => to_f64s::<i16>(data, order),
        DType::Uint16 => to_f64s::<u16>(data, order),
        DType::Int32 => to_f64s::<i32>(data, order),
        DType::Uint32 => to_f64s::<u32>(data, order),
        DType::Int64 => to_f64s::<i64>(data, order),
        DType::Uint64 => to_f64s::<u64>(data, order),
        DType::Float32 => to_f64s::<f32>(data, order),
        DType::Float64 => to_f64s::<f64>(data, order),
    }
}

/// Everything needed to turn the stored bytes of one chunk into masked, unpacked `f64` values.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkDecoder {
    dtype: DataType,
    order: Order,
    chunk_shape: Vec<usize>,
    chunk_len: usize,
    codecs: ChunkCodecs,
    fill_value: f64,
    missing: Vec<Missing<f64>>,
    scale_factor: Option<f64>,
    add_offset: Option<f64>,
}

impl ChunkDecoder {
    /// Returns a decoder for the chunks of an array.
    ///
    /// The Zarr `fill_value` doubles as the missing value marker unless the attributes carry an
    /// explicit `_FillValue`, matching the way xarray writes Zarr stores.
    pub fn new(metadata: &ArrayMetadata, attributes: &Attributes) -> Result<Self, ExplorerError> {
        let codecs = metadata.codecs()?;
        let fill_value = metadata
            .fill_value
            .as_ref()
            .and_then(|fill_value| fill_value.as_f64())
            .unwrap_or(f64::NAN);
        let mut missing = attributes.missing();
        if attributes.get_f64("_FillValue").is_none() && !fill_value.is_nan() {
            missing.push(Missing::MissingValue(fill_value));
        }
        Ok(ChunkDecoder {
            dtype: metadata.dtype,
            order: metadata.order,
            chunk_shape: metadata.chunks.clone(),
            chunk_len: metadata.chunk_len(),
            codecs,
            fill_value,
            missing,
            scale_factor: attributes.scale_factor(),
            add_offset: attributes.add_offset(),
        })
    }

    pub fn chunk_shape(&self) -> &[usize] {
        &self.chunk_shape
    }

    /// Returns the size of a decoded chunk in bytes, before conversion to `f64`.
    pub fn decoded_size(&self) -> usize {
        self.chunk_len * self.dtype.size_of()
    }

    /// Decodes the stored bytes of one chunk.
    pub fn decode(&self, data: &Bytes) -> Result<ArrayD<f64>, ExplorerError> {
        let data = filter_pipeline(&self.codecs, data, self.decoded_size())?;
        let mut values = decode_values(self.dtype, &data)?;
        self.unpack(&mut values);
        self.build(values)
    }

    /// Returns the chunk that an absent object stands for.
    pub fn fill(&self) -> Result<ArrayD<f64>, ExplorerError> {
        let mut values = vec![self.fill_value; self.chunk_len];
        self.unpack(&mut values);
        self.build(values)
    }

    /// Masks missing values, then applies CF packing attributes.
    fn unpack(&self, values: &mut [f64]) {
        mask_missing(values, &self.missing);
        let scale_factor = self.scale_factor.unwrap_or(1.0);
        let add_offset = self.add_offset.unwrap_or(0.0);
        if scale_factor != 1.0 || add_offset != 0.0 {
            values
                .iter_mut()
                .for_each(|value| *value = *value * scale_factor + add_offset);
        }
    }

    fn build(&self, values: Vec<f64>) -> Result<ArrayD<f64>, ExplorerError> {
        let shape = self.chunk_shape.clone();
        let array = match self.order {
            Order::C => ArrayD::from_shape_vec(shape, values)?,
            Order::F => ArrayD::from_shape_vec(shape.f(), values)?,
        };
        Ok(array)
    }
}
