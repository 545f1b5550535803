//! Zarr v2 metadata documents and CF attributes.

use crate::compression::Compression;
use crate::error::ExplorerError;
use crate::filter_pipeline::ChunkCodecs;
use crate::filters::Filter;
use crate::types::{DataType, Missing};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use validator::{Validate, ValidationError};

/// Name of the consolidated metadata document at the root of a hierarchy.
pub const CONSOLIDATED_METADATA_KEY: &str = ".zmetadata";
/// Name of the group metadata document.
pub const GROUP_METADATA_KEY: &str = ".zgroup";
/// Name of the array metadata document.
pub const ARRAY_METADATA_KEY: &str = ".zarray";
/// Name of the attributes document.
pub const ATTRIBUTES_KEY: &str = ".zattrs";

/// Array ordering
///
/// Defines the memory layout of each chunk.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub enum Order {
    /// Row-major (C) ordering
    C,
    /// Column-major (Fortran) ordering
    F,
}

/// Separator between chunk indices in chunk keys.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
pub enum DimensionSeparator {
    #[default]
    #[serde(rename = ".")]
    Dot,
    #[serde(rename = "/")]
    Slash,
}

impl DimensionSeparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionSeparator::Dot => ".",
            DimensionSeparator::Slash => "/",
        }
    }
}

/// A `fill_value` entry. Zarr encodes non-finite floats as strings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FillValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl FillValue {
    /// Returns the fill value as a float, or `None` if it has no numeric meaning.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FillValue::Number(value) => Some(*value),
            FillValue::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            FillValue::Text(text) => match text.as_str() {
                "NaN" => Some(f64::NAN),
                "Infinity" => Some(f64::INFINITY),
                "-Infinity" => Some(f64::NEG_INFINITY),
                _ => None,
            },
        }
    }
}

/// A numcodecs codec configuration, e.g. `{"id": "zlib", "level": 1}`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CodecConfig {
    pub id: String,
    #[serde(flatten)]
    pub configuration: Map<String, Value>,
}

impl CodecConfig {
    fn unsupported(&self) -> ExplorerError {
        ExplorerError::UnsupportedCodec {
            codec: self.id.clone(),
        }
    }

    /// Returns the compression algorithm described by this codec.
    pub fn compression(&self) -> Result<Compression, ExplorerError> {
        match self.id.as_str() {
            "gzip" => Ok(Compression::Gzip),
            "zlib" => Ok(Compression::Zlib),
            _ => Err(self.unsupported()),
        }
    }

    /// Returns the filter described by this codec.
    pub fn filter(&self) -> Result<Filter, ExplorerError> {
        match self.id.as_str() {
            "shuffle" => {
                let element_size = self
                    .configuration
                    .get("elementsize")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| self.unsupported())?;
                Ok(Filter::Shuffle {
                    element_size: element_size.try_into()?,
                })
            }
            _ => Err(self.unsupported()),
        }
    }
}

/// Contents of a `.zarray` document.
#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
#[validate(schema(function = "validate_array_metadata"))]
pub struct ArrayMetadata {
    /// Zarr format version
    #[validate(range(min = 2, max = 2, message = "zarr_format must be 2"))]
    pub zarr_format: u8,
    /// Shape of the array
    pub shape: Vec<usize>,
    /// Shape of each chunk
    #[validate(custom = "validate_chunks")]
    pub chunks: Vec<usize>,
    /// Data type
    pub dtype: DataType,
    /// Optional compressor
    pub compressor: Option<CodecConfig>,
    /// Value of uninitialised chunks
    #[serde(default)]
    pub fill_value: Option<FillValue>,
    /// Chunk memory layout
    pub order: Order,
    /// Optional filters applied before compression
    pub filters: Option<Vec<CodecConfig>>,
    /// Separator of chunk indices in keys
    #[serde(default)]
    pub dimension_separator: DimensionSeparator,
}

impl ArrayMetadata {
    /// Returns the codecs needed to decode a chunk of this array.
    pub fn codecs(&self) -> Result<ChunkCodecs, ExplorerError> {
        let compression = self
            .compressor
            .as_ref()
            .map(CodecConfig::compression)
            .transpose()?;
        let filters = self
            .filters
            .iter()
            .flatten()
            .map(CodecConfig::filter)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ChunkCodecs {
            compression,
            filters,
        })
    }

    /// Returns the number of elements in each chunk.
    pub fn chunk_len(&self) -> usize {
        self.chunks.iter().product()
    }
}

/// Validate chunk sizes
fn validate_chunks(chunks: &[usize]) -> Result<(), ValidationError> {
    if chunks.iter().any(|size| *size == 0) {
        return Err(ValidationError::new("chunk sizes must be greater than 0"));
    }
    Ok(())
}

/// Validate that the chunk and array ranks agree
fn validate_array_metadata(metadata: &ArrayMetadata) -> Result<(), ValidationError> {
    if metadata.shape.len() != metadata.chunks.len() {
        let mut error = ValidationError::new("Shape and chunks must have the same length");
        error.add_param("shape".into(), &metadata.shape.len());
        error.add_param("chunks".into(), &metadata.chunks.len());
        return Err(error);
    }
    Ok(())
}

/// Contents of a `.zgroup` document.
#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
pub struct GroupMetadata {
    #[validate(range(min = 2, max = 2, message = "zarr_format must be 2"))]
    pub zarr_format: u8,
}

/// Contents of a `.zattrs` document.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Attributes(pub Map<String, Value>);

impl Attributes {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Returns a numeric attribute, accepting the string encodings of non-finite values.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(value_as_f64)
    }

    /// Returns a numeric attribute that may be a scalar or a list.
    pub fn get_f64s(&self, key: &str) -> Option<Vec<f64>> {
        match self.0.get(key)? {
            Value::Array(values) => values.iter().map(value_as_f64).collect(),
            value => value_as_f64(value).map(|value| vec![value]),
        }
    }

    /// Dimension names written by xarray.
    pub fn dimensions(&self) -> Option<Vec<String>> {
        match self.0.get("_ARRAY_DIMENSIONS")? {
            Value::Array(names) => names
                .iter()
                .map(|name| name.as_str().map(str::to_string))
                .collect(),
            _ => None,
        }
    }

    pub fn units(&self) -> Option<&str> {
        self.get_str("units")
    }

    pub fn calendar(&self) -> Option<&str> {
        self.get_str("calendar")
    }

    pub fn long_name(&self) -> Option<&str> {
        self.get_str("long_name")
    }

    pub fn scale_factor(&self) -> Option<f64> {
        self.get_f64("scale_factor")
    }

    pub fn add_offset(&self) -> Option<f64> {
        self.get_f64("add_offset")
    }

    /// Returns the CF missing data descriptors of a variable.
    pub fn missing(&self) -> Vec<Missing<f64>> {
        let mut missing = vec![];
        if let Some(fill_value) = self.get_f64("_FillValue") {
            missing.push(Missing::MissingValue(fill_value));
        }
        match self.get_f64s("missing_value").as_deref() {
            Some([value]) => missing.push(Missing::MissingValue(*value)),
            Some(values) if !values.is_empty() => {
                missing.push(Missing::MissingValues(values.to_vec()))
            }
            _ => (),
        }
        if let Some([min, max]) = self.get_f64s("valid_range").as_deref() {
            missing.extend(Missing::valid_range(*min, *max));
        } else {
            missing.extend(self.get_f64("valid_min").map(Missing::ValidMin));
            missing.extend(self.get_f64("valid_max").map(Missing::ValidMax));
        }
        missing
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => FillValue::Text(text.clone()).as_f64(),
        _ => None,
    }
}

/// Contents of a `.zmetadata` document.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ConsolidatedMetadata {
    pub metadata: Map<String, Value>,
    pub zarr_consolidated_format: u8,
}

impl ConsolidatedMetadata {
    /// Returns the names of the arrays directly below the root group.
    pub fn array_names(&self) -> Vec<String> {
        self.metadata
            .keys()
            .filter_map(|key| key.strip_suffix(&format!("/{}", ARRAY_METADATA_KEY)))
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect()
    }

    /// Returns a metadata document by key, if present.
    pub fn document<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ExplorerError> {
        self.metadata
            .get(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(ExplorerError::from)
    }
}

/// Parses and validates an `.zarray` document.
pub fn parse_array_metadata(data: &[u8]) -> Result<ArrayMetadata, ExplorerError> {
    let metadata: ArrayMetadata = serde_json::from_slice(data)?;
    metadata.validate()?;
    Ok(metadata)
}
