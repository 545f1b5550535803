//! Zarr-backed datasets of named, dimensioned variables.

use crate::array::ChunkDecoder;
use crate::chunk_store::ChunkStore;
use crate::coords::{decode_cf_time, Coordinate, Dimension};
use crate::error::ExplorerError;
use crate::lazy::LazyArray;
use crate::metadata::{
    ArrayMetadata, Attributes, ConsolidatedMetadata, DimensionSeparator, GroupMetadata,
    ARRAY_METADATA_KEY, ATTRIBUTES_KEY, CONSOLIDATED_METADATA_KEY, GROUP_METADATA_KEY,
};

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use validator::Validate;

/// Joins a key onto a store prefix.
pub fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix, key)
    }
}

/// One array of a dataset and everything needed to read its chunks.
#[derive(Debug)]
pub struct Variable {
    /// Name of the variable
    pub name: String,
    /// Dimension names, one per axis
    pub dims: Vec<String>,
    /// Shape of the whole array
    pub shape: Vec<usize>,
    /// CF attributes
    pub attributes: Attributes,
    decoder: ChunkDecoder,
    key_prefix: String,
    separator: DimensionSeparator,
}

impl Variable {
    /// Returns a new Variable.
    ///
    /// # Arguments
    ///
    /// * `prefix`: Key prefix of the hierarchy
    /// * `name`: Name of the array within the hierarchy
    /// * `metadata`: Validated `.zarray` document
    /// * `attributes`: `.zattrs` document
    pub fn new(
        prefix: &str,
        name: &str,
        metadata: &ArrayMetadata,
        attributes: Attributes,
    ) -> Result<Self, ExplorerError> {
        let key_prefix = join_key(prefix, name);
        let attributes_key = join_key(&key_prefix, ATTRIBUTES_KEY);
        let dims = attributes
            .dimensions()
            .ok_or_else(|| ExplorerError::UnrecognisedFormat {
                key: attributes_key.clone(),
                reason: "missing _ARRAY_DIMENSIONS".to_string(),
            })?;
        if dims.len() != metadata.shape.len() {
            return Err(ExplorerError::UnrecognisedFormat {
                key: attributes_key,
                reason: format!(
                    "{} dimension names for an array of rank {}",
                    dims.len(),
                    metadata.shape.len()
                ),
            });
        }
        let decoder = ChunkDecoder::new(metadata, &attributes)?;
        Ok(Self {
            name: name.to_string(),
            dims,
            shape: metadata.shape.clone(),
            attributes,
            decoder,
            key_prefix,
            separator: metadata.dimension_separator,
        })
    }

    /// Returns the object key of a chunk.
    pub fn chunk_key(&self, index: &[usize]) -> String {
        let index = if index.is_empty() {
            // Zero-dimensional arrays have a single chunk.
            "0".to_string()
        } else {
            index
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(self.separator.as_str())
        };
        join_key(&self.key_prefix, &index)
    }

    pub fn decoder(&self) -> &ChunkDecoder {
        &self.decoder
    }

    /// Returns whether this is a coordinate variable: one dimensional and named after its
    /// dimension.
    pub fn is_coordinate(&self) -> bool {
        self.dims.len() == 1 && self.dims[0] == self.name
    }
}

/// An immutable collection of variables sharing named dimensions.
///
/// Coordinates are read when the dataset is opened; data variables are only read when a
/// computation over them is materialised.
#[derive(Debug)]
pub struct Dataset {
    location: String,
    variables: BTreeMap<String, Arc<Variable>>,
    coords: BTreeMap<String, Coordinate>,
    attributes: Attributes,
}

impl Dataset {
    /// Opens a hierarchy with consolidated metadata.
    ///
    /// Falls back to `.zgroup` if there is no `.zmetadata`, in which case the hierarchy's
    /// variables cannot be listed and [Dataset::open_variables] must be used instead.
    pub async fn open(chunk_store: &Arc<ChunkStore>, prefix: &str) -> Result<Self, ExplorerError> {
        Self::open_impl(chunk_store, prefix, None).await
    }

    /// Opens the named variables of a hierarchy, using consolidated metadata if present.
    pub async fn open_variables(
        chunk_store: &Arc<ChunkStore>,
        prefix: &str,
        names: &[&str],
    ) -> Result<Self, ExplorerError> {
        Self::open_impl(chunk_store, prefix, Some(names)).await
    }

    #[tracing::instrument(skip(chunk_store), fields(store = %chunk_store.describe()))]
    async fn open_impl(
        chunk_store: &Arc<ChunkStore>,
        prefix: &str,
        names: Option<&[&str]>,
    ) -> Result<Self, ExplorerError> {
        let consolidated_key = join_key(prefix, CONSOLIDATED_METADATA_KEY);
        let consolidated: Option<ConsolidatedMetadata> =
            chunk_store.get_json(&consolidated_key).await?;
        let (attributes, arrays) = match consolidated {
            Some(consolidated) => {
                tracing::debug!("Reading consolidated metadata from {}", consolidated_key);
                read_consolidated(&consolidated, &consolidated_key, names)?
            }
            None => read_unconsolidated(chunk_store, prefix, names).await?,
        };

        let mut variables = BTreeMap::new();
        for (name, metadata, attributes) in arrays {
            let variable = Variable::new(prefix, &name, &metadata, attributes)?;
            variables.insert(name, Arc::new(variable));
        }

        // Every dimension must have a single size across all variables.
        let mut sizes: BTreeMap<String, usize> = BTreeMap::new();
        for variable in variables.values() {
            for (dim, size) in variable.dims.iter().zip(&variable.shape) {
                match sizes.get(dim) {
                    Some(existing) if existing != size => {
                        return Err(ExplorerError::UnrecognisedFormat {
                            key: join_key(prefix, &variable.name),
                            reason: format!(
                                "dimension {} has size {} but {} elsewhere",
                                dim, size, existing
                            ),
                        });
                    }
                    _ => {
                        sizes.insert(dim.clone(), *size);
                    }
                }
            }
        }

        let mut coords = BTreeMap::new();
        for (dim, size) in &sizes {
            let coord = match variables.get(dim).filter(|v| v.is_coordinate()) {
                Some(variable) => read_coordinate(chunk_store, variable).await?,
                None => Coordinate::index(*size),
            };
            coords.insert(dim.clone(), coord);
        }

        let location = match prefix.trim_matches('/') {
            "" => chunk_store.describe(),
            prefix => format!("{}/{}", chunk_store.describe(), prefix),
        };
        let dataset = Self {
            location,
            variables,
            coords,
            attributes,
        };
        tracing::info!("Opened dataset {}", dataset.location);
        Ok(dataset)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Returns the names of the data variables, i.e. those that are not coordinates.
    pub fn data_variables(&self) -> Vec<&str> {
        self.variables
            .values()
            .filter(|variable| !variable.is_coordinate())
            .map(|variable| variable.name.as_str())
            .collect()
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Returns dimension names and sizes.
    pub fn dims(&self) -> Vec<(&str, usize)> {
        self.coords
            .iter()
            .map(|(name, coord)| (name.as_str(), coord.len()))
            .collect()
    }

    /// Returns the coordinate of a dimension.
    pub fn coord(&self, dim: &str) -> Result<&Coordinate, ExplorerError> {
        self.coords
            .get(dim)
            .ok_or_else(|| ExplorerError::UnknownDimension {
                dimension: dim.to_string(),
                available: self.coords.keys().cloned().collect(),
            })
    }

    /// Returns a lazy array over a whole variable. No data is read.
    pub fn variable(&self, name: &str) -> Result<LazyArray, ExplorerError> {
        let variable = self
            .variables
            .get(name)
            .ok_or_else(|| ExplorerError::UnknownVariable {
                variable: name.to_string(),
            })?;
        let dims = variable
            .dims
            .iter()
            .map(|dim| Ok(Dimension::new(dim.clone(), self.coord(dim)?.clone())))
            .collect::<Result<Vec<_>, ExplorerError>>()?;
        Ok(LazyArray::source(variable.clone(), dims))
    }
}

impl Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Dataset {}", self.location)?;
        writeln!(f, "Dimensions:")?;
        for (name, size) in self.dims() {
            writeln!(f, "  {}: {}", name, size)?;
        }
        writeln!(f, "Data variables:")?;
        for variable in self.variables.values().filter(|v| !v.is_coordinate()) {
            write!(f, "  {} ({})", variable.name, variable.dims.join(", "))?;
            match variable.attributes.units() {
                Some(units) => writeln!(f, " [{}]", units)?,
                None => writeln!(f)?,
            }
        }
        Ok(())
    }
}

type ArrayDocuments = (String, ArrayMetadata, Attributes);

fn read_consolidated(
    consolidated: &ConsolidatedMetadata,
    key: &str,
    names: Option<&[&str]>,
) -> Result<(Attributes, Vec<ArrayDocuments>), ExplorerError> {
    let group: GroupMetadata =
        consolidated
            .document(GROUP_METADATA_KEY)?
            .ok_or_else(|| ExplorerError::UnrecognisedFormat {
                key: key.to_string(),
                reason: "no root group".to_string(),
            })?;
    group.validate()?;
    let attributes: Attributes = consolidated.document(ATTRIBUTES_KEY)?.unwrap_or_default();
    let listed = names.is_none();
    let names = match names {
        Some(names) => names.iter().map(|name| name.to_string()).collect(),
        None => consolidated.array_names(),
    };
    let mut arrays = vec![];
    for name in names {
        let metadata: ArrayMetadata = consolidated
            .document(&join_key(&name, ARRAY_METADATA_KEY))?
            .ok_or_else(|| ExplorerError::UnknownVariable {
                variable: name.clone(),
            })?;
        metadata.validate()?;
        let attributes: Attributes = consolidated
            .document(&join_key(&name, ATTRIBUTES_KEY))?
            .unwrap_or_default();
        arrays.push((name, metadata, attributes));
    }
    if !listed {
        for name in coordinate_names(&arrays) {
            let Some(metadata) =
                consolidated.document::<ArrayMetadata>(&join_key(&name, ARRAY_METADATA_KEY))?
            else {
                continue;
            };
            metadata.validate()?;
            let attributes: Attributes = consolidated
                .document(&join_key(&name, ATTRIBUTES_KEY))?
                .unwrap_or_default();
            arrays.push((name, metadata, attributes));
        }
    }
    Ok((attributes, arrays))
}

async fn read_unconsolidated(
    chunk_store: &ChunkStore,
    prefix: &str,
    names: Option<&[&str]>,
) -> Result<(Attributes, Vec<ArrayDocuments>), ExplorerError> {
    let group_key = join_key(prefix, GROUP_METADATA_KEY);
    let group: GroupMetadata =
        chunk_store
            .get_json(&group_key)
            .await?
            .ok_or_else(|| ExplorerError::UnrecognisedFormat {
                key: group_key.clone(),
                reason: "no Zarr group found".to_string(),
            })?;
    group.validate()?;
    let names = names.ok_or_else(|| ExplorerError::UnrecognisedFormat {
        key: group_key.clone(),
        reason: "metadata is not consolidated and no variables were named".to_string(),
    })?;
    let attributes: Attributes = chunk_store
        .get_json(&join_key(prefix, ATTRIBUTES_KEY))
        .await?
        .unwrap_or_default();
    let mut arrays = vec![];
    for name in names {
        let array_prefix = join_key(prefix, name);
        let metadata: ArrayMetadata = chunk_store
            .get_json(&join_key(&array_prefix, ARRAY_METADATA_KEY))
            .await?
            .ok_or_else(|| ExplorerError::UnknownVariable {
                variable: name.to_string(),
            })?;
        metadata.validate()?;
        let attributes: Attributes = chunk_store
            .get_json(&join_key(&array_prefix, ATTRIBUTES_KEY))
            .await?
            .unwrap_or_default();
        arrays.push((name.to_string(), metadata, attributes));
    }
    for name in coordinate_names(&arrays) {
        let array_prefix = join_key(prefix, &name);
        let Some(metadata) = chunk_store
            .get_json::<ArrayMetadata>(&join_key(&array_prefix, ARRAY_METADATA_KEY))
            .await?
        else {
            continue;
        };
        metadata.validate()?;
        let attributes: Attributes = chunk_store
            .get_json(&join_key(&array_prefix, ATTRIBUTES_KEY))
            .await?
            .unwrap_or_default();
        arrays.push((name, metadata, attributes));
    }
    Ok((attributes, arrays))
}

/// Returns the dimensions of named arrays that are not themselves among the arrays. These are
/// read as coordinates where present.
fn coordinate_names(arrays: &[ArrayDocuments]) -> Vec<String> {
    let mut names: Vec<String> = arrays
        .iter()
        .flat_map(|(_, _, attributes)| attributes.dimensions().unwrap_or_default())
        .filter(|dim| !arrays.iter().any(|(name, _, _)| name == dim))
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Reads and decodes a coordinate variable.
async fn read_coordinate(
    chunk_store: &Arc<ChunkStore>,
    variable: &Arc<Variable>,
) -> Result<Coordinate, ExplorerError> {
    let values = chunk_store
        .read_region(variable, &[0..variable.shape[0]])
        .await?;
    let values: Vec<f64> = values.iter().copied().collect();
    match variable.attributes.units() {
        Some(units) if units.contains(" since ") => {
            let times = decode_cf_time(&values, units, variable.attributes.calendar())?;
            Ok(Coordinate::Time(times))
        }
        _ => Ok(Coordinate::Numeric(values)),
    }
}
