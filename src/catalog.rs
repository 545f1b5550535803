//! Dataset locations and intake-style catalog documents.

use crate::error::ExplorerError;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

/// Where a Zarr hierarchy lives.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreLocation {
    /// A prefix within an S3 bucket
    S3 { bucket: String, prefix: String },
    /// A directory on the local filesystem
    Filesystem { root: PathBuf },
}

impl StoreLocation {
    /// Parses `s3://bucket/prefix`, `file:///path` or a bare filesystem path.
    pub fn parse(location: &str) -> Result<Self, ExplorerError> {
        let invalid = || ExplorerError::InvalidLocation {
            location: location.to_string(),
        };
        if location.is_empty() {
            return Err(invalid());
        }
        if !location.contains("://") {
            return Ok(StoreLocation::Filesystem {
                root: PathBuf::from(location),
            });
        }
        let url = Url::parse(location).map_err(|_| invalid())?;
        match url.scheme() {
            "s3" => {
                let bucket = url.host_str().filter(|b| !b.is_empty()).ok_or_else(invalid)?;
                let prefix = url.path().trim_matches('/');
                Ok(StoreLocation::S3 {
                    bucket: bucket.to_string(),
                    prefix: prefix.to_string(),
                })
            }
            "file" => {
                let root = url.to_file_path().map_err(|_| invalid())?;
                Ok(StoreLocation::Filesystem { root })
            }
            _ => Err(invalid()),
        }
    }

    /// Returns the key prefix of the hierarchy within its store.
    pub fn prefix(&self) -> &str {
        match self {
            StoreLocation::S3 { prefix, .. } => prefix,
            StoreLocation::Filesystem { .. } => "",
        }
    }
}

impl FromStr for StoreLocation {
    type Err = ExplorerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StoreLocation::parse(s)
    }
}

impl std::fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreLocation::S3 { bucket, prefix } => write!(f, "s3://{}/{}", bucket, prefix),
            StoreLocation::Filesystem { root } => write!(f, "{}", root.display()),
        }
    }
}

/// Storage options of a catalog source.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct StorageOptions {
    /// Whether to access the store without credentials
    #[serde(default)]
    pub anon: bool,
    /// Optional custom endpoint, as accepted by s3fs
    pub client_kwargs: Option<ClientKwargs>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ClientKwargs {
    pub endpoint_url: Option<Url>,
    pub region_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SourceArgs {
    pub urlpath: String,
    #[serde(default)]
    pub consolidated: Option<bool>,
    #[serde(default)]
    pub storage_options: StorageOptions,
}

/// One named entry of a catalog.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CatalogSource {
    pub description: Option<String>,
    pub driver: Option<String>,
    pub args: SourceArgs,
}

impl CatalogSource {
    pub fn location(&self) -> Result<StoreLocation, ExplorerError> {
        StoreLocation::parse(&self.args.urlpath)
    }

    pub fn anonymous(&self) -> bool {
        self.args.storage_options.anon
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.args
            .storage_options
            .client_kwargs
            .as_ref()
            .and_then(|kwargs| kwargs.endpoint_url.as_ref())
    }

    pub fn region(&self) -> Option<&str> {
        self.args
            .storage_options
            .client_kwargs
            .as_ref()
            .and_then(|kwargs| kwargs.region_name.as_deref())
    }
}

/// An intake-style YAML catalog.
///
/// ```yaml
/// sources:
///   ensemble:
///     driver: zarr
///     args:
///       urlpath: s3://bucket/ensemble.zarr
///       consolidated: true
///       storage_options:
///         anon: true
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Catalog {
    #[serde(default)]
    pub sources: BTreeMap<String, CatalogSource>,
}

impl Catalog {
    pub fn from_yaml(document: &str) -> Result<Self, ExplorerError> {
        Ok(serde_yaml::from_str(document)?)
    }

    /// Reads a catalog from a file.
    pub fn from_file(path: &Path) -> Result<Self, ExplorerError> {
        let document = std::fs::read_to_string(path).map_err(|source| ExplorerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&document)
    }

    /// Returns the entry with the given name.
    pub fn entry(&self, name: &str) -> Result<&CatalogSource, ExplorerError> {
        self.sources
            .get(name)
            .ok_or_else(|| ExplorerError::CatalogEntryNotFound {
                entry: name.to_string(),
            })
    }
}
