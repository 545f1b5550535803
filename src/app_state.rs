use crate::catalog::{Catalog, StoreLocation};
use crate::chunk_store::ChunkStore;
use crate::cli::{self, CommandLineArgs};
use crate::error::ExplorerError;
use crate::executor::Executor;
use crate::object_store::{FilesystemStore, ObjectStore};
use crate::render::DirectorySurface;
use crate::resource_manager::ResourceManager;
use crate::s3_client::{S3Client, S3Credentials, S3Store, DEFAULT_REGION};

use std::sync::Arc;
use url::Url;

/// Where and how to read the dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct Source {
    pub location: StoreLocation,
    pub endpoint: Option<Url>,
    pub region: Option<String>,
    pub anonymous: bool,
}

impl Source {
    /// Resolves the dataset source from a location or catalog entry.
    ///
    /// Command line endpoint and region settings take precedence over those of the catalog.
    pub fn resolve(args: &CommandLineArgs) -> Result<Self, ExplorerError> {
        let anonymous = args.access_key.is_none();
        match (&args.location, &args.catalog) {
            (Some(location), _) => Ok(Self {
                location: StoreLocation::parse(location)?,
                endpoint: args.endpoint_url.clone(),
                region: args.region.clone(),
                anonymous,
            }),
            (None, Some(catalog)) => {
                let catalog = Catalog::from_file(&cli::expand_path(catalog)?)?;
                let entry = catalog.entry(&args.catalog_entry)?;
                Ok(Self {
                    location: entry.location()?,
                    endpoint: args.endpoint_url.clone().or_else(|| entry.endpoint().cloned()),
                    region: args
                        .region
                        .clone()
                        .or_else(|| entry.region().map(str::to_string)),
                    anonymous: anonymous || entry.anonymous(),
                })
            }
            (None, None) => Err(ExplorerError::Config {
                option: "location",
                reason: "either a location or a catalog is required".to_string(),
            }),
        }
    }

    /// Returns an object store over the source.
    pub fn store(&self, args: &CommandLineArgs) -> Arc<dyn ObjectStore> {
        match &self.location {
            StoreLocation::S3 { bucket, .. } => {
                let credentials = match (&args.access_key, &args.secret_key) {
                    (Some(access_key), Some(secret_key)) if !self.anonymous => {
                        S3Credentials::access_key(access_key, secret_key)
                    }
                    _ => S3Credentials::Anonymous,
                };
                let region = self.region.as_deref().unwrap_or(DEFAULT_REGION);
                let client = S3Client::new(self.endpoint.as_ref(), region, credentials);
                Arc::new(S3Store::new(client, bucket))
            }
            StoreLocation::Filesystem { root } => Arc::new(FilesystemStore::new(root)),
        }
    }
}

/// Shared application state used by every analysis.
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Resolved dataset source.
    pub source: Source,

    /// Chunk store, holding the resource manager and chunk cache.
    pub chunk_store: Arc<ChunkStore>,

    /// Executor for lazy arrays.
    pub executor: Arc<Executor>,

    /// Destination of the figures.
    pub surface: Arc<DirectorySurface>,
}

impl AppState {
    /// Create and return an [AppState].
    pub fn new(args: &CommandLineArgs) -> Result<Self, ExplorerError> {
        let task_limit = args
            .thread_limit
            .or_else(|| Some(num_cpus::get().saturating_sub(1).max(1)));
        let resource_manager = ResourceManager::new(
            args.connection_limit,
            args.memory_limit_bytes()?,
            task_limit,
        );
        let source = Source::resolve(args)?;
        let chunk_store = Arc::new(ChunkStore::new(
            source.store(args),
            Arc::new(resource_manager),
            args.chunk_cache_size,
        ));
        let executor = Executor::new(chunk_store.clone())
            .with_max_retries(args.max_retries)
            .with_rayon(args.use_rayon);
        let surface = DirectorySurface::new(&args.output_dir()?)?;

        Ok(Self {
            args: args.clone(),
            source,
            chunk_store,
            executor: Arc::new(executor),
            surface: Arc::new(surface),
        })
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;

    fn args(extra: &[&str]) -> CommandLineArgs {
        CommandLineArgs::try_parse_from(
            std::iter::once("ensemble-explorer").chain(extra.iter().copied()),
        )
        .unwrap()
    }

    #[test]
    fn resolve_location() {
        let source = Source::resolve(&args(&[
            "--location",
            "s3://bucket/ensemble.zarr",
            "--region",
            "us-west-2",
        ]))
        .unwrap();
        assert_eq!(
            StoreLocation::S3 {
                bucket: "bucket".to_string(),
                prefix: "ensemble.zarr".to_string()
            },
            source.location
        );
        assert_eq!(Some("us-west-2".to_string()), source.region);
        assert!(source.anonymous);
    }

    #[test]
    fn resolve_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(
            &path,
            r#"
sources:
  ensemble:
    driver: zarr
    args:
      urlpath: s3://bucket/ensemble.zarr
      consolidated: true
      storage_options:
        anon: true
        client_kwargs:
          region_name: us-west-2
"#,
        )
        .unwrap();
        let source = Source::resolve(&args(&["--catalog", path.to_str().unwrap()])).unwrap();
        assert_eq!("ensemble.zarr", source.location.prefix());
        assert_eq!(Some("us-west-2".to_string()), source.region);
        assert!(source.anonymous);

        let err = Source::resolve(&args(&[
            "--catalog",
            path.to_str().unwrap(),
            "--catalog-entry",
            "missing",
        ]))
        .unwrap_err();
        assert!(matches!(err, ExplorerError::CatalogEntryNotFound { .. }));
    }

    #[test]
    fn new_app_state() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("figures");
        let state = AppState::new(&args(&[
            "--location",
            dir.path().to_str().unwrap(),
            "--output-dir",
            output.to_str().unwrap(),
            "--memory-limit",
            "1MiB",
            "--max-retries",
            "5",
        ]))
        .unwrap();
        assert!(output.is_dir());
        assert_eq!(output, state.surface.dir());
        assert_eq!(
            StoreLocation::Filesystem {
                root: dir.path().to_path_buf()
            },
            state.source.location
        );
    }
}
