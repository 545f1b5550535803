//! Command Line Interface (CLI) arguments.

use crate::analysis::{Analysis, AnalysisParams};
use crate::error::ExplorerError;
use crate::resample::Frequency;

use byte_unit::Byte;
use chrono::NaiveDate;
use clap::Parser;
use expanduser::expanduser;
use std::path::PathBuf;

/// Ensemble explorer command line interface
#[derive(Clone, Debug, Parser)]
#[command(version, about)]
pub struct CommandLineArgs {
    /// Location of the Zarr hierarchy: s3://bucket/prefix, file:///path or a path
    #[arg(
        long,
        env = "ENSEMBLE_EXPLORER_LOCATION",
        required_unless_present = "catalog"
    )]
    pub location: Option<String>,
    /// Path to an intake catalog describing the dataset
    #[arg(long, env = "ENSEMBLE_EXPLORER_CATALOG", conflicts_with = "location")]
    pub catalog: Option<String>,
    /// Name of the catalog entry to open
    #[arg(long, default_value = "ensemble", env = "ENSEMBLE_EXPLORER_CATALOG_ENTRY")]
    pub catalog_entry: String,
    /// URL of an S3 compatible object store, if not AWS
    #[arg(long, env = "ENSEMBLE_EXPLORER_ENDPOINT_URL")]
    pub endpoint_url: Option<url::Url>,
    /// Region of the S3 bucket
    #[arg(long, env = "ENSEMBLE_EXPLORER_REGION")]
    pub region: Option<String>,
    /// Access key for private buckets. Requests are unsigned when unset.
    #[arg(long, env = "ENSEMBLE_EXPLORER_ACCESS_KEY", requires = "secret_key")]
    pub access_key: Option<String>,
    /// Secret key for private buckets
    #[arg(long, env = "ENSEMBLE_EXPLORER_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,
    /// Directory into which figures are written
    #[arg(
        long,
        default_value = "~/ensemble-explorer",
        env = "ENSEMBLE_EXPLORER_OUTPUT_DIR"
    )]
    pub output_dir: String,
    /// Analyses to run, all of them by default
    #[arg(long, value_enum, value_delimiter = ',', env = "ENSEMBLE_EXPLORER_ANALYSES")]
    pub analyses: Vec<Analysis>,
    /// Day of the ensemble snapshots, as YYYY-MM-DD
    #[arg(long, default_value = "1980-01-01", env = "ENSEMBLE_EXPLORER_DATE")]
    pub date: NaiveDate,
    /// Number of members shown in faceted figures
    #[arg(long, default_value_t = 4, env = "ENSEMBLE_EXPLORER_MEMBERS")]
    pub members: usize,
    /// Maximum number of facet columns
    #[arg(long, default_value_t = 2, env = "ENSEMBLE_EXPLORER_COL_WRAP")]
    pub col_wrap: usize,
    /// Latitude of the centre of the regional time series
    #[arg(
        long,
        default_value_t = 30.2672,
        env = "ENSEMBLE_EXPLORER_LATITUDE",
        allow_hyphen_values = true
    )]
    pub latitude: f64,
    /// Longitude of the centre of the regional time series
    #[arg(
        long,
        default_value_t = -97.7431,
        env = "ENSEMBLE_EXPLORER_LONGITUDE",
        allow_hyphen_values = true
    )]
    pub longitude: f64,
    /// Half width in degrees of the box around the centre
    #[arg(long, default_value_t = 0.25, env = "ENSEMBLE_EXPLORER_BUFFER")]
    pub buffer: f64,
    /// Mean temperature below which precipitation counts as snow
    #[arg(
        long,
        default_value_t = 0.0,
        env = "ENSEMBLE_EXPLORER_SNOW_THRESHOLD",
        allow_hyphen_values = true
    )]
    pub snow_threshold: f64,
    /// Periods over which snowfall is summed, as a pandas offset alias
    #[arg(long, default_value = "QS-DEC", env = "ENSEMBLE_EXPLORER_SNOWFALL_PERIOD")]
    pub snowfall_period: Frequency,
    /// Number of times a materialisation is retried after a transient failure
    #[arg(long, default_value_t = 2, env = "ENSEMBLE_EXPLORER_MAX_RETRIES")]
    pub max_retries: usize,
    /// Maximum number of simultaneous object store requests
    #[arg(long, env = "ENSEMBLE_EXPLORER_CONNECTION_LIMIT")]
    pub connection_limit: Option<usize>,
    /// Memory limit for source data, e.g. 4GiB. Default is no limit.
    #[arg(long, env = "ENSEMBLE_EXPLORER_MEMORY_LIMIT")]
    pub memory_limit: Option<String>,
    /// Maximum number of simultaneous kernels. Default is one fewer than the number of CPUs.
    #[arg(long, env = "ENSEMBLE_EXPLORER_THREAD_LIMIT")]
    pub thread_limit: Option<usize>,
    /// Number of decoded chunks kept in memory. 0 disables the cache.
    #[arg(long, default_value_t = 256, env = "ENSEMBLE_EXPLORER_CHUNK_CACHE_SIZE")]
    pub chunk_cache_size: usize,
    /// Whether to use Rayon for execution of CPU-bound tasks.
    #[arg(long, default_value_t = false, env = "ENSEMBLE_EXPLORER_USE_RAYON")]
    pub use_rayon: bool,
    /// File to which Prometheus metrics are written on exit
    #[arg(long, env = "ENSEMBLE_EXPLORER_METRICS_FILE")]
    pub metrics_file: Option<String>,
    /// Whether to enable sending traces to Jaeger.
    #[arg(long, default_value_t = false, env = "ENSEMBLE_EXPLORER_ENABLE_JAEGER")]
    pub enable_jaeger: bool,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}

/// Expands a leading `~` in a path.
pub fn expand_path(path: &str) -> Result<PathBuf, ExplorerError> {
    expanduser(path).map_err(|source| ExplorerError::Io {
        path: PathBuf::from(path),
        source,
    })
}

impl CommandLineArgs {
    /// Returns the analyses to run.
    pub fn analyses(&self) -> Vec<Analysis> {
        if self.analyses.is_empty() {
            Analysis::ALL.to_vec()
        } else {
            self.analyses.clone()
        }
    }

    /// Returns the analysis parameters.
    pub fn params(&self) -> AnalysisParams {
        AnalysisParams {
            date: self.date,
            members: self.members,
            point: (self.latitude, self.longitude),
            buffer: self.buffer,
            snow_threshold: self.snow_threshold,
            snowfall_period: self.snowfall_period,
            col_wrap: self.col_wrap,
        }
    }

    /// Returns the memory limit in bytes.
    pub fn memory_limit_bytes(&self) -> Result<Option<usize>, ExplorerError> {
        let Some(memory_limit) = &self.memory_limit else {
            return Ok(None);
        };
        let bytes = Byte::parse_str(memory_limit, /* ignore case */ true)
            .map_err(|err| ExplorerError::Config {
                option: "memory-limit",
                reason: err.to_string(),
            })?
            .as_u64();
        Ok(Some(usize::try_from(bytes)?))
    }

    /// Returns the output directory with `~` expanded.
    pub fn output_dir(&self) -> Result<PathBuf, ExplorerError> {
        expand_path(&self.output_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_from(args: &[&str]) -> CommandLineArgs {
        CommandLineArgs::try_parse_from(
            std::iter::once("ensemble-explorer").chain(args.iter().copied()),
        )
        .unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse_from(&["--location", "s3://bucket/ensemble.zarr"]);
        assert_eq!(Analysis::ALL.to_vec(), args.analyses());
        assert_eq!(AnalysisParams::default(), args.params());
        assert_eq!(2, args.max_retries);
        assert_eq!(None, args.memory_limit_bytes().unwrap());
        assert!(!args.use_rayon);
    }

    #[test]
    fn analysis_list_and_params() {
        let args = parse_from(&[
            "--catalog",
            "catalog.yaml",
            "--analyses",
            "elevation,seasonal-snowfall",
            "--date",
            "2001-03-01",
            "--longitude",
            "-105.0",
            "--snowfall-period",
            "QS-MAR",
            "--memory-limit",
            "2 KiB",
        ]);
        assert_eq!(
            vec![Analysis::Elevation, Analysis::SeasonalSnowfall],
            args.analyses()
        );
        let params = args.params();
        assert_eq!(NaiveDate::from_ymd_opt(2001, 3, 1).unwrap(), params.date);
        assert_eq!((30.2672, -105.0), params.point);
        assert_eq!(Frequency::QuarterStart(3), params.snowfall_period);
        assert_eq!(Some(2048), args.memory_limit_bytes().unwrap());
    }

    #[test]
    fn location_or_catalog_required() {
        assert!(CommandLineArgs::try_parse_from(["ensemble-explorer"]).is_err());
        assert!(CommandLineArgs::try_parse_from([
            "ensemble-explorer",
            "--location",
            "a",
            "--catalog",
            "b"
        ])
        .is_err());
    }

    #[test]
    fn invalid_memory_limit() {
        let args = parse_from(&["--location", "data", "--memory-limit", "lots"]);
        assert!(matches!(
            args.memory_limit_bytes().unwrap_err(),
            ExplorerError::Config {
                option: "memory-limit",
                ..
            }
        ));
    }

    #[test]
    fn expand_home() {
        let path = expand_path("/tmp/figures").unwrap();
        assert_eq!(PathBuf::from("/tmp/figures"), path);
    }
}
