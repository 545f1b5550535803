//! Error handling.

use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_smithy_types::byte_stream::error::Error as ByteStreamError;
use ndarray::ShapeError;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::AcquireError;
use tracing::{event, Level};
use zune_inflate::errors::InflateDecodeErrors;

/// Ensemble explorer error type
///
/// This type encapsulates the various errors that may occur while loading a dataset, composing a
/// computation, materialising it or rendering the result.
#[derive(Debug, Error)]
pub enum ExplorerError {
    /// Error reading a catalog document
    #[error("catalog document is not valid")]
    Catalog(#[from] serde_yaml::Error),

    /// Catalog has no entry with the requested name
    #[error("catalog has no entry named {entry}")]
    CatalogEntryNotFound { entry: String },

    /// Error using the decoded chunk cache
    #[error("chunk cache error {error}")]
    CacheError { error: String },

    /// A configuration option has an invalid value
    #[error("invalid value for {option}: {reason}")]
    Config { option: &'static str, reason: String },

    /// Operands disagree on the coordinates of a shared dimension
    #[error("coordinates of dimension {dimension} do not match between operands")]
    CoordinateMismatch { dimension: String },

    /// Error decompressing data
    #[error("failed to decompress data")]
    DecompressionFlate2(#[source] std::io::Error),

    /// Error decompressing data
    #[error("failed to decompress data")]
    DecompressionZune(#[from] InflateDecodeErrors),

    /// Attempt to perform an invalid operation on an empty array
    #[error("cannot perform {operation} on empty array")]
    EmptyArray { operation: &'static str },

    /// A coordinate selection matched no coordinate values
    #[error("selection {selector} matched no values of dimension {dimension}")]
    EmptySelection { dimension: String, selector: String },

    /// Error converting from bytes to a type
    #[error("failed to convert from bytes to {type_name}")]
    FromBytes { type_name: &'static str },

    /// Insufficient memory to materialise a result
    #[error("Insufficient memory to process request ({requested} > {total})")]
    InsufficientMemory { requested: usize, total: usize },

    /// Resampling frequency could not be parsed
    #[error("invalid resampling frequency {frequency}")]
    InvalidFrequency { frequency: String },

    /// Dataset location could not be parsed
    #[error("invalid dataset location {location}")]
    InvalidLocation { location: String },

    /// CF time units could not be parsed
    #[error("invalid time units {units}")]
    InvalidTimeUnits { units: String },

    /// Error reading or writing a local file
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error deserialising Zarr metadata
    #[error("metadata is not valid JSON")]
    MetadataJson(#[from] serde_json::Error),

    /// Error validating Zarr metadata (single error)
    #[error("metadata is not valid")]
    MetadataValidationSingle(#[from] validator::ValidationError),

    /// Error validating Zarr metadata (multiple errors)
    #[error("metadata is not valid")]
    MetadataValidation(#[from] validator::ValidationErrors),

    /// A label operation on a dimension without label coordinates
    #[error("dimension {dimension} does not have label coordinates")]
    NotALabelDimension { dimension: String },

    /// The operation requires a time coordinate
    #[error("dimension {dimension} does not have a time coordinate")]
    NotATimeDimension { dimension: String },

    /// Error plotting an array
    #[error("cannot render {plot}: {reason}")]
    Render { plot: &'static str, reason: String },

    /// Transient failures persisted after all retries
    #[error("materialisation failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<ExplorerError>,
    },

    /// Error reading object data from S3
    #[error("error receiving object from S3 storage")]
    S3ByteStream(#[from] ByteStreamError),

    /// Missing Content-Length header in S3 response.
    #[error("S3 response missing Content-Length header")]
    S3ContentLengthMissing,

    /// Error while retrieving an object from S3
    #[error("error retrieving object from S3 storage")]
    S3GetObject(#[from] SdkError<GetObjectError>),

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// Error creating ndarray array from shape
    #[error("failed to create array from shape")]
    ShapeInvalid(#[from] ShapeError),

    /// Error reading an object from a store other than S3
    #[error("error reading {key} from object store")]
    StoreRead {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// Unknown dimension name
    #[error("unknown dimension {dimension} (available: {available:?})")]
    UnknownDimension {
        dimension: String,
        available: Vec<String>,
    },

    /// Unknown coordinate label
    #[error("label {label} is not part of the requested order for dimension {dimension}")]
    UnknownLabel { dimension: String, label: String },

    /// Unknown variable name
    #[error("unknown variable {variable}")]
    UnknownVariable { variable: String },

    /// The store does not contain a recognisable Zarr hierarchy
    #[error("unrecognised format at {key}: {reason}")]
    UnrecognisedFormat { key: String, reason: String },

    /// Unsupported calendar in CF time attributes
    #[error("unsupported calendar {calendar}")]
    UnsupportedCalendar { calendar: String },

    /// Unsupported Zarr compressor or filter
    #[error("unsupported codec {codec}")]
    UnsupportedCodec { codec: String },

    /// Unsupported Zarr data type
    #[error("unsupported data type {dtype}")]
    UnsupportedDType { dtype: String },

    /// A worker task panicked or was cancelled
    #[error("worker task failed")]
    WorkerFailed(#[from] tokio::task::JoinError),

    /// A kernel panicked on the rayon pool
    #[error("worker panicked: {reason}")]
    WorkerPanicked { reason: String },
}

impl ExplorerError {
    /// Returns whether the error is transient, and therefore whether retrying the operation that
    /// produced it may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ExplorerError::S3ByteStream(_)
            | ExplorerError::StoreRead { .. }
            | ExplorerError::WorkerFailed(_)
            | ExplorerError::WorkerPanicked { .. } => true,

            ExplorerError::S3GetObject(sdk_error) => match sdk_error {
                SdkError::DispatchFailure(_)
                | SdkError::ResponseError(_)
                | SdkError::TimeoutError(_) => true,
                SdkError::ServiceError(get_obj_error) => matches!(
                    get_obj_error.err().code(),
                    Some("InternalError") | Some("ServiceUnavailable") | Some("SlowDown")
                ),
                // Includes construction failures. The enum is marked as non-exhaustive.
                _ => false,
            },

            _ => false,
        }
    }

    /// Returns whether the error is an S3 "no such key" response.
    ///
    /// Zarr stores omit chunks that contain only the fill value, so a missing key is not an error
    /// for chunk reads.
    pub fn is_not_found(&self) -> bool {
        match self {
            ExplorerError::S3GetObject(sdk_error) => sdk_error
                .as_service_error()
                .map(|err| err.is_no_such_key())
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Crate result type.
pub type Result<T> = std::result::Result<T, ExplorerError>;

/// A printable report of an error and its chain of causes.
#[derive(Debug, PartialEq)]
pub struct ErrorReport {
    /// Main error message
    pub message: String,

    /// Optional list of causes
    pub caused_by: Option<Vec<String>>,
}

impl ErrorReport {
    /// Return a new ErrorReport
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    pub fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorReport { message, caused_by }
    }

    /// Log the report at error level, one event per cause.
    pub fn log(&self, context: &str) {
        event!(Level::ERROR, "{}: {}", context, self.message);
        for cause in self.caused_by.iter().flatten() {
            event!(Level::ERROR, "Caused by: {}", cause);
        }
    }
}

impl From<&ExplorerError> for ErrorReport {
    fn from(error: &ExplorerError) -> Self {
        ErrorReport::new(error)
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for cause in self.caused_by.iter().flatten() {
            write!(f, "\n  caused by: {}", cause)?;
        }
        Ok(())
    }
}
