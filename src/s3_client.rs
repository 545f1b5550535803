//! A simplified S3 client that supports downloading objects.
//! It attempts to hide the complexities of working with the AWS SDK for S3.

use std::fmt::Display;

use crate::error::ExplorerError;
use crate::object_store::ObjectStore;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use bytes::Bytes;
use tracing::Instrument;
use url::Url;

/// Default region for buckets when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone, Eq, Hash, PartialEq)]
pub enum S3Credentials {
    AccessKey {
        access_key: String,
        secret_key: String,
    },
    /// Unsigned requests, for public buckets.
    Anonymous,
}

impl S3Credentials {
    /// Create an access key credential.
    pub fn access_key(access_key: &str, secret_key: &str) -> Self {
        S3Credentials::AccessKey {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secrets.
        match self {
            S3Credentials::AccessKey { access_key, .. } => {
                write!(f, "AccessKey({})", access_key)
            }
            S3Credentials::Anonymous => write!(f, "Anonymous"),
        }
    }
}

/// S3 client object.
#[derive(Clone)]
pub struct S3Client {
    /// Underlying AWS SDK S3 client object.
    client: Client,
    /// A unique identifier for the client
    id: String,
}

impl Display for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl std::fmt::Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S3Client({})", self.id)
    }
}

impl S3Client {
    /// Creates an S3Client object
    ///
    /// # Arguments
    ///
    /// * `endpoint`: Optional object storage API URL. AWS endpoints are used when absent.
    /// * `region`: Region of the bucket
    /// * `credentials`: Object storage account credentials
    pub fn new(endpoint: Option<&Url>, region: &str, credentials: S3Credentials) -> Self {
        let builder = aws_sdk_s3::Config::builder().behavior_version(BehaviorVersion::latest());
        let builder = match credentials {
            S3Credentials::AccessKey {
                access_key,
                secret_key,
            } => {
                let credentials = Credentials::from_keys(access_key, secret_key, None);
                builder.credentials_provider(credentials)
            }
            // Without a credentials provider requests are sent unsigned.
            S3Credentials::Anonymous => builder,
        };
        let builder = builder.region(Some(Region::new(region.to_string())));
        let builder = match endpoint {
            Some(url) => builder.endpoint_url(url.to_string()).force_path_style(true),
            None => builder,
        };
        let client = Client::from_conf(builder.build());
        Self {
            client,
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Downloads an object from object storage and returns the data as Bytes.
    ///
    /// Returns `None` if the object does not exist.
    ///
    /// # Arguments
    ///
    /// * `bucket`: Name of the bucket
    /// * `key`: Name of the object in the bucket
    pub async fn download_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<Bytes>, ExplorerError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .instrument(tracing::Span::current())
            .await;
        let mut response = match response {
            Ok(response) => response,
            Err(err) => {
                let err = ExplorerError::from(err);
                if err.is_not_found() {
                    return Ok(None);
                }
                return Err(err);
            }
        };
        // Fail if the content length header is missing.
        let content_length: usize = response
            .content_length()
            .ok_or(ExplorerError::S3ContentLengthMissing)?
            .try_into()?;

        // The data returned by the S3 client does not have any alignment guarantees. Uncompressed
        // chunks are reinterpreted as numbers in place, so copy the body into an 8 byte aligned
        // buffer.
        let mut buf = maligned::align_first::<u8, maligned::A8>(content_length);

        // Iterate over the streaming response, copying data into the aligned Vec<u8>.
        while let Some(bytes) = response
            .body
            .try_next()
            .instrument(tracing::Span::current())
            .await?
        {
            buf.extend_from_slice(&bytes)
        }
        Ok(Some(buf.into()))
    }
}

/// An [ObjectStore] over one S3 bucket.
#[derive(Debug)]
pub struct S3Store {
    client: S3Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: S3Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, ExplorerError> {
        let span = tracing::debug_span!("s3_download", bucket = %self.bucket, key);
        self.client
            .download_object(&self.bucket, key)
            .instrument(span)
            .await
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
