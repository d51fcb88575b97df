//! Object store configuration for S3 and local filesystem output.
//!
//! Pyramid roots are either a local directory (created on demand) or an
//! `s3://bucket/prefix` URI. Tiles land at `<root>/<z>/<x>/<y>.pbf` next to
//! `<root>/metadata.json`.

use crate::error::{Error, Result};
use crate::index::TileCoordinate;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ClientOptions, ObjectStore, PutPayload, RetryConfig};
use std::sync::Arc;
use std::time::Duration;

/// Key of the pyramid summary relative to the root.
pub const METADATA_KEY: &str = "metadata.json";

/// Parse an S3 URI into bucket and key prefix components.
///
/// Accepts `s3://bucket/key/path` and `s3://bucket` (empty prefix).
///
/// # Errors
/// Returns an error if the scheme or bucket is missing.
pub fn parse_s3_uri(uri: &str) -> Result<(&str, &str)> {
    let without_scheme = uri.strip_prefix("s3://").ok_or_else(|| {
        Error::InvalidArgument(format!("Invalid S3 URI: expected 's3://' prefix in '{uri}'"))
    })?;

    let (bucket, key) = without_scheme.split_once('/').unwrap_or((without_scheme, ""));
    if bucket.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "Invalid S3 URI: expected 's3://bucket[/prefix]' format in '{uri}'"
        )));
    }
    Ok((bucket, key.trim_end_matches('/')))
}

/// Client options for many small concurrent PUTs.
fn create_client_options() -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(Duration::from_secs(5))
        .with_timeout(Duration::from_secs(30))
        .with_pool_idle_timeout(Duration::from_secs(90))
        .with_pool_max_idle_per_host(64)
}

/// Create retry configuration for transient failures.
fn create_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 5,
        backoff: object_store::BackoffConfig {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            base: 2.0,
        },
        retry_timeout: Duration::from_secs(120),
    }
}

/// Create an authenticated S3 client for writing.
///
/// Credentials and region are loaded from (in order):
/// - Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_REGION)
/// - AWS config files (~/.aws/credentials, ~/.aws/config)
/// - EC2 instance profile (IMDS)
fn create_authenticated_store(bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    tracing::info!("Creating authenticated S3 client for bucket: {}", bucket);

    let builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_client_options(create_client_options())
        .with_retry(create_retry_config())
        .with_virtual_hosted_style_request(true);

    Ok(Arc::new(builder.build()?))
}

/// Create the store for a pyramid root and the key prefix inside it.
///
/// Local roots are created if missing and baked into the store, so the
/// returned prefix is empty; S3 roots return the URI key as prefix.
pub fn create_output_store(root: &str) -> Result<(Arc<dyn ObjectStore>, String)> {
    if root.starts_with("s3://") {
        let (bucket, prefix) = parse_s3_uri(root)?;
        return Ok((create_authenticated_store(bucket)?, prefix.to_string()));
    }

    let path = std::path::Path::new(root);
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| {
            Error::Write(format!("Failed to create output root {}: {e}", path.display()))
        })?;
    }
    tracing::info!("Creating LocalFileSystem store at: {}", path.display());
    Ok((Arc::new(LocalFileSystem::new_with_prefix(path)?), String::new()))
}

/// Writes pyramid outputs under one root.
///
/// Tile keys are disjoint, so concurrent writers need no coordination.
#[derive(Clone)]
pub struct TileStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    root: String,
}

impl TileStore {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            root: prefix.clone(),
            store,
            prefix,
        }
    }

    /// Open the store for a local directory or `s3://` root.
    pub fn open(root: &str) -> Result<Self> {
        let (store, prefix) = create_output_store(root)?;
        Ok(Self {
            store,
            prefix,
            root: root.to_string(),
        })
    }

    /// The root this store was opened on.
    pub fn root(&self) -> &str {
        &self.root
    }

    fn path(&self, key: &str) -> Path {
        if self.prefix.is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.prefix, key))
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path(key);
        self.store
            .put(&path, PutPayload::from(bytes))
            .await
            .map_err(|e| Error::Write(format!("Failed to write {path}: {e}")))?;
        Ok(())
    }

    /// Write the serialized `metadata.json`.
    pub async fn write_metadata(&self, json: Vec<u8>) -> Result<()> {
        self.put(METADATA_KEY, json).await
    }

    /// Write one encoded tile at `z/x/y.pbf`.
    pub async fn write_tile(&self, tile: &TileCoordinate, bytes: Vec<u8>) -> Result<()> {
        self.put(&tile.key(), bytes).await
    }
}
