//! OpenDAL Operator factory for the backup bucket

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use opendal::Operator;
use serde::Deserialize;

/// Minimal config needed to build an operator
/// (full config lives in backcrypt-core's StorageConfig)
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Build an OpenDAL Operator for the backup bucket on an S3-compatible endpoint
///
/// Uses path-style addressing (default in opendal 0.55), which MinIO and
/// most self-hosted S3 servers require. A trailing slash on the endpoint is
/// dropped so object URLs never carry an empty path segment.
pub fn build_operator(cfg: &StorageConfig) -> Result<Operator> {
    let bucket = cfg.bucket.trim();
    if bucket.is_empty() {
        anyhow::bail!("storage.bucket is empty; set the bucket that holds the backups");
    }
    let endpoint = cfg.endpoint.trim().trim_end_matches('/');
    if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
        anyhow::bail!(
            "storage.endpoint must start with https:// or http:// (got {:?})",
            cfg.endpoint
        );
    }

    let builder = opendal::services::S3::default()
        .endpoint(endpoint)
        .region(&cfg.region)
        .bucket(bucket)
        .access_key_id(&cfg.access_key_id)
        .secret_access_key(&cfg.secret_access_key);

    let op = Operator::new(builder)
        .with_context(|| format!("creating S3 operator for bucket {bucket:?}"))?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// Build an operator from backcrypt-core config + resolved credentials.
///
/// If `enforce_tls` is true and the endpoint uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS endpoints.
pub fn build_from_core_config(
    storage: &backcrypt_core::config::StorageConfig,
    credentials: &S3Credentials,
) -> Result<Operator> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP, credentials and ciphertext travel unprotected. \
             Set storage.enforce_tls = true and use HTTPS in production."
        );
    }

    build_operator(&StorageConfig {
        endpoint: storage.endpoint.clone(),
        region: storage.region.clone(),
        bucket: storage.bucket.clone(),
        access_key_id: credentials.access_key_id.clone(),
        secret_access_key: credentials.secret_access_key.clone(),
    })
}

/// S3 access key pair
#[derive(Clone, Deserialize)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl S3Credentials {
    /// Resolve credentials: environment first, then `storage.credentials_file`.
    ///
    /// Reads AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY, falling back to
    /// BACKCRYPT_ACCESS_KEY_ID / BACKCRYPT_SECRET_ACCESS_KEY.
    pub fn resolve(storage: &backcrypt_core::config::StorageConfig) -> Result<Self> {
        Self::resolve_with(|name| std::env::var(name).ok(), storage)
    }

    fn resolve_with(
        lookup: impl Fn(&str) -> Option<String>,
        storage: &backcrypt_core::config::StorageConfig,
    ) -> Result<Self> {
        let var = |primary: &str, fallback: &str| {
            lookup(primary)
                .or_else(|| lookup(fallback))
                .filter(|v| !v.is_empty())
        };
        let access_key_id = var("AWS_ACCESS_KEY_ID", "BACKCRYPT_ACCESS_KEY_ID");
        let secret_access_key = var("AWS_SECRET_ACCESS_KEY", "BACKCRYPT_SECRET_ACCESS_KEY");

        match (access_key_id, secret_access_key, &storage.credentials_file) {
            (Some(access_key_id), Some(secret_access_key), _) => Ok(Self {
                access_key_id,
                secret_access_key,
            }),
            (_, _, Some(path)) => Self::from_file(path),
            (Some(_), None, None) => {
                anyhow::bail!("AWS_SECRET_ACCESS_KEY environment variable not set")
            }
            _ => anyhow::bail!(
                "S3 credentials not set\n\
                 Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables,\n\
                 or point storage.credentials_file at a TOML file with\n\
                 \taccess_key_id = \"...\"\n\
                 \tsecret_access_key = \"...\""
            ),
        }
    }

    /// Load a TOML file with `access_key_id` and `secret_access_key` keys
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading credentials file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("parsing credentials file: {}", path.display()))
    }
}
