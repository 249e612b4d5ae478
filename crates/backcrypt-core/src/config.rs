use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BackcryptError, BackcryptResult};

/// Top-level configuration (loaded from backcrypt.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackcryptConfig {
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub log: LogConfig,
}

impl BackcryptConfig {
    /// Load a config file, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> BackcryptResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| BackcryptError::Config(format!("parsing {}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> BackcryptResult<Self> {
        toml::from_str(content).map_err(|e| BackcryptError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// S3-compatible endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket holding the backup objects
    pub bucket: String,
    /// Optional TOML file with `access_key_id` and `secret_access_key` keys
    pub credentials_file: Option<PathBuf>,
    /// Enforce HTTPS for S3 connections (error on HTTP endpoints)
    pub enforce_tls: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "backups".into(),
            credentials_file: None,
            enforce_tls: false,
        }
    }
}

/// Object encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Cipher suite for new objects: "aes-256-gcm" or "chacha20-poly1305"
    pub cipher_suite: String,
    /// Environment variable holding the master secret
    pub master_secret_env: String,
    /// File holding the master secret (takes precedence over the env var)
    pub master_secret_file: Option<PathBuf>,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            cipher_suite: "aes-256-gcm".into(),
            master_secret_env: "BACKCRYPT_ENCRYPTION_KEY".into(),
            master_secret_file: None,
        }
    }
}

impl CryptoConfig {
    /// Read the master secret from `master_secret_file`, or from the
    /// configured environment variable.
    ///
    /// A single trailing newline is stripped from file contents.
    pub fn resolve_master_secret(&self) -> BackcryptResult<String> {
        if let Some(path) = &self.master_secret_file {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                BackcryptError::Secrets(format!("reading {}: {e}", path.display()))
            })?;
            let secret = raw
                .strip_suffix('\n')
                .map(|s| s.strip_suffix('\r').unwrap_or(s))
                .unwrap_or(&raw);
            if secret.is_empty() {
                return Err(BackcryptError::Secrets(format!(
                    "master secret file {} is empty",
                    path.display()
                )));
            }
            return Ok(secret.to_string());
        }

        match std::env::var(&self.master_secret_env) {
            Ok(secret) if !secret.is_empty() => Ok(secret),
            _ => Err(BackcryptError::Secrets(format!(
                "master secret not set: export {} or set crypto.master_secret_file",
                self.master_secret_env
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
