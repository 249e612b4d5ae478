//! Backup bucket reachability

use anyhow::{Context, Result};
use opendal::Operator;
use tracing::debug;

/// Which backend answered a health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStatus {
    /// OpenDAL scheme, e.g. `s3` or `memory`
    pub scheme: String,
    /// Bucket (or backend root name) that was listed
    pub bucket: String,
}

/// Verify the backup bucket is reachable by listing its root.
///
/// Errors name the bucket so a misconfigured `storage.bucket` is obvious.
pub async fn check_health(op: &Operator) -> Result<StorageStatus> {
    let info = op.info();
    let status = StorageStatus {
        scheme: info.scheme().to_string(),
        bucket: info.name().to_string(),
    };
    op.list("/").await.with_context(|| {
        format!(
            "storage health check failed for {} bucket {:?}",
            status.scheme, status.bucket
        )
    })?;
    debug!(scheme = %status.scheme, bucket = %status.bucket, "storage reachable");
    Ok(status)
}

/// Returns true if storage is reachable, false otherwise
pub async fn is_healthy(op: &Operator) -> bool {
    check_health(op).await.is_ok()
}
