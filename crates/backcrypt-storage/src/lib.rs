//! backcrypt-storage: OpenDAL S3 backend and the encrypted object store

pub mod health;
pub mod operator;
pub mod store;

pub use health::{check_health, is_healthy, StorageStatus};
pub use operator::{build_from_core_config, build_operator, S3Credentials, StorageConfig};
pub use store::{EncryptedStore, ObjectInfo};
