pub mod config;
pub mod error;

pub use config::BackcryptConfig;
pub use error::{BackcryptError, BackcryptResult};
