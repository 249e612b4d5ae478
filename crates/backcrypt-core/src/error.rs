use thiserror::Error;

pub type BackcryptResult<T> = Result<T, BackcryptError>;

#[derive(Debug, Error)]
pub enum BackcryptError {
    #[error("secrets error: {0}")]
    Secrets(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
