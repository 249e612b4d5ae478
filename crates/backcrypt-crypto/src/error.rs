use std::io;

use thiserror::Error;

use crate::header::KdfId;

/// Why a 4-byte prefix is not a usable object header.
///
/// Checks run in field order and stop at the first violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("wrong magic byte: expected 0xba, got {0:#04x}")]
    BadMagic(u8),

    #[error("unsupported header version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("unsupported cipher suite: {0:#04x}")]
    UnsupportedCipher(u8),

    #[error("unsupported kdf: {0:#04x}")]
    UnsupportedKdf(u8),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid header: {0}")]
    InvalidHeader(#[from] HeaderError),

    #[error("no direct key derivation for kdf {0}")]
    UnsupportedKdf(KdfId),

    #[error("{kdf} key derivation failed: {reason}")]
    Derivation { kdf: KdfId, reason: String },

    #[error("object cannot be decrypted with this master secret under any legacy key generation")]
    LegacyRecoveryExhausted,

    #[error("authentication failed: {0}")]
    Authentication(&'static str),

    #[error("input stream is not seekable: {0}")]
    UnseekableInput(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl CryptoError {
    pub(crate) fn derivation(kdf: KdfId, reason: impl std::fmt::Display) -> Self {
        CryptoError::Derivation {
            kdf,
            reason: reason.to_string(),
        }
    }

    /// True for failures caused by the key or the ciphertext rather than the transport.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            CryptoError::Authentication(_) | CryptoError::LegacyRecoveryExhausted
        )
    }
}

/// Unwraps a `CryptoError` that travelled through an `io::Read`/`io::Write`
/// boundary; any other I/O error stays an `Io` error.
impl From<io::Error> for CryptoError {
    fn from(err: io::Error) -> Self {
        if !err
            .get_ref()
            .is_some_and(|inner| inner.is::<CryptoError>())
        {
            return CryptoError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<CryptoError>()) {
            Some(Ok(crypto)) => *crypto,
            Some(Err(other)) => CryptoError::Io(io::Error::new(kind, other)),
            None => CryptoError::Io(io::Error::from(kind)),
        }
    }
}

impl From<CryptoError> for io::Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
