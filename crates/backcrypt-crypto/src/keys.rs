//! Master secret and per-object derived keys

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// Operator-supplied passphrase all object keys are derived from.
///
/// Redacted in `Debug` output and zeroized on drop.
pub struct MasterSecret {
    inner: SecretString,
}

impl MasterSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            inner: SecretString::from(secret.into()),
        }
    }

    pub(crate) fn expose(&self) -> &str {
        self.inner.expose_secret()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.expose().as_bytes()
    }
}

impl From<SecretString> for MasterSecret {
    fn from(inner: SecretString) -> Self {
        Self { inner }
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSecret")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// A 256-bit object key. Zeroized on drop.
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
