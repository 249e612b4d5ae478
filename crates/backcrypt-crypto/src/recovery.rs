//! Key recovery for objects written before the header existed
//!
//! Such objects start directly with the package stream and carry no hint of
//! which key generation produced them. Each candidate generation is tried in
//! order by opening an AES-256-GCM stream and reading a short prefix, which
//! forces the first package's tag to be checked.

use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, warn};

use crate::error::CryptoError;
use crate::header::{CipherSuite, KdfId};
use crate::kdf::derive_key;
use crate::keys::{DerivedKey, MasterSecret};
use crate::stream::DecryptReader;

/// Bytes read from a trial stream
pub const PROBE_PREFIX: usize = 8;

/// Headerless objects were always written with AES-256-GCM.
pub const LEGACY_CIPHER: CipherSuite = CipherSuite::Aes256Gcm;

/// A seekable byte source.
pub trait SeekRead: Read + Seek {}

impl<T: Read + Seek + ?Sized> SeekRead for T {}

/// One legacy key generation the probe can try.
pub trait LegacyCandidate {
    fn generation(&self) -> KdfId;

    fn derive(&self, secret: &MasterSecret, object: &str) -> Result<DerivedKey, CryptoError> {
        derive_key(self.generation(), secret, object)
    }

    /// Derive the candidate key and check it against the start of `source`.
    ///
    /// Returns `Ok(None)` only when the key fails authentication; I/O errors
    /// from `source` are returned as-is. `source` is rewound to `start` on
    /// every non-I/O outcome.
    fn derive_and_verify(
        &self,
        secret: &MasterSecret,
        object: &str,
        source: &mut dyn SeekRead,
        start: u64,
    ) -> Result<Option<DerivedKey>, CryptoError> {
        let key = self.derive(secret, object)?;
        source.seek(SeekFrom::Start(start))?;

        let verdict = {
            let mut trial = DecryptReader::new(&mut *source, &key, LEGACY_CIPHER);
            let mut prefix = [0u8; PROBE_PREFIX];
            trial.read(&mut prefix)
        };
        source.seek(SeekFrom::Start(start))?;

        match verdict.map_err(CryptoError::from) {
            Ok(0) => {
                debug!(kdf = %self.generation(), "legacy probe: empty stream");
                Ok(None)
            }
            Ok(_) => Ok(Some(key)),
            Err(CryptoError::Authentication(reason)) => {
                debug!(kdf = %self.generation(), reason, "legacy probe: candidate rejected");
                Ok(None)
            }
            // transport failures say nothing about the key
            Err(e) => Err(e),
        }
    }
}

/// hex(md5(secret)), the oldest generation
pub struct Md5Candidate;

impl LegacyCandidate for Md5Candidate {
    fn generation(&self) -> KdfId {
        KdfId::LegacyMd5
    }
}

/// scrypt + HKDF, the generation between md5 and the header
pub struct ScryptHkdfCandidate;

impl LegacyCandidate for ScryptHkdfCandidate {
    fn generation(&self) -> KdfId {
        KdfId::LegacyScryptHkdf
    }
}

/// Probe order: oldest first.
pub const LEGACY_CANDIDATES: &[&dyn LegacyCandidate] = &[&Md5Candidate, &ScryptHkdfCandidate];

/// Find the legacy key of a headerless object.
///
/// `source` must be seekable; on success it is positioned at `start`, ready
/// for a full [`DecryptReader`] with [`LEGACY_CIPHER`].
pub fn recover_legacy_key<S: Read + Seek>(
    secret: &MasterSecret,
    object: &str,
    source: &mut S,
    start: u64,
) -> Result<(KdfId, DerivedKey), CryptoError> {
    recover_with(LEGACY_CANDIDATES, secret, object, source, start)
}

fn recover_with(
    candidates: &[&dyn LegacyCandidate],
    secret: &MasterSecret,
    object: &str,
    source: &mut dyn SeekRead,
    start: u64,
) -> Result<(KdfId, DerivedKey), CryptoError> {
    for candidate in candidates {
        if let Some(key) = candidate.derive_and_verify(secret, object, source, start)? {
            debug!(object, kdf = %candidate.generation(), "legacy key recovered");
            return Ok((candidate.generation(), key));
        }
    }
    warn!(object, "no legacy key generation authenticates object");
    Err(CryptoError::LegacyRecoveryExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::{Cursor, Write};

    use crate::stream::EncryptWriter;

    const SECRET: &str = "secret123";
    const OBJECT: &str = "backups/2019-05-01T00-00-00Z-app.tar.gz";

    fn legacy_object(kdf: KdfId, secret: &str, plaintext: &[u8]) -> Vec<u8> {
        let key = derive_key(kdf, &MasterSecret::new(secret), OBJECT).unwrap();
        let mut writer = EncryptWriter::new(Vec::new(), &key, LEGACY_CIPHER);
        writer.write_all(plaintext).unwrap();
        writer.finish().unwrap()
    }

    /// Counts how often it is asked to verify, then behaves like `inner`.
    struct Counting<'a> {
        inner: &'a dyn LegacyCandidate,
        calls: Cell<usize>,
    }

    impl LegacyCandidate for Counting<'_> {
        fn generation(&self) -> KdfId {
            self.inner.generation()
        }

        fn derive(&self, secret: &MasterSecret, object: &str) -> Result<DerivedKey, CryptoError> {
            self.calls.set(self.calls.get() + 1);
            self.inner.derive(secret, object)
        }
    }

    #[test]
    fn test_md5_object_recovered_first() {
        let ciphertext = legacy_object(KdfId::LegacyMd5, SECRET, b"old backup");
        let mut source = Cursor::new(ciphertext);

        let md5 = Counting { inner: &Md5Candidate, calls: Cell::new(0) };
        let hkdf = Counting { inner: &ScryptHkdfCandidate, calls: Cell::new(0) };
        let (kdf, _key) = recover_with(
            &[&md5, &hkdf],
            &MasterSecret::new(SECRET),
            OBJECT,
            &mut source,
            0,
        )
        .unwrap();

        assert_eq!(kdf, KdfId::LegacyMd5);
        assert_eq!(md5.calls.get(), 1);
        assert_eq!(hkdf.calls.get(), 0, "probe must stop at the first match");
        assert_eq!(source.position(), 0, "source must be rewound");
    }

    #[test]
    fn test_scrypt_hkdf_object_recovered_second() {
        let ciphertext = legacy_object(KdfId::LegacyScryptHkdf, SECRET, b"newer old backup");
        let mut source = Cursor::new(ciphertext);

        let (kdf, key) =
            recover_legacy_key(&MasterSecret::new(SECRET), OBJECT, &mut source, 0).unwrap();
        assert_eq!(kdf, KdfId::LegacyScryptHkdf);
        assert_eq!(source.position(), 0);

        let mut plaintext = Vec::new();
        DecryptReader::new(&mut source, &key, LEGACY_CIPHER)
            .read_to_end(&mut plaintext)
            .unwrap();
        assert_eq!(plaintext, b"newer old backup");
    }

    #[test]
    fn test_wrong_secret_exhausts_probe() {
        let ciphertext = legacy_object(KdfId::LegacyMd5, SECRET, b"old backup");
        let result = recover_legacy_key(
            &MasterSecret::new("wrong"),
            OBJECT,
            &mut Cursor::new(ciphertext),
            0,
        );
        assert!(matches!(result, Err(CryptoError::LegacyRecoveryExhausted)));
    }

    #[test]
    fn test_probe_respects_start_offset() {
        let mut data = b"prefix".to_vec();
        data.extend(legacy_object(KdfId::LegacyMd5, SECRET, b"offset object"));
        let mut source = Cursor::new(data);

        let (kdf, _) =
            recover_legacy_key(&MasterSecret::new(SECRET), OBJECT, &mut source, 6).unwrap();
        assert_eq!(kdf, KdfId::LegacyMd5);
        assert_eq!(source.position(), 6);
    }

    #[test]
    fn test_empty_object_not_recoverable() {
        let result = recover_legacy_key(
            &MasterSecret::new(SECRET),
            OBJECT,
            &mut Cursor::new(Vec::new()),
            0,
        );
        assert!(matches!(result, Err(CryptoError::LegacyRecoveryExhausted)));
    }
}
