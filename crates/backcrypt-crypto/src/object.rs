//! Object encryption and decryption entry points
//!
//! Decryption state machine:
//! ```text
//! Start -> HeaderPeek -> HeaderValid   -> DeriveByHeader -> OpenDecryptStream -> Done
//!                     -> HeaderInvalid -> LegacyProbe -> ProbeSucceeds -> OpenDecryptStream -> Done
//!                                                     -> ProbeFails (LegacyRecoveryExhausted)
//! ```
//!
//! Object identifiers must be unique per deployment: the per-object key salt
//! is derived from the identifier's basename, not generated randomly.

use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::debug;

use crate::error::CryptoError;
use crate::header::{CipherSuite, Header, KdfId, Scheme, HEADER_SIZE};
use crate::kdf::derive_key;
use crate::keys::MasterSecret;
use crate::recovery::{recover_legacy_key, LEGACY_CIPHER};
use crate::stream::{read_full, DecryptReader, EncryptWriter};

/// Generation stamped on every new object
pub const CURRENT_KDF: KdfId = KdfId::Scrypt;

/// Encrypts and decrypts objects under one master secret.
///
/// Holds no mutable state; one instance can serve any number of threads.
#[derive(Debug)]
pub struct ObjectCipher {
    secret: MasterSecret,
    cipher: CipherSuite,
}

impl ObjectCipher {
    pub fn new(secret: MasterSecret, cipher: CipherSuite) -> Self {
        Self { secret, cipher }
    }

    /// Cipher suite used for new objects
    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher
    }

    /// Write the header for `object` to `sink` and return a writer that
    /// encrypts everything written to it. Finish with [`EncryptWriter::finish`].
    pub fn encrypt_writer<W: Write>(
        &self,
        object: &str,
        mut sink: W,
    ) -> Result<EncryptWriter<W>, CryptoError> {
        let header = Header::new(self.cipher, CURRENT_KDF);
        let key = derive_key(CURRENT_KDF, &self.secret, object)?;
        sink.write_all(&header.to_bytes()).map_err(CryptoError::Io)?;
        debug!(object, cipher = %self.cipher, kdf = %CURRENT_KDF, "encrypting object");
        Ok(EncryptWriter::new(sink, &key, self.cipher))
    }

    /// Encrypt all of `plaintext` into `sink`; returns the sink.
    pub fn encrypt<R: Read + ?Sized, W: Write>(
        &self,
        object: &str,
        plaintext: &mut R,
        sink: W,
    ) -> Result<W, CryptoError> {
        let mut writer = self.encrypt_writer(object, sink)?;
        io::copy(plaintext, &mut writer)?;
        Ok(writer.finish()?)
    }

    /// Open a decrypting reader over `source`.
    ///
    /// Decryption starts at the current position of `source`. Tampering or a
    /// wrong secret on a headed object surfaces when reading; headerless
    /// objects fail here with [`CryptoError::LegacyRecoveryExhausted`].
    pub fn decrypt_reader<R: Read + Seek>(
        &self,
        object: &str,
        mut source: R,
    ) -> Result<DecryptReader<R>, CryptoError> {
        let start = source
            .stream_position()
            .map_err(CryptoError::UnseekableInput)?;

        match peek_header(&mut source, start)? {
            Some(scheme) => {
                debug!(object, cipher = %scheme.cipher, kdf = %scheme.kdf, "object header valid");
                let key = derive_key(scheme.kdf, &self.secret, object)?;
                Ok(DecryptReader::new(source, &key, scheme.cipher))
            }
            None => {
                let (kdf, key) = recover_legacy_key(&self.secret, object, &mut source, start)?;
                debug!(object, %kdf, "decrypting headerless object");
                Ok(DecryptReader::new(source, &key, LEGACY_CIPHER))
            }
        }
    }

    /// Decrypt `source` into `sink`; returns the number of plaintext bytes.
    pub fn decrypt<R: Read + Seek, W: Write + ?Sized>(
        &self,
        object: &str,
        source: R,
        sink: &mut W,
    ) -> Result<u64, CryptoError> {
        let mut reader = self.decrypt_reader(object, source)?;
        Ok(io::copy(&mut reader, sink)?)
    }
}

/// Header of the object at the current position of `source`, if it has one.
///
/// The stream is rewound either way.
pub fn inspect<R: Read + Seek>(source: &mut R) -> Result<Option<Scheme>, CryptoError> {
    let start = source
        .stream_position()
        .map_err(CryptoError::UnseekableInput)?;
    let scheme = peek_header(source, start)?;
    source.seek(SeekFrom::Start(start))?;
    Ok(scheme)
}

/// Read the first `HEADER_SIZE` bytes and validate them.
///
/// On a valid header `source` is left just past it; otherwise it is rewound
/// to `start`.
fn peek_header<R: Read + Seek>(source: &mut R, start: u64) -> Result<Option<Scheme>, CryptoError> {
    let mut bytes = [0u8; HEADER_SIZE];
    let got = read_full(source, &mut bytes)?;
    if got == HEADER_SIZE {
        match Header::parse(bytes).validate() {
            Ok(scheme) => return Ok(Some(scheme)),
            Err(reason) => debug!(%reason, "no usable header"),
        }
    } else {
        debug!(len = got, "object shorter than a header");
    }
    source
        .seek(SeekFrom::Start(start))
        .map_err(CryptoError::UnseekableInput)?;
    Ok(None)
}
