//! Object header: 4 bytes identifying the cipher suite and key generation.
//!
//! Wire format:
//! ```text
//! | magic 0xBA | version 0x10 | cipher suite | kdf id |
//! ```
//!
//! The magic byte keeps the header distinguishable from the first byte of a
//! package stream (format version 0x20), which is how headerless legacy
//! objects are told apart from current ones.

use std::fmt;
use std::str::FromStr;

use crate::error::HeaderError;

/// Sentinel in byte 0 of every header
pub const MAGIC: u8 = 0xBA;

/// The only supported header revision (first revision carrying a kdf id)
pub const VERSION_V10: u8 = 0x10;

/// Encoded header length
pub const HEADER_SIZE: usize = 4;

/// AEAD used for an object's package stream.
///
/// The ids are the package stream's own suite identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CipherSuite {
    #[default]
    Aes256Gcm = 0x00,
    ChaCha20Poly1305 = 0x01,
}

impl CipherSuite {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x00 => Some(CipherSuite::Aes256Gcm),
            0x01 => Some(CipherSuite::ChaCha20Poly1305),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CipherSuite::Aes256Gcm => "aes-256-gcm",
            CipherSuite::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherSuite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aes-256-gcm" | "aes256gcm" | "aes" => Ok(CipherSuite::Aes256Gcm),
            "chacha20-poly1305" | "chacha20poly1305" | "chacha" => {
                Ok(CipherSuite::ChaCha20Poly1305)
            }
            other => Err(format!(
                "unknown cipher suite '{other}' (expected aes-256-gcm or chacha20-poly1305)"
            )),
        }
    }
}

/// Key derivation generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KdfId {
    /// No recorded generation; only reachable through legacy recovery
    Unknown = 0x00,
    /// hex(md5(secret)) used as the key. Read-only.
    LegacyMd5 = 0x01,
    /// scrypt over a hex salt, expanded with HKDF-SHA256. Read-only.
    LegacyScryptHkdf = 0x02,
    /// scrypt N=32768, r=8, p=1 over a sha256 salt
    Scrypt = 0x10,
}

impl KdfId {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x00 => Some(KdfId::Unknown),
            0x01 => Some(KdfId::LegacyMd5),
            0x02 => Some(KdfId::LegacyScryptHkdf),
            0x10 => Some(KdfId::Scrypt),
            _ => None,
        }
    }

    /// Generations that can be derived directly from a header.
    pub fn is_derivable(self) -> bool {
        !matches!(self, KdfId::Unknown)
    }
}

impl fmt::Display for KdfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KdfId::Unknown => "unknown",
            KdfId::LegacyMd5 => "legacy-md5",
            KdfId::LegacyScryptHkdf => "legacy-scrypt-hkdf",
            KdfId::Scrypt => "scrypt",
        };
        f.write_str(name)
    }
}

/// Validated (cipher suite, kdf) pair carried by a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheme {
    pub cipher: CipherSuite,
    pub kdf: KdfId,
}

/// Raw header record. Fields are not checked until [`Header::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u8,
    pub version: u8,
    pub cipher: u8,
    pub kdf: u8,
}

impl Header {
    /// Header for a new object: current version and sentinel magic.
    pub fn new(cipher: CipherSuite, kdf: KdfId) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION_V10,
            cipher: cipher.id(),
            kdf: kdf.id(),
        }
    }

    /// Structural decode only.
    pub fn parse(bytes: [u8; HEADER_SIZE]) -> Self {
        let [magic, version, cipher, kdf] = bytes;
        Self {
            magic,
            version,
            cipher,
            kdf,
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        [self.magic, self.version, self.cipher, self.kdf]
    }

    /// Check magic, version, cipher suite and kdf, in that order.
    ///
    /// `Unknown` is rejected: it has no direct derivation, so an object
    /// claiming it is routed to legacy recovery like a headerless one.
    pub fn validate(&self) -> Result<Scheme, HeaderError> {
        if self.magic != MAGIC {
            return Err(HeaderError::BadMagic(self.magic));
        }
        if self.version != VERSION_V10 {
            return Err(HeaderError::UnsupportedVersion(self.version));
        }
        let cipher =
            CipherSuite::from_id(self.cipher).ok_or(HeaderError::UnsupportedCipher(self.cipher))?;
        let kdf = KdfId::from_id(self.kdf)
            .filter(|kdf| kdf.is_derivable())
            .ok_or(HeaderError::UnsupportedKdf(self.kdf))?;
        Ok(Scheme { cipher, kdf })
    }
}
