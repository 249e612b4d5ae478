//! backcrypt-crypto: encryption of backup objects under one master secret
//!
//! Object layout:
//! ```text
//! [4 bytes: header = 0xBA | version 0x10 | cipher suite | kdf id][AEAD package stream]
//! ```
//!
//! Objects written before the header existed start directly with the package
//! stream. Their key generation is not recorded anywhere, so it is recovered by
//! trial decryption:
//! ```text
//! header valid?  ── yes ──> derive key for header kdf id ──> decrypt
//!      │
//!      no ──> LegacyMd5 trial ──> LegacyScryptHkdf trial ──> LegacyRecoveryExhausted
//! ```
//!
//! Key generations:
//! ```text
//! Scrypt (0x10)           scrypt(secret, sha256(secret || basename), N=32768 r=8 p=1)
//! LegacyScryptHkdf (0x02) hkdf-sha256(scrypt(secret, hex(sha256(secret || basename))), basename)
//! LegacyMd5 (0x01)        hex(md5(secret))
//! ```

pub mod error;
pub mod header;
pub mod kdf;
pub mod keys;
pub mod object;
pub mod recovery;
pub mod stream;

pub use error::{CryptoError, HeaderError};
pub use header::{CipherSuite, Header, KdfId, Scheme};
pub use kdf::{derive_key, object_nonce};
pub use keys::{DerivedKey, MasterSecret};
pub use object::{inspect, ObjectCipher};
pub use recovery::recover_legacy_key;
pub use stream::{DecryptReader, EncryptWriter};

/// Size of every derived key (256-bit), whatever the generation
pub const KEY_SIZE: usize = 32;

/// Size of an AEAD authentication tag (AES-GCM and Poly1305 alike)
pub const TAG_SIZE: usize = 16;
