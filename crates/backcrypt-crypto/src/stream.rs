//! AEAD package stream (DARE 2.0 layout)
//!
//! Package format (binary):
//! ```text
//! [16 bytes: package header][1..=65536 bytes: ciphertext][16 bytes: tag]
//!
//! package header = 0x20 | cipher suite | payload_len - 1 (u16 LE) | 12-byte stream nonce
//! AEAD nonce     = stream nonce, with nonce[8..12] (u32 LE) ^= sequence number
//! AAD            = package header[0..4]
//! ```
//!
//! Bit 7 of the first nonce byte marks the final package. Every package but
//! the last carries a full 64 KiB payload, so truncating the stream at a
//! package boundary is detected as a missing final package.

use std::io::{self, Read, Write};

use aes_gcm::Aes256Gcm;
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;

use crate::error::CryptoError;
use crate::header::CipherSuite;
use crate::keys::DerivedKey;
use crate::TAG_SIZE;

/// Package stream format version
pub const STREAM_VERSION: u8 = 0x20;

/// Size of a package header
pub const PACKAGE_HEADER_SIZE: usize = 16;

/// Maximum (and non-final) package payload size
pub const MAX_PAYLOAD_SIZE: usize = 1 << 16;

const NONCE_SIZE: usize = 12;
const FINAL_FLAG: u8 = 0x80;

enum PackageCipher {
    Aes(Box<Aes256Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
}

impl PackageCipher {
    fn new(suite: CipherSuite, key: &DerivedKey) -> Self {
        match suite {
            CipherSuite::Aes256Gcm => {
                PackageCipher::Aes(Box::new(Aes256Gcm::new(key.as_bytes().into())))
            }
            CipherSuite::ChaCha20Poly1305 => {
                PackageCipher::ChaCha(Box::new(ChaCha20Poly1305::new(key.as_bytes().into())))
            }
        }
    }

    /// Encrypt `buf` in place and append the tag.
    fn seal(&self, nonce: &[u8; NONCE_SIZE], aad: &[u8], buf: &mut Vec<u8>) -> io::Result<()> {
        let result = match self {
            PackageCipher::Aes(c) => c.encrypt_in_place(nonce.into(), aad, buf),
            PackageCipher::ChaCha(c) => c.encrypt_in_place(nonce.into(), aad, buf),
        };
        result.map_err(|_| io::Error::other("package encryption failed"))
    }

    /// Verify and decrypt `buf` (ciphertext || tag) in place.
    fn open(&self, nonce: &[u8; NONCE_SIZE], aad: &[u8], buf: &mut Vec<u8>) -> Result<(), CryptoError> {
        let result = match self {
            PackageCipher::Aes(c) => c.decrypt_in_place(nonce.into(), aad, buf),
            PackageCipher::ChaCha(c) => c.decrypt_in_place(nonce.into(), aad, buf),
        };
        result.map_err(|_| CryptoError::Authentication("package tag mismatch"))
    }
}

/// AEAD nonce of package `seq`.
fn package_nonce(header: &[u8; PACKAGE_HEADER_SIZE], seq: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&header[4..]);
    let counter = u32::from_le_bytes([nonce[8], nonce[9], nonce[10], nonce[11]]) ^ seq;
    nonce[8..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Streaming encryptor. Call [`EncryptWriter::finish`] to seal the final package.
pub struct EncryptWriter<W: Write> {
    inner: W,
    cipher: PackageCipher,
    suite: CipherSuite,
    nonce: [u8; NONCE_SIZE],
    seq: u32,
    buffer: Vec<u8>,
}

impl<W: Write> EncryptWriter<W> {
    pub fn new(inner: W, key: &DerivedKey, suite: CipherSuite) -> Self {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self {
            inner,
            cipher: PackageCipher::new(suite, key),
            suite,
            nonce,
            seq: 0,
            buffer: Vec::with_capacity(MAX_PAYLOAD_SIZE + TAG_SIZE),
        }
    }

    fn seal_package(&mut self, last: bool) -> io::Result<()> {
        let mut header = [0u8; PACKAGE_HEADER_SIZE];
        header[0] = STREAM_VERSION;
        header[1] = self.suite.id();
        header[2..4].copy_from_slice(&((self.buffer.len() - 1) as u16).to_le_bytes());
        header[4..].copy_from_slice(&self.nonce);
        if last {
            header[4] |= FINAL_FLAG;
        } else {
            header[4] &= !FINAL_FLAG;
        }

        let nonce = package_nonce(&header, self.seq);
        self.cipher.seal(&nonce, &header[..4], &mut self.buffer)?;
        self.inner.write_all(&header)?;
        self.inner.write_all(&self.buffer)?;
        self.buffer.clear();

        self.seq = self.seq.checked_add(1).ok_or_else(|| {
            io::Error::other("package sequence number exhausted")
        })?;
        Ok(())
    }

    /// Seal any buffered plaintext as the final package and return the sink.
    ///
    /// Empty input produces no packages at all.
    pub fn finish(mut self) -> io::Result<W> {
        if !self.buffer.is_empty() {
            self.seal_package(true)?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        // a full buffer is only sealed as non-final once more data arrives
        if self.buffer.len() == MAX_PAYLOAD_SIZE {
            self.seal_package(false)?;
        }
        let n = buf.len().min(MAX_PAYLOAD_SIZE - self.buffer.len());
        self.buffer.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Streaming decryptor.
///
/// Every error caused by the key or the ciphertext is returned as an
/// `io::Error` of kind `InvalidData` wrapping a [`CryptoError::Authentication`];
/// convert it back with `CryptoError::from`.
pub struct DecryptReader<R: Read> {
    inner: R,
    cipher: PackageCipher,
    suite: CipherSuite,
    stream_nonce: Option<[u8; NONCE_SIZE]>,
    seq: u32,
    plaintext: Vec<u8>,
    pos: usize,
    finished: bool,
    failed: bool,
}

impl<R: Read> DecryptReader<R> {
    pub fn new(inner: R, key: &DerivedKey, suite: CipherSuite) -> Self {
        Self {
            inner,
            cipher: PackageCipher::new(suite, key),
            suite,
            stream_nonce: None,
            seq: 0,
            plaintext: Vec::with_capacity(MAX_PAYLOAD_SIZE + TAG_SIZE),
            pos: 0,
            finished: false,
            failed: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the next package into `self.plaintext`.
    ///
    /// Returns `false` on a clean end of stream.
    fn next_package(&mut self) -> Result<bool, CryptoError> {
        let mut header = [0u8; PACKAGE_HEADER_SIZE];
        let got = read_full(&mut self.inner, &mut header)?;
        if got == 0 {
            if self.finished || self.seq == 0 {
                return Ok(false);
            }
            return Err(CryptoError::Authentication("stream truncated before final package"));
        }
        if self.finished {
            return Err(CryptoError::Authentication("unexpected data after final package"));
        }
        if got < PACKAGE_HEADER_SIZE {
            return Err(CryptoError::Authentication("truncated package header"));
        }

        if header[0] != STREAM_VERSION {
            return Err(CryptoError::Authentication("unsupported package version"));
        }
        if header[1] != self.suite.id() {
            return Err(CryptoError::Authentication("package cipher suite mismatch"));
        }
        let len = u16::from_le_bytes([header[2], header[3]]) as usize + 1;
        let last = header[4] & FINAL_FLAG == FINAL_FLAG;
        if !last && len != MAX_PAYLOAD_SIZE {
            return Err(CryptoError::Authentication("short non-final package"));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&header[4..]);
        nonce[0] &= !FINAL_FLAG;
        match self.stream_nonce {
            None => self.stream_nonce = Some(nonce),
            Some(expected) if expected != nonce => {
                return Err(CryptoError::Authentication("package nonce mismatch"));
            }
            Some(_) => {}
        }

        self.plaintext.clear();
        self.plaintext.resize(len + TAG_SIZE, 0);
        if read_full(&mut self.inner, &mut self.plaintext)? != len + TAG_SIZE {
            return Err(CryptoError::Authentication("truncated package payload"));
        }

        let aead_nonce = package_nonce(&header, self.seq);
        self.cipher.open(&aead_nonce, &header[..4], &mut self.plaintext)?;
        self.pos = 0;
        self.seq = self
            .seq
            .checked_add(1)
            .ok_or(CryptoError::Authentication("package sequence number exhausted"))?;
        self.finished = last;
        Ok(true)
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.failed {
            return Err(CryptoError::Authentication("stream already failed").into());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.plaintext.len() {
            match self.next_package() {
                Ok(true) => {}
                Ok(false) => return Ok(0),
                Err(e) => {
                    self.failed = true;
                    self.plaintext.clear();
                    self.pos = 0;
                    return Err(e.into());
                }
            }
        }
        let n = buf.len().min(self.plaintext.len() - self.pos);
        buf[..n].copy_from_slice(&self.plaintext[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Read until `buf` is full or the source is exhausted; returns bytes read.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key(byte: u8) -> DerivedKey {
        DerivedKey::from_bytes([byte; 32])
    }

    fn seal(key: &DerivedKey, suite: CipherSuite, plaintext: &[u8]) -> Vec<u8> {
        let mut writer = EncryptWriter::new(Vec::new(), key, suite);
        writer.write_all(plaintext).unwrap();
        writer.finish().unwrap()
    }

    fn open(key: &DerivedKey, suite: CipherSuite, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut reader = DecryptReader::new(ciphertext, key, suite);
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_single_package_layout() {
        let key = test_key(7);
        let ciphertext = seal(&key, CipherSuite::Aes256Gcm, b"hello");

        assert_eq!(ciphertext.len(), PACKAGE_HEADER_SIZE + 5 + TAG_SIZE);
        assert_eq!(ciphertext[0], STREAM_VERSION);
        assert_eq!(ciphertext[1], CipherSuite::Aes256Gcm.id());
        assert_eq!(u16::from_le_bytes([ciphertext[2], ciphertext[3]]), 4);
        assert_eq!(ciphertext[4] & FINAL_FLAG, FINAL_FLAG);
    }

    #[test]
    fn test_multi_package_roundtrip() {
        let key = test_key(9);
        let plaintext: Vec<u8> = (0..MAX_PAYLOAD_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();

        for suite in [CipherSuite::Aes256Gcm, CipherSuite::ChaCha20Poly1305] {
            let ciphertext = seal(&key, suite, &plaintext);
            let packages = 3;
            assert_eq!(
                ciphertext.len(),
                plaintext.len() + packages * (PACKAGE_HEADER_SIZE + TAG_SIZE)
            );
            assert_eq!(open(&key, suite, &ciphertext).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_exact_package_multiple_is_single_final() {
        let key = test_key(3);
        let plaintext = vec![0x5a; MAX_PAYLOAD_SIZE];
        let ciphertext = seal(&key, CipherSuite::Aes256Gcm, &plaintext);

        assert_eq!(ciphertext.len(), PACKAGE_HEADER_SIZE + MAX_PAYLOAD_SIZE + TAG_SIZE);
        assert_eq!(ciphertext[4] & FINAL_FLAG, FINAL_FLAG);
        assert_eq!(open(&key, CipherSuite::Aes256Gcm, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_empty_stream() {
        let key = test_key(1);
        let ciphertext = seal(&key, CipherSuite::ChaCha20Poly1305, b"");
        assert!(ciphertext.is_empty());
        assert!(open(&key, CipherSuite::ChaCha20Poly1305, &ciphertext).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = seal(&test_key(1), CipherSuite::Aes256Gcm, b"secret data");
        let result = open(&test_key(2), CipherSuite::Aes256Gcm, &ciphertext);
        assert!(matches!(result, Err(CryptoError::Authentication(_))));
    }

    #[test]
    fn test_wrong_suite_fails() {
        let key = test_key(1);
        let ciphertext = seal(&key, CipherSuite::Aes256Gcm, b"secret data");
        let result = open(&key, CipherSuite::ChaCha20Poly1305, &ciphertext);
        assert!(matches!(result, Err(CryptoError::Authentication(_))));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let key = test_key(4);
        let mut ciphertext = seal(&key, CipherSuite::ChaCha20Poly1305, b"secret data");
        ciphertext[PACKAGE_HEADER_SIZE + 2] ^= 0xff;
        let result = open(&key, CipherSuite::ChaCha20Poly1305, &ciphertext);
        assert!(matches!(result, Err(CryptoError::Authentication(_))));
    }

    #[test]
    fn test_truncation_at_package_boundary_fails() {
        let key = test_key(5);
        let plaintext = vec![1u8; MAX_PAYLOAD_SIZE + 10];
        let ciphertext = seal(&key, CipherSuite::Aes256Gcm, &plaintext);
        let first_package = PACKAGE_HEADER_SIZE + MAX_PAYLOAD_SIZE + TAG_SIZE;

        let result = open(&key, CipherSuite::Aes256Gcm, &ciphertext[..first_package]);
        assert!(matches!(result, Err(CryptoError::Authentication(_))));
    }

    #[test]
    fn test_trailing_data_fails() {
        let key = test_key(6);
        let mut ciphertext = seal(&key, CipherSuite::Aes256Gcm, b"abc");
        ciphertext.extend_from_slice(b"junk");
        let result = open(&key, CipherSuite::Aes256Gcm, &ciphertext);
        assert!(matches!(result, Err(CryptoError::Authentication(_))));
    }

    #[test]
    fn test_reader_stays_failed() {
        let ciphertext = seal(&test_key(1), CipherSuite::Aes256Gcm, b"data");
        let mut reader = DecryptReader::new(ciphertext.as_slice(), &test_key(2), CipherSuite::Aes256Gcm);
        let mut buf = [0u8; 8];
        assert!(reader.read(&mut buf).is_err());
        assert!(reader.read(&mut buf).is_err());
    }

    #[test]
    fn test_package_nonce_xors_sequence() {
        let mut header = [0u8; PACKAGE_HEADER_SIZE];
        header[12..16].copy_from_slice(&0x0000_00ffu32.to_le_bytes());
        let nonce = package_nonce(&header, 0x0f);
        assert_eq!(&nonce[8..], &0x0000_00f0u32.to_le_bytes());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_chunked_writes_roundtrip(
            plaintext in proptest::collection::vec(any::<u8>(), 0..(3 * MAX_PAYLOAD_SIZE)),
            chunk in 1usize..20_000,
        ) {
            let key = test_key(0x42);
            let mut writer = EncryptWriter::new(Vec::new(), &key, CipherSuite::ChaCha20Poly1305);
            for piece in plaintext.chunks(chunk) {
                writer.write_all(piece).unwrap();
            }
            let ciphertext = writer.finish().unwrap();
            prop_assert_eq!(open(&key, CipherSuite::ChaCha20Poly1305, &ciphertext).unwrap(), plaintext);
        }
    }
}
