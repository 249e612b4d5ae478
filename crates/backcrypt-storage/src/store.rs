//! Encrypted object store
//!
//! Wraps an OpenDAL operator so every object is encrypted on the way in and
//! decrypted (including headerless legacy objects) on the way out.
//!
//! Objects never sit in memory whole. Ciphertext is spooled through an
//! anonymous temp file: uploads encrypt into the spool and then stream it to
//! a chunked writer; downloads fetch ranged chunks into the spool, which then
//! serves as the seekable source legacy key recovery needs. The crypto runs
//! on the blocking pool since scrypt takes tens of milliseconds per object.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use backcrypt_crypto::header::HEADER_SIZE;
use backcrypt_crypto::{inspect, ObjectCipher, Scheme};
use bytes::Bytes;
use opendal::Operator;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info};

/// Size of ranged reads and of multipart upload parts (S3 needs >= 5 MiB)
pub const DEFAULT_TRANSFER_CHUNK: usize = 8 * 1024 * 1024;

/// One stored object as returned by [`EncryptedStore::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub path: String,
    /// Ciphertext size in bytes
    pub size: u64,
}

/// Operator plus the cipher used for every object in it
#[derive(Clone)]
pub struct EncryptedStore {
    op: Operator,
    cipher: Arc<ObjectCipher>,
    chunk_size: usize,
}

impl EncryptedStore {
    pub fn new(op: Operator, cipher: ObjectCipher) -> Self {
        Self {
            op,
            cipher: Arc::new(cipher),
            chunk_size: DEFAULT_TRANSFER_CHUNK,
        }
    }

    /// Override the transfer chunk size; bounds the memory one transfer uses.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    pub fn cipher(&self) -> &ObjectCipher {
        &self.cipher
    }

    /// Encrypt `plaintext` and store it under `object`; returns the stored size.
    pub async fn put(&self, object: &str, plaintext: Bytes) -> Result<u64> {
        let result = self.put_inner(object, plaintext).await;
        logged("upload", object, result)
    }

    async fn put_inner(&self, object: &str, plaintext: Bytes) -> Result<u64> {
        let cipher = Arc::clone(&self.cipher);
        let id = object.to_string();
        let spool = tokio::task::spawn_blocking(move || {
            encrypt_to_spool(&cipher, &id, &mut &plaintext[..])
        })
        .await
        .context("encryption task panicked")?
        .with_context(|| format!("encrypting {object}"))?;

        self.upload(object, spool).await
    }

    /// Encrypt the file at `path` and store it under `object`.
    pub async fn put_file(&self, object: &str, path: &Path) -> Result<u64> {
        let result = self.put_file_inner(object, path).await;
        logged("upload", object, result)
    }

    async fn put_file_inner(&self, object: &str, path: &Path) -> Result<u64> {
        let cipher = Arc::clone(&self.cipher);
        let id = object.to_string();
        let source = path.to_path_buf();
        let spool = tokio::task::spawn_blocking(move || -> Result<File> {
            let file = File::open(&source)
                .with_context(|| format!("opening {}", source.display()))?;
            encrypt_to_spool(&cipher, &id, &mut BufReader::new(file))
        })
        .await
        .context("encryption task panicked")?
        .with_context(|| format!("encrypting {}", path.display()))?;

        self.upload(object, spool).await
    }

    /// Stream a rewound spool file to `object` in `chunk_size` parts.
    async fn upload(&self, object: &str, spool: File) -> Result<u64> {
        let mut source = tokio::fs::File::from_std(spool);
        let mut writer = self
            .op
            .writer_with(object)
            .chunk(self.chunk_size)
            .await
            .with_context(|| format!("opening writer for {object}"))?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut size = 0u64;
        let copied: Result<()> = async {
            loop {
                let n = source.read(&mut buf).await.context("reading spool file")?;
                if n == 0 {
                    break;
                }
                writer.write(Bytes::copy_from_slice(&buf[..n])).await?;
                size += n as u64;
            }
            writer.close().await?;
            Ok(())
        }
        .await;

        if let Err(e) = copied {
            if let Err(abort) = writer.abort().await {
                debug!(object, error = %abort, "could not abort partial upload");
            }
            return Err(e.context(format!("writing {object}")));
        }
        info!(object, bytes = size, "object uploaded");
        Ok(size)
    }

    /// Fetch and decrypt `object`.
    pub async fn get(&self, object: &str) -> Result<Vec<u8>> {
        let result = self.get_inner(object).await;
        logged("download", object, result)
    }

    async fn get_inner(&self, object: &str) -> Result<Vec<u8>> {
        let spool = self.download_to_spool(object).await?;
        let cipher = Arc::clone(&self.cipher);
        let id = object.to_string();
        let plaintext = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            cipher.decrypt(&id, BufReader::new(spool), &mut out)?;
            Ok::<_, backcrypt_crypto::CryptoError>(out)
        })
        .await
        .context("decryption task panicked")?
        .with_context(|| format!("decrypting {object}"))?;

        info!(object, bytes = plaintext.len(), "object downloaded");
        Ok(plaintext)
    }

    /// Fetch and decrypt `object` into a file at `path`.
    ///
    /// The file is removed again if decryption fails part way, so no
    /// unauthenticated plaintext is left behind.
    pub async fn get_to_file(&self, object: &str, path: &Path) -> Result<u64> {
        let result = self.get_to_file_inner(object, path).await;
        logged("download", object, result)
    }

    async fn get_to_file_inner(&self, object: &str, path: &Path) -> Result<u64> {
        let spool = self.download_to_spool(object).await?;
        let cipher = Arc::clone(&self.cipher);
        let id = object.to_string();
        let target: PathBuf = path.to_path_buf();
        let written = tokio::task::spawn_blocking(move || -> Result<u64> {
            let file = File::create(&target)
                .with_context(|| format!("creating {}", target.display()))?;
            let mut sink = BufWriter::new(file);
            let result = cipher
                .decrypt(&id, BufReader::new(spool), &mut sink)
                .map_err(anyhow::Error::from)
                .and_then(|n| sink.flush().map(|()| n).map_err(anyhow::Error::from));
            if result.is_err() {
                drop(sink);
                if let Err(e) = std::fs::remove_file(&target) {
                    debug!(path = %target.display(), error = %e, "could not remove partial output");
                }
            }
            result
        })
        .await
        .context("decryption task panicked")?
        .with_context(|| format!("decrypting {object} to {}", path.display()))?;

        info!(object, bytes = written, path = %path.display(), "object downloaded");
        Ok(written)
    }

    /// Copy `object` into a rewound temp file using ranged reads.
    async fn download_to_spool(&self, object: &str) -> Result<File> {
        let len = self
            .op
            .stat(object)
            .await
            .with_context(|| format!("stat {object}"))?
            .content_length();
        let reader = self
            .op
            .reader(object)
            .await
            .with_context(|| format!("opening reader for {object}"))?;

        let mut spool = tokio::fs::File::from_std(
            tempfile::tempfile().context("creating spool file")?,
        );
        let mut offset = 0u64;
        let mut chunks = 0usize;
        while offset < len {
            let end = (offset + self.chunk_size as u64).min(len);
            let chunk = reader
                .read(offset..end)
                .await
                .with_context(|| format!("reading {object} at offset {offset}"))?
                .to_bytes();
            if chunk.is_empty() {
                anyhow::bail!("{object} ended at {offset} bytes, expected {len}");
            }
            spool.write_all(&chunk).await.context("writing spool file")?;
            offset += chunk.len() as u64;
            chunks += 1;
        }
        spool.flush().await.context("writing spool file")?;
        debug!(object, bytes = len, chunks, "object spooled");

        let mut spool = spool.into_std().await;
        spool.rewind().context("rewinding spool file")?;
        Ok(spool)
    }

    /// List every object under `prefix`, recursively.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let entries = self
            .op
            .list_with(prefix)
            .recursive(true)
            .await
            .with_context(|| format!("listing {prefix:?}"));
        let entries = logged("list", prefix, entries)?;

        let mut objects: Vec<ObjectInfo> = entries
            .into_iter()
            .filter(|entry| entry.metadata().mode().is_file())
            .map(|entry| ObjectInfo {
                size: entry.metadata().content_length(),
                path: entry.path().to_string(),
            })
            .collect();
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(prefix, count = objects.len(), "listed objects");
        Ok(objects)
    }

    pub async fn delete(&self, object: &str) -> Result<()> {
        let result = self
            .op
            .delete(object)
            .await
            .with_context(|| format!("deleting {object}"));
        logged("delete", object, result)?;
        info!(object, "object deleted");
        Ok(())
    }

    /// Header scheme of `object`, or `None` for a headerless legacy object.
    ///
    /// Only the first header bytes are fetched.
    pub async fn inspect(&self, object: &str) -> Result<Option<Scheme>> {
        let result = self.inspect_inner(object).await;
        logged("inspect", object, result)
    }

    async fn inspect_inner(&self, object: &str) -> Result<Option<Scheme>> {
        let meta = self
            .op
            .stat(object)
            .await
            .with_context(|| format!("stat {object}"))?;
        let len = meta.content_length().min(HEADER_SIZE as u64);
        if len == 0 {
            return Ok(None);
        }
        let prefix = self
            .op
            .read_with(object)
            .range(0..len)
            .await
            .with_context(|| format!("reading header of {object}"))?
            .to_bytes();
        Ok(inspect(&mut Cursor::new(prefix))?)
    }
}

fn logged<T>(action: &str, object: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        let reason = format!("{e:#}");
        error!(object, action, error = %reason, "storage operation failed");
    }
    result
}

/// Encrypt `source` into a fresh temp file, rewound for reading.
fn encrypt_to_spool(cipher: &ObjectCipher, object: &str, source: &mut dyn Read) -> Result<File> {
    let spool = tempfile::tempfile().context("creating spool file")?;
    let sink = cipher.encrypt(object, source, BufWriter::new(spool))?;
    let mut spool = sink
        .into_inner()
        .map_err(|e| e.into_error())
        .context("flushing spool file")?;
    spool.rewind().context("rewinding spool file")?;
    Ok(spool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use backcrypt_crypto::{CipherSuite, KdfId, MasterSecret};

    fn memory_store(secret: &str) -> EncryptedStore {
        let op = Operator::new(opendal::services::Memory::default())
            .expect("memory operator")
            .finish();
        EncryptedStore::new(
            op,
            ObjectCipher::new(MasterSecret::new(secret), CipherSuite::Aes256Gcm),
        )
    }

    #[tokio::test]
    async fn test_put_stores_ciphertext_with_header() {
        let store = memory_store("secret123");
        let object = "backups/2024-01-01T00-00-00Z-app.tar.gz";
        store.put(object, Bytes::from_static(b"hello")).await.unwrap();

        let raw = store.operator().read(object).await.unwrap().to_bytes();
        assert_eq!(&raw[..4], &[0xBA, 0x10, 0x00, 0x10]);
        assert!(!raw.windows(5).any(|w| w == b"hello"));
    }

    #[tokio::test]
    async fn test_inspect_header_and_empty() {
        let store = memory_store("secret123");
        store.put("a/headed", Bytes::from_static(b"x")).await.unwrap();
        store.operator().write("a/empty", Vec::<u8>::new()).await.unwrap();

        let scheme = store.inspect("a/headed").await.unwrap().unwrap();
        assert_eq!(scheme.kdf, KdfId::Scrypt);
        assert_eq!(store.inspect("a/empty").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_missing_object_fails() {
        let store = memory_store("secret123");
        let err = store.get("backups/missing").await.unwrap_err();
        assert!(format!("{err:#}").contains("backups/missing"));
    }

    #[tokio::test]
    async fn test_spool_is_rewound_and_complete() {
        let store = memory_store("secret123").with_chunk_size(1000);
        // not a multiple of the chunk size
        let raw = vec![0x5Au8; 4_321];
        store.operator().write("raw/blob", raw.clone()).await.unwrap();

        let mut spool = store.download_to_spool("raw/blob").await.unwrap();
        assert_eq!(spool.stream_position().unwrap(), 0);
        let mut copied = Vec::new();
        spool.read_to_end(&mut copied).unwrap();
        assert_eq!(copied, raw);
    }

    #[tokio::test]
    async fn test_multi_chunk_transfer_matches_stored_size() {
        let store = memory_store("secret123").with_chunk_size(4096);
        let object = "backups/2024-03-01T00-00-00Z-big.bin";
        let original: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();

        let stored = store.put(object, Bytes::from(original.clone())).await.unwrap();
        let meta = store.operator().stat(object).await.unwrap();
        assert_eq!(meta.content_length(), stored);

        assert_eq!(store.get(object).await.unwrap(), original);
    }

    #[test]
    fn test_chunk_size_never_zero() {
        let store = memory_store("secret123").with_chunk_size(0);
        assert_eq!(store.chunk_size, 1);
    }
}
