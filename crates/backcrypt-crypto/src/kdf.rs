//! Key derivation for every object key generation.
//!
//! All generations are deterministic in (master secret, object basename).
//! Keys for existing objects are only reproducible if these functions stay
//! bit-for-bit identical, so none of the constants here may change.

use hkdf::Hkdf;
use md5::Md5;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::header::KdfId;
use crate::keys::{DerivedKey, MasterSecret};
use crate::KEY_SIZE;

/// scrypt cost: N = 2^15 = 32768
pub const SCRYPT_LOG_N: u8 = 15;
pub const SCRYPT_R: u32 = 8;
pub const SCRYPT_P: u32 = 1;

/// Final path element of an object identifier, used as per-object salt material.
///
/// Trailing slashes are ignored; `""` maps to `"."` and `"///"` to `"/"`.
pub fn object_nonce(object: &str) -> &str {
    if object.is_empty() {
        return ".";
    }
    let trimmed = object.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Derive the key of `object` for the given generation.
///
/// `Unknown` has no direct derivation; headerless objects go through
/// [`crate::recovery::recover_legacy_key`] instead.
pub fn derive_key(
    kdf: KdfId,
    secret: &MasterSecret,
    object: &str,
) -> Result<DerivedKey, CryptoError> {
    match kdf {
        KdfId::Scrypt => derive_scrypt(secret, object),
        KdfId::LegacyMd5 => derive_legacy_md5(secret),
        KdfId::LegacyScryptHkdf => derive_legacy_scrypt_hkdf(secret, object),
        KdfId::Unknown => Err(CryptoError::UnsupportedKdf(kdf)),
    }
}

/// sha256(secret || basename)
fn object_salt(secret: &MasterSecret, object: &str) -> [u8; 32] {
    Sha256::new()
        .chain_update(secret.as_bytes())
        .chain_update(object_nonce(object).as_bytes())
        .finalize()
        .into()
}

fn scrypt_into(
    kdf: KdfId,
    password: &[u8],
    salt: &[u8],
    out: &mut [u8; KEY_SIZE],
) -> Result<(), CryptoError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_SIZE)
        .map_err(|e| CryptoError::derivation(kdf, format!("invalid scrypt params: {e}")))?;
    scrypt::scrypt(password, salt, &params, out)
        .map_err(|e| CryptoError::derivation(kdf, format!("scrypt failed: {e}")))
}

fn derive_scrypt(secret: &MasterSecret, object: &str) -> Result<DerivedKey, CryptoError> {
    let mut salt = object_salt(secret, object);
    let mut key = [0u8; KEY_SIZE];
    let result = scrypt_into(KdfId::Scrypt, secret.as_bytes(), &salt, &mut key);
    salt.zeroize();
    result?;
    Ok(DerivedKey::from_bytes(key))
}

/// The 32 lowercase hex characters of md5(secret) are the key bytes.
fn derive_legacy_md5(secret: &MasterSecret) -> Result<DerivedKey, CryptoError> {
    let mut digest = Md5::digest(secret.as_bytes());
    let mut key = [0u8; KEY_SIZE];
    let result = hex::encode_to_slice(digest.as_slice(), &mut key);
    digest.as_mut_slice().zeroize();
    result.map_err(|e| CryptoError::derivation(KdfId::LegacyMd5, e))?;
    Ok(DerivedKey::from_bytes(key))
}

/// scrypt over the hex-encoded object salt, then HKDF-SHA256 with the
/// basename as HKDF salt and an empty info string.
fn derive_legacy_scrypt_hkdf(
    secret: &MasterSecret,
    object: &str,
) -> Result<DerivedKey, CryptoError> {
    let kdf = KdfId::LegacyScryptHkdf;
    let mut salt = object_salt(secret, object);
    let mut hex_salt = [0u8; 64];
    let encoded = hex::encode_to_slice(salt, &mut hex_salt);
    salt.zeroize();
    encoded.map_err(|e| CryptoError::derivation(kdf, e))?;

    let mut master = [0u8; KEY_SIZE];
    let stretched = scrypt_into(kdf, secret.as_bytes(), &hex_salt, &mut master);
    hex_salt.zeroize();
    stretched?;

    let hkdf = Hkdf::<Sha256>::new(Some(object_nonce(object).as_bytes()), &master);
    master.zeroize();
    let mut key = [0u8; KEY_SIZE];
    hkdf.expand(&[], &mut key)
        .map_err(|e| CryptoError::derivation(kdf, format!("HKDF expand failed: {e}")))?;
    Ok(DerivedKey::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "secret123";
    const OBJECT: &str = "backups/2023-01-01T00-00-00Z-app.tar.gz";

    fn key_hex(key: &DerivedKey) -> String {
        hex::encode(key.as_bytes())
    }

    #[test]
    fn test_object_nonce() {
        assert_eq!(object_nonce("backups/db/dump.gz"), "dump.gz");
        assert_eq!(object_nonce("dump.gz"), "dump.gz");
        assert_eq!(object_nonce("backups/db/"), "db");
        assert_eq!(object_nonce("/dump.gz"), "dump.gz");
        assert_eq!(object_nonce(""), ".");
        assert_eq!(object_nonce("///"), "/");
    }

    #[test]
    fn test_scrypt_known_answer() {
        let key = derive_key(KdfId::Scrypt, &MasterSecret::new(SECRET), OBJECT).unwrap();
        assert_eq!(
            key_hex(&key),
            "c5ec01863769acb48debfedaa7fa443cf78638208fd3a641eecc81f3e5a9a89c"
        );
    }

    #[test]
    fn test_legacy_md5_known_answer() {
        let key = derive_key(KdfId::LegacyMd5, &MasterSecret::new(SECRET), OBJECT).unwrap();
        assert_eq!(key.as_bytes(), b"5d7845ac6ee7cfffafc5fe5f35cf666d");
    }

    #[test]
    fn test_legacy_scrypt_hkdf_known_answer() {
        let key = derive_key(KdfId::LegacyScryptHkdf, &MasterSecret::new(SECRET), OBJECT).unwrap();
        assert_eq!(
            key_hex(&key),
            "1db82986f18d69f2035ca67b52699570bc3f1bfc18707b4e3cdec6d69b8c1424"
        );
    }

    #[test]
    fn test_scrypt_uses_basename_only() {
        let secret = MasterSecret::new(SECRET);
        let full = derive_key(KdfId::Scrypt, &secret, OBJECT).unwrap();
        let bare = derive_key(KdfId::Scrypt, &secret, "2023-01-01T00-00-00Z-app.tar.gz").unwrap();
        assert_eq!(full.as_bytes(), bare.as_bytes());
    }

    #[test]
    fn test_scrypt_inputs_change_key() {
        let base = derive_key(KdfId::Scrypt, &MasterSecret::new(SECRET), OBJECT).unwrap();
        let other_secret = derive_key(KdfId::Scrypt, &MasterSecret::new("secret124"), OBJECT).unwrap();
        let other_object = derive_key(
            KdfId::Scrypt,
            &MasterSecret::new(SECRET),
            "backups/2023-01-02T00-00-00Z-app.tar.gz",
        )
        .unwrap();

        assert_ne!(base.as_bytes(), other_secret.as_bytes());
        assert_ne!(base.as_bytes(), other_object.as_bytes());
    }

    #[test]
    fn test_legacy_md5_ignores_object() {
        let secret = MasterSecret::new(SECRET);
        let a = derive_key(KdfId::LegacyMd5, &secret, "a").unwrap();
        let b = derive_key(KdfId::LegacyMd5, &secret, "b").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_unknown_kdf_not_derivable() {
        let result = derive_key(KdfId::Unknown, &MasterSecret::new(SECRET), OBJECT);
        assert!(matches!(
            result,
            Err(CryptoError::UnsupportedKdf(KdfId::Unknown))
        ));
    }
}
