use std::io::{Cursor, Read, Write};

use backcrypt_crypto::{
    derive_key, CipherSuite, DecryptReader, DerivedKey, EncryptWriter, KdfId, MasterSecret,
    ObjectCipher,
};

const OBJECT: &str = "backups/2023-01-01T00-00-00Z-app.tar.gz";

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

fn bench_key() -> DerivedKey {
    DerivedKey::from_bytes([0xAB; 32])
}

fn seal(key: &DerivedKey, suite: CipherSuite, data: &[u8]) -> Vec<u8> {
    let mut writer = EncryptWriter::new(Vec::with_capacity(data.len() + 64), key, suite);
    writer.write_all(data).unwrap();
    writer.finish().unwrap()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_aes(bencher: divan::Bencher, size: usize) {
    let key = bench_key();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| seal(&key, CipherSuite::Aes256Gcm, divan::black_box(&data)));
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_chacha(bencher: divan::Bencher, size: usize) {
    let key = bench_key();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| seal(&key, CipherSuite::ChaCha20Poly1305, divan::black_box(&data)));
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt_aes(bencher: divan::Bencher, size: usize) {
    let key = bench_key();
    let encrypted = seal(&key, CipherSuite::Aes256Gcm, &make_data(size));
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut out = Vec::with_capacity(size);
            DecryptReader::new(divan::black_box(&encrypted[..]), &key, CipherSuite::Aes256Gcm)
                .read_to_end(&mut out)
                .unwrap();
            out
        });
}

#[divan::bench(sample_count = 5)]
fn bench_derive_scrypt() -> DerivedKey {
    let secret = MasterSecret::new("secret123");
    derive_key(KdfId::Scrypt, &secret, divan::black_box(OBJECT)).unwrap()
}

/// Worst case for a headerless object: both legacy generations are derived.
#[divan::bench(sample_count = 5)]
fn bench_legacy_probe(bencher: divan::Bencher) {
    let secret = MasterSecret::new("secret123");
    let key = derive_key(KdfId::LegacyScryptHkdf, &secret, OBJECT).unwrap();
    let encrypted = seal(&key, CipherSuite::Aes256Gcm, &make_data(4096));
    let cipher = ObjectCipher::new(secret, CipherSuite::Aes256Gcm);
    bencher.bench(|| {
        let mut out = Vec::new();
        cipher
            .decrypt(OBJECT, Cursor::new(divan::black_box(&encrypted[..])), &mut out)
            .unwrap()
    });
}

fn main() {
    divan::main();
}
