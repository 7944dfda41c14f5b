//! # Encryption Collaborator
//!
//! Optional password-based encryption for repository blobs. A master password
//! never touches the data directly: PBKDF2-HMAC-SHA256 derives a
//! key-encryption key (KEK) from the password and a per-repository salt, and
//! the KEK seals a random data-encryption key (DEK) that does the actual blob
//! work. Salt and sealed DEK live in `meta.txt` at the repository root, so an
//! encrypted repository is self-describing.
//!
//! ## Envelope format
//!
//! ```text
//! ┌─────────────┬──────────┬──────────────────────────────┐
//! │ version 0x30 │ IV (16B) │ AES-CBC ciphertext (PKCS#7) │
//! └─────────────┴──────────┴──────────────────────────────┘
//! ```
//!
//! AES-128 or AES-256 is selected by key length. The sealed DEK uses the same
//! envelope, URL-safe-base64 encoded into `meta.txt`.

use crate::error::{CryptoError, Result};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes256};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use rand::RngCore;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Name of the key-metadata file at the repository root.
pub const CRYPTO_META_FILENAME: &str = "meta.txt";

/// First byte of every envelope; bump when the format changes.
const CRYPTO_VERSION: u8 = 0x30;

const IV_LEN: usize = 16;
const SALT_LEN: usize = 16;
const DEK_LEN: usize = 32;
const PBKDF2_ROUNDS: u32 = 100_000;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Derives a 32-byte key-encryption key from a master password and salt.
pub fn derive_key_encryption_key(salt: &[u8], master_password: &str) -> [u8; 32] {
    let mut kek = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(master_password.as_bytes(), salt, PBKDF2_ROUNDS, &mut kek);
    kek
}

enum DataKey {
    Aes128([u8; 16]),
    Aes256([u8; 32]),
}

/// Symmetric cipher over the versioned CBC envelope.
pub struct Crypto {
    key: DataKey,
}

impl Crypto {
    /// Accepts a 16-byte (AES-128) or 32-byte (AES-256) key.
    pub fn new(key: &[u8]) -> Result<Self> {
        let key = match key.len() {
            16 => DataKey::Aes128(key.try_into().expect("length checked")),
            32 => DataKey::Aes256(key.try_into().expect("length checked")),
            other => return Err(CryptoError::UnsupportedKeyLength(other).into()),
        };
        Ok(Self { key })
    }

    /// Encrypts a byte sequence into a self-contained envelope.
    pub fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = match &self.key {
            DataKey::Aes128(key) => Aes128CbcEnc::new(key.into(), &iv.into())
                .encrypt_padded_vec_mut::<Pkcs7>(plain),
            DataKey::Aes256(key) => Aes256CbcEnc::new(key.into(), &iv.into())
                .encrypt_padded_vec_mut::<Pkcs7>(plain),
        };

        let mut out = Vec::with_capacity(1 + IV_LEN + ciphertext.len());
        out.push(CRYPTO_VERSION);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Decrypts an envelope produced by [`Crypto::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < 1 + IV_LEN {
            return Err(CryptoError::Truncated.into());
        }
        if data[0] != CRYPTO_VERSION {
            return Err(CryptoError::UnknownVersion(data[0]).into());
        }

        let iv: [u8; IV_LEN] = data[1..1 + IV_LEN].try_into().expect("length checked");
        let ciphertext = &data[1 + IV_LEN..];

        let plain = match &self.key {
            DataKey::Aes128(key) => Aes128CbcDec::new(key.into(), &iv.into())
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            DataKey::Aes256(key) => Aes256CbcDec::new(key.into(), &iv.into())
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };

        plain.map_err(|_| CryptoError::DecryptionFailed.into())
    }
}

// ─── Repository key metadata ────────────────────────────────────────────────

/// Whether a repository carries encryption metadata.
pub fn is_encrypted(backup_dir: &Path) -> bool {
    backup_dir.join(CRYPTO_META_FILENAME).exists()
}

fn read_meta(backup_dir: &Path) -> Result<BTreeMap<String, String>> {
    let path = backup_dir.join(CRYPTO_META_FILENAME);
    let content = fs::read_to_string(&path)?;

    let mut entries = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| CryptoError::MetaMalformed(format!("no '=' in line {line:?}")))?;
        entries.insert(
            key.trim().to_string(),
            value.trim().trim_matches('"').to_string(),
        );
    }
    Ok(entries)
}

fn write_meta(backup_dir: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
    let path = backup_dir.join(CRYPTO_META_FILENAME);
    let mut content = String::new();
    for (key, value) in entries {
        content.push_str(&format!("{key}=\"{value}\"\n"));
    }
    fs::write(&path, content)?;
    Ok(())
}

/// Provisions encryption for a fresh repository and returns the blob cipher.
///
/// Generates a random salt and DEK, seals the DEK under the password-derived
/// KEK, and records both in `meta.txt`.
pub fn setup_repository_key(backup_dir: &Path, master_password: &str) -> Result<Crypto> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut dek = [0u8; DEK_LEN];
    rand::thread_rng().fill_bytes(&mut dek);

    let kek = derive_key_encryption_key(&salt, master_password);
    let sealed_dek = Crypto::new(&kek)?.encrypt(&dek);

    let mut entries = BTreeMap::new();
    entries.insert("kek_salt".to_string(), URL_SAFE.encode(salt));
    entries.insert("dek_base64".to_string(), URL_SAFE.encode(sealed_dek));
    write_meta(backup_dir, &entries)?;

    Crypto::new(&dek)
}

/// Unseals the DEK of an existing encrypted repository.
pub fn open_repository_key(backup_dir: &Path, master_password: &str) -> Result<Crypto> {
    let entries = read_meta(backup_dir)?;
    let salt_b64 = entries
        .get("kek_salt")
        .ok_or(CryptoError::MetaEntryMissing("kek_salt"))?;
    let dek_b64 = entries
        .get("dek_base64")
        .ok_or(CryptoError::MetaEntryMissing("dek_base64"))?;

    let salt = URL_SAFE
        .decode(salt_b64)
        .map_err(|e| CryptoError::MetaMalformed(format!("kek_salt: {e}")))?;
    let sealed_dek = URL_SAFE
        .decode(dek_b64)
        .map_err(|e| CryptoError::MetaMalformed(format!("dek_base64: {e}")))?;

    let kek = derive_key_encryption_key(&salt, master_password);
    let dek = Crypto::new(&kek)?.decrypt(&sealed_dek)?;

    // A wrong password that survives unpadding still cannot produce a DEK of
    // a valid length except by accident.
    if dek.len() != DEK_LEN {
        return Err(CryptoError::DecryptionFailed.into());
    }
    Crypto::new(&dek)
}
