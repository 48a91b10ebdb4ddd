//! Symmetric encryption using AES-GCM and ChaCha20-Poly1305
//!
//! This module provides authenticated encryption for file chunks and the
//! version-tagged metadata blobs used throughout the key hierarchy.

use crate::{
    keys::{EncryptionKey, KEY_SIZE, NONCE_SIZE},
    CryptoError, Result,
};
use aes_gcm::{aead::Aead as AeadTrait, Aes256Gcm, KeyInit};
use base64::Engine;
use chacha20poly1305::ChaCha20Poly1305;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Length of the version prefix on metadata blobs
pub const BLOB_VERSION_LEN: usize = 3;

/// A nonce for AEAD encryption
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonce {
    bytes: [u8; NONCE_SIZE],
}

impl Nonce {
    /// Generate a random nonce
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::RngCore::fill_bytes(&mut OsRng, &mut bytes);
        Self { bytes }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonce(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; NONCE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Get the nonce bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.bytes
    }
}

/// Supported AEAD ciphers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AeadCipher {
    /// AES-256-GCM
    #[default]
    Aes256Gcm,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305,
}

impl AeadCipher {
    /// Get the algorithm identifier string
    pub fn algorithm_id(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "AES-256-GCM",
            Self::ChaCha20Poly1305 => "ChaCha20-Poly1305",
        }
    }

    /// Get the authentication tag size
    pub fn tag_size(&self) -> usize {
        16
    }
}

/// AEAD encryption/decryption interface
pub struct Aead {
    cipher: AeadCipher,
    key: [u8; KEY_SIZE],
}

impl Aead {
    /// Create a new AEAD instance with the given key bytes and cipher
    pub fn new(key: &[u8; KEY_SIZE], cipher: AeadCipher) -> Self {
        Self { cipher, key: *key }
    }

    /// Create with the default cipher (AES-256-GCM)
    pub fn new_default(key: &[u8; KEY_SIZE]) -> Self {
        Self::new(key, AeadCipher::default())
    }

    /// Encrypt data with the given nonce
    pub fn encrypt(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self.cipher {
            AeadCipher::Aes256Gcm => {
                let nonce_arr = aes_gcm::Nonce::from_slice(nonce.as_bytes());
                let cipher = Aes256Gcm::new_from_slice(&self.key)
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?;
                cipher
                    .encrypt(nonce_arr, plaintext)
                    .map_err(|e| CryptoError::Encryption(e.to_string()))
            }
            AeadCipher::ChaCha20Poly1305 => {
                let nonce_arr = chacha20poly1305::Nonce::from_slice(nonce.as_bytes());
                let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?;
                cipher
                    .encrypt(nonce_arr, plaintext)
                    .map_err(|e| CryptoError::Encryption(e.to_string()))
            }
        }
    }

    /// Decrypt data with the given nonce
    pub fn decrypt(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match self.cipher {
            AeadCipher::Aes256Gcm => {
                let nonce_arr = aes_gcm::Nonce::from_slice(nonce.as_bytes());
                let cipher = Aes256Gcm::new_from_slice(&self.key)
                    .map_err(|e| CryptoError::Decryption(e.to_string()))?;
                cipher
                    .decrypt(nonce_arr, ciphertext)
                    .map_err(|e| CryptoError::Decryption(e.to_string()))
            }
            AeadCipher::ChaCha20Poly1305 => {
                let nonce_arr = chacha20poly1305::Nonce::from_slice(nonce.as_bytes());
                let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
                    .map_err(|e| CryptoError::Decryption(e.to_string()))?;
                cipher
                    .decrypt(nonce_arr, ciphertext)
                    .map_err(|e| CryptoError::Decryption(e.to_string()))
            }
        }
    }

    /// Get the cipher type
    pub fn cipher(&self) -> AeadCipher {
        self.cipher
    }
}

/// Encrypt a file chunk. Output layout: `nonce || ciphertext+tag`.
pub fn encrypt_data(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = Nonce::generate();
    let ciphertext = Aead::new_default(key.as_bytes()).encrypt(&nonce, plaintext)?;
    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(nonce.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a chunk produced by [`encrypt_data`]
pub fn decrypt_data(key: &EncryptionKey, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::InvalidCiphertext(format!(
            "chunk shorter than nonce: {} bytes",
            data.len()
        )));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
    Aead::new_default(key.as_bytes()).decrypt(&Nonce::from_bytes(nonce)?, ciphertext)
}

/// Version tag of a metadata blob
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobVersion {
    /// Master-key ring blobs and per-object/link key blobs
    Legacy,
    /// DEK blobs
    Current,
}

impl BlobVersion {
    /// The wire prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Legacy => "002",
            Self::Current => "003",
        }
    }

    /// Parse the prefix of a blob
    pub fn detect(blob: &str) -> Result<Self> {
        match blob.get(..BLOB_VERSION_LEN) {
            Some("002") => Ok(Self::Legacy),
            Some("003") => Ok(Self::Current),
            other => Err(CryptoError::InvalidCiphertext(format!(
                "unknown metadata version {:?}",
                other
            ))),
        }
    }
}

/// Encrypt `plaintext` into a version-tagged blob:
/// `prefix || base64(nonce || ciphertext+tag)`
pub fn seal_blob(key: &[u8; KEY_SIZE], version: BlobVersion, plaintext: &[u8]) -> Result<String> {
    let nonce = Nonce::generate();
    let ciphertext = Aead::new_default(key).encrypt(&nonce, plaintext)?;
    let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    payload.extend_from_slice(nonce.as_bytes());
    payload.extend_from_slice(&ciphertext);
    Ok(format!(
        "{}{}",
        version.prefix(),
        base64::engine::general_purpose::STANDARD.encode(payload)
    ))
}

/// A decoded metadata blob, ready to be tried against one or more keys
#[derive(Debug)]
pub struct ParsedBlob {
    /// Version tag of the blob
    pub version: BlobVersion,
    nonce: Nonce,
    ciphertext: Vec<u8>,
}

impl ParsedBlob {
    /// Decode the version tag, nonce and ciphertext of a blob
    pub fn parse(blob: &str) -> Result<Self> {
        let version = BlobVersion::detect(blob)?;
        let payload = base64::engine::general_purpose::STANDARD.decode(&blob[BLOB_VERSION_LEN..])?;
        if payload.len() < NONCE_SIZE {
            return Err(CryptoError::InvalidCiphertext(
                "metadata blob shorter than nonce".to_string(),
            ));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_SIZE);
        Ok(Self {
            version,
            nonce: Nonce::from_bytes(nonce)?,
            ciphertext: ciphertext.to_vec(),
        })
    }

    /// Attempt decryption with a single key
    pub fn open(&self, key: &[u8; KEY_SIZE]) -> Result<Vec<u8>> {
        Aead::new_default(key).decrypt(&self.nonce, &self.ciphertext)
    }
}

/// Decrypt a blob produced by [`seal_blob`]. The version tag is validated but
/// not matched against the key; callers pick the key.
pub fn open_blob(key: &[u8; KEY_SIZE], blob: &str) -> Result<Vec<u8>> {
    ParsedBlob::parse(blob)?.open(key)
}

/// Encrypt a UTF-8 string under a per-object or link key
pub fn encrypt_with_key(key: &EncryptionKey, plaintext: &str) -> Result<String> {
    seal_blob(key.as_bytes(), BlobVersion::Legacy, plaintext.as_bytes())
}

/// Decrypt a string produced by [`encrypt_with_key`]
pub fn decrypt_with_key(key: &EncryptionKey, blob: &str) -> Result<String> {
    let bytes = open_blob(key.as_bytes(), blob)?;
    String::from_utf8(bytes).map_err(|e| CryptoError::Decryption(e.to_string()))
}
