//! # Stratus Crypto
//!
//! Cryptographic primitives for the Stratus end-to-end-encrypted drive client.
//!
//! This crate provides:
//! - **Key hierarchy**: legacy master-key ring or DEK/KEK, wrapping per-object keys
//! - **Symmetric AEAD**: AES-256-GCM for file chunks and metadata blobs
//! - **Sealing**: X25519-based public-key encryption of shared metadata
//! - **Search tokens**: substring tokenization with HMAC-SHA256 hashing
//! - **BLAKE3**: content hashing for uploads
//!
//! ## Security Model
//!
//! - All encryption happens client-side
//! - Plaintext names, sizes and MIME types never leave the client unencrypted
//! - Every copy of an item's metadata is encrypted for exactly one audience
//!
//! ## Example
//!
//! ```rust,ignore
//! use stratus_crypto::{DataKey, EncryptionKey, KeyHierarchy, KeyPair};
//!
//! let hierarchy = KeyHierarchy::current(3, DataKey::generate(), KeyPair::generate())?;
//! let key = EncryptionKey::generate();
//! let wrapped = hierarchy.wrap_key(&key)?;
//! assert_eq!(hierarchy.unwrap_key(&wrapped)?, key);
//! ```

pub mod error;
pub mod hashing;
pub mod hierarchy;
pub mod hpke;
pub mod keys;
pub mod search;
pub mod symmetric;

pub use error::{CryptoError, Result};
pub use hashing::{Blake3Hash, IncrementalHasher};
pub use hierarchy::{AuthVersion, KeyHierarchy};
pub use hpke::{Decryptor, Encryptor, SealedData};
pub use keys::{DataKey, EncryptionKey, Kek, KeyPair, MasterKey, PublicKey, SecretKey};
pub use search::{generate_index_hashes, hash_name, tokenize, HmacKey};
pub use symmetric::{Aead, AeadCipher, Nonce};

/// The version of the sealing format
pub const CRYPTO_VERSION: u8 = 1;
