//! Search tokens for server-side filename indexing
//!
//! A name is split into every contiguous substring of 2 to 16 characters plus
//! the whole normalized name. Each token is HMAC-SHA256 hashed with the
//! account's HMAC key, so the server can match query hashes against index
//! hashes without learning either side in plaintext.

use crate::{keys::KEY_SIZE, CryptoError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeSet;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shortest substring emitted as a token
pub const MIN_TOKEN_CHARS: usize = 2;

/// Longest substring emitted as a token (the full name is exempt)
pub const MAX_TOKEN_CHARS: usize = 16;

/// Upper bound on tokens generated for one name
pub const MAX_TOKENS: usize = 4096;

type HmacSha256 = Hmac<Sha256>;

/// Key for search-index and name hashing
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HmacKey {
    key: [u8; KEY_SIZE],
}

impl HmacKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "HMAC key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Hex-encoded HMAC-SHA256 of `data`
    pub fn sign_hex(&self, data: &[u8]) -> String {
        // HMAC accepts keys of any length
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .expect("HMAC accepts any key length");
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HmacKey([REDACTED])")
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Split a name into its sorted, deduplicated search tokens.
///
/// Sorted by character length, then by Unicode code point; truncated to
/// [`MAX_TOKENS`] from the long end. Code-point order is not locale
/// collation (`"fa"` sorts before `"éb"`), which only matters for which
/// equal-length tokens survive the cap.
pub fn tokenize(name: &str) -> Vec<String> {
    let normalized = normalize(name);
    let chars: Vec<char> = normalized.chars().collect();

    let mut tokens = BTreeSet::new();
    for start in 0..chars.len() {
        let longest = MAX_TOKEN_CHARS.min(chars.len() - start);
        for len in MIN_TOKEN_CHARS..=longest {
            tokens.insert(TokenOrder(chars[start..start + len].iter().collect()));
        }
    }
    tokens.insert(TokenOrder(normalized));

    tokens
        .into_iter()
        .take(MAX_TOKENS)
        .map(|token| token.0)
        .collect()
}

/// HMAC hash of every token of `name`, in token order
pub fn generate_index_hashes(name: &str, key: &HmacKey) -> Vec<String> {
    tokenize(name)
        .iter()
        .map(|token| key.sign_hex(token.as_bytes()))
        .collect()
}

/// Hash of the normalized full name, for exact-name lookups
pub fn hash_name(name: &str, key: &HmacKey) -> String {
    key.sign_hex(normalize(name).as_bytes())
}

/// Orders tokens by character count, then by code point
#[derive(PartialEq, Eq)]
struct TokenOrder(String);

impl Ord for TokenOrder {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .chars()
            .count()
            .cmp(&other.0.chars().count())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for TokenOrder {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
