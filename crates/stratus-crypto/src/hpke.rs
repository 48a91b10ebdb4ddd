//! Public-key sealing for shares
//!
//! Metadata shared with another user is sealed to the recipient's X25519
//! public key: an ephemeral key agreement produces a one-time AEAD key, so
//! every sealed blob is independent even for identical plaintexts.
//!
//! This takes the place of RSA-OAEP public-key encryption. Recipients publish
//! an X25519 key instead of an RSA key, and the AEAD key is the BLAKE3
//! derived key of the shared secret under a fixed context. Sealed blobs are
//! not interchangeable with RSA-encrypted metadata.

use crate::{
    keys::{KeyPair, PublicKey, SecretKey},
    symmetric::{Aead, AeadCipher, Nonce},
    CryptoError, Result, CRYPTO_VERSION,
};
use base64::Engine;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

/// Key-derivation context for sealed metadata
const SEAL_CONTEXT: &str = "stratus-share-seal-v1";

mod base64_array_serde {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let vec = base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)?;
        vec.try_into()
            .map_err(|v: Vec<u8>| serde::de::Error::custom(format!("expected 32 bytes, got {}", v.len())))
    }
}

mod base64_vec_serde {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

/// Sealed data with everything the recipient needs to open it
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct SealedData {
    /// Version of the sealing format
    pub version: u8,
    /// The sender's ephemeral public key
    #[serde(with = "base64_array_serde")]
    pub ephemeral_public: [u8; 32],
    /// The nonce used for AEAD
    pub nonce: Nonce,
    /// The AEAD cipher used
    pub cipher: AeadCipher,
    /// The encrypted payload
    #[serde(with = "base64_vec_serde")]
    pub ciphertext: Vec<u8>,
}

impl SealedData {
    /// Encode as a transport string (base64 of the JSON envelope)
    pub fn to_base64(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    /// Decode a transport string
    pub fn from_base64(s: &str) -> Result<Self> {
        let json = base64::engine::general_purpose::STANDARD.decode(s)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Seals data to a recipient's public key
pub struct Encryptor {
    recipient_public: PublicKey,
    cipher: AeadCipher,
}

impl Encryptor {
    /// Create a new encryptor for the given recipient
    pub fn new(recipient_public: &PublicKey) -> Self {
        Self {
            recipient_public: recipient_public.clone(),
            cipher: AeadCipher::default(),
        }
    }

    /// Use a specific AEAD cipher
    pub fn with_cipher(mut self, cipher: AeadCipher) -> Self {
        self.cipher = cipher;
        self
    }

    /// Seal data for the recipient
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<SealedData> {
        let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
        let ephemeral_public = X25519Public::from(&ephemeral_secret);

        let recipient_x25519 = X25519Public::from(*self.recipient_public.as_bytes());
        let shared_secret = ephemeral_secret.diffie_hellman(&recipient_x25519);
        let key = derive_seal_key(shared_secret.as_bytes());

        let nonce = Nonce::generate();
        let ciphertext = Aead::new(&key, self.cipher).encrypt(&nonce, plaintext)?;

        Ok(SealedData {
            version: CRYPTO_VERSION,
            ephemeral_public: *ephemeral_public.as_bytes(),
            nonce,
            cipher: self.cipher,
            ciphertext,
        })
    }

    /// Seal a UTF-8 string and encode it for transport
    pub fn seal_str(&self, plaintext: &str) -> Result<String> {
        self.encrypt(plaintext.as_bytes())?.to_base64()
    }
}

/// Opens data sealed to our public key
pub struct Decryptor {
    secret: SecretKey,
}

impl Decryptor {
    /// Create a new decryptor with the recipient's key pair
    pub fn new(keypair: &KeyPair) -> Self {
        Self {
            secret: keypair.secret_key().clone(),
        }
    }

    /// Create with the secret key directly
    pub fn from_secret_key(secret: &SecretKey) -> Self {
        Self {
            secret: secret.clone(),
        }
    }

    /// Open sealed data
    pub fn decrypt(&self, sealed: &SealedData) -> Result<Vec<u8>> {
        if sealed.version != CRYPTO_VERSION {
            return Err(CryptoError::InvalidCiphertext(format!(
                "unsupported seal version {}",
                sealed.version
            )));
        }
        let recipient_secret = StaticSecret::from(*self.secret.as_bytes());
        let ephemeral_public = X25519Public::from(sealed.ephemeral_public);
        let shared_secret = recipient_secret.diffie_hellman(&ephemeral_public);
        let key = derive_seal_key(shared_secret.as_bytes());

        Aead::new(&key, sealed.cipher)
            .decrypt(&sealed.nonce, &sealed.ciphertext)
            .map_err(|_| CryptoError::KeyMismatch)
    }

    /// Open a transport string produced by [`Encryptor::seal_str`]
    pub fn open_str(&self, sealed: &str) -> Result<String> {
        let bytes = self.decrypt(&SealedData::from_base64(sealed)?)?;
        String::from_utf8(bytes).map_err(|e| CryptoError::Decryption(e.to_string()))
    }
}

fn derive_seal_key(shared_secret: &[u8]) -> [u8; 32] {
    *crate::hashing::derive_key(SEAL_CONTEXT, shared_secret).as_bytes()
}
