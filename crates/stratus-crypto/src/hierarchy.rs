//! The account key hierarchy
//!
//! Auth versions 1 and 2 protect the owner's metadata with an ordered ring of
//! master keys: encryption uses the newest key, decryption scans the ring from
//! oldest to newest and takes the first key that authenticates. Auth version
//! 3 replaces the ring with a single DEK; there is no fallback search.
//!
//! The hierarchy only covers the owner's own view of the tree. Shares are
//! sealed to the recipient's public key and links use their own link key.

use crate::{
    hpke::Decryptor,
    keys::{DataKey, EncryptionKey, Kek, KeyPair, MasterKey, PublicKey, KEY_SIZE},
    search::HmacKey,
    symmetric::{seal_blob, BlobVersion, ParsedBlob},
    CryptoError, Result,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

const LEGACY_METADATA_INFO: &[u8] = b"stratus-metadata-v2";
const HMAC_KEY_INFO: &[u8] = b"stratus-search-hmac-v1";

/// Account authentication version
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct AuthVersion(u8);

impl AuthVersion {
    /// First version that uses the DEK instead of the master-key ring
    pub const DEK: AuthVersion = AuthVersion(3);

    /// Validate a raw auth version
    pub fn new(version: u8) -> Result<Self> {
        if version == 0 {
            return Err(CryptoError::UnsupportedAuthVersion(version));
        }
        Ok(Self(version))
    }

    /// Whether this version uses the master-key ring
    pub fn is_legacy(&self) -> bool {
        self.0 < Self::DEK.0
    }

    /// The raw version number
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

enum WrappingKeys {
    /// Derived AEAD keys, oldest first
    Ring(Vec<Zeroizing<[u8; KEY_SIZE]>>),
    Dek(DataKey),
}

/// Holds the keys that protect an account's metadata
pub struct KeyHierarchy {
    auth_version: AuthVersion,
    keys: WrappingKeys,
    keypair: KeyPair,
    hmac_key: HmacKey,
}

impl KeyHierarchy {
    /// Build a legacy hierarchy from the master-key ring (oldest first)
    pub fn legacy(auth_version: u8, master_keys: Vec<MasterKey>, keypair: KeyPair) -> Result<Self> {
        let auth_version = AuthVersion::new(auth_version)?;
        if !auth_version.is_legacy() {
            return Err(CryptoError::UnsupportedAuthVersion(auth_version.as_u8()));
        }
        if master_keys.is_empty() {
            return Err(CryptoError::InvalidKey("master key ring is empty".to_string()));
        }
        let ring = master_keys
            .iter()
            .map(derive_legacy_key)
            .collect::<Result<Vec<_>>>()?;
        Self::assemble(auth_version, WrappingKeys::Ring(ring), keypair)
    }

    /// Build a current hierarchy around the account DEK
    pub fn current(auth_version: u8, dek: DataKey, keypair: KeyPair) -> Result<Self> {
        let auth_version = AuthVersion::new(auth_version)?;
        if auth_version.is_legacy() {
            return Err(CryptoError::UnsupportedAuthVersion(auth_version.as_u8()));
        }
        Self::assemble(auth_version, WrappingKeys::Dek(dek), keypair)
    }

    /// Build a current hierarchy from a DEK stored wrapped under the KEK
    pub fn from_wrapped_dek(
        auth_version: u8,
        kek: &Kek,
        wrapped_dek: &str,
        keypair: KeyPair,
    ) -> Result<Self> {
        let dek = kek.unwrap_dek(wrapped_dek)?;
        Self::current(auth_version, dek, keypair)
    }

    fn assemble(auth_version: AuthVersion, keys: WrappingKeys, keypair: KeyPair) -> Result<Self> {
        let hmac_key = derive_hmac_key(&keypair)?;
        Ok(Self {
            auth_version,
            keys,
            keypair,
            hmac_key,
        })
    }

    /// The account's auth version
    pub fn auth_version(&self) -> AuthVersion {
        self.auth_version
    }

    /// The account public key, published to users sharing with us
    pub fn public_key(&self) -> &PublicKey {
        self.keypair.public_key()
    }

    /// The account keypair
    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Key for search-index and name hashing
    pub fn hmac_key(&self) -> &HmacKey {
        &self.hmac_key
    }

    /// Encrypt a metadata string with the current wrapping key
    pub fn encrypt_meta(&self, plaintext: &str) -> Result<String> {
        match &self.keys {
            WrappingKeys::Ring(ring) => {
                // `legacy` rejects empty rings
                let newest = ring.last().ok_or(CryptoError::KeyMismatch)?;
                seal_blob(newest, BlobVersion::Legacy, plaintext.as_bytes())
            }
            WrappingKeys::Dek(dek) => seal_blob(dek.as_bytes(), BlobVersion::Current, plaintext.as_bytes()),
        }
    }

    /// Decrypt a metadata blob.
    ///
    /// Fails with [`CryptoError::KeyMismatch`] when no key of the hierarchy
    /// authenticates the blob.
    pub fn decrypt_meta(&self, blob: &str) -> Result<String> {
        let parsed = ParsedBlob::parse(blob)?;
        let plaintext = match &self.keys {
            WrappingKeys::Ring(ring) => ring
                .iter()
                .find_map(|key| parsed.open(key).ok())
                .ok_or(CryptoError::KeyMismatch)?,
            WrappingKeys::Dek(dek) => parsed
                .open(dek.as_bytes())
                .map_err(|_| CryptoError::KeyMismatch)?,
        };
        String::from_utf8(plaintext).map_err(|e| CryptoError::Decryption(e.to_string()))
    }

    /// Wrap a per-object key for the owner's view
    pub fn wrap_key(&self, key: &EncryptionKey) -> Result<String> {
        self.encrypt_meta(&key.to_base64())
    }

    /// Unwrap a per-object key produced by [`KeyHierarchy::wrap_key`]
    pub fn unwrap_key(&self, wrapped: &str) -> Result<EncryptionKey> {
        let encoded = Zeroizing::new(self.decrypt_meta(wrapped)?);
        EncryptionKey::from_base64(&encoded)
    }

    /// Open metadata another user sealed to this account's public key
    pub fn open_sealed(&self, sealed: &str) -> Result<String> {
        Decryptor::new(&self.keypair).open_str(sealed)
    }
}

impl std::fmt::Debug for KeyHierarchy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = match &self.keys {
            WrappingKeys::Ring(ring) => format!("Ring({})", ring.len()),
            WrappingKeys::Dek(_) => "Dek".to_string(),
        };
        f.debug_struct("KeyHierarchy")
            .field("auth_version", &self.auth_version)
            .field("keys", &keys)
            .finish_non_exhaustive()
    }
}

fn hkdf_expand(ikm: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(info, &mut okm[..])
        .map_err(|e| CryptoError::InvalidKey(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

fn derive_legacy_key(master: &MasterKey) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    hkdf_expand(master.as_bytes(), LEGACY_METADATA_INFO)
}

fn derive_hmac_key(keypair: &KeyPair) -> Result<HmacKey> {
    let okm = hkdf_expand(keypair.secret_key().as_bytes(), HMAC_KEY_INFO)?;
    HmacKey::from_bytes(&okm[..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpke::Encryptor;
    use rstest::rstest;

    fn ring(n: usize) -> Vec<MasterKey> {
        (0..n).map(|_| MasterKey::generate()).collect()
    }

    fn hierarchy_for(version: u8) -> KeyHierarchy {
        if version < 3 {
            KeyHierarchy::legacy(version, ring(3), KeyPair::generate()).unwrap()
        } else {
            KeyHierarchy::current(version, DataKey::generate(), KeyPair::generate()).unwrap()
        }
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    fn test_wrap_unwrap_roundtrip(#[case] version: u8) {
        let hierarchy = hierarchy_for(version);
        let key = EncryptionKey::generate();
        let wrapped = hierarchy.wrap_key(&key).unwrap();
        assert_eq!(hierarchy.unwrap_key(&wrapped).unwrap(), key);
    }

    #[test]
    fn test_legacy_decrypts_with_older_ring_entry() {
        let keys = ring(2);
        let keypair = KeyPair::generate();
        let old = KeyHierarchy::legacy(2, vec![keys[0].clone()], keypair.clone()).unwrap();
        let blob = old.encrypt_meta("{\"name\":\"old.txt\"}").unwrap();

        let mut rotated = keys.clone();
        rotated.push(MasterKey::generate());
        let hierarchy = KeyHierarchy::legacy(2, rotated, keypair).unwrap();
        assert_eq!(hierarchy.decrypt_meta(&blob).unwrap(), "{\"name\":\"old.txt\"}");
    }

    #[test]
    fn test_legacy_encrypts_with_newest_key() {
        let keys = ring(3);
        let keypair = KeyPair::generate();
        let full = KeyHierarchy::legacy(1, keys.clone(), keypair.clone()).unwrap();
        let blob = full.encrypt_meta("meta").unwrap();

        let newest_only = KeyHierarchy::legacy(1, vec![keys[2].clone()], keypair.clone()).unwrap();
        assert_eq!(newest_only.decrypt_meta(&blob).unwrap(), "meta");

        let oldest_only = KeyHierarchy::legacy(1, vec![keys[0].clone()], keypair).unwrap();
        assert!(matches!(oldest_only.decrypt_meta(&blob), Err(CryptoError::KeyMismatch)));
    }

    #[test]
    fn test_legacy_all_keys_fail_is_key_mismatch() {
        let blob = hierarchy_for(2).encrypt_meta("meta").unwrap();
        let other = hierarchy_for(2);
        assert!(matches!(other.decrypt_meta(&blob), Err(CryptoError::KeyMismatch)));
    }

    #[test]
    fn test_dek_failure_is_immediate_key_mismatch() {
        let blob = hierarchy_for(3).encrypt_meta("meta").unwrap();
        assert!(blob.starts_with("003"));
        let other = hierarchy_for(3);
        assert!(matches!(other.decrypt_meta(&blob), Err(CryptoError::KeyMismatch)));
    }

    #[test]
    fn test_current_rejects_legacy_blob() {
        let legacy_blob = hierarchy_for(2).encrypt_meta("meta").unwrap();
        assert!(matches!(
            hierarchy_for(3).decrypt_meta(&legacy_blob),
            Err(CryptoError::KeyMismatch)
        ));
    }

    #[test]
    fn test_malformed_blob_is_not_key_mismatch() {
        assert!(matches!(
            hierarchy_for(3).decrypt_meta("nonsense"),
            Err(CryptoError::InvalidCiphertext(_))
        ));
    }

    #[test]
    fn test_version_guards() {
        assert!(KeyHierarchy::legacy(3, ring(1), KeyPair::generate()).is_err());
        assert!(KeyHierarchy::current(2, DataKey::generate(), KeyPair::generate()).is_err());
        assert!(KeyHierarchy::legacy(0, ring(1), KeyPair::generate()).is_err());
        assert!(KeyHierarchy::legacy(1, vec![], KeyPair::generate()).is_err());
    }

    #[test]
    fn test_from_wrapped_dek() {
        let kek = Kek::generate();
        let dek = DataKey::generate();
        let keypair = KeyPair::generate();
        let direct = KeyHierarchy::current(3, dek.clone(), keypair.clone()).unwrap();
        let blob = direct.encrypt_meta("meta").unwrap();

        let wrapped = kek.wrap_dek(&dek).unwrap();
        let restored = KeyHierarchy::from_wrapped_dek(3, &kek, &wrapped, keypair).unwrap();
        assert_eq!(restored.decrypt_meta(&blob).unwrap(), "meta");
    }

    #[test]
    fn test_hmac_key_follows_keypair() {
        let keypair = KeyPair::generate();
        let a = KeyHierarchy::current(3, DataKey::generate(), keypair.clone()).unwrap();
        let b = KeyHierarchy::legacy(2, ring(1), keypair).unwrap();
        assert_eq!(a.hmac_key().as_bytes(), b.hmac_key().as_bytes());
    }

    #[test]
    fn test_open_sealed() {
        let hierarchy = hierarchy_for(3);
        let sealed = Encryptor::new(hierarchy.public_key()).seal_str("shared").unwrap();
        assert_eq!(hierarchy.open_sealed(&sealed).unwrap(), "shared");
    }
}
