//! Files, directories and their encrypted metadata
//!
//! An object's `EncryptionKey` is carried inside its own metadata, which is
//! encrypted under the account hierarchy for the owner's view. The key never
//! changes after creation.

use crate::{
    types::{ItemType, RemoteFile, RemoteFolder},
    ClientError, Result,
};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use stratus_crypto::{EncryptionKey, KeyHierarchy};
use uuid::Uuid;

/// Plaintext file metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime: String,
    /// Base64 file key
    pub key: String,
    /// Milliseconds since the Unix epoch
    pub last_modified: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Plaintext directory metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMetadata {
    pub name: String,
    /// Base64 directory key
    pub key: String,
}

/// A file whose content upload has completed
#[derive(Clone, Debug)]
pub struct File {
    pub uuid: Uuid,
    pub parent: Uuid,
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub chunks: u64,
    pub key: EncryptionKey,
    pub last_modified: u64,
    /// Hex BLAKE3 of the plaintext content
    pub hash: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
}

impl File {
    /// Plaintext metadata of this file
    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            name: self.name.clone(),
            size: self.size,
            mime: self.mime.clone(),
            key: self.key.to_base64(),
            last_modified: self.last_modified,
            hash: self.hash.clone(),
        }
    }

    /// Decrypt a file from a directory listing
    pub fn decrypt(remote: &RemoteFile, hierarchy: &KeyHierarchy) -> Result<Self> {
        let plaintext = hierarchy.decrypt_meta(&remote.metadata)?;
        let meta: FileMetadata = serde_json::from_str(&plaintext)?;
        Ok(Self {
            uuid: remote.uuid,
            parent: remote.parent,
            key: EncryptionKey::from_base64(&meta.key)?,
            name: meta.name,
            mime: meta.mime,
            size: meta.size,
            chunks: remote.chunks,
            last_modified: meta.last_modified,
            hash: meta.hash,
            bucket: remote.bucket.clone(),
            region: remote.region.clone(),
        })
    }
}

/// A directory
#[derive(Clone, Debug)]
pub struct Directory {
    pub uuid: Uuid,
    pub parent: Uuid,
    pub name: String,
    pub key: EncryptionKey,
}

impl Directory {
    /// Create a directory with a fresh key
    pub fn new(parent: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            parent,
            name: name.into(),
            key: EncryptionKey::generate(),
        }
    }

    /// Plaintext metadata of this directory
    pub fn metadata(&self) -> DirectoryMetadata {
        DirectoryMetadata {
            name: self.name.clone(),
            key: self.key.to_base64(),
        }
    }

    /// Decrypt a directory from a directory listing
    pub fn decrypt(remote: &RemoteFolder, hierarchy: &KeyHierarchy) -> Result<Self> {
        let plaintext = hierarchy.decrypt_meta(&remote.metadata)?;
        let meta: DirectoryMetadata = serde_json::from_str(&plaintext)?;
        Ok(Self {
            uuid: remote.uuid,
            parent: remote.parent,
            key: EncryptionKey::from_base64(&meta.key)?,
            name: meta.name,
        })
    }
}

/// The account's top-level directory
#[derive(Clone, Debug)]
pub struct Root {
    pub uuid: Uuid,
}

/// Any object in the drive tree
#[derive(Clone, Debug)]
pub enum FileSystemObject {
    File(File),
    Directory(Directory),
    Root(Root),
}

impl FileSystemObject {
    /// Server-assigned identity
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::File(file) => file.uuid,
            Self::Directory(dir) => dir.uuid,
            Self::Root(root) => root.uuid,
        }
    }

    /// Parent directory, `None` for the root
    pub fn parent(&self) -> Option<Uuid> {
        match self {
            Self::File(file) => Some(file.parent),
            Self::Directory(dir) => Some(dir.parent),
            Self::Root(_) => None,
        }
    }

    /// Plaintext name
    pub fn name(&self) -> Result<&str> {
        match self {
            Self::File(file) => Ok(&file.name),
            Self::Directory(dir) => Ok(&dir.name),
            Self::Root(_) => Err(ClientError::UnsupportedObjectVariant("root has no name")),
        }
    }

    /// Wire tag; the root has none
    pub fn item_type(&self) -> Result<ItemType> {
        match self {
            Self::File(_) => Ok(ItemType::File),
            Self::Directory(_) => Ok(ItemType::Folder),
            Self::Root(_) => Err(ClientError::UnsupportedObjectVariant("root cannot be shared")),
        }
    }

    /// The object's own key
    pub fn key(&self) -> Result<&EncryptionKey> {
        match self {
            Self::File(file) => Ok(&file.key),
            Self::Directory(dir) => Ok(&dir.key),
            Self::Root(_) => Err(ClientError::UnsupportedObjectVariant("root has no key")),
        }
    }

    /// Plaintext metadata JSON, re-encrypted per target when propagating
    pub fn plain_metadata(&self) -> Result<String> {
        let json = match self {
            Self::File(file) => serde_json::to_string(&file.metadata())?,
            Self::Directory(dir) => serde_json::to_string(&dir.metadata())?,
            Self::Root(_) => {
                return Err(ClientError::UnsupportedObjectVariant("root has no metadata"))
            }
        };
        Ok(json)
    }

    /// Metadata for the owner's own view
    pub fn encrypt_metadata(&self, hierarchy: &KeyHierarchy) -> Result<String> {
        Ok(hierarchy.encrypt_meta(&self.plain_metadata()?)?)
    }
}

impl From<File> for FileSystemObject {
    fn from(file: File) -> Self {
        Self::File(file)
    }
}

impl From<Directory> for FileSystemObject {
    fn from(dir: Directory) -> Self {
        Self::Directory(dir)
    }
}

/// A file that exists locally but whose content is not uploaded yet
#[derive(Clone, Debug)]
pub struct IncompleteFile {
    pub uuid: Uuid,
    pub parent: Uuid,
    pub name: String,
    pub mime: String,
    pub key: EncryptionKey,
    pub last_modified: u64,
}

impl IncompleteFile {
    /// New file stub with a fresh identity and key; the MIME type is guessed from the name
    pub fn new(parent: Uuid, name: impl Into<String>) -> Self {
        let name = name.into();
        let mime = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            uuid: Uuid::new_v4(),
            parent,
            name,
            mime,
            key: EncryptionKey::generate(),
            last_modified: now_millis(),
        }
    }

    /// Override the guessed MIME type
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = mime.into();
        self
    }

    /// Set the modification time (milliseconds since the Unix epoch)
    pub fn with_last_modified(mut self, millis: u64) -> Self {
        self.last_modified = millis;
        self
    }

    /// Promote to a complete file once the server accepted the upload
    pub(crate) fn complete(
        self,
        size: u64,
        chunks: u64,
        hash: String,
        location: Option<crate::types::StorageLocation>,
    ) -> File {
        let (bucket, region) = match location {
            Some(loc) => (Some(loc.bucket), Some(loc.region)),
            None => (None, None),
        };
        File {
            uuid: self.uuid,
            parent: self.parent,
            name: self.name,
            mime: self.mime,
            size,
            chunks,
            key: self.key,
            last_modified: self.last_modified,
            hash: Some(hash),
            bucket,
            region,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_crypto::{DataKey, KeyPair, MasterKey};

    fn hierarchy() -> KeyHierarchy {
        KeyHierarchy::current(3, DataKey::generate(), KeyPair::generate()).unwrap()
    }

    #[test]
    fn test_incomplete_file_guesses_mime() {
        let file = IncompleteFile::new(Uuid::new_v4(), "report.pdf");
        assert_eq!(file.mime, "application/pdf");

        let file = IncompleteFile::new(Uuid::new_v4(), "no-extension");
        assert_eq!(file.mime, "application/octet-stream");
    }

    #[test]
    fn test_file_metadata_roundtrip_through_listing() {
        let hierarchy = hierarchy();
        let file = IncompleteFile::new(Uuid::new_v4(), "notes.txt").complete(
            12,
            1,
            "abcd".into(),
            None,
        );
        let object = FileSystemObject::from(file.clone());

        let remote = RemoteFile {
            uuid: file.uuid,
            parent: file.parent,
            metadata: object.encrypt_metadata(&hierarchy).unwrap(),
            chunks: 1,
            bucket: Some("b".into()),
            region: Some("r".into()),
        };
        let decrypted = File::decrypt(&remote, &hierarchy).unwrap();
        assert_eq!(decrypted.name, "notes.txt");
        assert_eq!(decrypted.key, file.key);
        assert_eq!(decrypted.hash.as_deref(), Some("abcd"));
        assert_eq!(decrypted.bucket.as_deref(), Some("b"));
    }

    #[test]
    fn test_directory_under_foreign_hierarchy_is_key_mismatch() {
        let dir = Directory::new(Uuid::new_v4(), "photos");
        let remote = RemoteFolder {
            uuid: dir.uuid,
            parent: dir.parent,
            metadata: FileSystemObject::from(dir)
                .encrypt_metadata(&hierarchy())
                .unwrap(),
        };

        let other =
            KeyHierarchy::legacy(2, vec![MasterKey::generate()], KeyPair::generate()).unwrap();
        let err = Directory::decrypt(&remote, &other).unwrap_err();
        assert!(err.is_key_mismatch());
    }

    #[test]
    fn test_root_is_rejected_where_a_variant_matters() {
        let root = FileSystemObject::Root(Root { uuid: Uuid::new_v4() });
        assert!(root.parent().is_none());
        assert!(matches!(
            root.item_type(),
            Err(ClientError::UnsupportedObjectVariant(_))
        ));
        assert!(matches!(
            root.plain_metadata(),
            Err(ClientError::UnsupportedObjectVariant(_))
        ));
    }
}
