//! Request and response types exchanged with the drive API

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use stratus_crypto::PublicKey;
use uuid::Uuid;

/// Wire tag for a file or directory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    File,
    Folder,
}

impl ItemType {
    /// Wire string
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::File => "file",
            ItemType::Folder => "folder",
        }
    }
}

/// How long a public link stays valid
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkExpiration {
    #[default]
    #[serde(rename = "never")]
    Never,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "7d")]
    OneWeek,
    #[serde(rename = "14d")]
    TwoWeeks,
    #[serde(rename = "30d")]
    ThirtyDays,
}

/// Serializes a missing parent as the `"none"` sentinel
mod parent_or_none {
    use super::*;

    const NONE: &str = "none";

    pub fn serialize<S: Serializer>(parent: &Option<Uuid>, s: S) -> Result<S::Ok, S::Error> {
        match parent {
            Some(uuid) => uuid.serialize(s),
            None => s.serialize_str(NONE),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Uuid>, D::Error> {
        let raw = String::deserialize(d)?;
        if raw == NONE {
            return Ok(None);
        }
        Uuid::parse_str(&raw).map(Some).map_err(serde::de::Error::custom)
    }
}

/// One encrypted chunk of file content
#[derive(Clone, Debug)]
pub struct ChunkUpload {
    pub uuid: Uuid,
    pub index: u64,
    pub parent: Uuid,
    pub upload_key: String,
    /// `nonce || ciphertext`
    pub data: Bytes,
}

/// Where the server stores an object's chunks
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub bucket: String,
    pub region: String,
}

/// Completion request for a non-empty upload
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDone {
    pub uuid: Uuid,
    /// Name under the file key
    pub name: String,
    pub name_hashed: String,
    /// Decimal size under the file key
    pub size: String,
    pub chunks: u64,
    /// MIME type under the file key
    pub mime: String,
    /// Random removal token
    pub rm: String,
    /// File metadata under the account hierarchy
    pub metadata: String,
    pub version: u8,
    pub upload_key: String,
    pub parent: Uuid,
}

/// Completion request for a zero-length file
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmptyUploadDone {
    pub uuid: Uuid,
    pub name: String,
    pub name_hashed: String,
    /// `"0"` under the file key
    pub size: String,
    pub parent: Uuid,
    pub mime: String,
    pub metadata: String,
    pub version: u8,
}

/// A user an item is shared with
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRecipient {
    pub id: u64,
    pub email: String,
    /// Base64 X25519 public key
    pub public_key: String,
}

impl ShareRecipient {
    /// Decode the recipient's public key
    pub fn public_key(&self) -> stratus_crypto::Result<PublicKey> {
        PublicKey::from_base64(&self.public_key)
    }
}

/// A public link an item belongs to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemLink {
    pub link_uuid: Uuid,
    /// Link key wrapped under the owner's hierarchy
    pub link_key: String,
}

/// Create a share of one item for one recipient
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    pub uuid: Uuid,
    #[serde(with = "parent_or_none")]
    pub parent: Option<Uuid>,
    pub email: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// Metadata sealed to the recipient's public key
    pub metadata: String,
}

/// Replace the metadata of an existing share
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedItemUpdate {
    pub uuid: Uuid,
    /// Current parent, so a moved item can be re-parented in the recipient's view
    #[serde(with = "parent_or_none")]
    pub parent: Option<Uuid>,
    pub receiver_id: u64,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub metadata: String,
}

/// Add one item to a public link
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkAddRequest {
    pub uuid: Uuid,
    #[serde(with = "parent_or_none")]
    pub parent: Option<Uuid>,
    pub link_uuid: Uuid,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// Metadata under the link key
    pub metadata: String,
    /// Link key wrapped under the owner's hierarchy
    pub key: String,
    pub expiration: LinkExpiration,
}

/// Replace the metadata of an item already in a link
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkItemUpdate {
    pub uuid: Uuid,
    /// Current parent, so a moved item can be re-parented inside the link
    #[serde(with = "parent_or_none")]
    pub parent: Option<Uuid>,
    pub link_uuid: Uuid,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub metadata: String,
}

/// A directory below the listed one
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFolder {
    pub uuid: Uuid,
    pub parent: Uuid,
    /// Directory metadata under the owner's hierarchy
    pub metadata: String,
}

/// A file below the listed directory
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub uuid: Uuid,
    pub parent: Uuid,
    /// File metadata under the owner's hierarchy
    pub metadata: String,
    pub chunks: u64,
    pub bucket: Option<String>,
    pub region: Option<String>,
}

/// Every descendant of a directory, still encrypted
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub folders: Vec<RemoteFolder>,
    pub files: Vec<RemoteFile>,
}

impl DirectoryListing {
    /// Number of descendants
    pub fn len(&self) -> usize {
        self.folders.len() + self.files.len()
    }

    /// True when the directory has no descendants
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One search token for one item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexItem {
    pub uuid: Uuid,
    pub hash: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
}

/// API response envelope
#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse<T> {
    pub status: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: String,
    pub data: Option<T>,
}
