//! The boundary between the engine and the drive API

use crate::{types::*, Result};
use async_trait::async_trait;
use std::sync::Arc;
use stratus_crypto::PublicKey;
use uuid::Uuid;

/// Requests the engine sends to the drive API.
///
/// Everything passed in is already encrypted for its audience. Implementors
/// own retries and timeouts; the engine never retries.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Store one encrypted chunk, returning where the object lives
    async fn upload_chunk(&self, chunk: ChunkUpload) -> Result<StorageLocation>;

    /// Finish a non-empty upload
    async fn complete_upload(&self, done: UploadDone) -> Result<()>;

    /// Finish a zero-length upload
    async fn complete_empty_upload(&self, done: EmptyUploadDone) -> Result<()>;

    /// Users the item is currently shared with
    async fn share_recipients(&self, uuid: Uuid) -> Result<Vec<ShareRecipient>>;

    /// Public links the item currently belongs to
    async fn item_links(&self, uuid: Uuid) -> Result<Vec<ItemLink>>;

    /// Look up a user's public key by email
    async fn recipient_public_key(&self, email: &str) -> Result<PublicKey>;

    /// Every folder and file below a directory, recursively
    async fn list_subtree(&self, uuid: Uuid) -> Result<DirectoryListing>;

    /// Share an item with a user
    async fn share_item(&self, request: ShareRequest) -> Result<()>;

    /// Replace a recipient's copy of an item's metadata
    async fn update_shared_item(&self, update: SharedItemUpdate) -> Result<()>;

    /// Add an item to a public link
    async fn add_link_item(&self, request: LinkAddRequest) -> Result<()>;

    /// Replace a link's copy of an item's metadata
    async fn update_link_item(&self, update: LinkItemUpdate) -> Result<()>;

    /// Submit search-index tokens
    async fn submit_search_index(&self, items: Vec<SearchIndexItem>) -> Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn upload_chunk(&self, chunk: ChunkUpload) -> Result<StorageLocation> {
        (**self).upload_chunk(chunk).await
    }

    async fn complete_upload(&self, done: UploadDone) -> Result<()> {
        (**self).complete_upload(done).await
    }

    async fn complete_empty_upload(&self, done: EmptyUploadDone) -> Result<()> {
        (**self).complete_empty_upload(done).await
    }

    async fn share_recipients(&self, uuid: Uuid) -> Result<Vec<ShareRecipient>> {
        (**self).share_recipients(uuid).await
    }

    async fn item_links(&self, uuid: Uuid) -> Result<Vec<ItemLink>> {
        (**self).item_links(uuid).await
    }

    async fn recipient_public_key(&self, email: &str) -> Result<PublicKey> {
        (**self).recipient_public_key(email).await
    }

    async fn list_subtree(&self, uuid: Uuid) -> Result<DirectoryListing> {
        (**self).list_subtree(uuid).await
    }

    async fn share_item(&self, request: ShareRequest) -> Result<()> {
        (**self).share_item(request).await
    }

    async fn update_shared_item(&self, update: SharedItemUpdate) -> Result<()> {
        (**self).update_shared_item(update).await
    }

    async fn add_link_item(&self, request: LinkAddRequest) -> Result<()> {
        (**self).add_link_item(request).await
    }

    async fn update_link_item(&self, update: LinkItemUpdate) -> Result<()> {
        (**self).update_link_item(update).await
    }

    async fn submit_search_index(&self, items: Vec<SearchIndexItem>) -> Result<()> {
        (**self).submit_search_index(items).await
    }
}
