//! In-memory transport for testing
//!
//! Keeps a small model of the server (directory tree, share and link
//! membership, the latest metadata copy per target) and records every write
//! request in order. Failures can be injected per operation or per chunk.

use crate::{
    object::FileSystemObject, transport::Transport, types::*, ClientError, Result,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stratus_crypto::{KeyHierarchy, PublicKey};
use uuid::Uuid;

/// Transport operations, for failure injection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    UploadChunk,
    CompleteUpload,
    CompleteEmptyUpload,
    ShareRecipients,
    ItemLinks,
    RecipientPublicKey,
    ListSubtree,
    ShareItem,
    UpdateSharedItem,
    AddLinkItem,
    UpdateLinkItem,
    SubmitSearchIndex,
}

/// A write request as the server received it
#[derive(Clone, Debug)]
pub enum RecordedCall {
    UploadChunk(ChunkUpload),
    CompleteUpload(UploadDone),
    CompleteEmptyUpload(EmptyUploadDone),
    ShareItem(ShareRequest),
    UpdateSharedItem(SharedItemUpdate),
    AddLinkItem(LinkAddRequest),
    UpdateLinkItem(LinkItemUpdate),
    SubmitSearchIndex(Vec<SearchIndexItem>),
}

#[derive(Clone, Copy, Debug)]
enum Failure {
    Times(usize),
    Always,
}

#[derive(Default)]
struct Inner {
    calls: Mutex<Vec<RecordedCall>>,
    users: DashMap<String, (u64, PublicKey)>,
    next_user_id: AtomicU64,
    folders: DashMap<Uuid, RemoteFolder>,
    files: DashMap<Uuid, RemoteFile>,
    recipients: DashMap<Uuid, Vec<ShareRecipient>>,
    links: DashMap<Uuid, Vec<ItemLink>>,
    shared_copies: DashMap<(Uuid, u64), String>,
    link_copies: DashMap<(Uuid, Uuid), String>,
    locations: DashMap<Uuid, StorageLocation>,
    failures: DashMap<Operation, Failure>,
    failing_chunks: DashMap<u64, usize>,
}

/// An in-memory drive API
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    /// Create a new empty server
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user that items can be shared with, returning their id
    pub fn register_user(&self, email: impl Into<String>, public_key: PublicKey) -> u64 {
        let id = self.inner.next_user_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.users.insert(email.into(), (id, public_key));
        id
    }

    /// Store an object in the directory tree, encrypted for the owner
    pub fn insert_object(&self, object: &FileSystemObject, hierarchy: &KeyHierarchy) -> Result<()> {
        let metadata = object.encrypt_metadata(hierarchy)?;
        match object {
            FileSystemObject::File(file) => {
                self.inner.files.insert(
                    file.uuid,
                    RemoteFile {
                        uuid: file.uuid,
                        parent: file.parent,
                        metadata,
                        chunks: file.chunks,
                        bucket: file.bucket.clone(),
                        region: file.region.clone(),
                    },
                );
            }
            FileSystemObject::Directory(dir) => {
                self.inner.folders.insert(
                    dir.uuid,
                    RemoteFolder {
                        uuid: dir.uuid,
                        parent: dir.parent,
                        metadata,
                    },
                );
            }
            FileSystemObject::Root(_) => {
                return Err(ClientError::UnsupportedObjectVariant("root is implicit"))
            }
        }
        Ok(())
    }

    /// Make an operation fail the next `times` calls
    pub fn fail_times(&self, op: Operation, times: usize) {
        self.inner.failures.insert(op, Failure::Times(times));
    }

    /// Make an operation fail until [`MemoryTransport::clear_failures`]
    pub fn fail_always(&self, op: Operation) {
        self.inner.failures.insert(op, Failure::Always);
    }

    /// Make uploads of one chunk index fail the next `times` attempts
    pub fn fail_chunk(&self, index: u64, times: usize) {
        self.inner.failing_chunks.insert(index, times);
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.inner.failures.clear();
        self.inner.failing_chunks.clear();
    }

    /// Every write request, in arrival order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.calls.lock().clone()
    }

    /// Forget recorded requests, keeping server state
    pub fn clear_calls(&self) {
        self.inner.calls.lock().clear();
    }

    /// Chunk uploads received
    pub fn chunk_uploads(&self) -> Vec<ChunkUpload> {
        self.filter_calls(|call| match call {
            RecordedCall::UploadChunk(c) => Some(c.clone()),
            _ => None,
        })
    }

    /// Non-empty completions received
    pub fn completions(&self) -> Vec<UploadDone> {
        self.filter_calls(|call| match call {
            RecordedCall::CompleteUpload(c) => Some(c.clone()),
            _ => None,
        })
    }

    /// Empty-file completions received
    pub fn empty_completions(&self) -> Vec<EmptyUploadDone> {
        self.filter_calls(|call| match call {
            RecordedCall::CompleteEmptyUpload(c) => Some(c.clone()),
            _ => None,
        })
    }

    /// Share-create requests received
    pub fn share_requests(&self) -> Vec<ShareRequest> {
        self.filter_calls(|call| match call {
            RecordedCall::ShareItem(c) => Some(c.clone()),
            _ => None,
        })
    }

    /// Share-update requests received
    pub fn share_updates(&self) -> Vec<SharedItemUpdate> {
        self.filter_calls(|call| match call {
            RecordedCall::UpdateSharedItem(c) => Some(c.clone()),
            _ => None,
        })
    }

    /// Link-add requests received
    pub fn link_adds(&self) -> Vec<LinkAddRequest> {
        self.filter_calls(|call| match call {
            RecordedCall::AddLinkItem(c) => Some(c.clone()),
            _ => None,
        })
    }

    /// Link-update requests received
    pub fn link_updates(&self) -> Vec<LinkItemUpdate> {
        self.filter_calls(|call| match call {
            RecordedCall::UpdateLinkItem(c) => Some(c.clone()),
            _ => None,
        })
    }

    /// Search-index submissions received
    pub fn search_submissions(&self) -> Vec<Vec<SearchIndexItem>> {
        self.filter_calls(|call| match call {
            RecordedCall::SubmitSearchIndex(c) => Some(c.clone()),
            _ => None,
        })
    }

    /// The recipient's current copy of an item's metadata
    pub fn shared_copy(&self, uuid: Uuid, receiver_id: u64) -> Option<String> {
        self.inner
            .shared_copies
            .get(&(uuid, receiver_id))
            .map(|entry| entry.value().clone())
    }

    /// The link's current copy of an item's metadata
    pub fn link_copy(&self, uuid: Uuid, link_uuid: Uuid) -> Option<String> {
        self.inner
            .link_copies
            .get(&(uuid, link_uuid))
            .map(|entry| entry.value().clone())
    }

    /// Number of items the server knows about
    pub fn len(&self) -> usize {
        self.inner.folders.len() + self.inner.files.len()
    }

    /// Check if the tree is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filter_calls<T>(&self, f: impl Fn(&RecordedCall) -> Option<T>) -> Vec<T> {
        self.inner.calls.lock().iter().filter_map(f).collect()
    }

    fn record(&self, call: RecordedCall) {
        self.inner.calls.lock().push(call);
    }

    fn check(&self, op: Operation) -> Result<()> {
        let mut exhausted = false;
        let failing = match self.inner.failures.get_mut(&op) {
            Some(mut entry) => {
                let current = *entry;
                match current {
                    Failure::Always => true,
                    Failure::Times(0) => false,
                    Failure::Times(n) => {
                        *entry = Failure::Times(n - 1);
                        exhausted = n == 1;
                        true
                    }
                }
            }
            None => false,
        };
        if exhausted {
            self.inner.failures.remove(&op);
        }
        if failing {
            return Err(ClientError::Transport(format!("injected failure: {:?}", op)));
        }
        Ok(())
    }

    fn check_chunk(&self, index: u64) -> Result<()> {
        let failing = match self.inner.failing_chunks.get_mut(&index) {
            Some(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        if failing {
            return Err(ClientError::Transport(format!("injected failure: chunk {}", index)));
        }
        Ok(())
    }

    fn user(&self, email: &str) -> Result<(u64, PublicKey)> {
        self.inner
            .users
            .get(email)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ClientError::Api {
                code: "user_not_found".into(),
                message: format!("no user {}", email),
            })
    }

    fn item_exists(&self, uuid: &Uuid) -> bool {
        self.inner.folders.contains_key(uuid) || self.inner.files.contains_key(uuid)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn upload_chunk(&self, chunk: ChunkUpload) -> Result<StorageLocation> {
        self.record(RecordedCall::UploadChunk(chunk.clone()));
        self.check(Operation::UploadChunk)?;
        self.check_chunk(chunk.index)?;

        let location = self
            .inner
            .locations
            .entry(chunk.uuid)
            .or_insert_with(|| StorageLocation {
                bucket: "stratus-bucket-1".into(),
                region: "eu-central".into(),
            })
            .value()
            .clone();
        Ok(location)
    }

    async fn complete_upload(&self, done: UploadDone) -> Result<()> {
        self.record(RecordedCall::CompleteUpload(done.clone()));
        self.check(Operation::CompleteUpload)?;

        let location = self
            .inner
            .locations
            .get(&done.uuid)
            .map(|entry| entry.value().clone());
        self.inner.files.insert(
            done.uuid,
            RemoteFile {
                uuid: done.uuid,
                parent: done.parent,
                metadata: done.metadata,
                chunks: done.chunks,
                bucket: location.as_ref().map(|l| l.bucket.clone()),
                region: location.map(|l| l.region),
            },
        );
        Ok(())
    }

    async fn complete_empty_upload(&self, done: EmptyUploadDone) -> Result<()> {
        self.record(RecordedCall::CompleteEmptyUpload(done.clone()));
        self.check(Operation::CompleteEmptyUpload)?;

        self.inner.files.insert(
            done.uuid,
            RemoteFile {
                uuid: done.uuid,
                parent: done.parent,
                metadata: done.metadata,
                chunks: 0,
                bucket: None,
                region: None,
            },
        );
        Ok(())
    }

    async fn share_recipients(&self, uuid: Uuid) -> Result<Vec<ShareRecipient>> {
        self.check(Operation::ShareRecipients)?;
        Ok(self
            .inner
            .recipients
            .get(&uuid)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn item_links(&self, uuid: Uuid) -> Result<Vec<ItemLink>> {
        self.check(Operation::ItemLinks)?;
        Ok(self
            .inner
            .links
            .get(&uuid)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn recipient_public_key(&self, email: &str) -> Result<PublicKey> {
        self.check(Operation::RecipientPublicKey)?;
        Ok(self.user(email)?.1)
    }

    async fn list_subtree(&self, uuid: Uuid) -> Result<DirectoryListing> {
        self.check(Operation::ListSubtree)?;

        let mut listing = DirectoryListing::default();
        let mut pending = VecDeque::from([uuid]);
        while let Some(dir) = pending.pop_front() {
            for entry in self.inner.folders.iter().filter(|f| f.parent == dir) {
                pending.push_back(entry.uuid);
                listing.folders.push(entry.value().clone());
            }
            listing.files.extend(
                self.inner
                    .files
                    .iter()
                    .filter(|f| f.parent == dir)
                    .map(|entry| entry.value().clone()),
            );
        }
        Ok(listing)
    }

    async fn share_item(&self, request: ShareRequest) -> Result<()> {
        self.record(RecordedCall::ShareItem(request.clone()));
        self.check(Operation::ShareItem)?;

        let (id, public_key) = self.user(&request.email)?;
        let mut recipients = self.inner.recipients.entry(request.uuid).or_default();
        if !recipients.iter().any(|r| r.id == id) {
            recipients.push(ShareRecipient {
                id,
                email: request.email.clone(),
                public_key: public_key.to_base64(),
            });
        }
        drop(recipients);
        self.inner
            .shared_copies
            .insert((request.uuid, id), request.metadata);
        Ok(())
    }

    async fn update_shared_item(&self, update: SharedItemUpdate) -> Result<()> {
        self.record(RecordedCall::UpdateSharedItem(update.clone()));
        self.check(Operation::UpdateSharedItem)?;

        let key = (update.uuid, update.receiver_id);
        if !self.inner.shared_copies.contains_key(&key) {
            return Err(ClientError::Api {
                code: "not_shared".into(),
                message: format!("{} is not shared with {}", update.uuid, update.receiver_id),
            });
        }
        self.inner.shared_copies.insert(key, update.metadata);
        Ok(())
    }

    async fn add_link_item(&self, request: LinkAddRequest) -> Result<()> {
        self.record(RecordedCall::AddLinkItem(request.clone()));
        self.check(Operation::AddLinkItem)?;

        let mut links = self.inner.links.entry(request.uuid).or_default();
        if !links.iter().any(|l| l.link_uuid == request.link_uuid) {
            links.push(ItemLink {
                link_uuid: request.link_uuid,
                link_key: request.key.clone(),
            });
        }
        drop(links);
        self.inner
            .link_copies
            .insert((request.uuid, request.link_uuid), request.metadata);
        Ok(())
    }

    async fn update_link_item(&self, update: LinkItemUpdate) -> Result<()> {
        self.record(RecordedCall::UpdateLinkItem(update.clone()));
        self.check(Operation::UpdateLinkItem)?;

        let key = (update.uuid, update.link_uuid);
        if !self.inner.link_copies.contains_key(&key) {
            return Err(ClientError::Api {
                code: "not_linked".into(),
                message: format!("{} is not in link {}", update.uuid, update.link_uuid),
            });
        }
        self.inner.link_copies.insert(key, update.metadata);
        Ok(())
    }

    async fn submit_search_index(&self, items: Vec<SearchIndexItem>) -> Result<()> {
        self.record(RecordedCall::SubmitSearchIndex(items.clone()));
        self.check(Operation::SubmitSearchIndex)?;

        if let Some(item) = items.iter().find(|item| !self.item_exists(&item.uuid)) {
            return Err(ClientError::Api {
                code: "item_not_found".into(),
                message: format!("cannot index unknown item {}", item.uuid),
            });
        }
        Ok(())
    }
}
