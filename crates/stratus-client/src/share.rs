//! Share and public-link propagation
//!
//! Every recipient and every public link holds its own encrypted copy of an
//! item's metadata: sealed to the recipient's public key, or encrypted under
//! the link key. These copies are rebuilt from the current plaintext metadata
//! on every call and never cached. All calls are safe to re-run after a
//! partial failure.

use crate::{
    fanout::{cancellable, fan_out, Job},
    object::{Directory, File, FileSystemObject},
    transport::Transport,
    types::*,
    ClientError, Result,
};
use std::sync::Arc;
use stratus_crypto::{symmetric::encrypt_with_key, EncryptionKey, Encryptor, KeyHierarchy, PublicKey};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

/// A public link created by [`SharePropagator::public_link_item`]
#[derive(Clone, Debug)]
pub struct LinkRecord {
    /// The linked item
    pub uuid: Uuid,
    pub link_uuid: Uuid,
    /// Symmetric key every item in the link is encrypted under
    pub key: EncryptionKey,
    /// The linked item's metadata under the link key
    pub metadata: String,
    pub expiration: LinkExpiration,
}

/// One item to propagate, with its plaintext metadata prepared once
struct Target {
    uuid: Uuid,
    parent: Option<Uuid>,
    item_type: ItemType,
    metadata: String,
}

impl Target {
    fn new(object: &FileSystemObject, parent: Option<Uuid>) -> Result<Self> {
        Ok(Self {
            uuid: object.uuid(),
            parent,
            item_type: object.item_type()?,
            metadata: object.plain_metadata()?,
        })
    }
}

/// A link whose key has been unwrapped for this call
struct OpenLink {
    link_uuid: Uuid,
    wrapped_key: String,
    key: EncryptionKey,
}

/// Keeps shares and public links consistent with an item's metadata
#[derive(Clone)]
pub struct SharePropagator {
    transport: Arc<dyn Transport>,
    hierarchy: Arc<KeyHierarchy>,
    max_concurrency: usize,
}

impl SharePropagator {
    /// Create a propagator running at most `max_concurrency` requests at once
    pub fn new(
        transport: Arc<dyn Transport>,
        hierarchy: Arc<KeyHierarchy>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            transport,
            hierarchy,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Re-encrypt an item's current metadata for every existing recipient and
    /// link, after a rename, move or content change. Only update requests are
    /// sent.
    #[instrument(skip(self, item, cancel), fields(uuid = %item.uuid()))]
    pub async fn update_shared_item(
        &self,
        item: &FileSystemObject,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let target = Target::new(item, item.parent())?;
        let (recipients, links) = cancellable(cancel, async {
            tokio::try_join!(
                self.transport.share_recipients(target.uuid),
                self.transport.item_links(target.uuid)
            )
        })
        .await?;

        if recipients.is_empty() && links.is_empty() {
            return Ok(());
        }
        let links = self.open_links(links)?;
        debug!(
            recipients = recipients.len(),
            links = links.len(),
            "updating shared copies"
        );

        let target = &target;
        let mut jobs = Vec::with_capacity(recipients.len() + links.len());
        for recipient in recipients {
            jobs.push(Job::new(format!("recipient {}", recipient.email), async move {
                let sealed = Encryptor::new(&recipient.public_key()?).seal_str(&target.metadata)?;
                self.transport
                    .update_shared_item(SharedItemUpdate {
                        uuid: target.uuid,
                        parent: target.parent,
                        receiver_id: recipient.id,
                        item_type: target.item_type,
                        metadata: sealed,
                    })
                    .await
            }));
        }
        for link in &links {
            jobs.push(Job::new(format!("link {}", link.link_uuid), async move {
                let metadata = encrypt_with_key(&link.key, &target.metadata)?;
                self.transport
                    .update_link_item(LinkItemUpdate {
                        uuid: target.uuid,
                        parent: target.parent,
                        link_uuid: link.link_uuid,
                        item_type: target.item_type,
                        metadata,
                    })
                    .await
            }));
        }

        fan_out(jobs, self.max_concurrency, cancel).await
    }

    /// Add a newly created or moved item to every share and link of its
    /// parent. A directory brings its whole subtree along. No-op when the
    /// parent is neither shared nor linked.
    #[instrument(skip(self, item, cancel), fields(uuid = %item.uuid()))]
    pub async fn update_item_with_maybe_shared_parent(
        &self,
        item: &FileSystemObject,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // Validates the variant before any request goes out
        item.item_type()?;
        let parent = item
            .parent()
            .ok_or(ClientError::UnsupportedObjectVariant("root has no parent"))?;

        let (recipients, links) = cancellable(cancel, async {
            tokio::try_join!(
                self.transport.share_recipients(parent),
                self.transport.item_links(parent)
            )
        })
        .await?;

        if recipients.is_empty() && links.is_empty() {
            debug!("parent is neither shared nor linked");
            return Ok(());
        }
        let links = self.open_links(links)?;

        // The item itself first, so descendants never arrive before their parent
        let top = [Target::new(item, Some(parent))?];
        fan_out(
            self.membership_jobs(&top, &recipients, &links),
            self.max_concurrency,
            cancel,
        )
        .await?;

        let descendants = self.subtree_targets(item, cancel).await?;
        debug!(
            descendants = descendants.len(),
            recipients = recipients.len(),
            links = links.len(),
            "added to parent's shares"
        );
        fan_out(
            self.membership_jobs(&descendants, &recipients, &links),
            self.max_concurrency,
            cancel,
        )
        .await
    }

    /// Share an item, and for a directory its whole subtree, with one user
    #[instrument(skip(self, item, cancel), fields(uuid = %item.uuid()))]
    pub async fn share_item_to_user(
        &self,
        item: &FileSystemObject,
        email: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // The shared item becomes a top-level item for the recipient
        let top = Target::new(item, None)?;
        let public_key = cancellable(cancel, self.transport.recipient_public_key(email)).await?;

        cancellable(cancel, self.share_target(&top, email, &public_key)).await?;

        let descendants = self.subtree_targets(item, cancel).await?;
        debug!(descendants = descendants.len(), "sharing subtree");

        let public_key = &public_key;
        let jobs = descendants
            .iter()
            .map(|target| {
                Job::new(
                    format!("item {}", target.uuid),
                    self.share_target(target, email, public_key),
                )
            })
            .collect();
        fan_out(jobs, self.max_concurrency, cancel).await
    }

    /// Create a public link for an item, and for a directory its whole
    /// subtree, under a fresh link key
    #[instrument(skip(self, item, cancel), fields(uuid = %item.uuid()))]
    pub async fn public_link_item(
        &self,
        item: &FileSystemObject,
        expiration: LinkExpiration,
        cancel: &CancellationToken,
    ) -> Result<LinkRecord> {
        let top = Target::new(item, None)?;
        let link_uuid = Uuid::new_v4();
        let key = EncryptionKey::generate();
        let wrapped_key = self.hierarchy.wrap_key(&key)?;

        let metadata = cancellable(
            cancel,
            self.link_target(&top, link_uuid, &key, &wrapped_key, expiration),
        )
        .await?;

        if let FileSystemObject::Directory(_) = item {
            let descendants = self.subtree_targets(item, cancel).await?;
            debug!(descendants = descendants.len(), "linking subtree");

            let (key, wrapped_key) = (&key, &wrapped_key);
            let jobs = descendants
                .iter()
                .map(|target| {
                    Job::new(format!("item {}", target.uuid), async move {
                        self.link_target(target, link_uuid, key, wrapped_key, expiration)
                            .await
                            .map(drop)
                    })
                })
                .collect();
            fan_out(jobs, self.max_concurrency, cancel).await?;
        }

        Ok(LinkRecord {
            uuid: top.uuid,
            link_uuid,
            key,
            metadata,
            expiration,
        })
    }

    /// Decrypted descendants of a directory; empty for a file
    pub async fn list_descendants(
        &self,
        item: &FileSystemObject,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileSystemObject>> {
        let dir = match item {
            FileSystemObject::File(_) => return Ok(Vec::new()),
            FileSystemObject::Directory(dir) => dir,
            FileSystemObject::Root(_) => {
                return Err(ClientError::UnsupportedObjectVariant("root cannot be shared"))
            }
        };

        let listing = cancellable(cancel, self.transport.list_subtree(dir.uuid)).await?;
        let mut objects = Vec::with_capacity(listing.len());
        for folder in &listing.folders {
            objects.push(FileSystemObject::Directory(Directory::decrypt(folder, &self.hierarchy)?));
        }
        for file in &listing.files {
            objects.push(FileSystemObject::File(File::decrypt(file, &self.hierarchy)?));
        }
        Ok(objects)
    }

    async fn subtree_targets(
        &self,
        item: &FileSystemObject,
        cancel: &CancellationToken,
    ) -> Result<Vec<Target>> {
        self.list_descendants(item, cancel)
            .await?
            .iter()
            .map(|object| Target::new(object, object.parent()))
            .collect()
    }

    fn open_links(&self, links: Vec<ItemLink>) -> Result<Vec<OpenLink>> {
        links
            .into_iter()
            .map(|link| {
                Ok(OpenLink {
                    key: self.hierarchy.unwrap_key(&link.link_key)?,
                    link_uuid: link.link_uuid,
                    wrapped_key: link.link_key,
                })
            })
            .collect()
    }

    /// Jobs adding every target to every recipient and link
    fn membership_jobs<'a>(
        &'a self,
        targets: &'a [Target],
        recipients: &'a [ShareRecipient],
        links: &'a [OpenLink],
    ) -> Vec<Job<'a>> {
        let mut jobs = Vec::with_capacity(targets.len() * (recipients.len() + links.len()));
        for target in targets {
            for recipient in recipients {
                jobs.push(Job::new(
                    format!("recipient {} item {}", recipient.email, target.uuid),
                    async move {
                        let public_key = recipient.public_key()?;
                        self.share_target(target, &recipient.email, &public_key).await
                    },
                ));
            }
            for link in links {
                jobs.push(Job::new(
                    format!("link {} item {}", link.link_uuid, target.uuid),
                    async move {
                        self.link_target(
                            target,
                            link.link_uuid,
                            &link.key,
                            &link.wrapped_key,
                            LinkExpiration::Never,
                        )
                        .await
                        .map(drop)
                    },
                ));
            }
        }
        jobs
    }

    async fn share_target(&self, target: &Target, email: &str, public_key: &PublicKey) -> Result<()> {
        let metadata = Encryptor::new(public_key).seal_str(&target.metadata)?;
        self.transport
            .share_item(ShareRequest {
                uuid: target.uuid,
                parent: target.parent,
                email: email.to_string(),
                item_type: target.item_type,
                metadata,
            })
            .await
    }

    async fn link_target(
        &self,
        target: &Target,
        link_uuid: Uuid,
        key: &EncryptionKey,
        wrapped_key: &str,
        expiration: LinkExpiration,
    ) -> Result<String> {
        let metadata = encrypt_with_key(key, &target.metadata)?;
        self.transport
            .add_link_item(LinkAddRequest {
                uuid: target.uuid,
                parent: target.parent,
                link_uuid,
                item_type: target.item_type,
                metadata: metadata.clone(),
                key: wrapped_key.to_string(),
                expiration,
            })
            .await?;
        Ok(metadata)
    }
}
