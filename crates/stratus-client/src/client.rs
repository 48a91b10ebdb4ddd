//! Main client implementation

use crate::{
    http::HttpTransport,
    object::{File, FileSystemObject, IncompleteFile},
    search::SearchIndexer,
    share::{LinkRecord, SharePropagator},
    transport::Transport,
    types::LinkExpiration,
    upload::UploadPipeline,
    Config, Result,
};
use std::sync::Arc;
use stratus_crypto::KeyHierarchy;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

/// Stratus drive client
pub struct StratusClient {
    config: Config,
    hierarchy: Arc<KeyHierarchy>,
    uploads: UploadPipeline,
    shares: SharePropagator,
    search: SearchIndexer,
}

impl StratusClient {
    /// Create a client talking HTTP to the configured endpoint
    pub fn new(config: Config, hierarchy: KeyHierarchy) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.clone())?);
        Self::with_transport(config, Arc::new(hierarchy), transport)
    }

    /// Create a client over any transport
    pub fn with_transport(
        config: Config,
        hierarchy: Arc<KeyHierarchy>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            uploads: UploadPipeline::new(
                transport.clone(),
                hierarchy.clone(),
                config.chunk_concurrency,
            ),
            shares: SharePropagator::new(
                transport.clone(),
                hierarchy.clone(),
                config.max_concurrency,
            ),
            search: SearchIndexer::new(transport, hierarchy.clone()),
            config,
            hierarchy,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The account's key hierarchy
    pub fn hierarchy(&self) -> &KeyHierarchy {
        &self.hierarchy
    }

    /// Chunked upload pipeline
    pub fn uploads(&self) -> &UploadPipeline {
        &self.uploads
    }

    /// Share and link propagation
    pub fn shares(&self) -> &SharePropagator {
        &self.shares
    }

    /// Search index submission
    pub fn search(&self) -> &SearchIndexer {
        &self.search
    }

    /// Upload a file, then add it to its parent's shares and links and index
    /// its name.
    ///
    /// Once the upload has completed, fan-out failures are only logged: the
    /// file exists and propagation can be re-run.
    #[instrument(skip(self, file, reader, cancel), fields(uuid = %file.uuid))]
    pub async fn upload_file<R>(
        &self,
        file: IncompleteFile,
        reader: R,
        cancel: &CancellationToken,
    ) -> Result<File>
    where
        R: AsyncRead + Unpin + Send,
    {
        let file = self.uploads.upload_file(file, reader, cancel).await?;
        self.after_create(&FileSystemObject::File(file.clone()), cancel).await;
        Ok(file)
    }

    /// Propagate a created or moved item into its parent's shares and links
    /// and index its name, logging failures
    pub async fn after_create(&self, item: &FileSystemObject, cancel: &CancellationToken) {
        let (shared, indexed) = tokio::join!(
            self.shares.update_item_with_maybe_shared_parent(item, cancel),
            self.search.index_item(item, cancel),
        );
        if let Err(err) = shared {
            warn!(uuid = %item.uuid(), error = %err, "share propagation failed");
        }
        if let Err(err) = indexed {
            warn!(uuid = %item.uuid(), error = %err, "search indexing failed");
        }
    }

    /// Refresh every share and link copy after a rename and re-index the name
    #[instrument(skip(self, item, cancel), fields(uuid = %item.uuid()))]
    pub async fn after_rename(
        &self,
        item: &FileSystemObject,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.shares.update_shared_item(item, cancel).await?;
        self.search.index_item(item, cancel).await?;
        Ok(())
    }

    /// Share an item with a user
    pub async fn share(
        &self,
        item: &FileSystemObject,
        email: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.shares.share_item_to_user(item, email, cancel).await
    }

    /// Create a public link for an item
    pub async fn public_link(
        &self,
        item: &FileSystemObject,
        expiration: LinkExpiration,
        cancel: &CancellationToken,
    ) -> Result<LinkRecord> {
        self.shares.public_link_item(item, expiration, cancel).await
    }
}
