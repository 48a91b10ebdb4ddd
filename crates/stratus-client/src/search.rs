//! Server-side search index submission

use crate::{
    fanout::cancellable, object::FileSystemObject, transport::Transport, types::SearchIndexItem,
    Result,
};
use std::sync::Arc;
use stratus_crypto::{generate_index_hashes, KeyHierarchy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Submits keyed token hashes of item names for server-side search
#[derive(Clone)]
pub struct SearchIndexer {
    transport: Arc<dyn Transport>,
    hierarchy: Arc<KeyHierarchy>,
}

impl SearchIndexer {
    /// Create an indexer
    pub fn new(transport: Arc<dyn Transport>, hierarchy: Arc<KeyHierarchy>) -> Self {
        Self {
            transport,
            hierarchy,
        }
    }

    /// Index entries for an item's current name
    pub fn index_items(&self, item: &FileSystemObject) -> Result<Vec<SearchIndexItem>> {
        let uuid = item.uuid();
        let item_type = item.item_type()?;
        Ok(generate_index_hashes(item.name()?, self.hierarchy.hmac_key())
            .into_iter()
            .map(|hash| SearchIndexItem {
                uuid,
                hash,
                item_type,
            })
            .collect())
    }

    /// Submit an item's index entries, returning how many were sent
    #[instrument(skip(self, item, cancel), fields(uuid = %item.uuid()))]
    pub async fn index_item(&self, item: &FileSystemObject, cancel: &CancellationToken) -> Result<usize> {
        let items = self.index_items(item)?;
        let count = items.len();
        cancellable(cancel, self.transport.submit_search_index(items)).await?;
        debug!(tokens = count, "search index submitted");
        Ok(count)
    }
}
