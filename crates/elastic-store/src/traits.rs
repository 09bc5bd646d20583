//! State store trait definitions

use async_trait::async_trait;
use elastic_core::{ElasticError, ElasticResult, HistoryDocument};
use tracing::warn;

/// Attempts made by [`update`] before a conflict is returned to the caller
pub const UPDATE_ATTEMPTS: usize = 3;

/// Durable home of the history document
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the whole document; a store that was never written yields an empty one
    async fn load(&self) -> ElasticResult<HistoryDocument>;

    /// Replace the whole document.
    ///
    /// `doc.version` must equal the stored version, otherwise
    /// [`ElasticError::Conflict`] is returned and nothing is written. On
    /// success the stored copy, with its version bumped, is returned.
    async fn save(&self, doc: &HistoryDocument) -> ElasticResult<HistoryDocument>;

    /// Get the backend name
    fn name(&self) -> &'static str;
}

/// Load, mutate and save the document, retrying on version conflicts
pub async fn update<F>(store: &dyn StateStore, mut mutate: F) -> ElasticResult<HistoryDocument>
where
    F: FnMut(&mut HistoryDocument) + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut doc = store.load().await?;
        mutate(&mut doc);
        match store.save(&doc).await {
            Err(ElasticError::Conflict { expected, found }) if attempt < UPDATE_ATTEMPTS => {
                warn!(
                    backend = store.name(),
                    expected, found, attempt, "History document changed underneath us, retrying"
                );
            }
            result => return result,
        }
    }
}
