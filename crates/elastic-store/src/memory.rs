//! In-memory state store

use async_trait::async_trait;
use elastic_core::{ElasticError, ElasticResult, HistoryDocument};
use std::sync::Mutex;
use tracing::debug;

use crate::traits::StateStore;

/// Keeps the history document in process memory
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    doc: Mutex<HistoryDocument>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with an existing document
    pub fn with_document(doc: HistoryDocument) -> Self {
        Self {
            doc: Mutex::new(doc),
        }
    }

    /// Version-checked replace shared by the async API
    pub(crate) fn replace(&self, doc: &HistoryDocument) -> ElasticResult<HistoryDocument> {
        let mut stored = self
            .doc
            .lock()
            .map_err(|_| ElasticError::Storage("memory store lock poisoned".to_string()))?;

        if stored.version != doc.version {
            return Err(ElasticError::Conflict {
                expected: doc.version,
                found: stored.version,
            });
        }

        let mut next = doc.clone();
        next.version += 1;
        *stored = next.clone();

        debug!(version = next.version, "Saved history document in memory");
        Ok(next)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> ElasticResult<HistoryDocument> {
        let doc = self
            .doc
            .lock()
            .map_err(|_| ElasticError::Storage("memory store lock poisoned".to_string()))?;
        Ok(doc.clone())
    }

    async fn save(&self, doc: &HistoryDocument) -> ElasticResult<HistoryDocument> {
        self.replace(doc)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
