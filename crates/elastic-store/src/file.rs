//! Local file state store
//!
//! The history document is stored as pretty-printed JSON. Saves write a
//! sibling temp file and rename it over the original, so readers only ever
//! see a complete document.
//!
//! The version check and the write happen under an exclusive `flock` on a
//! sidecar `<file>.lock`, so two processes sharing the document cannot both
//! pass the check.

use async_trait::async_trait;
use elastic_core::{ElasticError, ElasticResult, HistoryDocument};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::traits::StateStore;

/// Keeps the history document in a JSON file
pub struct FileStateStore {
    path: PathBuf,
    /// Serializes the version check and the write within this process
    write_lock: Mutex<()>,
}

impl FileStateStore {
    /// Create a store backed by `path`; the file is created on first save
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> ElasticResult<HistoryDocument> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No history document yet");
                return Ok(HistoryDocument::default());
            }
            Err(e) => {
                return Err(ElasticError::Storage(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&content).map_err(|e| {
            ElasticError::Storage(format!(
                "Malformed history document {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn sibling(&self, extension: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(extension);
        self.path.with_file_name(name)
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    /// Block until this process holds the cross-process lock.
    ///
    /// The lock is released when the returned file is dropped.
    async fn acquire_lock(&self) -> ElasticResult<File> {
        let path = self.lock_path();
        tokio::task::spawn_blocking(move || {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(|e| ElasticError::Storage(format!("Lock task failed: {}", e)))?
        .map_err(|e| {
            ElasticError::Storage(format!(
                "Failed to lock {}: {}",
                self.lock_path().display(),
                e
            ))
        })
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> ElasticResult<HistoryDocument> {
        self.read().await
    }

    async fn save(&self, doc: &HistoryDocument) -> ElasticResult<HistoryDocument> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
                info!(path = %parent.display(), "Created state directory");
            }
        }

        let _lock = self.acquire_lock().await?;

        let stored = self.read().await?;
        if stored.version != doc.version {
            return Err(ElasticError::Conflict {
                expected: doc.version,
                found: stored.version,
            });
        }

        let mut next = doc.clone();
        next.version += 1;
        let body = serde_json::to_string_pretty(&next)?;

        // Write atomically via temp file
        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, body).await.map_err(|e| {
            ElasticError::Storage(format!("Failed to write {}: {}", temp_path.display(), e))
        })?;
        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| {
            ElasticError::Storage(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        debug!(
            path = %self.path.display(),
            version = next.version,
            "Saved history document"
        );
        Ok(next)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
