//! Local filesystem state backend.
//!
//! Writes are atomic (write to a temp file, then rename) so a crash mid-write
//! never leaves a half-written snapshot or index behind.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{ChangeEvent, WatchIndex};
use crate::store::{CleanupStats, DirStats, StateStats, StateStore};
use crate::utils::target_hash;

/// Filesystem-backed state store.
#[derive(Clone)]
pub struct LocalStateStore {
    root_dir: PathBuf,
}

impl LocalStateStore {
    /// Create a store rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    fn snapshot_path(&self, target_hash: &str) -> PathBuf {
        self.root_dir
            .join("snapshots")
            .join(format!("{target_hash}.txt"))
    }

    fn events_dir(&self) -> PathBuf {
        self.root_dir.join("events")
    }

    fn index_path(&self) -> PathBuf {
        self.root_dir.join("index.json")
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, path: &PathBuf, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Read a file, returning None if it doesn't exist.
    async fn read_optional(&self, path: &PathBuf) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Delete every regular file directly under `dir`.
    async fn purge_dir(&self, dir: &PathBuf) -> Result<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AppError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn dir_stats(&self, dir: &PathBuf) -> Result<DirStats> {
        let mut stats = DirStats::default();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(AppError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                stats.file_count += 1;
                stats.total_size_bytes += meta.len();
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load_snapshot(&self, target_hash: &str) -> Result<Option<String>> {
        match self.read_optional(&self.snapshot_path(target_hash)).await? {
            Some(bytes) => {
                let text = String::from_utf8(bytes).map_err(|e| {
                    AppError::persistence(format!("snapshot {target_hash} is not UTF-8: {e}"))
                })?;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    async fn store_snapshot(&self, target_hash: &str, text: &str) -> Result<()> {
        self.write_bytes(&self.snapshot_path(target_hash), text.as_bytes())
            .await
    }

    async fn write_event(&self, event: &ChangeEvent) -> Result<String> {
        let file_name = event.file_name();
        let path = self.events_dir().join(&file_name);
        let bytes = serde_json::to_vec_pretty(event)?;
        self.write_bytes(&path, &bytes).await?;
        Ok(file_name)
    }

    async fn load_index(&self) -> Result<WatchIndex> {
        match self.read_optional(&self.index_path()).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(WatchIndex::default()),
        }
    }

    async fn save_index(&self, index: &WatchIndex) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        self.write_bytes(&self.index_path(), &bytes).await
    }

    async fn purge_snapshots(&self) -> Result<usize> {
        self.purge_dir(&self.root_dir.join("snapshots")).await
    }

    async fn purge_events(&self) -> Result<usize> {
        self.purge_dir(&self.events_dir()).await
    }

    async fn reset(&self) -> Result<()> {
        self.purge_snapshots().await?;
        self.purge_events().await?;
        self.save_index(&WatchIndex::default()).await
    }

    async fn stats(&self) -> Result<StateStats> {
        Ok(StateStats {
            snapshots: self.dir_stats(&self.root_dir.join("snapshots")).await?,
            events: self.dir_stats(&self.events_dir()).await?,
        })
    }

    async fn cleanup_targets(&self, names: &[String]) -> Result<CleanupStats> {
        let mut stats = CleanupStats::default();

        for name in names {
            let path = self.snapshot_path(&target_hash(name));
            match tokio::fs::remove_file(&path).await {
                Ok(()) => stats.snapshots += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(AppError::Io(e)),
            }
        }

        // Events carry the target name in their body, not their filename.
        let mut entries = match tokio::fs::read_dir(self.events_dir()).await {
            Ok(entries) => Some(entries),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(AppError::Io(e)),
        };
        if let Some(entries) = entries.as_mut() {
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Ok(bytes) = tokio::fs::read(&path).await else {
                    continue;
                };
                let Ok(event) = serde_json::from_slice::<ChangeEvent>(&bytes) else {
                    continue;
                };
                if names.contains(&event.target_name) {
                    tokio::fs::remove_file(&path).await?;
                    stats.events += 1;
                }
            }
        }

        let mut index = self.load_index().await?;
        stats.index_entries = index.remove_targets(names);
        self.save_index(&index).await?;

        Ok(stats)
    }
}
