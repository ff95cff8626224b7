// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lease store backed by marker files on a shared volume.
//!
//! Layout (relative to the shared directory):
//! - `docker-leader` - JSON [`LeaseRecord`]; created with `O_CREAT|O_EXCL`
//! - `docker-completed` - first-run setup finished
//! - `docker-initiated` - setup started by a leader

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::traits::*;
use crate::error::Result;

/// Leader lease file name.
pub const LEADER_FILE: &str = "docker-leader";
/// Completion marker file name.
pub const COMPLETED_FILE: &str = "docker-completed";
/// In-progress marker file name.
pub const INITIATED_FILE: &str = "docker-initiated";

/// Marker-file lease store.
#[derive(Debug, Clone)]
pub struct FileLeaseStore {
    dir: PathBuf,
}

impl FileLeaseStore {
    /// Create a store rooted at the shared directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the leader lease file.
    pub fn leader_path(&self) -> PathBuf {
        self.dir.join(LEADER_FILE)
    }

    /// Path of the completion marker.
    pub fn completed_path(&self) -> PathBuf {
        self.dir.join(COMPLETED_FILE)
    }

    /// Path of the in-progress marker.
    pub fn initiated_path(&self) -> PathBuf {
        self.dir.join(INITIATED_FILE)
    }

    async fn write_marker(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        fs::write(path, Utc::now().to_rfc3339()).await?;
        Ok(())
    }

    async fn remove_if_present(path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl LeaseStore for FileLeaseStore {
    fn store_type(&self) -> &'static str {
        "file"
    }

    async fn read(&self) -> Result<Option<LeaseRecord>> {
        let path = self.leader_path();
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if let Ok(record) = serde_json::from_str::<LeaseRecord>(&content) {
            return Ok(Some(record));
        }

        // Not ours (or caught between create and write): age it by mtime.
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let renewed_at = DateTime::<Utc>::from(metadata.modified()?);
        debug!(
            path = %path.display(),
            renewed_at = %renewed_at,
            "Leader file is not a lease record, using modification time"
        );
        Ok(Some(LeaseRecord {
            holder_id: FOREIGN_HOLDER.to_string(),
            epoch: 0,
            renewed_at,
        }))
    }

    async fn try_create(&self, record: &LeaseRecord) -> Result<bool> {
        fs::create_dir_all(&self.dir).await?;
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.leader_path())
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(&serde_json::to_vec(record)?).await?;
        file.sync_all().await?;
        Ok(true)
    }

    async fn overwrite(&self, record: &LeaseRecord) -> Result<()> {
        let tmp = self
            .dir
            .join(format!(".{}.{}", LEADER_FILE, record.holder_id));
        fs::write(&tmp, serde_json::to_vec(record)?).await?;
        fs::rename(&tmp, self.leader_path()).await?;
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        Self::remove_if_present(&self.leader_path()).await
    }

    async fn is_completed(&self) -> Result<bool> {
        Ok(fs::try_exists(self.completed_path()).await?)
    }

    async fn mark_completed(&self) -> Result<()> {
        self.write_marker(&self.completed_path()).await
    }

    async fn is_in_progress(&self) -> Result<bool> {
        Ok(fs::try_exists(self.initiated_path()).await?)
    }

    async fn mark_in_progress(&self) -> Result<()> {
        self.write_marker(&self.initiated_path()).await
    }

    async fn clear_in_progress(&self) -> Result<()> {
        Self::remove_if_present(&self.initiated_path()).await
    }
}
