// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backup manifests.
//!
//! A manifest is `<cycle-id>.manifest` in the backup directory: one
//! [`BackupId`] per line, the first being the full backup and each later
//! line an incremental on top of the line before it. Lines are only ever
//! appended, so the file order is the replay order.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{BackupError, Result};
use crate::id::BackupId;

/// File suffix of manifests.
pub const MANIFEST_SUFFIX: &str = "manifest";

/// One backup chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    path: PathBuf,
    entries: Vec<BackupId>,
}

impl Manifest {
    /// Path of the manifest for the cycle starting at `cycle`.
    pub fn path_for(dir: &Path, cycle: BackupId) -> PathBuf {
        dir.join(cycle.file_name(MANIFEST_SUFFIX))
    }

    /// Read a manifest. Every non-blank line must be a backup id.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path).await?;

        let mut entries = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let id = line
                .parse::<BackupId>()
                .map_err(|_| BackupError::MalformedManifest {
                    path: path.clone(),
                    line: index + 1,
                })?;
            entries.push(id);
        }

        if entries.is_empty() {
            return Err(BackupError::EmptyManifest(path));
        }
        Ok(Self { path, entries })
    }

    /// Start a new chain with a full backup.
    ///
    /// Fails with [`BackupError::DuplicateId`] if the manifest already exists.
    pub async fn create(dir: &Path, full: BackupId) -> Result<Self> {
        let path = Self::path_for(dir, full);
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(BackupError::DuplicateId(full));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(format!("{}\n", full).as_bytes()).await?;
        file.sync_all().await?;
        debug!(manifest = %path.display(), "Created manifest");

        Ok(Self {
            path,
            entries: vec![full],
        })
    }

    /// Append an incremental to the chain.
    pub async fn append(&mut self, id: BackupId) -> Result<()> {
        let last = self.last();
        if id <= last {
            return Err(BackupError::OutOfOrder { id, previous: last });
        }

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\n", id).as_bytes()).await?;
        file.sync_all().await?;
        self.entries.push(id);
        Ok(())
    }

    /// Manifest file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All backups in replay order.
    pub fn entries(&self) -> &[BackupId] {
        &self.entries
    }

    /// The full backup that starts the chain; also names the cycle.
    pub fn cycle(&self) -> BackupId {
        self.entries[0]
    }

    /// Newest backup in the chain; the base for the next incremental.
    pub fn last(&self) -> BackupId {
        self.entries[self.entries.len() - 1]
    }

    /// Number of incrementals on top of the full backup.
    pub fn incremental_count(&self) -> usize {
        self.entries.len() - 1
    }
}

/// Cycle ids of all manifests in `dir`, oldest first.
///
/// Files whose name is not `<id>.manifest` are ignored.
pub async fn list_cycles(dir: &Path) -> Result<Vec<BackupId>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut cycles = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(MANIFEST_SUFFIX) {
            continue;
        }
        match BackupId::from_file_name(&path) {
            Some(id) => cycles.push(id),
            None => debug!(path = %path.display(), "Ignoring manifest with foreign name"),
        }
    }
    cycles.sort();
    Ok(cycles)
}

/// Path of the newest manifest in `dir`, if any.
pub async fn latest(dir: &Path) -> Result<Option<PathBuf>> {
    Ok(list_cycles(dir)
        .await?
        .last()
        .map(|cycle| Manifest::path_for(dir, *cycle)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(s: &str) -> BackupId {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_create_append_load() {
        let temp_dir = TempDir::new().unwrap();
        let mut manifest = Manifest::create(temp_dir.path(), id("2024-01-01_00-00-00"))
            .await
            .unwrap();
        manifest.append(id("2024-01-01_06-00-00")).await.unwrap();
        manifest.append(id("2024-01-01_12-00-00")).await.unwrap();

        let content = tokio::fs::read_to_string(manifest.path()).await.unwrap();
        assert_eq!(
            content,
            "2024-01-01_00-00-00\n2024-01-01_06-00-00\n2024-01-01_12-00-00\n"
        );

        let loaded = Manifest::load(manifest.path()).await.unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.cycle(), id("2024-01-01_00-00-00"));
        assert_eq!(loaded.last(), id("2024-01-01_12-00-00"));
        assert_eq!(loaded.incremental_count(), 2);
    }

    #[tokio::test]
    async fn test_create_refuses_existing() {
        let temp_dir = TempDir::new().unwrap();
        let first = id("2024-01-01_00-00-00");
        Manifest::create(temp_dir.path(), first).await.unwrap();
        let err = Manifest::create(temp_dir.path(), first).await.unwrap_err();
        assert!(matches!(err, BackupError::DuplicateId(dup) if dup == first));
    }

    #[tokio::test]
    async fn test_append_rejects_older_id() {
        let temp_dir = TempDir::new().unwrap();
        let mut manifest = Manifest::create(temp_dir.path(), id("2024-01-02_00-00-00"))
            .await
            .unwrap();
        let err = manifest
            .append(id("2024-01-01_00-00-00"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::OutOfOrder { .. }));
        assert_eq!(manifest.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_load_malformed_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("2024-01-01_00-00-00.manifest");
        tokio::fs::write(&path, "2024-01-01_00-00-00\n./garbage\n")
            .await
            .unwrap();

        let err = Manifest::load(&path).await.unwrap_err();
        assert!(matches!(err, BackupError::MalformedManifest { line: 2, .. }));
    }

    #[tokio::test]
    async fn test_latest_ignores_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        for name in [
            "2024-01-01_00-00-00.manifest",
            "2024-02-01_00-00-00.manifest",
            "zzz.manifest",
            "2024-03-01_00-00-00.gz",
        ] {
            tokio::fs::write(temp_dir.path().join(name), "").await.unwrap();
        }

        let cycles = list_cycles(temp_dir.path()).await.unwrap();
        assert_eq!(cycles.len(), 2);
        assert_eq!(
            latest(temp_dir.path()).await.unwrap().unwrap(),
            temp_dir.path().join("2024-02-01_00-00-00.manifest")
        );
    }

    #[tokio::test]
    async fn test_latest_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(latest(&temp_dir.path().join("nope")).await.unwrap().is_none());
    }
}
