// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Manifest-ordered restore.
//!
//! The chain is replayed strictly in manifest order inside
//! `<backup_dir>/restore-work`: the first entry is extracted and prepared as
//! a full backup, each later entry is extracted and merged into it. Only then
//! is the live data directory emptied and the prepared copy moved in.
//!
//! The database service must be stopped before a non-dry-run restore.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{info, warn};

use crate::checksum;
use crate::config::Config;
use crate::error::{BackupError, Result};
use crate::id::BackupId;
use crate::layout::Artifacts;
use crate::manifest::{self, Manifest};
use crate::tool::BackupTool;

/// Scratch directory name inside the backup directory.
pub const WORK_DIR: &str = "restore-work";

/// Restore options.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Manifest to restore; the newest one when unset.
    pub manifest: Option<PathBuf>,
    /// Stop after preparation, leaving the data directory untouched.
    pub dry_run: bool,
}

/// Result of a restore.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    /// Manifest that was replayed.
    pub manifest: PathBuf,
    /// Backups applied, in order.
    pub applied: Vec<BackupId>,
    /// Directory holding the prepared backup.
    pub prepared_dir: PathBuf,
    /// Whether the data directory was left untouched.
    pub dry_run: bool,
}

/// Replays backup chains into the data directory.
pub struct Restorer {
    config: Config,
    tool: Arc<dyn BackupTool>,
}

impl Restorer {
    /// Create a restorer.
    pub fn new(config: Config, tool: Arc<dyn BackupTool>) -> Self {
        Self { config, tool }
    }

    /// Restore a chain.
    pub async fn restore(&self, options: &RestoreOptions) -> Result<RestoreReport> {
        let dir = &self.config.backup_dir;
        let manifest_path = match &options.manifest {
            Some(path) => resolve_manifest(dir, path),
            None => manifest::latest(dir)
                .await?
                .ok_or_else(|| BackupError::NoManifest(dir.clone()))?,
        };
        let manifest = Manifest::load(&manifest_path).await?;
        info!(
            manifest = %manifest_path.display(),
            backups = manifest.entries().len(),
            dry_run = options.dry_run,
            "Restoring backup chain"
        );

        for id in manifest.entries() {
            let set = Artifacts::new(dir, *id);
            if !checksum::verify(&set.stream, &set.checksum).await? {
                warn!(id = %id, "No checksum recorded, stream not verified");
            }
        }

        let work = dir.join(WORK_DIR);
        recreate_dir(&work).await?;
        let prepared = work.join("full");
        fs::create_dir(&prepared).await?;

        let (full, incrementals) = manifest
            .entries()
            .split_first()
            .ok_or_else(|| BackupError::EmptyManifest(manifest_path.clone()))?;

        self.tool
            .extract(&Artifacts::new(dir, *full).stream, &prepared)
            .await?;
        self.tool.prepare(&prepared).await?;
        info!(id = %full, "Prepared full backup");

        for id in incrementals {
            let inc_dir = work.join(id.to_string());
            fs::create_dir(&inc_dir).await?;
            self.tool
                .extract(&Artifacts::new(dir, *id).stream, &inc_dir)
                .await?;
            self.tool.prepare_incremental(&prepared, &inc_dir).await?;
            fs::remove_dir_all(&inc_dir).await?;
            info!(id = %id, "Merged incremental");
        }

        let report = RestoreReport {
            manifest: manifest_path,
            applied: manifest.entries().to_vec(),
            prepared_dir: prepared.clone(),
            dry_run: options.dry_run,
        };

        if options.dry_run {
            info!(
                prepared = %prepared.display(),
                "Dry run: backup prepared, data directory left untouched"
            );
            return Ok(report);
        }

        let data_dir = &self.config.data_dir;
        warn!(data_dir = %data_dir.display(), "Replacing data directory");
        empty_dir(data_dir).await?;
        self.tool.copy_back(&prepared, data_dir).await?;

        let cnf = Artifacts::new(dir, manifest.last()).cnf;
        match fs::copy(&cnf, self.config.healthcheck_path()).await {
            Ok(_) => info!("Restored health-check credentials"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(user) = &self.config.service_user {
            reset_ownership(data_dir, user).await?;
        }

        fs::remove_dir_all(&work).await?;
        info!(data_dir = %data_dir.display(), "Restore complete");
        Ok(report)
    }
}

/// A bare manifest name is looked up in the backup directory.
fn resolve_manifest(dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || path.exists() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

async fn recreate_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::create_dir_all(path).await?;
    Ok(())
}

/// Remove everything inside `path`, keeping the directory itself (it is
/// often a mount point).
async fn empty_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).await?;
    let mut entries = fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            fs::remove_dir_all(entry.path()).await?;
        } else {
            fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

async fn reset_ownership(root: &Path, user: &str) -> Result<()> {
    let account = nix::unistd::User::from_name(user)?
        .ok_or_else(|| BackupError::UnknownUser(user.to_string()))?;
    let root = root.to_path_buf();
    let (uid, gid) = (account.uid, account.gid);

    tokio::task::spawn_blocking(move || chown_recursive(&root, uid, gid))
        .await
        .map_err(|e| BackupError::Io(std::io::Error::other(e)))??;
    info!(user = user, "Reset data directory ownership");
    Ok(())
}

fn chown_recursive(path: &Path, uid: nix::unistd::Uid, gid: nix::unistd::Gid) -> Result<()> {
    nix::unistd::chown(path, Some(uid), Some(gid))?;
    if std::fs::symlink_metadata(path)?.is_dir() {
        for entry in std::fs::read_dir(path)? {
            chown_recursive(&entry?.path(), uid, gid)?;
        }
    }
    Ok(())
}
