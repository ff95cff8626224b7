// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One classify, back up, prune run.
//!
//! ```text
//!   classify ──▶ lsn dir + cnf snapshot ──▶ tool.backup ──▶ checksum
//!                                               │ fail
//!                                               ▼
//!                                      discard artifact set
//!   checksum ──▶ manifest create/append ──▶ drop base lsn dir ──▶ prune
//! ```
//!
//! The manifest is written last: a backup that did not finish never becomes
//! part of a chain.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::checksum;
use crate::classify::{self, BackupPlan};
use crate::config::Config;
use crate::error::{BackupError, Result};
use crate::id::BackupId;
use crate::layout::Artifacts;
use crate::manifest::{self, Manifest};
use crate::prune::{self, PruneReport};
use crate::tool::BackupTool;

/// Kind of backup taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    /// Started a new cycle.
    Full,
    /// Extended the current chain.
    Incremental,
}

/// Result of a successful backup run.
#[derive(Debug, Clone)]
pub struct BackupReport {
    /// Id of the new backup.
    pub id: BackupId,
    /// Full or incremental.
    pub kind: BackupKind,
    /// Cycle the backup belongs to.
    pub cycle: BackupId,
    /// Hex SHA-256 of the stream.
    pub sha256: String,
    /// What pruning removed afterwards.
    pub pruned: PruneReport,
}

/// Takes backups into the configured backup directory.
///
/// Assumes it is the only writer of that directory while it runs.
pub struct BackupAgent {
    config: Config,
    tool: Arc<dyn BackupTool>,
}

impl BackupAgent {
    /// Create an agent.
    pub fn new(config: Config, tool: Arc<dyn BackupTool>) -> Self {
        Self { config, tool }
    }

    /// Take a backup identified by the current time.
    pub async fn run(&self) -> Result<BackupReport> {
        self.run_as(BackupId::now()).await
    }

    /// Take a backup with an explicit id.
    pub async fn run_as(&self, id: BackupId) -> Result<BackupReport> {
        let dir = &self.config.backup_dir;
        fs::create_dir_all(dir).await?;

        let plan = classify::classify(dir, self.config.incrementals_per_cycle).await?;
        // A full backup older than an existing cycle would be pruned at once.
        if let Some(previous) = newest_recorded(dir).await?
            && id <= previous
        {
            return Err(BackupError::OutOfOrder { id, previous });
        }

        let artifacts = Artifacts::new(dir, id);
        if artifacts.any_exist().await? {
            return Err(BackupError::DuplicateId(id));
        }
        fs::create_dir(&artifacts.lsn_dir).await?;
        self.snapshot_credentials(&artifacts).await?;

        let base = match &plan {
            BackupPlan::Incremental { manifest } => Some(Artifacts::new(dir, manifest.last())),
            BackupPlan::Full(_) => None,
        };

        info!(
            id = %id,
            full = plan.is_full(),
            tool = self.tool.tool_type(),
            "Starting backup"
        );
        let streamed = self
            .tool
            .backup(
                &artifacts.lsn_dir,
                base.as_ref().map(|b| b.lsn_dir.as_path()),
                &artifacts.stream,
            )
            .await;
        if let Err(e) = streamed {
            error!(
                id = %id,
                error = %e,
                "BACKUP FAILED: pipeline did not complete, discarding partial artifacts"
            );
            discard(&artifacts).await;
            return Err(e);
        }

        let sha256 = match checksum::write_sidecar(&artifacts.stream, &artifacts.checksum).await {
            Ok(digest) => digest,
            Err(e) => {
                discard(&artifacts).await;
                return Err(e);
            }
        };

        let (kind, cycle) = match plan {
            BackupPlan::Full(reason) => {
                let manifest = Manifest::create(dir, id).await?;
                debug!(reason = ?reason, "Started new cycle");
                (BackupKind::Full, manifest.cycle())
            }
            BackupPlan::Incremental { mut manifest } => {
                manifest.append(id).await?;
                if let Some(base) = &base {
                    remove_dir_if_present(&base.lsn_dir).await?;
                }
                (BackupKind::Incremental, manifest.cycle())
            }
        };
        info!(id = %id, kind = ?kind, cycle = %cycle, sha256 = %sha256, "Backup complete");

        let pruned = prune::prune(dir, self.config.retain_cycles).await?;
        Ok(BackupReport {
            id,
            kind,
            cycle,
            sha256,
            pruned,
        })
    }

    /// Copy the health-check credentials next to the artifact; the backup
    /// tool does not capture them.
    async fn snapshot_credentials(&self, artifacts: &Artifacts) -> Result<()> {
        let source = self.config.healthcheck_path();
        match fs::copy(&source, &artifacts.cnf).await {
            Ok(_) => {
                debug!(source = %source.display(), "Captured health-check credentials");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Newest id in the newest chain. A manifest that does not load still
/// counts by its cycle id.
async fn newest_recorded(dir: &Path) -> Result<Option<BackupId>> {
    let Some(cycle) = manifest::list_cycles(dir).await?.last().copied() else {
        return Ok(None);
    };
    match Manifest::load(&Manifest::path_for(dir, cycle)).await {
        Ok(chain) => Ok(Some(chain.last().max(cycle))),
        Err(BackupError::MalformedManifest { .. } | BackupError::EmptyManifest(_)) => {
            Ok(Some(cycle))
        }
        Err(e) => Err(e),
    }
}

async fn remove_dir_if_present(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn discard(artifacts: &Artifacts) {
    for file in [&artifacts.stream, &artifacts.cnf, &artifacts.checksum] {
        if let Err(e) = fs::remove_file(file).await
            && e.kind() != ErrorKind::NotFound
        {
            warn!(path = %file.display(), error = %e, "Failed to remove partial artifact");
        }
    }
    if let Err(e) = remove_dir_if_present(&artifacts.lsn_dir).await {
        warn!(path = %artifacts.lsn_dir.display(), error = %e, "Failed to remove LSN directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::MockBackupTool;
    use tempfile::TempDir;

    fn config(temp_dir: &TempDir) -> Config {
        Config {
            backup_dir: temp_dir.path().join("backup"),
            data_dir: temp_dir.path().join("mysql"),
            incrementals_per_cycle: 3,
            retain_cycles: 2,
            service_user: None,
            ..Config::default()
        }
    }

    fn id(s: &str) -> BackupId {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_full_then_incremental() {
        let temp_dir = TempDir::new().unwrap();
        let tool = MockBackupTool::new();
        let agent = BackupAgent::new(config(&temp_dir), Arc::new(tool.clone()));
        let dir = temp_dir.path().join("backup");

        tool.put("a", "1").await;
        let full = agent.run_as(id("2024-01-01_00-00-00")).await.unwrap();
        assert_eq!(full.kind, BackupKind::Full);

        tool.put("b", "2").await;
        let inc = agent.run_as(id("2024-01-01_01-00-00")).await.unwrap();
        assert_eq!(inc.kind, BackupKind::Incremental);
        assert_eq!(inc.cycle, full.id);

        let full_set = Artifacts::new(&dir, full.id);
        let inc_set = Artifacts::new(&dir, inc.id);
        assert!(full_set.stream.exists());
        assert!(!full_set.lsn_dir.exists(), "superseded LSN dir kept");
        assert!(inc_set.lsn_dir.exists());
        assert!(inc_set.checksum.exists());
    }

    #[tokio::test]
    async fn test_failed_pipeline_leaves_no_trace() {
        let temp_dir = TempDir::new().unwrap();
        let tool = MockBackupTool::new().with_failing_backups();
        let agent = BackupAgent::new(config(&temp_dir), Arc::new(tool));
        let dir = temp_dir.path().join("backup");
        let backup_id = id("2024-01-01_00-00-00");

        let err = agent.run_as(backup_id).await.unwrap_err();
        assert!(matches!(err, BackupError::Pipeline { .. }));

        let set = Artifacts::new(&dir, backup_id);
        assert!(!set.stream.exists());
        assert!(!set.lsn_dir.exists());
        assert!(!Manifest::path_for(&dir, backup_id).exists());
    }

    #[tokio::test]
    async fn test_credentials_captured() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);
        tokio::fs::create_dir_all(&config.data_dir).await.unwrap();
        tokio::fs::write(config.healthcheck_path(), "[client]\nuser=hc\n")
            .await
            .unwrap();
        let agent = BackupAgent::new(config, Arc::new(MockBackupTool::new()));

        let report = agent.run_as(id("2024-01-01_00-00-00")).await.unwrap();
        let cnf = Artifacts::new(&temp_dir.path().join("backup"), report.id).cnf;
        assert_eq!(
            tokio::fs::read_to_string(cnf).await.unwrap(),
            "[client]\nuser=hc\n"
        );
    }

    #[tokio::test]
    async fn test_same_second_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let agent = BackupAgent::new(config(&temp_dir), Arc::new(MockBackupTool::new()));
        let backup_id = id("2024-01-01_00-00-00");

        agent.run_as(backup_id).await.unwrap();
        let err = agent.run_as(backup_id).await.unwrap_err();
        assert!(matches!(err, BackupError::OutOfOrder { .. }));
    }

    #[tokio::test]
    async fn test_full_backup_older_than_existing_cycles_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            incrementals_per_cycle: 0,
            ..config(&temp_dir)
        };
        let dir = config.backup_dir.clone();
        let agent = BackupAgent::new(config, Arc::new(MockBackupTool::new()));

        let cycles = vec![id("2024-01-02_00-00-00"), id("2024-01-03_00-00-00")];
        for cycle in &cycles {
            agent.run_as(*cycle).await.unwrap();
        }

        let stale = id("2024-01-01_00-00-00");
        let err = agent.run_as(stale).await.unwrap_err();
        assert!(matches!(
            err,
            BackupError::OutOfOrder { id, previous } if id == stale && previous == cycles[1]
        ));
        assert!(!Manifest::path_for(&dir, stale).exists());
        assert!(!Artifacts::new(&dir, stale).stream.exists());
        assert_eq!(manifest::list_cycles(&dir).await.unwrap(), cycles);
    }
}
