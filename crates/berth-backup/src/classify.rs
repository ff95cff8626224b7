// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Full/incremental classification of the next backup.

use std::path::Path;

use tracing::{info, warn};

use crate::error::{BackupError, Result};
use crate::layout::Artifacts;
use crate::manifest::{self, Manifest};

/// What the next backup should be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupPlan {
    /// Start a new cycle.
    Full(FullReason),
    /// Extend the chain of `manifest` on top of its last entry.
    Incremental {
        /// The chain being extended.
        manifest: Manifest,
    },
}

/// Why a full backup was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullReason {
    /// No manifest exists yet.
    NoManifest,
    /// The newest cycle has reached its incremental limit.
    CycleComplete,
    /// The newest manifest cannot be read.
    MalformedManifest,
    /// The LSN metadata the next incremental needs is gone.
    MissingBase,
}

impl BackupPlan {
    /// Whether this plan starts a new cycle.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

/// Decide the next backup from the newest manifest in `dir`.
///
/// Anything doubtful about the current chain falls back to a full backup.
pub async fn classify(dir: &Path, incrementals_per_cycle: usize) -> Result<BackupPlan> {
    let Some(path) = manifest::latest(dir).await? else {
        info!(dir = %dir.display(), "No manifest found, taking a full backup");
        return Ok(BackupPlan::Full(FullReason::NoManifest));
    };

    let manifest = match Manifest::load(&path).await {
        Ok(m) => m,
        Err(e @ (BackupError::MalformedManifest { .. } | BackupError::EmptyManifest(_))) => {
            warn!(error = %e, "Cannot extend the current chain, taking a full backup");
            return Ok(BackupPlan::Full(FullReason::MalformedManifest));
        }
        Err(e) => return Err(e),
    };

    if manifest.incremental_count() >= incrementals_per_cycle {
        info!(
            manifest = %path.display(),
            incrementals = manifest.incremental_count(),
            limit = incrementals_per_cycle,
            "Cycle complete, taking a full backup"
        );
        return Ok(BackupPlan::Full(FullReason::CycleComplete));
    }

    let base = Artifacts::new(dir, manifest.last());
    if !tokio::fs::try_exists(&base.lsn_dir).await? {
        warn!(
            base = %manifest.last(),
            lsn_dir = %base.lsn_dir.display(),
            "LSN metadata of the last backup is missing, taking a full backup"
        );
        return Ok(BackupPlan::Full(FullReason::MissingBase));
    }

    info!(
        manifest = %path.display(),
        base = %manifest.last(),
        "Taking an incremental backup"
    );
    Ok(BackupPlan::Incremental { manifest })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::BackupId;
    use tempfile::TempDir;

    fn id(s: &str) -> BackupId {
        s.parse().unwrap()
    }

    async fn chain(dir: &Path, ids: &[&str]) -> Manifest {
        let mut manifest = Manifest::create(dir, id(ids[0])).await.unwrap();
        for s in &ids[1..] {
            manifest.append(id(s)).await.unwrap();
        }
        let last = Artifacts::new(dir, manifest.last());
        tokio::fs::create_dir_all(&last.lsn_dir).await.unwrap();
        manifest
    }

    #[tokio::test]
    async fn test_empty_dir_is_full() {
        let temp_dir = TempDir::new().unwrap();
        let plan = classify(temp_dir.path(), 3).await.unwrap();
        assert_eq!(plan, BackupPlan::Full(FullReason::NoManifest));
    }

    #[tokio::test]
    async fn test_incremental_on_last_line() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = chain(
            temp_dir.path(),
            &["2024-01-01_00-00-00", "2024-01-01_01-00-00"],
        )
        .await;

        let plan = classify(temp_dir.path(), 3).await.unwrap();
        assert_eq!(plan, BackupPlan::Incremental { manifest });
    }

    #[tokio::test]
    async fn test_threshold_rolls_over() {
        let temp_dir = TempDir::new().unwrap();
        chain(
            temp_dir.path(),
            &[
                "2024-01-01_00-00-00",
                "2024-01-01_01-00-00",
                "2024-01-01_02-00-00",
                "2024-01-01_03-00-00",
            ],
        )
        .await;

        let plan = classify(temp_dir.path(), 3).await.unwrap();
        assert_eq!(plan, BackupPlan::Full(FullReason::CycleComplete));
    }

    #[tokio::test]
    async fn test_zero_threshold_is_always_full() {
        let temp_dir = TempDir::new().unwrap();
        chain(temp_dir.path(), &["2024-01-01_00-00-00"]).await;
        assert!(classify(temp_dir.path(), 0).await.unwrap().is_full());
    }

    #[tokio::test]
    async fn test_malformed_anchor_is_full() {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::write(
            temp_dir.path().join("2024-01-01_00-00-00.manifest"),
            "2024-01-01_00-00-00\nnot-a-timestamp\n",
        )
        .await
        .unwrap();

        let plan = classify(temp_dir.path(), 3).await.unwrap();
        assert_eq!(plan, BackupPlan::Full(FullReason::MalformedManifest));
    }

    #[tokio::test]
    async fn test_missing_lsn_dir_is_full() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = chain(temp_dir.path(), &["2024-01-01_00-00-00"]).await;
        tokio::fs::remove_dir(Artifacts::new(temp_dir.path(), manifest.last()).lsn_dir)
            .await
            .unwrap();

        let plan = classify(temp_dir.path(), 3).await.unwrap();
        assert_eq!(plan, BackupPlan::Full(FullReason::MissingBase));
    }
}
