// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retention of backup cycles.
//!
//! The oldest retained cycle's id is the cutoff. Every manifest and artifact
//! whose id sorts before the cutoff belongs to an older cycle (or to a failed
//! run inside one) and is removed; nothing at or after the cutoff is touched,
//! so the chain currently being extended always survives.

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;
use tracing::{debug, info};

use crate::error::Result;
use crate::id::BackupId;
use crate::manifest;

/// What a prune pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Cycles whose manifests were deleted, oldest first.
    pub cycles: Vec<BackupId>,
    /// Number of files and directories removed, manifests included.
    pub removed: usize,
}

/// Keep the newest `retain_cycles` cycles in `dir` and delete the rest.
pub async fn prune(dir: &Path, retain_cycles: usize) -> Result<PruneReport> {
    let cycles = manifest::list_cycles(dir).await?;
    let retain_cycles = retain_cycles.max(1);
    if cycles.len() <= retain_cycles {
        debug!(cycles = cycles.len(), retain = retain_cycles, "Nothing to prune");
        return Ok(PruneReport::default());
    }

    let cutoff = cycles[cycles.len() - retain_cycles];
    let mut report = PruneReport {
        cycles: cycles.into_iter().filter(|c| *c < cutoff).collect(),
        removed: 0,
    };

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(id) = BackupId::from_file_name(&path) else {
            continue;
        };
        if id >= cutoff {
            continue;
        }

        let result = if entry.file_type().await?.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        match result {
            Ok(()) => report.removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(path = %path.display(), "Pruned");
    }

    info!(
        cutoff = %cutoff,
        cycles = report.cycles.len(),
        removed = report.removed,
        "Pruned old backup cycles"
    );
    Ok(report)
}
