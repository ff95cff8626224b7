// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backup tool trait definitions.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Hot backup tool for a running database.
///
/// A backup writes one compressed stream plus an LSN metadata directory. A
/// restore extracts streams into directories, prepares the full one, merges
/// each incremental into it in order, and copies the result into the data
/// directory.
#[async_trait]
pub trait BackupTool: Send + Sync {
    /// Short name for logs.
    fn tool_type(&self) -> &'static str;

    /// Stream a backup to `stream`, recording LSN metadata in `lsn_dir`.
    ///
    /// With `base_lsn_dir` the backup is incremental on top of the backup
    /// that produced that directory. Any failure anywhere in the pipeline is
    /// an error; the caller discards what was written.
    async fn backup(
        &self,
        lsn_dir: &Path,
        base_lsn_dir: Option<&Path>,
        stream: &Path,
    ) -> Result<()>;

    /// Unpack a compressed stream into `dest`, which must exist.
    async fn extract(&self, stream: &Path, dest: &Path) -> Result<()>;

    /// Make an extracted full backup consistent in place.
    async fn prepare(&self, dir: &Path) -> Result<()>;

    /// Merge an extracted incremental into a prepared full backup.
    async fn prepare_incremental(&self, dir: &Path, incremental: &Path) -> Result<()>;

    /// Copy a prepared backup into an empty data directory.
    async fn copy_back(&self, dir: &Path, data_dir: &Path) -> Result<()>;
}
