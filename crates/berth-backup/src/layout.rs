// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Names of the files one backup leaves in the backup directory.

use std::path::{Path, PathBuf};

use crate::id::BackupId;

/// Compressed backup stream suffix.
pub const STREAM_SUFFIX: &str = "gz";
/// LSN metadata directory suffix.
pub const LSN_SUFFIX: &str = "lsn";
/// Captured health-check credentials suffix.
pub const CNF_SUFFIX: &str = "cnf";
/// Stream checksum suffix.
pub const CHECKSUM_SUFFIX: &str = "sha256";

/// Paths of the artifact set for one backup id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    /// The backup id.
    pub id: BackupId,
    /// `<id>.gz`
    pub stream: PathBuf,
    /// `<id>.lsn/`
    pub lsn_dir: PathBuf,
    /// `<id>.cnf`
    pub cnf: PathBuf,
    /// `<id>.sha256`
    pub checksum: PathBuf,
}

impl Artifacts {
    /// Artifact paths for `id` inside `dir`.
    pub fn new(dir: &Path, id: BackupId) -> Self {
        Self {
            id,
            stream: dir.join(id.file_name(STREAM_SUFFIX)),
            lsn_dir: dir.join(id.file_name(LSN_SUFFIX)),
            cnf: dir.join(id.file_name(CNF_SUFFIX)),
            checksum: dir.join(id.file_name(CHECKSUM_SUFFIX)),
        }
    }

    /// Whether any artifact for this id is already on disk.
    pub async fn any_exist(&self) -> std::io::Result<bool> {
        for path in [&self.stream, &self.lsn_dir, &self.cnf, &self.checksum] {
            if tokio::fs::try_exists(path).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
