// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for berth-backup.

use std::path::PathBuf;

use thiserror::Error;

use crate::id::BackupId;

/// Backup and restore errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackupError {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A string is not a backup id.
    #[error("Invalid backup id '{0}': expected YYYY-MM-DD_HH-MM-SS")]
    InvalidId(String),

    /// Artifacts for this id already exist.
    #[error("Backup {0} already exists")]
    DuplicateId(BackupId),

    /// A new backup would not sort after the newest recorded backup.
    #[error("Backup {id} is not newer than {previous}")]
    OutOfOrder {
        /// The rejected id.
        id: BackupId,
        /// Newest recorded id.
        previous: BackupId,
    },

    /// A manifest line is not a backup id.
    #[error("Malformed manifest {}: line {line}", path.display())]
    MalformedManifest {
        /// Manifest file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
    },

    /// A manifest lists no backups.
    #[error("Manifest {} is empty", .0.display())]
    EmptyManifest(PathBuf),

    /// No manifest to restore from.
    #[error("No manifest found in {}", .0.display())]
    NoManifest(PathBuf),

    /// An external program failed.
    #[error("{stage} failed: {detail}")]
    Pipeline {
        /// Which program or pipeline stage.
        stage: &'static str,
        /// Exit status or error output.
        detail: String,
    },

    /// An artifact does not match its recorded checksum.
    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        /// Artifact file.
        path: PathBuf,
        /// Checksum from the sidecar.
        expected: String,
        /// Checksum of the file on disk.
        actual: String,
    },

    /// The service account does not exist on this host.
    #[error("Unknown service user '{0}'")]
    UnknownUser(String),

    /// A system call failed.
    #[error("System error: {0}")]
    Sys(#[from] nix::errno::Errno),
}

impl BackupError {
    pub(crate) fn pipeline(stage: &'static str, detail: impl Into<String>) -> Self {
        Self::Pipeline {
            stage,
            detail: detail.into(),
        }
    }
}

/// Result type using BackupError.
pub type Result<T> = std::result::Result<T, BackupError>;
