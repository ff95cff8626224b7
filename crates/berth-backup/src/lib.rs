// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Berth Backup - Full/Incremental Backup Chains
//!
//! Takes hot, consistent backups of a running MariaDB server with a
//! streaming backup tool, tracks their lineage in manifests, prunes old
//! cycles, and replays a chain in order to restore.
//!
//! # Backup Directory
//!
//! ```text
//! /backup/
//! ├── 2024-05-01_02-00-00.manifest   one id per line, full first
//! ├── 2024-05-01_02-00-00.gz         compressed xbstream
//! ├── 2024-05-01_02-00-00.sha256     stream checksum
//! ├── 2024-05-01_02-00-00.cnf        health-check credentials (optional)
//! ├── 2024-05-01_08-00-00.gz         incremental on the line above
//! ├── 2024-05-01_08-00-00.lsn/       LSN metadata for the next incremental
//! └── restore-work/                  scratch space for restore
//! ```
//!
//! A cycle is one full backup plus up to `INCREMENTALS_PER_CYCLE`
//! incrementals; its manifest is named after the full backup. Ids are
//! fixed-width UTC timestamps, so file name order is chronological order.
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BACKUP_DIR` | `/backup` | Manifests and artifacts |
//! | `MARIADB_DATA_DIR` | `/var/lib/mysql` | Live data directory |
//! | `INCREMENTALS_PER_CYCLE` | `6` | Incrementals before a new full backup |
//! | `RETAIN_CYCLES` | `2` | Newest cycles kept by pruning |
//! | `MARIADB_BACKUP_BIN` | `mariadb-backup` | Backup program |
//! | `MBSTREAM_BIN` | `mbstream` | Stream extractor |
//! | `MARIADB_USER` / `MARIADB_PASSWORD` | `root` / - | Backup credentials |
//! | `MARIADB_SERVICE_USER` | `mysql` | Owner of restored files; empty to skip |
//! | `HEALTHCHECK_CNF` | `.my-healthcheck.cnf` | Credentials file, relative to the data directory |
//!
//! # Concurrency
//!
//! There is no lock on the backup directory. Callers must not start
//! overlapping backups, and must stop the database before restoring.
//!
//! # Modules
//!
//! - [`backup`]: Classify, back up, prune
//! - [`checksum`]: Stream checksums
//! - [`classify`]: Full/incremental decision
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types
//! - [`id`]: Backup identifiers
//! - [`layout`]: Artifact file names
//! - [`manifest`]: Backup chains
//! - [`prune`]: Cycle retention
//! - [`restore`]: Chain replay
//! - [`tool`]: Backup tool backends (mariadb-backup, mock)

#![deny(missing_docs)]

/// Classify, back up, prune.
pub mod backup;

/// Stream checksums.
pub mod checksum;

/// Full/incremental decision.
pub mod classify;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for backup operations.
pub mod error;

/// Backup identifiers.
pub mod id;

/// Artifact file names.
pub mod layout;

/// Backup chains.
pub mod manifest;

/// Cycle retention.
pub mod prune;

/// Chain replay.
pub mod restore;

/// Backup tool backends.
pub mod tool;

pub use backup::{BackupAgent, BackupKind, BackupReport};
pub use config::Config;
pub use error::{BackupError, Result};
pub use id::BackupId;
pub use restore::{RestoreOptions, RestoreReport, Restorer};
