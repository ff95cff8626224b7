// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock backup tool for testing.
//!
//! Simulates a key/value database with a log sequence number. Streams are
//! JSON holding the rows changed since the base LSN, so a restore only
//! reproduces the live state if every chain link is applied in order.
//! Clones share state.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::traits::*;
use crate::error::{BackupError, Result};

/// LSN metadata file written into every LSN directory.
pub const CHECKPOINTS_FILE: &str = "xtrabackup_checkpoints";
const EXTRACTED_FILE: &str = "backup.json";
const PREPARED_FILE: &str = "prepared.json";
/// File holding the rows after copy-back.
pub const DATA_FILE: &str = "data.json";

/// A call made against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    /// `backup`, with whether it was incremental
    Backup {
        /// Whether a base LSN directory was given
        incremental: bool,
    },
    /// `extract`
    Extract,
    /// `prepare`
    Prepare,
    /// `prepare_incremental`
    PrepareIncremental,
    /// `copy_back`
    CopyBack,
}

#[derive(Debug, Default)]
struct Database {
    lsn: u64,
    rows: BTreeMap<String, (String, u64)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Stream {
    from_lsn: Option<u64>,
    to_lsn: u64,
    rows: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Prepared {
    lsn: u64,
    rows: BTreeMap<String, String>,
}

/// Mock backup tool over an in-memory database.
#[derive(Debug, Clone, Default)]
pub struct MockBackupTool {
    db: Arc<Mutex<Database>>,
    calls: Arc<Mutex<Vec<ToolCall>>>,
    fail_backups: Arc<AtomicBool>,
}

impl MockBackupTool {
    /// Create a mock over an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following backup fail after writing a partial stream.
    pub fn with_failing_backups(self) -> Self {
        self.fail_backups.store(true, Ordering::SeqCst);
        self
    }

    /// Write a row to the live database.
    pub async fn put(&self, key: &str, value: &str) {
        let mut db = self.db.lock().await;
        db.lsn += 1;
        let lsn = db.lsn;
        db.rows.insert(key.to_string(), (value.to_string(), lsn));
    }

    /// Current live rows.
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.db
            .lock()
            .await
            .rows
            .iter()
            .map(|(k, (v, _))| (k.clone(), v.clone()))
            .collect()
    }

    /// All calls so far, in order.
    pub async fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().await.clone()
    }

    /// Rows copied back into `data_dir`.
    pub async fn read_data_dir(data_dir: &Path) -> Result<BTreeMap<String, String>> {
        read_json(&data_dir.join(DATA_FILE), "read data").await
    }

    async fn record(&self, call: ToolCall) {
        self.calls.lock().await.push(call);
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, stage: &'static str) -> Result<T> {
    let bytes = tokio::fs::read(path).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| BackupError::pipeline(stage, format!("{}: {}", path.display(), e)))
}

async fn write_json<T: Serialize>(path: &Path, value: &T, stage: &'static str) -> Result<()> {
    let bytes =
        serde_json::to_vec(value).map_err(|e| BackupError::pipeline(stage, e.to_string()))?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

async fn read_checkpoint(lsn_dir: &Path) -> Result<u64> {
    let content = tokio::fs::read_to_string(lsn_dir.join(CHECKPOINTS_FILE)).await?;
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "to_lsn")
        .and_then(|(_, value)| value.trim().parse().ok())
        .ok_or_else(|| BackupError::pipeline("mariadb-backup", "no to_lsn in base checkpoints"))
}

#[async_trait]
impl BackupTool for MockBackupTool {
    fn tool_type(&self) -> &'static str {
        "mock"
    }

    async fn backup(
        &self,
        lsn_dir: &Path,
        base_lsn_dir: Option<&Path>,
        stream: &Path,
    ) -> Result<()> {
        self.record(ToolCall::Backup {
            incremental: base_lsn_dir.is_some(),
        })
        .await;

        if self.fail_backups.load(Ordering::SeqCst) {
            tokio::fs::write(stream, b"\x1f\x8b partial").await?;
            return Err(BackupError::pipeline(
                "mariadb-backup",
                "exited with 1: mock failure",
            ));
        }

        let from_lsn = match base_lsn_dir {
            Some(base) => Some(read_checkpoint(base).await?),
            None => None,
        };

        let db = self.db.lock().await;
        let rows = db
            .rows
            .iter()
            .filter(|(_, (_, lsn))| from_lsn.is_none_or(|base| *lsn > base))
            .map(|(k, (v, _))| (k.clone(), v.clone()))
            .collect();
        let to_lsn = db.lsn;
        drop(db);

        let backup_type = if from_lsn.is_some() {
            "incremental"
        } else {
            "full-backuped"
        };
        tokio::fs::create_dir_all(lsn_dir).await?;
        tokio::fs::write(
            lsn_dir.join(CHECKPOINTS_FILE),
            format!("backup_type = {}\nto_lsn = {}\n", backup_type, to_lsn),
        )
        .await?;
        write_json(
            stream,
            &Stream {
                from_lsn,
                to_lsn,
                rows,
            },
            "gzip",
        )
        .await
    }

    async fn extract(&self, stream: &Path, dest: &Path) -> Result<()> {
        self.record(ToolCall::Extract).await;
        let parsed: Stream = read_json(stream, "mbstream").await?;
        write_json(&dest.join(EXTRACTED_FILE), &parsed, "mbstream").await
    }

    async fn prepare(&self, dir: &Path) -> Result<()> {
        self.record(ToolCall::Prepare).await;
        let full: Stream = read_json(&dir.join(EXTRACTED_FILE), "prepare").await?;
        if full.from_lsn.is_some() {
            return Err(BackupError::pipeline("prepare", "not a full backup"));
        }
        write_json(
            &dir.join(PREPARED_FILE),
            &Prepared {
                lsn: full.to_lsn,
                rows: full.rows,
            },
            "prepare",
        )
        .await
    }

    async fn prepare_incremental(&self, dir: &Path, incremental: &Path) -> Result<()> {
        self.record(ToolCall::PrepareIncremental).await;
        let stage = "prepare incremental";
        let mut prepared: Prepared = read_json(&dir.join(PREPARED_FILE), stage).await?;
        let delta: Stream = read_json(&incremental.join(EXTRACTED_FILE), stage).await?;

        if delta.from_lsn != Some(prepared.lsn) {
            return Err(BackupError::pipeline(
                "prepare incremental",
                format!(
                    "incremental starts at {:?} but the backup is at {}",
                    delta.from_lsn, prepared.lsn
                ),
            ));
        }
        prepared.rows.extend(delta.rows);
        prepared.lsn = delta.to_lsn;
        write_json(&dir.join(PREPARED_FILE), &prepared, "prepare incremental").await
    }

    async fn copy_back(&self, dir: &Path, data_dir: &Path) -> Result<()> {
        self.record(ToolCall::CopyBack).await;
        let mut entries = tokio::fs::read_dir(data_dir).await?;
        if entries.next_entry().await?.is_some() {
            return Err(BackupError::pipeline("copy-back", "data directory is not empty"));
        }
        let prepared: Prepared = read_json(&dir.join(PREPARED_FILE), "copy-back").await?;
        write_json(&data_dir.join(DATA_FILE), &prepared.rows, "copy-back").await
    }
}
