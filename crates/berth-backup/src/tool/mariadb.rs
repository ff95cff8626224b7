// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `mariadb-backup` backend.
//!
//! Backups run as `mariadb-backup --backup --stream=xbstream | gzip`, with
//! the compressor writing straight to the artifact. Both ends of every
//! pipeline are checked; a zero exit from `gzip` after `mariadb-backup`
//! died is still a failed backup.

use std::io::ErrorKind;
use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::traits::*;
use crate::config::ToolConfig;
use crate::error::{BackupError, Result};

const STDERR_TAIL: usize = 2048;

/// Backup tool driving `mariadb-backup`, `gzip` and `mbstream`.
pub struct MariaBackupTool {
    config: ToolConfig,
}

impl MariaBackupTool {
    /// Create a backend with the given programs and credentials.
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    fn backup_command(&self) -> Command {
        Command::new(&self.config.backup_bin)
    }

    fn with_credentials(&self, cmd: &mut Command) {
        cmd.arg(format!("--user={}", self.config.user));
        if let Some(password) = &self.config.password {
            cmd.arg(format!("--password={}", password));
        }
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> BackupError {
    if e.kind() == ErrorKind::NotFound {
        BackupError::pipeline("spawn", format!("{} not found", program))
    } else {
        BackupError::pipeline("spawn", format!("failed to run {}: {}", program, e))
    }
}

fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    let start = trimmed.len().saturating_sub(STDERR_TAIL);
    let start = (start..trimmed.len())
        .find(|i| trimmed.is_char_boundary(*i))
        .unwrap_or(trimmed.len());
    trimmed[start..].to_string()
}

fn check(stage: &'static str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(BackupError::pipeline(
        stage,
        format!(
            "exited with {}: {}",
            output.status.code().unwrap_or(-1),
            stderr_tail(output)
        ),
    ))
}

async fn run(stage: &'static str, program: &str, cmd: &mut Command) -> Result<()> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| spawn_error(program, e))?;
    check(stage, &output)
}

/// Run `producer | consumer` and fail if either side fails.
async fn pipe(
    producer: (&'static str, &str, &mut Command),
    consumer: (&'static str, &str, &mut Command),
) -> Result<()> {
    let (up_stage, up_program, up_cmd) = producer;
    let (down_stage, down_program, down_cmd) = consumer;

    let mut upstream = up_cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(up_program, e))?;
    let stdout = upstream
        .stdout
        .take()
        .ok_or_else(|| BackupError::pipeline(up_stage, "stdout was not captured"))?;
    let stdin: Stdio = stdout.try_into()?;

    let downstream = match down_cmd.stdin(stdin).stderr(Stdio::piped()).spawn() {
        Ok(child) => child,
        Err(e) => {
            let _ = upstream.kill().await;
            return Err(spawn_error(down_program, e));
        }
    };

    let (up, down) = tokio::try_join!(upstream.wait_with_output(), downstream.wait_with_output())?;
    check(up_stage, &up)?;
    check(down_stage, &down)
}

#[async_trait]
impl BackupTool for MariaBackupTool {
    fn tool_type(&self) -> &'static str {
        "mariadb-backup"
    }

    async fn backup(
        &self,
        lsn_dir: &Path,
        base_lsn_dir: Option<&Path>,
        stream: &Path,
    ) -> Result<()> {
        let mut backup = self.backup_command();
        backup
            .arg("--backup")
            .arg("--stream=xbstream")
            .arg(format!("--extra-lsndir={}", lsn_dir.display()));
        self.with_credentials(&mut backup);
        if let Some(base) = base_lsn_dir {
            backup.arg(format!("--incremental-basedir={}", base.display()));
        }

        let artifact = tokio::fs::File::create(stream).await?.into_std().await;
        let mut gzip = Command::new("gzip");
        gzip.arg("-c").stdout(Stdio::from(artifact));

        info!(
            stream = %stream.display(),
            incremental = base_lsn_dir.is_some(),
            "Streaming backup"
        );
        pipe(
            ("mariadb-backup", &self.config.backup_bin, &mut backup),
            ("gzip", "gzip", &mut gzip),
        )
        .await
    }

    async fn extract(&self, stream: &Path, dest: &Path) -> Result<()> {
        debug!(stream = %stream.display(), dest = %dest.display(), "Extracting stream");
        let mut gunzip = Command::new("gzip");
        gunzip.arg("-dc").arg(stream);
        let mut mbstream = Command::new(&self.config.mbstream_bin);
        mbstream.arg("-x").arg("-C").arg(dest).stdout(Stdio::null());

        pipe(
            ("gunzip", "gzip", &mut gunzip),
            ("mbstream", &self.config.mbstream_bin, &mut mbstream),
        )
        .await
    }

    async fn prepare(&self, dir: &Path) -> Result<()> {
        run(
            "prepare",
            &self.config.backup_bin,
            self.backup_command()
                .arg("--prepare")
                .arg(format!("--target-dir={}", dir.display())),
        )
        .await
    }

    async fn prepare_incremental(&self, dir: &Path, incremental: &Path) -> Result<()> {
        run(
            "prepare incremental",
            &self.config.backup_bin,
            self.backup_command()
                .arg("--prepare")
                .arg(format!("--target-dir={}", dir.display()))
                .arg(format!("--incremental-dir={}", incremental.display())),
        )
        .await
    }

    async fn copy_back(&self, dir: &Path, data_dir: &Path) -> Result<()> {
        run(
            "copy-back",
            &self.config.backup_bin,
            self.backup_command()
                .arg("--copy-back")
                .arg(format!("--target-dir={}", dir.display()))
                .arg(format!("--datadir={}", data_dir.display())),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tool(backup_bin: &str) -> MariaBackupTool {
        MariaBackupTool::new(ToolConfig {
            backup_bin: backup_bin.to_string(),
            ..ToolConfig::default()
        })
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let err = tool("/nonexistent/mariadb-backup")
            .prepare(temp_dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_failed_producer_fails_pipeline() {
        let temp_dir = TempDir::new().unwrap();
        let stream = temp_dir.path().join("x.gz");

        // `false` ignores its arguments and exits 1; gzip alone would succeed.
        let err = tool("false")
            .backup(temp_dir.path(), None, &stream)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackupError::Pipeline {
                stage: "mariadb-backup",
                ..
            }
        ));
    }
}
