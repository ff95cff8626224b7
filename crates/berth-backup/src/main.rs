// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Berth Backup - command line
//!
//! `berth-backup backup` runs one classify, back up, prune cycle.
//! `berth-backup restore [--manifest <file>] [--dry-run]` replays a chain.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use berth_backup::config::Config;
use berth_backup::tool::MariaBackupTool;
use berth_backup::{BackupAgent, RestoreOptions, Restorer};

/// Full/incremental MariaDB backups with manifest-ordered restore.
#[derive(Parser, Debug)]
#[command(name = "berth-backup", version)]
struct Args {
    /// Backup directory
    #[arg(long, env = "BACKUP_DIR")]
    backup_dir: Option<PathBuf>,

    /// Live database directory
    #[arg(long, env = "MARIADB_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a full or incremental backup, then prune old cycles.
    Backup,
    /// Restore a backup chain into the data directory.
    Restore {
        /// Manifest to restore; the newest one when omitted.
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Prepare the backup but leave the data directory untouched.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "berth_backup=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(dir) = args.backup_dir {
        config.backup_dir = dir;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }

    info!(
        backup_dir = %config.backup_dir.display(),
        data_dir = %config.data_dir.display(),
        "Starting Berth Backup"
    );
    let tool = Arc::new(MariaBackupTool::new(config.tool.clone()));

    match args.cmd {
        Command::Backup => match BackupAgent::new(config, tool).run().await {
            Ok(report) => {
                info!(
                    id = %report.id,
                    kind = ?report.kind,
                    cycle = %report.cycle,
                    pruned_cycles = report.pruned.cycles.len(),
                    "Backup finished"
                );
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                error!(error = %e, "Backup failed");
                Ok(ExitCode::FAILURE)
            }
        },
        Command::Restore { manifest, dry_run } => {
            let options = RestoreOptions { manifest, dry_run };
            match Restorer::new(config, tool).restore(&options).await {
                Ok(report) => {
                    info!(
                        manifest = %report.manifest.display(),
                        applied = report.applied.len(),
                        dry_run = report.dry_run,
                        "Restore finished"
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    error!(error = %e, "Restore failed");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}
