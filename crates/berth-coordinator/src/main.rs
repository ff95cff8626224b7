// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Berth Coordinator - container entrypoint
//!
//! Coordinates setup with the other replicas, then either runs the
//! configured server command in the foreground or exits.

use std::process::{ExitCode, Stdio};
use std::sync::Arc;

use tracing::{error, info, warn};

use berth_coordinator::config::Config;
use berth_coordinator::coordinator::Coordinator;
use berth_coordinator::installer::{ShellInstaller, ShellInstallerConfig};
use berth_coordinator::lease::FileLeaseStore;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "berth_coordinator=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        shared_dir = %config.shared_dir.display(),
        code_dir = %config.code_dir.display(),
        swarm = config.swarm_mode,
        "Starting Berth Coordinator"
    );

    let installer = Arc::new(ShellInstaller::new(ShellInstallerConfig::from_config(
        &config,
    )));
    let store = Arc::new(FileLeaseStore::new(&config.shared_dir));
    let serve_cmd = config.serve_cmd.clone();

    let coordinator = Coordinator::builder()
        .config(config)
        .installer(installer)
        .store(store)
        .build()?;

    let outcome = match coordinator.run().await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "Startup coordination failed");
            return Ok(ExitCode::FAILURE);
        }
    };

    if !outcome.should_serve() {
        info!(role = %outcome.role, "Not an operator, exiting after setup");
        return Ok(ExitCode::SUCCESS);
    }

    let Some(cmd) = serve_cmd else {
        info!("No server command configured, exiting");
        return Ok(ExitCode::SUCCESS);
    };

    info!(cmd = %cmd, session = ?outcome.session, "Starting server");
    let status = outcome
        .serve_command(&cmd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await?;

    info!(status = %status, "Server exited");
    Ok(match status.code() {
        Some(0) => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::FAILURE,
    })
}
