// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Installer that drives the application's own scripts.
//!
//! - install: `php auto_configure.php -f "<config string>"` in the code directory
//! - configured: `<shared>/default/sqlconf.php` contains `$config = 1`
//! - upgrade step n: `sh <image>/fsupgrade-<n>.sh`
//! - settings: `OPENEMR_SETTING_*` variables written to `<shared>/default/docker-settings.json`
//! - certificates: optional shell command

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use super::traits::*;
use crate::config::Config;
use crate::error::StepError;
use crate::version::UpgradeStep;

/// Prefix of variables forwarded as application settings.
pub const SETTING_PREFIX: &str = "OPENEMR_SETTING_";

const CONFIGURED_FLAG: &str = "$config = 1";
const STDERR_TAIL: usize = 2048;

/// Shell installer configuration.
#[derive(Debug, Clone)]
pub struct ShellInstallerConfig {
    /// Installed application code
    pub code_dir: PathBuf,
    /// Shared site directory
    pub shared_dir: PathBuf,
    /// Image directory holding upgrade scripts
    pub image_dir: PathBuf,
    /// PHP interpreter
    pub php_bin: String,
    /// Certificate provisioning command
    pub ssl_cmd: Option<String>,
    /// Settings to apply, keyed by name without prefix
    pub settings: BTreeMap<String, String>,
}

impl ShellInstallerConfig {
    /// Derive from coordinator configuration and the process environment.
    pub fn from_config(config: &Config) -> Self {
        let settings = std::env::vars()
            .filter_map(|(k, v)| k.strip_prefix(SETTING_PREFIX).map(|name| (name.to_string(), v)))
            .collect();
        Self {
            code_dir: config.code_dir.clone(),
            shared_dir: config.shared_dir.clone(),
            image_dir: config.image_dir.clone(),
            php_bin: std::env::var("PHP_BIN").unwrap_or_else(|_| "php".to_string()),
            ssl_cmd: config.ssl_cmd.clone(),
            settings,
        }
    }
}

/// Installer backed by external scripts.
pub struct ShellInstaller {
    config: ShellInstallerConfig,
}

impl ShellInstaller {
    /// Create a new shell installer.
    pub fn new(config: ShellInstallerConfig) -> Self {
        Self { config }
    }

    fn sqlconf_path(&self) -> PathBuf {
        self.config.shared_dir.join("default").join("sqlconf.php")
    }

    fn settings_path(&self) -> PathBuf {
        self.config
            .shared_dir
            .join("default")
            .join("docker-settings.json")
    }

    /// Path of the script for an upgrade step.
    pub fn upgrade_script(&self, step: UpgradeStep) -> PathBuf {
        self.config.image_dir.join(format!("fsupgrade-{}.sh", step))
    }
}

/// Map a spawn error: a missing program can't be fixed by retrying.
fn spawn_error(program: &str, e: std::io::Error) -> StepError {
    if e.kind() == ErrorKind::NotFound {
        StepError::Fatal(format!("{} not found", program))
    } else {
        StepError::Transient(format!("failed to run {}: {}", program, e))
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

fn exit_code(output: &Output) -> i32 {
    output.status.code().unwrap_or(-1)
}

#[async_trait]
impl Installer for ShellInstaller {
    fn installer_type(&self) -> &'static str {
        "shell"
    }

    async fn is_configured(&self) -> bool {
        match fs::read_to_string(self.sqlconf_path()).await {
            Ok(content) => content.contains(CONFIGURED_FLAG),
            Err(e) => {
                debug!(path = %self.sqlconf_path().display(), error = %e, "No site configuration");
                false
            }
        }
    }

    async fn install(&self, config: &InstallConfig) -> Result<(), StepError> {
        info!(config = ?config, "Running installer");
        let output = Command::new(&self.config.php_bin)
            .arg("auto_configure.php")
            .arg("-f")
            .arg(config.to_config_string())
            .current_dir(&self.config.code_dir)
            .output()
            .await
            .map_err(|e| spawn_error(&self.config.php_bin, e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(StepError::Transient(format!(
                "installer exited with {}: {}",
                exit_code(&output),
                stderr_tail(&output)
            )))
        }
    }

    async fn run_upgrade(&self, step: UpgradeStep) -> Result<(), StepError> {
        let script = self.upgrade_script(step);
        if !fs::try_exists(&script).await? {
            return Err(StepError::Fatal(format!(
                "upgrade script {} is missing",
                script.display()
            )));
        }

        info!(step = %step, script = %script.display(), "Running upgrade step");
        let output = Command::new("sh")
            .arg(&script)
            .current_dir(&self.config.code_dir)
            .output()
            .await
            .map_err(|e| spawn_error("sh", e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(StepError::Fatal(format!(
                "upgrade step {} exited with {}: {}",
                step,
                exit_code(&output),
                stderr_tail(&output)
            )))
        }
    }

    async fn apply_settings(&self) -> Result<(), StepError> {
        let path = self.settings_path();
        let rendered = serde_json::to_string_pretty(&self.config.settings)
            .map_err(|e| StepError::Fatal(e.to_string()))?;

        if let Ok(existing) = fs::read_to_string(&path).await
            && existing == rendered
        {
            debug!(path = %path.display(), "Settings unchanged");
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, rendered).await?;
        info!(
            path = %path.display(),
            count = self.config.settings.len(),
            "Applied settings"
        );
        Ok(())
    }

    async fn provision_certificates(&self) -> Result<(), StepError> {
        let Some(cmd) = &self.config.ssl_cmd else {
            debug!("No certificate command configured");
            return Ok(());
        };

        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .await
            .map_err(|e| spawn_error("sh", e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(StepError::Fatal(format!(
                "certificate command exited with {}: {}",
                exit_code(&output),
                stderr_tail(&output)
            )))
        }
    }
}
