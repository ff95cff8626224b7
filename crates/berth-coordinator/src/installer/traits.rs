// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Installer trait definitions.

use std::fmt;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::StepError;
use crate::version::UpgradeStep;

/// Parameters handed to the application installer.
#[derive(Clone)]
pub struct InstallConfig {
    /// Database host
    pub server: String,
    /// Database port
    pub port: u16,
    /// Administrative database user
    pub root_user: String,
    /// Administrative database password
    pub root_pass: String,
    /// Application database user
    pub login: String,
    /// Application database password
    pub pass: String,
    /// Application database name
    pub dbname: String,
    /// Initial administrator account
    pub admin_user: String,
    /// Initial administrator password
    pub admin_pass: String,
}

impl InstallConfig {
    /// Build from coordinator configuration. Fails if no root password is set.
    pub fn from_config(config: &Config) -> Result<Self, StepError> {
        let root_pass = config.database.root_pass.clone().ok_or_else(|| {
            StepError::Fatal("MYSQL_ROOT_PASS is required to install".to_string())
        })?;
        Ok(Self {
            server: config.database.host.clone(),
            port: config.database.port,
            root_user: config.database.root_user.clone(),
            root_pass,
            login: config.database.user.clone(),
            pass: config.database.pass.clone(),
            dbname: config.database.name.clone(),
            admin_user: config.admin_user.clone(),
            admin_pass: config.admin_pass.clone(),
        })
    }

    /// The `key=value` string the installer takes as its `-f` argument.
    pub fn to_config_string(&self) -> String {
        self.render(false)
    }

    fn render(&self, redact: bool) -> String {
        let secret = |s: &str| if redact { "***".to_string() } else { s.to_string() };
        format!(
            "server={} port={} root={} rootpass={} loginhost=% login={} pass={} dbname={} iuser={} iuserpass={}",
            self.server,
            self.port,
            self.root_user,
            secret(&self.root_pass),
            self.login,
            secret(&self.pass),
            self.dbname,
            self.admin_user,
            secret(&self.admin_pass),
        )
    }
}

impl fmt::Debug for InstallConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(true))
    }
}

/// Trait for installer backends.
///
/// Installers perform the mutating work; they never decide whether they
/// should run. Role and leadership checks belong to the caller.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Installer type identifier (e.g., "shell", "mock")
    fn installer_type(&self) -> &'static str;

    /// Whether the shared installation is configured and usable.
    async fn is_configured(&self) -> bool;

    /// Run first-time installation.
    async fn install(&self, config: &InstallConfig) -> Result<(), StepError>;

    /// Run a single numbered upgrade step.
    async fn run_upgrade(&self, step: UpgradeStep) -> Result<(), StepError>;

    /// Apply environment-driven settings. Must be safe to repeat.
    async fn apply_settings(&self) -> Result<(), StepError>;

    /// Make sure TLS certificates exist.
    async fn provision_certificates(&self) -> Result<(), StepError>;
}
