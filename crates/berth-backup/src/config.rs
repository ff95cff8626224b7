// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for berth-backup.

use std::path::PathBuf;

/// Backup agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding manifests and artifacts
    pub backup_dir: PathBuf,
    /// Live database directory
    pub data_dir: PathBuf,
    /// Incrementals taken on top of a full backup before a new cycle starts
    pub incrementals_per_cycle: usize,
    /// Number of newest cycles kept by pruning
    pub retain_cycles: usize,
    /// Health-check credential file, relative to the data directory
    pub healthcheck_cnf: PathBuf,
    /// Account that owns the data directory after restore
    pub service_user: Option<String>,
    /// Backup tool settings
    pub tool: ToolConfig,
}

/// Settings for the external backup programs.
#[derive(Clone)]
pub struct ToolConfig {
    /// `mariadb-backup` binary
    pub backup_bin: String,
    /// `mbstream` binary
    pub mbstream_bin: String,
    /// Database user the backup connects as
    pub user: String,
    /// Database password
    pub password: Option<String>,
}

impl std::fmt::Debug for ToolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolConfig")
            .field("backup_bin", &self.backup_bin)
            .field("mbstream_bin", &self.mbstream_bin)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            backup_bin: "mariadb-backup".to_string(),
            mbstream_bin: "mbstream".to_string(),
            user: "root".to_string(),
            password: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("/backup"),
            data_dir: PathBuf::from("/var/lib/mysql"),
            incrementals_per_cycle: 6,
            retain_cycles: 2,
            healthcheck_cnf: PathBuf::from(".my-healthcheck.cnf"),
            service_user: Some("mysql".to_string()),
            tool: ToolConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let retain_cycles = parse_count("RETAIN_CYCLES", defaults.retain_cycles)?;
        if retain_cycles == 0 {
            return Err(ConfigError::Invalid {
                var: "RETAIN_CYCLES",
                reason: "at least one cycle must be kept".to_string(),
            });
        }

        let service_user = match std::env::var("MARIADB_SERVICE_USER") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(v),
            Err(_) => defaults.service_user,
        };

        Ok(Self {
            backup_dir: env_path("BACKUP_DIR", defaults.backup_dir),
            data_dir: env_path("MARIADB_DATA_DIR", defaults.data_dir),
            incrementals_per_cycle: parse_count(
                "INCREMENTALS_PER_CYCLE",
                defaults.incrementals_per_cycle,
            )?,
            retain_cycles,
            healthcheck_cnf: env_path("HEALTHCHECK_CNF", defaults.healthcheck_cnf),
            service_user,
            tool: ToolConfig {
                backup_bin: std::env::var("MARIADB_BACKUP_BIN")
                    .unwrap_or(defaults.tool.backup_bin),
                mbstream_bin: std::env::var("MBSTREAM_BIN").unwrap_or(defaults.tool.mbstream_bin),
                user: std::env::var("MARIADB_USER").unwrap_or(defaults.tool.user),
                password: std::env::var("MARIADB_PASSWORD").ok(),
            },
        })
    }

    /// Path of the live health-check credential file.
    pub fn healthcheck_path(&self) -> PathBuf {
        self.data_dir.join(&self.healthcheck_cnf)
    }
}

fn env_path(var: &str, default: PathBuf) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or(default)
}

fn parse_count(var: &'static str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(var) {
        Ok(v) => v.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            reason: format!("expected a non-negative integer, got '{}'", v),
        }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable has an unusable value.
    #[error("Invalid value for {var}: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.incrementals_per_cycle, 6);
        assert_eq!(config.retain_cycles, 2);
        assert_eq!(
            config.healthcheck_path(),
            PathBuf::from("/var/lib/mysql/.my-healthcheck.cnf")
        );
    }

    #[test]
    fn test_password_redacted() {
        let tool = ToolConfig {
            password: Some("hunter2".to_string()),
            ..ToolConfig::default()
        };
        let rendered = format!("{:?}", tool);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
