// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for berth-coordinator.

use std::path::PathBuf;
use std::time::Duration;

use crate::role::OrchestrationMode;

/// Coordinator configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Role hint from the orchestrator (`K8S=admin|worker`)
    pub mode: OrchestrationMode,
    /// Whether replicas share a volume and must elect a leader (`SWARM_MODE=yes`)
    pub swarm_mode: bool,
    /// Shared volume holding site configuration and coordination markers
    pub shared_dir: PathBuf,
    /// Installed application code
    pub code_dir: PathBuf,
    /// Files shipped with the container image (target version, upgrade scripts)
    pub image_dir: PathBuf,
    /// Leader election timings
    pub election: ElectionTimings,
    /// Database connection parameters
    pub database: DatabaseConfig,
    /// Initial administrator account
    pub admin_user: String,
    /// Initial administrator password
    pub admin_pass: String,
    /// Number of TCP probes before the database is declared unreachable
    pub db_wait_attempts: u32,
    /// Optional session store (`host` or `host:port`)
    pub redis_server: Option<String>,
    /// Command run in the foreground when this process operates
    pub serve_cmd: Option<String>,
    /// Certificate provisioning command
    pub ssl_cmd: Option<String>,
}

/// Timings for leader election and follower waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionTimings {
    /// Heartbeat age after which a leader is considered dead
    pub stale_timeout: Duration,
    /// Total time a follower waits for the completion marker
    pub max_wait: Duration,
    /// Interval between follower polls
    pub poll_interval: Duration,
}

impl Default for ElectionTimings {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_secs(300),
            max_wait: Duration::from_secs(600),
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Database connection parameters.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Administrative user used by the installer
    pub root_user: String,
    /// Administrative password; only required when installing
    pub root_pass: Option<String>,
    /// Application user
    pub user: String,
    /// Application password
    pub pass: String,
    /// Application database name
    pub name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: OrchestrationMode::Standalone,
            swarm_mode: false,
            shared_dir: PathBuf::from("/var/www/localhost/htdocs/openemr/sites"),
            code_dir: PathBuf::from("/var/www/localhost/htdocs/openemr"),
            image_dir: PathBuf::from("/root"),
            election: ElectionTimings::default(),
            database: DatabaseConfig {
                host: "mysql".to_string(),
                port: 3306,
                root_user: "root".to_string(),
                root_pass: None,
                user: "openemr".to_string(),
                pass: "openemr".to_string(),
                name: "openemr".to_string(),
            },
            admin_user: "admin".to_string(),
            admin_pass: "pass".to_string(),
            db_wait_attempts: 60,
            redis_server: None,
            serve_cmd: None,
            ssl_cmd: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = OrchestrationMode::parse(std::env::var("K8S").ok().as_deref())?;

        let swarm_mode = std::env::var("SWARM_MODE")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "yes" | "true" | "1"))
            .unwrap_or(false);

        let shared_dir = PathBuf::from(env_or(
            "BERTH_SHARED_DIR",
            "/var/www/localhost/htdocs/openemr/sites",
        ));
        let code_dir = PathBuf::from(env_or("BERTH_CODE_DIR", "/var/www/localhost/htdocs/openemr"));
        let image_dir = PathBuf::from(env_or("BERTH_IMAGE_DIR", "/root"));

        let defaults = ElectionTimings::default();
        let election = ElectionTimings {
            stale_timeout: parse_secs("LEADER_STALE_TIMEOUT", defaults.stale_timeout)?,
            max_wait: parse_secs("LEADER_MAX_WAIT", defaults.max_wait)?,
            poll_interval: parse_secs("LEADER_POLL_INTERVAL", defaults.poll_interval)?,
        };
        if election.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "LEADER_POLL_INTERVAL",
                reason: "must be greater than zero".to_string(),
            });
        }

        let port: u16 = env_or("MYSQL_PORT", "3306")
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database = DatabaseConfig {
            host: env_or("MYSQL_HOST", "mysql"),
            port,
            root_user: env_or("MYSQL_ROOT_USER", "root"),
            root_pass: std::env::var("MYSQL_ROOT_PASS").ok(),
            user: env_or("MYSQL_USER", "openemr"),
            pass: env_or("MYSQL_PASS", "openemr"),
            name: env_or("MYSQL_DATABASE", "openemr"),
        };

        let db_wait_attempts = env_or("DB_WAIT_ATTEMPTS", "60").parse().map_err(|_| {
            ConfigError::Invalid {
                var: "DB_WAIT_ATTEMPTS",
                reason: "expected a positive integer".to_string(),
            }
        })?;

        Ok(Self {
            mode,
            swarm_mode,
            shared_dir,
            code_dir,
            image_dir,
            election,
            database,
            admin_user: env_or("OE_USER", "admin"),
            admin_pass: env_or("OE_PASS", "pass"),
            db_wait_attempts,
            redis_server: non_empty("REDIS_SERVER"),
            serve_cmd: non_empty("BERTH_SERVE_CMD"),
            ssl_cmd: non_empty("BERTH_SSL_CMD"),
        })
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn non_empty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_secs(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid {
                var,
                reason: format!("expected seconds, got '{}'", v),
            }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
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
    fn test_election_timings_default() {
        let timings = ElectionTimings::default();
        assert_eq!(timings.stale_timeout, Duration::from_secs(300));
        assert_eq!(timings.max_wait, Duration::from_secs(600));
        assert_eq!(timings.poll_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.mode, OrchestrationMode::Standalone);
        assert!(!config.swarm_mode);
        assert_eq!(config.database.port, 3306);
        assert!(config.database.root_pass.is_none());
    }
}
