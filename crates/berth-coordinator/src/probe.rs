// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reachability probes for external dependencies.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::StepError;
use crate::retry::{self, RetryPolicy};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_REDIS_PORT: u16 = 6379;

/// Environment variable naming the PHP session handler for the server.
pub const SESSION_HANDLER_ENV: &str = "BERTH_SESSION_HANDLER";
/// Environment variable holding the PHP session save path, set for Redis only.
pub const SESSION_SAVE_PATH_ENV: &str = "BERTH_SESSION_SAVE_PATH";

/// Where PHP sessions are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionBackend {
    /// Local files (always available).
    Files,
    /// A reachable Redis server.
    Redis(String),
}

impl SessionBackend {
    /// PHP `session.save_handler` value.
    pub fn handler(&self) -> &'static str {
        match self {
            SessionBackend::Files => "files",
            SessionBackend::Redis(_) => "redis",
        }
    }

    /// PHP `session.save_path` value; `None` keeps PHP's default.
    pub fn save_path(&self) -> Option<String> {
        match self {
            SessionBackend::Files => None,
            SessionBackend::Redis(addr) => Some(format!("tcp://{}", addr)),
        }
    }

    /// Pass the backend to a child process. An inherited Redis save path is
    /// removed when falling back to files.
    pub fn apply_to(&self, command: &mut Command) {
        command.env(SESSION_HANDLER_ENV, self.handler());
        match self.save_path() {
            Some(path) => command.env(SESSION_SAVE_PATH_ENV, path),
            None => command.env_remove(SESSION_SAVE_PATH_ENV),
        };
    }
}

/// Try a single TCP connection.
pub async fn tcp_reachable(addr: &str) -> Result<(), StepError> {
    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(StepError::Transient(format!("{}: {}", addr, e))),
        Err(_) => Err(StepError::Transient(format!("{}: connect timed out", addr))),
    }
}

/// Poll the database port until it accepts connections.
pub async fn wait_for_database(
    host: &str,
    port: u16,
    policy: &RetryPolicy,
) -> Result<(), StepError> {
    let addr = format!("{}:{}", host, port);
    info!(addr = %addr, attempts = policy.max_attempts, "Waiting for database");
    retry::with_backoff(
        policy,
        "database",
        |_| tcp_reachable(&addr),
        |attempt, e| {
            if attempt == 1 || attempt % 10 == 0 {
                warn!(attempt = attempt, error = %e, "Database not reachable yet");
            }
        },
    )
    .await?;
    info!(addr = %addr, "Database is reachable");
    Ok(())
}

/// Choose the session backend, probing Redis if one is configured.
///
/// Returns the probe failure alongside the fallback so the caller can decide
/// whether degrading is acceptable.
pub async fn select_session_backend(
    redis_server: Option<&str>,
) -> (SessionBackend, Option<StepError>) {
    let Some(server) = redis_server else {
        return (SessionBackend::Files, None);
    };

    let addr = if server.contains(':') {
        server.to_string()
    } else {
        format!("{}:{}", server, DEFAULT_REDIS_PORT)
    };

    match tcp_reachable(&addr).await {
        Ok(()) => (SessionBackend::Redis(addr), None),
        Err(e) => (SessionBackend::Files, Some(e)),
    }
}
