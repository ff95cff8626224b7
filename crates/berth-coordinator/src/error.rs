// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for berth-coordinator.

use thiserror::Error;

/// Coordinator errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoordinatorError {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The leadership lease was taken over by another replica.
    #[error("Leadership lost: lease now held by {holder} (epoch {epoch})")]
    LeaseLost {
        /// Current holder of the lease, if readable.
        holder: String,
        /// Epoch of the current lease.
        epoch: u64,
    },

    /// A process without authority found no usable installation.
    #[error("No usable configuration on the shared volume and this process has no authority to create it")]
    Unconfigured,

    /// A setup step failed permanently.
    #[error("Setup step '{step}' failed: {source}")]
    Step {
        /// Step name.
        step: &'static str,
        /// Underlying failure.
        #[source]
        source: StepError,
    },
}

/// Result type using CoordinatorError.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Outcome classification for a single state-machine step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    /// An external dependency is not ready yet; retrying may succeed.
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying cannot help.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StepError {
    /// Whether the step may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Promote a transient failure to fatal, e.g. once retries are exhausted.
    pub fn into_fatal(self) -> Self {
        match self {
            Self::Transient(msg) => Self::Fatal(msg),
            fatal => fatal,
        }
    }
}

impl From<std::io::Error> for StepError {
    fn from(e: std::io::Error) -> Self {
        Self::Fatal(e.to_string())
    }
}
