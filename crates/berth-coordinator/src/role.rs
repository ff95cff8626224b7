// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process role: who may mutate shared state and who may serve.

use std::fmt;

use crate::config::ConfigError;

/// Role hint given by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrchestrationMode {
    /// No hint: a single instance that both sets up and serves.
    #[default]
    Standalone,
    /// Setup-only job; never serves traffic.
    Admin,
    /// Serving-only replica; never mutates installation state.
    Worker,
}

impl OrchestrationMode {
    /// Parse the `K8S` variable value.
    pub fn parse(value: Option<&str>) -> Result<Self, ConfigError> {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(Self::Standalone),
            Some(v) if v.is_empty() => Ok(Self::Standalone),
            Some(v) if v == "admin" => Ok(Self::Admin),
            Some(v) if v == "worker" => Ok(Self::Worker),
            Some(v) => Err(ConfigError::Invalid {
                var: "K8S",
                reason: format!("expected 'admin' or 'worker', got '{}'", v),
            }),
        }
    }
}

/// The rights a process holds, derived at startup and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Role {
    /// May mutate installation state.
    pub authority: bool,
    /// May serve requests.
    pub operator: bool,
}

impl Role {
    /// Initial role from the orchestration hint, before any election.
    pub fn from_mode(mode: OrchestrationMode) -> Self {
        match mode {
            OrchestrationMode::Standalone => Self {
                authority: true,
                operator: true,
            },
            OrchestrationMode::Admin => Self {
                authority: true,
                operator: false,
            },
            OrchestrationMode::Worker => Self {
                authority: false,
                operator: true,
            },
        }
    }

    /// Whether this process may keep running against the given installation state.
    ///
    /// A process with no authority over an unconfigured installation must
    /// refuse to start.
    pub fn may_proceed(&self, configured: bool) -> bool {
        self.authority || configured
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match (self.authority, self.operator) {
            (true, true) => "leader+operator",
            (true, false) => "leader",
            (false, true) => "operator",
            (false, false) => "idle",
        };
        f.write_str(name)
    }
}
