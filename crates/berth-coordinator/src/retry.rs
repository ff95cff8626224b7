// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded retry with a capped, slowly increasing backoff.
//!
//! Only [`StepError::Transient`] failures are retried. A fatal failure is
//! returned immediately, and the last transient failure is promoted to fatal
//! once the attempt budget is spent.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::StepError;

/// Retry budget and delay schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the n-th failure; the last entry repeats.
    pub delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Create a policy. An empty delay schedule retries without sleeping.
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delays,
        }
    }

    /// Installer policy: three short waits, then longer ones.
    pub fn install() -> Self {
        Self::new(
            5,
            vec![
                Duration::from_secs(10),
                Duration::from_secs(10),
                Duration::from_secs(10),
                Duration::from_secs(20),
            ],
        )
    }

    /// Database readiness policy: 1s rising to 5s.
    pub fn database(attempts: u32) -> Self {
        Self::new(attempts, (1..=5).map(Duration::from_secs).collect())
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let idx = attempt.saturating_sub(1) as usize;
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Run `op` until it succeeds, fails fatally, or the budget runs out.
///
/// `on_failure` sees every transient failure with its attempt number, which
/// callers use for operator hints.
pub async fn with_backoff<T, F, Fut, H>(
    policy: &RetryPolicy,
    name: &'static str,
    mut op: F,
    mut on_failure: H,
) -> Result<T, StepError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, StepError>>,
    H: FnMut(u32, &StepError),
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                on_failure(attempt, &e);
                if attempt >= policy.max_attempts {
                    return Err(e.into_fatal());
                }
                let delay = policy.delay_after(attempt);
                debug!(
                    step = name,
                    attempt = attempt,
                    delay_secs = delay.as_secs(),
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
