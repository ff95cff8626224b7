// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock installer for testing.
//!
//! Records every call and simulates configured state without running any
//! external program. Clones share state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;
use crate::error::StepError;
use crate::version::UpgradeStep;

/// A call made against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallerCall {
    /// `install`
    Install,
    /// `run_upgrade`
    Upgrade(UpgradeStep),
    /// `apply_settings`
    ApplySettings,
    /// `provision_certificates`
    ProvisionCertificates,
}

/// Mock installer.
#[derive(Debug, Clone, Default)]
pub struct MockInstaller {
    calls: Arc<Mutex<Vec<InstallerCall>>>,
    configured: Arc<AtomicBool>,
    /// Number of transient install failures before install succeeds
    transient_failures: Arc<AtomicU32>,
    /// If true, install reports success but the installation stays unconfigured
    silent_install_failure: bool,
    /// If set, this upgrade step fails
    failing_upgrade: Option<UpgradeStep>,
    /// If true, certificate provisioning fails
    failing_certificates: bool,
}

impl MockInstaller {
    /// Create a mock against an unconfigured installation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock against an already configured installation.
    pub fn configured() -> Self {
        let mock = Self::default();
        mock.configured.store(true, Ordering::SeqCst);
        mock
    }

    /// Make the next `n` install attempts fail transiently.
    pub fn with_transient_failures(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Report install success without ever becoming configured.
    pub fn with_silent_install_failure(mut self) -> Self {
        self.silent_install_failure = true;
        self
    }

    /// Fail the given upgrade step.
    pub fn with_failing_upgrade(mut self, step: UpgradeStep) -> Self {
        self.failing_upgrade = Some(step);
        self
    }

    /// Fail certificate provisioning.
    pub fn with_failing_certificates(mut self) -> Self {
        self.failing_certificates = true;
        self
    }

    /// All calls so far, in order.
    pub async fn calls(&self) -> Vec<InstallerCall> {
        self.calls.lock().await.clone()
    }

    /// Number of install attempts so far.
    pub async fn install_attempts(&self) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| **c == InstallerCall::Install)
            .count()
    }

    /// Upgrade steps run so far, in order.
    pub async fn upgrades(&self) -> Vec<UpgradeStep> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                InstallerCall::Upgrade(step) => Some(*step),
                _ => None,
            })
            .collect()
    }

    async fn record(&self, call: InstallerCall) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl Installer for MockInstaller {
    fn installer_type(&self) -> &'static str {
        "mock"
    }

    async fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    async fn install(&self, _config: &InstallConfig) -> Result<(), StepError> {
        self.record(InstallerCall::Install).await;

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StepError::Transient("Mock database not ready".to_string()));
        }

        if !self.silent_install_failure {
            self.configured.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn run_upgrade(&self, step: UpgradeStep) -> Result<(), StepError> {
        self.record(InstallerCall::Upgrade(step)).await;
        if self.failing_upgrade == Some(step) {
            return Err(StepError::Fatal(format!("Mock upgrade {} failed", step)));
        }
        Ok(())
    }

    async fn apply_settings(&self) -> Result<(), StepError> {
        self.record(InstallerCall::ApplySettings).await;
        Ok(())
    }

    async fn provision_certificates(&self) -> Result<(), StepError> {
        self.record(InstallerCall::ProvisionCertificates).await;
        if self.failing_certificates {
            return Err(StepError::Fatal("Mock certificate failure".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> InstallConfig {
        InstallConfig {
            server: "db".into(),
            port: 3306,
            root_user: "root".into(),
            root_pass: "root".into(),
            login: "app".into(),
            pass: "app".into(),
            dbname: "app".into(),
            admin_user: "admin".into(),
            admin_pass: "pass".into(),
        }
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let mock = MockInstaller::new().with_transient_failures(2);

        assert!(mock.install(&config()).await.unwrap_err().is_transient());
        assert!(mock.install(&config()).await.is_err());
        mock.install(&config()).await.unwrap();

        assert!(mock.is_configured().await);
        assert_eq!(mock.install_attempts().await, 3);
    }

    #[tokio::test]
    async fn test_silent_install_failure() {
        let mock = MockInstaller::new().with_silent_install_failure();
        mock.install(&config()).await.unwrap();
        assert!(!mock.is_configured().await);
    }
}
