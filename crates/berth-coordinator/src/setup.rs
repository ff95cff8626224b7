// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Install/upgrade state machine.
//!
//! # Install State
//!
//! ```text
//! ┌──────────────┐  install   ┌─────────────┐  verified   ┌────────────┐
//! │ UNCONFIGURED │───────────▶│ CONFIGURING │────────────▶│ CONFIGURED │
//! └──────────────┘            └──────┬──────┘             └────────────┘
//!                                    │ retries exhausted / verification failed
//!                                    ▼
//!                                  fatal
//! ```
//!
//! # Upgrade State
//!
//! ```text
//! ┌────────────┐  target == code > data   ┌───────────┐
//! │ UP_TO_DATE │─────────────────────────▶│ UPGRADING │
//! └────────────┘◀─────────────────────────└───────────┘
//!                 steps data+1..=target run, data := target
//! ```
//!
//! Only a process with authority drives the machine. When it runs under a
//! leadership lease, the lease is renewed before and after every long-running
//! step and at the lease's heartbeat interval while the step runs. A renewal
//! that finds the lease taken over aborts the step, fencing out the old leader.

use std::future::Future;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::election::LeaderElection;
use crate::error::{CoordinatorError, Result, StepError};
use crate::installer::{InstallConfig, Installer};
use crate::probe;
use crate::retry::{self, RetryPolicy};
use crate::version::{UpgradeStep, VersionFiles};

/// Installation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    /// Nothing installed on the shared volume.
    Unconfigured,
    /// Installer running.
    Configuring,
    /// Installed and verified.
    Configured,
}

/// Upgrade state, orthogonal to [`InstallState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    /// Data version matches the target.
    UpToDate,
    /// Upgrade steps running.
    Upgrading,
}

/// What a run of the machine did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupReport {
    /// Install state at the end of the run.
    pub install_state: InstallState,
    /// Upgrade state at the end of the run.
    pub upgrade_state: UpgradeState,
    /// Whether this run installed the application.
    pub installed: bool,
    /// Upgrade steps run, in order.
    pub upgrade_steps: Vec<UpgradeStep>,
}

impl SetupReport {
    /// Whether the run changed nothing but settings.
    pub fn is_noop(&self) -> bool {
        !self.installed && self.upgrade_steps.is_empty()
    }
}

/// Database readiness check run before installing.
#[derive(Debug, Clone)]
pub struct DatabaseProbe {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Polling budget
    pub policy: RetryPolicy,
}

/// Drives install and upgrade for a process holding authority.
pub struct SetupMachine<'a> {
    installer: &'a dyn Installer,
    versions: VersionFiles,
    install_config: std::result::Result<InstallConfig, StepError>,
    install_policy: RetryPolicy,
    database_probe: Option<DatabaseProbe>,
    leadership: Option<&'a LeaderElection>,
}

impl<'a> SetupMachine<'a> {
    /// Create a machine.
    ///
    /// `install_config` is only consulted when the installation is
    /// unconfigured, so a missing root password is fatal only then.
    pub fn new(
        installer: &'a dyn Installer,
        versions: VersionFiles,
        install_config: std::result::Result<InstallConfig, StepError>,
    ) -> Self {
        Self {
            installer,
            versions,
            install_config,
            install_policy: RetryPolicy::install(),
            database_probe: None,
            leadership: None,
        }
    }

    /// Override the installer retry policy.
    pub fn install_policy(mut self, policy: RetryPolicy) -> Self {
        self.install_policy = policy;
        self
    }

    /// Wait for the database before installing.
    pub fn database_probe(mut self, probe: DatabaseProbe) -> Self {
        self.database_probe = Some(probe);
        self
    }

    /// Heartbeat through this election's lease between steps.
    pub fn leadership(mut self, election: &'a LeaderElection) -> Self {
        self.leadership = Some(election);
        self
    }

    async fn heartbeat(&self) -> Result<()> {
        if let Some(election) = self.leadership {
            election.lease().renew().await?;
        }
        Ok(())
    }

    /// Run a long step, renewing the lease before, during and after it.
    async fn heartbeating<T, F>(&self, step: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let Some(election) = self.leadership else {
            return step.await;
        };
        let lease = election.lease();
        lease.renew().await?;

        let mut ticker = tokio::time::interval(lease.heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        tokio::pin!(step);
        let value = loop {
            tokio::select! {
                result = &mut step => break result?,
                _ = ticker.tick() => lease.renew().await?,
            }
        };
        lease.renew().await?;
        Ok(value)
    }

    /// Run install (if needed), upgrades (if needed) and settings.
    pub async fn run(&self) -> Result<SetupReport> {
        self.heartbeat().await?;

        let mut report = SetupReport {
            install_state: if self.installer.is_configured().await {
                InstallState::Configured
            } else {
                InstallState::Unconfigured
            },
            upgrade_state: UpgradeState::UpToDate,
            installed: false,
            upgrade_steps: Vec::new(),
        };
        info!(state = ?report.install_state, "Setup starting");

        if report.install_state == InstallState::Unconfigured {
            report.install_state = InstallState::Configuring;
            self.install().await?;
            report.install_state = InstallState::Configured;
            report.installed = true;
        }

        let markers = self.versions.read().await;
        let steps = markers.pending_steps();
        if !steps.is_empty() {
            report.upgrade_state = UpgradeState::Upgrading;
            info!(
                from = markers.data,
                to = markers.target,
                steps = steps.len(),
                "Upgrading"
            );
            for step in steps {
                self.heartbeating(async {
                    self.installer
                        .run_upgrade(step)
                        .await
                        .map_err(|source| CoordinatorError::Step {
                            step: "upgrade",
                            source,
                        })
                })
                .await?;
                report.upgrade_steps.push(step);
            }
            self.heartbeat().await?;
            self.versions.write_data(markers.target).await?;
            report.upgrade_state = UpgradeState::UpToDate;
            info!(version = markers.target, "Upgrade complete");
        }

        self.installer
            .apply_settings()
            .await
            .map_err(|source| CoordinatorError::Step {
                step: "settings",
                source,
            })?;

        Ok(report)
    }

    async fn install(&self) -> Result<()> {
        let config = self
            .install_config
            .clone()
            .map_err(|source| CoordinatorError::Step {
                step: "install",
                source,
            })?;

        if let Some(db) = &self.database_probe {
            self.heartbeating(async {
                probe::wait_for_database(&db.host, db.port, &db.policy)
                    .await
                    .map_err(|source| CoordinatorError::Step {
                        step: "database",
                        source,
                    })
            })
            .await?;
        }

        info!(attempts = self.install_policy.max_attempts, "Installing");
        self.heartbeating(async {
            retry::with_backoff(
                &self.install_policy,
                "install",
                |_| self.installer.install(&config),
                |attempt, e| {
                    warn!(attempt = attempt, error = %e, "Installer failed");
                    if attempt == 1 {
                        warn!(
                            server = %config.server,
                            port = config.port,
                            "Likely causes: the database is unreachable, the database is still \
                             starting up, or the root credentials (MYSQL_ROOT_USER/MYSQL_ROOT_PASS) \
                             are wrong"
                        );
                    }
                },
            )
            .await
            .map_err(|source| CoordinatorError::Step {
                step: "install",
                source,
            })
        })
        .await?;

        // Trust the installation state, not the installer's exit code.
        if !self.installer.is_configured().await {
            return Err(CoordinatorError::Step {
                step: "verify",
                source: StepError::Fatal(
                    "installer reported success but the site is not configured".to_string(),
                ),
            });
        }
        info!("Installation verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ElectionTimings;
    use crate::installer::{InstallerCall, MockInstaller};
    use crate::lease::{LeaseRecord, LeaseStore, MemoryLeaseStore};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn install_config() -> std::result::Result<InstallConfig, StepError> {
        Ok(InstallConfig {
            server: "db".into(),
            port: 3306,
            root_user: "root".into(),
            root_pass: "root".into(),
            login: "app".into(),
            pass: "app".into(),
            dbname: "app".into(),
            admin_user: "admin".into(),
            admin_pass: "pass".into(),
        })
    }

    fn versions(temp_dir: &TempDir) -> VersionFiles {
        VersionFiles::from_dirs(
            &temp_dir.path().join("image"),
            &temp_dir.path().join("code"),
            &temp_dir.path().join("sites"),
        )
    }

    async fn write_versions(files: &VersionFiles, target: u32, code: u32, data: u32) {
        for (path, v) in [(&files.target, target), (&files.code, code), (&files.data, data)] {
            tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            tokio::fs::write(path, v.to_string()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_fresh_install() {
        let temp_dir = TempDir::new().unwrap();
        let installer = MockInstaller::new();
        let machine = SetupMachine::new(&installer, versions(&temp_dir), install_config());

        let report = machine.run().await.unwrap();
        assert!(report.installed);
        assert_eq!(report.install_state, InstallState::Configured);
        assert_eq!(
            installer.calls().await,
            vec![InstallerCall::Install, InstallerCall::ApplySettings]
        );
    }

    #[tokio::test]
    async fn test_rerun_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let files = versions(&temp_dir);
        write_versions(&files, 4, 4, 4).await;
        let installer = MockInstaller::configured();

        for _ in 0..2 {
            let machine = SetupMachine::new(&installer, files.clone(), install_config());
            assert!(machine.run().await.unwrap().is_noop());
        }
        assert_eq!(
            installer.calls().await,
            vec![InstallerCall::ApplySettings, InstallerCall::ApplySettings]
        );
    }

    #[tokio::test]
    async fn test_upgrade_steps_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let files = versions(&temp_dir);
        write_versions(&files, 5, 5, 2).await;
        let installer = MockInstaller::configured();

        let report = SetupMachine::new(&installer, files.clone(), install_config())
            .run()
            .await
            .unwrap();

        let expected = vec![UpgradeStep(3), UpgradeStep(4), UpgradeStep(5)];
        assert_eq!(report.upgrade_steps, expected);
        assert_eq!(installer.upgrades().await, expected);
        assert_eq!(files.read().await.data, 5);
        assert_eq!(report.upgrade_state, UpgradeState::UpToDate);
    }

    #[tokio::test]
    async fn test_failed_upgrade_keeps_data_version() {
        let temp_dir = TempDir::new().unwrap();
        let files = versions(&temp_dir);
        write_versions(&files, 5, 5, 2).await;
        let installer = MockInstaller::configured().with_failing_upgrade(UpgradeStep(4));

        let err = SetupMachine::new(&installer, files.clone(), install_config())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, CoordinatorError::Step { step: "upgrade", .. }));
        assert_eq!(installer.upgrades().await, vec![UpgradeStep(3), UpgradeStep(4)]);
        assert_eq!(files.read().await.data, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_retries_transient_failures() {
        let temp_dir = TempDir::new().unwrap();
        let installer = MockInstaller::new().with_transient_failures(2);

        let report = SetupMachine::new(&installer, versions(&temp_dir), install_config())
            .run()
            .await
            .unwrap();

        assert!(report.installed);
        assert_eq!(installer.install_attempts().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_exhaustion_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let installer = MockInstaller::new().with_transient_failures(10);

        let err = SetupMachine::new(&installer, versions(&temp_dir), install_config())
            .install_policy(RetryPolicy::new(3, vec![Duration::from_secs(1)]))
            .run()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoordinatorError::Step { step: "install", source: StepError::Fatal(_) }
        ));
        assert_eq!(installer.install_attempts().await, 3);
    }

    fn short_lease() -> ElectionTimings {
        ElectionTimings {
            stale_timeout: Duration::from_secs(1),
            max_wait: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
        }
    }

    // Real time: lease freshness is judged against the wall clock.
    #[tokio::test]
    async fn test_lease_stays_fresh_through_install_retries() {
        let temp_dir = TempDir::new().unwrap();
        let store = MemoryLeaseStore::new();
        let leader = LeaderElection::with_holder_id(Arc::new(store.clone()), "a", short_lease());
        let rival = LeaderElection::with_holder_id(Arc::new(store.clone()), "b", short_lease());
        assert!(leader.try_become_leader().await.unwrap());
        let installer = MockInstaller::new().with_transient_failures(2);

        let machine = SetupMachine::new(&installer, versions(&temp_dir), install_config())
            .install_policy(RetryPolicy::new(3, vec![Duration::from_millis(700)]))
            .leadership(&leader);
        let rival_attempt = async {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            rival.try_become_leader().await.unwrap()
        };
        let (report, took_over) = tokio::join!(machine.run(), rival_attempt);

        assert!(!took_over);
        assert!(report.unwrap().installed);
        assert_eq!(installer.install_attempts().await, 3);
        let stored = store.read().await.unwrap().unwrap();
        assert_eq!((stored.holder_id.as_str(), stored.epoch), ("a", 1));
    }

    #[tokio::test]
    async fn test_takeover_aborts_running_step() {
        let temp_dir = TempDir::new().unwrap();
        let store = MemoryLeaseStore::new();
        let leader = LeaderElection::with_holder_id(Arc::new(store.clone()), "a", short_lease());
        assert!(leader.try_become_leader().await.unwrap());
        let installer = MockInstaller::new().with_transient_failures(10);

        let machine = SetupMachine::new(&installer, versions(&temp_dir), install_config())
            .install_policy(RetryPolicy::new(10, vec![Duration::from_millis(400)]))
            .leadership(&leader);
        let takeover = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            store.set_lease(Some(LeaseRecord::new("b", 2))).await;
        };
        let (result, ()) = tokio::join!(machine.run(), takeover);

        assert!(matches!(
            result,
            Err(CoordinatorError::LeaseLost { ref holder, epoch: 2 }) if holder == "b"
        ));
        assert!(installer.install_attempts().await < 10);
    }

    #[tokio::test]
    async fn test_verification_failure_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let installer = MockInstaller::new().with_silent_install_failure();

        let err = SetupMachine::new(&installer, versions(&temp_dir), install_config())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, CoordinatorError::Step { step: "verify", .. }));
    }

    #[tokio::test]
    async fn test_missing_root_password_only_matters_when_installing() {
        let temp_dir = TempDir::new().unwrap();
        let missing = || Err(StepError::Fatal("MYSQL_ROOT_PASS is required".into()));

        let configured = MockInstaller::configured();
        SetupMachine::new(&configured, versions(&temp_dir), missing())
            .run()
            .await
            .unwrap();

        let fresh = MockInstaller::new();
        let err = SetupMachine::new(&fresh, versions(&temp_dir), missing())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Step { step: "install", .. }));
        assert_eq!(fresh.install_attempts().await, 0);
    }
}
