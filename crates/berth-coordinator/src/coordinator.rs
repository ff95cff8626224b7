// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Startup coordination for one container process.
//!
//! ```text
//!   role from K8S hint
//!          │
//!          ▼
//!   SWARM_MODE? ──no──────────────────────────────┐
//!          │yes                                   │
//!          ▼                                      │
//!   try_become_leader ──won──▶ authority          │
//!          │lost                                  │
//!          ▼                                      │
//!   wait for completion (promote if leader stale) │
//!          │                                      │
//!          ▼                                      ▼
//!   role gate: no authority and unconfigured ⇒ fatal
//!          │
//!          ▼
//!   authority? ──yes──▶ setup machine ─▶ completion marker ─▶ release lease
//!          │
//!          ▼
//!   certificates, session backend ─▶ serve or exit
//! ```

use std::sync::Arc;

use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::election::{FollowerOutcome, LeaderElection};
use crate::error::{CoordinatorError, Result, StepError};
use crate::installer::{InstallConfig, Installer};
use crate::lease::LeaseStore;
use crate::probe::{self, SessionBackend};
use crate::retry::RetryPolicy;
use crate::role::{OrchestrationMode, Role};
use crate::setup::{DatabaseProbe, SetupMachine, SetupReport};
use crate::version::VersionFiles;

/// Result of a successful coordination run.
#[derive(Debug, Clone)]
pub struct CoordinatorOutcome {
    /// Final role of this process.
    pub role: Role,
    /// What the follower wait ended with, if this process waited.
    pub follower: Option<FollowerOutcome>,
    /// What setup did, if this process held authority.
    pub setup: Option<SetupReport>,
    /// Session backend in use.
    pub session: SessionBackend,
}

impl CoordinatorOutcome {
    /// Whether this process should go on to serve traffic.
    pub fn should_serve(&self) -> bool {
        self.role.operator
    }

    /// The server command, run through `sh -c`, with the chosen session
    /// backend passed in its environment.
    pub fn serve_command(&self, cmd: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);
        self.session.apply_to(&mut command);
        command
    }
}

/// Builder for creating a [`Coordinator`].
#[derive(Default)]
pub struct CoordinatorBuilder {
    config: Option<Config>,
    installer: Option<Arc<dyn Installer>>,
    store: Option<Arc<dyn LeaseStore>>,
    holder_id: Option<String>,
    install_policy: Option<RetryPolicy>,
    wait_for_database: bool,
}

impl CoordinatorBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            wait_for_database: true,
            ..Self::default()
        }
    }

    /// Set the configuration (required).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the installer backend (required).
    pub fn installer(mut self, installer: Arc<dyn Installer>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Set the lease store (required).
    pub fn store(mut self, store: Arc<dyn LeaseStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a fixed holder id instead of a random one.
    pub fn holder_id(mut self, id: impl Into<String>) -> Self {
        self.holder_id = Some(id.into());
        self
    }

    /// Override the installer retry policy.
    ///
    /// Default: [`RetryPolicy::install`]
    pub fn install_policy(mut self, policy: RetryPolicy) -> Self {
        self.install_policy = Some(policy);
        self
    }

    /// Whether to poll the database port before installing.
    ///
    /// Default: `true`
    pub fn wait_for_database(mut self, enabled: bool) -> Self {
        self.wait_for_database = enabled;
        self
    }

    /// Build the coordinator.
    pub fn build(self) -> anyhow::Result<Coordinator> {
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("config is required"))?;
        let installer = self
            .installer
            .ok_or_else(|| anyhow::anyhow!("installer is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("lease store is required"))?;
        let holder_id = self
            .holder_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Coordinator {
            config,
            installer,
            store,
            holder_id,
            install_policy: self.install_policy.unwrap_or_else(RetryPolicy::install),
            wait_for_database: self.wait_for_database,
        })
    }
}

/// Runs the startup protocol for one process.
pub struct Coordinator {
    config: Config,
    installer: Arc<dyn Installer>,
    store: Arc<dyn LeaseStore>,
    holder_id: String,
    install_policy: RetryPolicy,
    wait_for_database: bool,
}

impl Coordinator {
    /// Create a new builder.
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// This process's election holder id.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Run the startup protocol.
    ///
    /// Errors are fatal for the process; the caller exits non-zero.
    pub async fn run(&self) -> Result<CoordinatorOutcome> {
        let mut role = Role::from_mode(self.config.mode);
        info!(
            role = %role,
            mode = ?self.config.mode,
            swarm = self.config.swarm_mode,
            store = self.store.store_type(),
            installer = self.installer.installer_type(),
            holder = %self.holder_id,
            "Coordinator starting"
        );

        let election = LeaderElection::with_holder_id(
            self.store.clone(),
            self.holder_id.clone(),
            self.config.election,
        );
        let mut follower = None;

        if self.config.swarm_mode {
            if role.authority && election.try_become_leader().await? {
                info!("This instance is the leader");
            } else {
                role.authority = false;
                if !self.store.is_completed().await? {
                    // Workers never take authority; they only wait for the marker.
                    let outcome = if self.config.mode == OrchestrationMode::Worker {
                        election.wait_without_promotion().await?
                    } else {
                        election
                            .wait_for_completion(|| self.installer.is_configured())
                            .await?
                    };
                    info!(outcome = ?outcome, "Finished waiting for leader");
                    if outcome == FollowerOutcome::Promoted {
                        role.authority = true;
                    }
                    follower = Some(outcome);
                }
            }
        }

        let configured = self.installer.is_configured().await;
        if !role.may_proceed(configured) {
            error!(
                role = %role,
                shared_dir = %self.config.shared_dir.display(),
                "No usable configuration and no authority to create one; \
                 check that a leader or admin job has initialized the shared volume"
            );
            return Err(CoordinatorError::Unconfigured);
        }

        let setup = if role.authority {
            Some(self.run_setup(&election).await?)
        } else {
            None
        };

        if let Err(e) = self.installer.provision_certificates().await {
            self.degrade(role, "certificates", e)?;
        }

        let (session, probe_err) =
            probe::select_session_backend(self.config.redis_server.as_deref()).await;
        if let Some(e) = probe_err {
            warn!("Session store unreachable, falling back to file sessions");
            self.degrade(role, "sessions", e)?;
        }

        info!(role = %role, session = ?session, "Coordinator finished");
        Ok(CoordinatorOutcome {
            role,
            follower,
            setup,
            session,
        })
    }

    /// Best-effort failures are warnings, unless this process holds authority.
    fn degrade(&self, role: Role, step: &'static str, e: StepError) -> Result<()> {
        if role.authority {
            error!(step = step, error = %e, "Required step failed");
            Err(CoordinatorError::Step {
                step,
                source: e.into_fatal(),
            })
        } else {
            warn!(step = step, error = %e, "Continuing without it");
            Ok(())
        }
    }

    async fn run_setup(&self, election: &LeaderElection) -> Result<SetupReport> {
        let leading = self.config.swarm_mode && election.lease().held().is_some();
        if leading {
            self.store.mark_in_progress().await?;
        }

        let install_config = InstallConfig::from_config(&self.config);
        let versions = VersionFiles::from_dirs(
            &self.config.image_dir,
            &self.config.code_dir,
            &self.config.shared_dir,
        );
        let mut machine = SetupMachine::new(self.installer.as_ref(), versions, install_config)
            .install_policy(self.install_policy.clone());
        if self.wait_for_database {
            machine = machine.database_probe(DatabaseProbe {
                host: self.config.database.host.clone(),
                port: self.config.database.port,
                policy: RetryPolicy::database(self.config.db_wait_attempts),
            });
        }
        if leading {
            machine = machine.leadership(election);
        }

        let report = machine.run().await?;

        if self.config.swarm_mode {
            self.store.mark_completed().await?;
            self.store.clear_in_progress().await?;
            election.lease().release().await?;
            info!("Setup complete, completion marker written");
        }
        Ok(report)
    }
}
