// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Berth Coordinator - Container Startup Coordination
//!
//! Runs once per container at boot, independently in every replica. It
//! decides whether this process may mutate the shared installation
//! (*authority*) and whether it should serve traffic (*operator*), elects a
//! leader among replicas sharing a volume, and drives an idempotent
//! install/upgrade state machine.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐ ┌───────────────┐ ┌───────────────┐
//! │   replica A   │ │   replica B   │ │   replica C   │
//! │  Coordinator  │ │  Coordinator  │ │  Coordinator  │
//! └───────┬───────┘ └───────┬───────┘ └───────┬───────┘
//!         │ race create     │ poll            │ poll
//!         ▼                 ▼                 ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                 shared volume (sites/)              │
//! │  docker-leader   docker-completed   docker-initiated│
//! │  default/docker-version   default/sqlconf.php       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! There are no in-process concurrency primitives in the protocol: replicas
//! are separate processes, and the only synchronization is atomic
//! create-if-absent on the lease file. Followers poll; a dead leader is
//! noticed within the stale timeout.
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `K8S` | - | `admin` (setup only) or `worker` (serve only) |
//! | `SWARM_MODE` | `no` | `yes` to elect a leader among replicas |
//! | `BERTH_SHARED_DIR` | `/var/www/localhost/htdocs/openemr/sites` | Shared volume |
//! | `BERTH_CODE_DIR` | `/var/www/localhost/htdocs/openemr` | Installed code |
//! | `BERTH_IMAGE_DIR` | `/root` | Target version and upgrade scripts |
//! | `LEADER_STALE_TIMEOUT` | `300` | Seconds before a heartbeat is stale |
//! | `LEADER_MAX_WAIT` | `600` | Seconds a follower waits for setup |
//! | `LEADER_POLL_INTERVAL` | `10` | Seconds between follower polls |
//! | `MYSQL_HOST` / `MYSQL_PORT` | `mysql` / `3306` | Database address |
//! | `MYSQL_ROOT_USER` / `MYSQL_ROOT_PASS` | `root` / - | Installer credentials |
//! | `MYSQL_USER` / `MYSQL_PASS` / `MYSQL_DATABASE` | `openemr` | Application database |
//! | `OE_USER` / `OE_PASS` | `admin` / `pass` | Initial administrator |
//! | `DB_WAIT_ATTEMPTS` | `60` | Database readiness probes |
//! | `REDIS_SERVER` | - | Optional session store |
//! | `BERTH_SSL_CMD` | - | Certificate provisioning command |
//! | `BERTH_SERVE_CMD` | - | Foreground server command |
//!
//! The server command receives the session backend in use:
//! `BERTH_SESSION_HANDLER` (`files` or `redis`) and, for Redis only,
//! `BERTH_SESSION_SAVE_PATH` (`tcp://host:port`).
//!
//! # Exit Codes
//!
//! - `0`: setup finished and this process does not serve, or the server exited cleanly
//! - non-zero: no usable configuration without authority, installer retries
//!   exhausted, verification or upgrade failed, or leadership lost mid-setup
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`coordinator`]: The startup protocol
//! - [`election`]: Leader lease and follower wait loop
//! - [`error`]: Error types
//! - [`installer`]: Installer backends (shell, mock)
//! - [`lease`]: Lease storage backends (file, memory)
//! - [`probe`]: Database and session store reachability
//! - [`retry`]: Bounded retry with backoff
//! - [`role`]: Authority/operator role
//! - [`setup`]: Install/upgrade state machine
//! - [`version`]: Version markers and upgrade planning

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// The startup protocol.
pub mod coordinator;

/// Leader lease and follower wait loop.
pub mod election;

/// Error types for coordinator operations.
pub mod error;

/// Installer backends.
pub mod installer;

/// Lease storage backends.
pub mod lease;

/// Reachability probes for external dependencies.
pub mod probe;

/// Bounded retry with backoff.
pub mod retry;

/// Authority/operator role.
pub mod role;

/// Install/upgrade state machine.
pub mod setup;

/// Version markers and upgrade planning.
pub mod version;

pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorOutcome};
pub use error::{CoordinatorError, StepError};
