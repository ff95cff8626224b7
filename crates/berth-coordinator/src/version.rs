// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Version markers and upgrade planning.
//!
//! Three integer files decide whether upgrade steps run:
//!
//! | Marker | Location | Written by |
//! |--------|----------|------------|
//! | target | `<image>/docker-version` | image build |
//! | code | `<code>/docker-version` | image build / leader |
//! | data | `<shared>/default/docker-version` | leader, after upgrading |
//!
//! A missing or unparsable file reads as 0, so a first-run volume never
//! skips a step.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

/// Version marker file name.
pub const VERSION_FILE: &str = "docker-version";

/// A single numbered upgrade step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpgradeStep(pub u32);

impl fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of the three version markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionMarkers {
    /// Version the image wants.
    pub target: u32,
    /// Version of the installed code.
    pub code: u32,
    /// Version of the persistent data.
    pub data: u32,
}

impl VersionMarkers {
    /// Steps to run, in ascending order, from `data + 1` through `target`.
    ///
    /// Empty unless the target and code versions agree and exceed the data version.
    pub fn pending_steps(&self) -> Vec<UpgradeStep> {
        if self.target != self.code || self.target <= self.data {
            return Vec::new();
        }
        (self.data + 1..=self.target).map(UpgradeStep).collect()
    }

    /// Whether any upgrade step is pending.
    pub fn needs_upgrade(&self) -> bool {
        !self.pending_steps().is_empty()
    }
}

/// Locations of the version marker files.
#[derive(Debug, Clone)]
pub struct VersionFiles {
    /// Target version file.
    pub target: PathBuf,
    /// Code version file.
    pub code: PathBuf,
    /// Data version file.
    pub data: PathBuf,
}

impl VersionFiles {
    /// Standard layout under the image, code and shared directories.
    pub fn from_dirs(image_dir: &Path, code_dir: &Path, shared_dir: &Path) -> Self {
        Self {
            target: image_dir.join(VERSION_FILE),
            code: code_dir.join(VERSION_FILE),
            data: shared_dir.join("default").join(VERSION_FILE),
        }
    }

    /// Read all three markers.
    pub async fn read(&self) -> VersionMarkers {
        let markers = VersionMarkers {
            target: read_version(&self.target).await,
            code: read_version(&self.code).await,
            data: read_version(&self.data).await,
        };
        if markers.target != markers.code {
            warn!(
                target_version = markers.target,
                code_version = markers.code,
                "Target and code versions disagree, upgrades are skipped"
            );
        }
        markers
    }

    /// Record the data version after a successful upgrade.
    pub async fn write_data(&self, version: u32) -> std::io::Result<()> {
        if let Some(parent) = self.data.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.data, format!("{}\n", version)).await
    }
}

/// Read an integer version file, defaulting to 0.
pub async fn read_version(path: &Path) -> u32 {
    match fs::read_to_string(path).await {
        Ok(content) => content.trim().parse().unwrap_or_else(|_| {
            warn!(path = %path.display(), "Unparsable version file, treating as 0");
            0
        }),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No version file, treating as 0");
            0
        }
    }
}
