// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Installer backends: the programs that actually configure and upgrade the application.

pub mod mock;
pub mod shell;
mod traits;

pub use mock::{InstallerCall, MockInstaller};
pub use shell::{ShellInstaller, ShellInstallerConfig};
pub use traits::*;
