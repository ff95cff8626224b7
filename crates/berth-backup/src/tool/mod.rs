// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backup tool backends: the programs that stream, extract and prepare backups.

pub mod mariadb;
pub mod mock;
mod traits;

pub use mariadb::MariaBackupTool;
pub use mock::{MockBackupTool, ToolCall};
pub use traits::*;
