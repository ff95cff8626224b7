// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lease storage backends for leader election.
//!
//! The election algorithm only needs an atomic create-if-absent primitive,
//! so any store offering one can back it.

pub mod file;
pub mod memory;
mod traits;

pub use file::FileLeaseStore;
pub use memory::MemoryLeaseStore;
pub use traits::*;
