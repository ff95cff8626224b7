// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lease store trait definitions.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Holder id recorded for leases written by something other than this crate.
pub const FOREIGN_HOLDER: &str = "unknown";

/// A leadership claim as persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Unique id of the claiming process.
    pub holder_id: String,
    /// Fencing epoch; a takeover always uses a higher epoch than the lease it replaced.
    pub epoch: u64,
    /// Last heartbeat.
    pub renewed_at: DateTime<Utc>,
}

impl LeaseRecord {
    /// A fresh claim stamped with the current time.
    pub fn new(holder_id: impl Into<String>, epoch: u64) -> Self {
        Self {
            holder_id: holder_id.into(),
            epoch,
            renewed_at: Utc::now(),
        }
    }

    /// Whether the heartbeat is older than `timeout` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => now - self.renewed_at > timeout,
            // A timeout too large to represent never expires.
            Err(_) => false,
        }
    }

    /// Whether `other` is the same claim (same holder and epoch), regardless of heartbeat.
    pub fn same_claim(&self, other: &LeaseRecord) -> bool {
        self.holder_id == other.holder_id && self.epoch == other.epoch
    }
}

/// Storage for the leadership lease and the setup markers.
///
/// Implementations must make [`try_create`](LeaseStore::try_create) atomic:
/// of several concurrent callers against an empty store, exactly one gets `true`.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Store type identifier (e.g., "file", "memory")
    fn store_type(&self) -> &'static str;

    /// Read the current lease, if any.
    async fn read(&self) -> Result<Option<LeaseRecord>>;

    /// Create the lease only if none exists. Returns `false` when one already exists.
    async fn try_create(&self, record: &LeaseRecord) -> Result<bool>;

    /// Replace the stored lease (heartbeat).
    async fn overwrite(&self, record: &LeaseRecord) -> Result<()>;

    /// Delete the lease. Deleting a missing lease is not an error.
    async fn remove(&self) -> Result<()>;

    /// Whether first-run setup has finished.
    async fn is_completed(&self) -> Result<bool>;

    /// Record that first-run setup has finished.
    async fn mark_completed(&self) -> Result<()>;

    /// Whether a leader started setup without finishing it.
    async fn is_in_progress(&self) -> Result<bool>;

    /// Record that setup has started.
    async fn mark_in_progress(&self) -> Result<()>;

    /// Clear the in-progress marker. Clearing a missing marker is not an error.
    async fn clear_in_progress(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let mut record = LeaseRecord::new("a", 1);
        record.renewed_at = now - chrono::Duration::seconds(301);
        assert!(record.is_expired(now, Duration::from_secs(300)));
        assert!(!record.is_expired(now, Duration::from_secs(400)));
    }

    #[test]
    fn test_same_claim_ignores_heartbeat() {
        let a = LeaseRecord::new("a", 3);
        let mut b = a.clone();
        b.renewed_at = a.renewed_at + chrono::Duration::seconds(10);
        assert!(a.same_claim(&b));
        assert!(!a.same_claim(&LeaseRecord::new("a", 4)));
        assert!(!a.same_claim(&LeaseRecord::new("b", 3)));
    }
}
