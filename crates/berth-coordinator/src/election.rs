// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Leader election among replicas sharing a lease store.
//!
//! Replicas race to create the lease; the winner holds authority and
//! heartbeats by renewing the lease between setup steps. There is no push
//! notification: followers poll the completion marker and the lease age,
//! and take over a lease whose heartbeat is older than the stale timeout.
//!
//! # Fencing
//!
//! A takeover always writes `epoch + 1`. [`LeaderLease::renew`] re-reads the
//! store and fails with [`CoordinatorError::LeaseLost`] if the stored claim
//! is no longer ours, so a leader that was superseded while stalled stops at
//! its next step.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::ElectionTimings;
use crate::error::{CoordinatorError, Result};
use crate::lease::{LeaseRecord, LeaseStore};

/// A leadership lease held (or wanted) by this process.
pub struct LeaderLease {
    store: Arc<dyn LeaseStore>,
    holder_id: String,
    timings: ElectionTimings,
    held: Mutex<Option<LeaseRecord>>,
}

impl LeaderLease {
    /// Create a lease handle for `holder_id`.
    pub fn new(
        store: Arc<dyn LeaseStore>,
        holder_id: impl Into<String>,
        timings: ElectionTimings,
    ) -> Self {
        Self {
            store,
            holder_id: holder_id.into(),
            timings,
            held: Mutex::new(None),
        }
    }

    /// This process's holder id.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// The claim this process currently believes it holds.
    pub fn held(&self) -> Option<LeaseRecord> {
        self.held.lock().map(|h| h.clone()).unwrap_or(None)
    }

    fn set_held(&self, record: Option<LeaseRecord>) {
        if let Ok(mut held) = self.held.lock() {
            *held = record;
        }
    }

    /// How often a leader renews while a step runs: a quarter of the stale timeout.
    pub fn heartbeat_interval(&self) -> Duration {
        (self.timings.stale_timeout / 4).max(Duration::from_millis(10))
    }

    /// Whether a stored lease's heartbeat is past the stale timeout.
    pub fn is_expired(&self, record: &LeaseRecord) -> bool {
        record.is_expired(Utc::now(), self.timings.stale_timeout)
    }

    /// Try to claim the lease.
    ///
    /// A stale lease is removed first, together with the in-progress marker
    /// the dead leader left behind. Returns `true` if this process holds the
    /// lease afterwards. Safe to call repeatedly.
    pub async fn acquire(&self) -> Result<bool> {
        let mut next_epoch = 1;

        if let Some(current) = self.store.read().await? {
            if current.holder_id == self.holder_id && !self.is_expired(&current) {
                self.set_held(Some(current));
                return Ok(true);
            }

            if !self.is_expired(&current) {
                debug!(
                    holder = %current.holder_id,
                    epoch = current.epoch,
                    "Lease held by a live leader"
                );
                return Ok(false);
            }

            warn!(
                holder = %current.holder_id,
                epoch = current.epoch,
                renewed_at = %current.renewed_at,
                stale_timeout_secs = self.timings.stale_timeout.as_secs(),
                "Leader heartbeat is stale, taking over"
            );

            // Only remove the claim we judged stale; another replica may have
            // replaced it since.
            match self.store.read().await? {
                Some(again) if again == current => {
                    self.store.remove().await?;
                    self.store.clear_in_progress().await?;
                }
                Some(_) => return Ok(false),
                None => {}
            }
            next_epoch = current.epoch + 1;
        }

        let record = LeaseRecord::new(self.holder_id.clone(), next_epoch);
        if self.store.try_create(&record).await? {
            info!(holder = %self.holder_id, epoch = next_epoch, "Acquired leadership");
            self.set_held(Some(record));
            Ok(true)
        } else {
            debug!(holder = %self.holder_id, "Lost the leadership race");
            Ok(false)
        }
    }

    /// Heartbeat: refresh the lease timestamp after checking it is still ours.
    pub async fn renew(&self) -> Result<()> {
        let Some(held) = self.held() else {
            return Err(CoordinatorError::LeaseLost {
                holder: "none".to_string(),
                epoch: 0,
            });
        };

        match self.store.read().await? {
            Some(current) if current.same_claim(&held) => {}
            Some(current) => {
                self.set_held(None);
                return Err(CoordinatorError::LeaseLost {
                    holder: current.holder_id,
                    epoch: current.epoch,
                });
            }
            None => {
                self.set_held(None);
                return Err(CoordinatorError::LeaseLost {
                    holder: "none".to_string(),
                    epoch: 0,
                });
            }
        }

        let renewed = LeaseRecord::new(held.holder_id, held.epoch);
        self.store.overwrite(&renewed).await?;
        debug!(epoch = renewed.epoch, renewed_at = %renewed.renewed_at, "Heartbeat");
        self.set_held(Some(renewed));
        Ok(())
    }

    /// Give the lease up. Leaves a lease held by someone else untouched.
    pub async fn release(&self) -> Result<()> {
        let Some(held) = self.held() else {
            return Ok(());
        };
        if let Some(current) = self.store.read().await?
            && current.same_claim(&held)
        {
            self.store.remove().await?;
            info!(holder = %self.holder_id, epoch = held.epoch, "Released leadership");
        }
        self.set_held(None);
        Ok(())
    }
}

/// How a follower's wait for the leader ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerOutcome {
    /// The completion marker appeared.
    Completed,
    /// The leader died and this process took over.
    Promoted,
    /// No marker, but the installation is configured; the marker was written.
    Recovered,
    /// The wait budget ran out with nothing to show for it.
    TimedOut,
}

/// Leader election over a [`LeaseStore`].
pub struct LeaderElection {
    store: Arc<dyn LeaseStore>,
    lease: LeaderLease,
    timings: ElectionTimings,
}

impl LeaderElection {
    /// Create an election participant with a fresh random holder id.
    pub fn new(store: Arc<dyn LeaseStore>, timings: ElectionTimings) -> Self {
        Self::with_holder_id(store, uuid::Uuid::new_v4().to_string(), timings)
    }

    /// Create an election participant with an explicit holder id.
    pub fn with_holder_id(
        store: Arc<dyn LeaseStore>,
        holder_id: impl Into<String>,
        timings: ElectionTimings,
    ) -> Self {
        let lease = LeaderLease::new(store.clone(), holder_id, timings);
        Self {
            store,
            lease,
            timings,
        }
    }

    /// The lease handle, for heartbeats and release.
    pub fn lease(&self) -> &LeaderLease {
        &self.lease
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn LeaseStore> {
        &self.store
    }

    /// Try to become leader.
    ///
    /// Returns `false` without competing when setup has already completed.
    /// The marker is checked again after a successful claim: a leader may
    /// finish and release between the first check and the claim.
    pub async fn try_become_leader(&self) -> Result<bool> {
        if self.store.is_completed().await? {
            debug!("Setup already completed, not competing for leadership");
            return Ok(false);
        }
        if !self.lease.acquire().await? {
            return Ok(false);
        }
        if self.store.is_completed().await? {
            info!("Setup completed while claiming, giving the lease back");
            self.lease.release().await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Whether the current leader (if any) has stopped heartbeating.
    pub async fn leader_is_stale(&self) -> Result<bool> {
        Ok(match self.store.read().await? {
            Some(current) => self.lease.is_expired(&current),
            None => true,
        })
    }

    /// Follower loop: wait for the completion marker, taking over from a dead leader.
    ///
    /// `is_configured` is the weaker fallback signal consulted once the wait
    /// budget is exhausted; if it reports a usable installation the missing
    /// completion marker is written.
    pub async fn wait_for_completion<F, Fut>(&self, is_configured: F) -> Result<FollowerOutcome>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        if let Some(outcome) = self.poll_until_deadline(true).await? {
            return Ok(outcome);
        }

        warn!("Timed out waiting for leader, making a final leadership attempt");
        if self.try_become_leader().await? {
            return Ok(FollowerOutcome::Promoted);
        }
        if self.store.is_completed().await? {
            return Ok(FollowerOutcome::Completed);
        }

        if is_configured().await {
            warn!("Installation is configured but the completion marker is missing, writing it");
            self.store.mark_completed().await?;
            return Ok(FollowerOutcome::Recovered);
        }

        Ok(FollowerOutcome::TimedOut)
    }

    /// Follower loop for a process that may never take authority: wait for
    /// the completion marker only, whatever state the leader is in.
    pub async fn wait_without_promotion(&self) -> Result<FollowerOutcome> {
        if let Some(outcome) = self.poll_until_deadline(false).await? {
            return Ok(outcome);
        }
        if self.store.is_completed().await? {
            Ok(FollowerOutcome::Completed)
        } else {
            warn!("Timed out waiting for leader");
            Ok(FollowerOutcome::TimedOut)
        }
    }

    /// Poll until the marker appears, this process is promoted (if allowed),
    /// or `max_wait` runs out (`None`).
    async fn poll_until_deadline(&self, promote: bool) -> Result<Option<FollowerOutcome>> {
        info!(
            max_wait_secs = self.timings.max_wait.as_secs(),
            poll_interval_secs = self.timings.poll_interval.as_secs(),
            promote = promote,
            "Waiting for leader to finish setup"
        );

        let deadline = tokio::time::Instant::now() + self.timings.max_wait;
        while tokio::time::Instant::now() < deadline {
            if self.store.is_completed().await? {
                info!("Leader finished setup");
                return Ok(Some(FollowerOutcome::Completed));
            }

            if promote && self.leader_is_stale().await? && self.try_become_leader().await? {
                warn!("Promoted to leader after previous leader went stale");
                return Ok(Some(FollowerOutcome::Promoted));
            }

            tokio::time::sleep(self.timings.poll_interval).await;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::MemoryLeaseStore;
    use std::time::Duration;

    fn timings() -> ElectionTimings {
        ElectionTimings {
            stale_timeout: Duration::from_secs(300),
            max_wait: Duration::from_secs(60),
            poll_interval: Duration::from_secs(10),
        }
    }

    fn stale_record(holder: &str, epoch: u64) -> LeaseRecord {
        let mut record = LeaseRecord::new(holder, epoch);
        record.renewed_at = Utc::now() - chrono::Duration::seconds(400);
        record
    }

    #[tokio::test]
    async fn test_acquire_empty_store() {
        let store = MemoryLeaseStore::new();
        let election = LeaderElection::with_holder_id(Arc::new(store.clone()), "a", timings());

        assert!(election.try_become_leader().await.unwrap());
        let stored = store.read().await.unwrap().unwrap();
        assert_eq!(stored.holder_id, "a");
        assert_eq!(stored.epoch, 1);
    }

    #[tokio::test]
    async fn test_acquire_is_reentrant() {
        let store = Arc::new(MemoryLeaseStore::new());
        let election = LeaderElection::with_holder_id(store, "a", timings());

        assert!(election.try_become_leader().await.unwrap());
        assert!(election.try_become_leader().await.unwrap());
    }

    #[tokio::test]
    async fn test_completed_skips_election() {
        let store = MemoryLeaseStore::new();
        store.mark_completed().await.unwrap();
        let election = LeaderElection::with_holder_id(Arc::new(store.clone()), "a", timings());

        assert!(!election.try_become_leader().await.unwrap());
        assert!(store.read().await.unwrap().is_none());
    }

    /// Store whose first lease read lets the leader finish: it writes the
    /// completion marker and drops the lease, as a leader does on success.
    struct FinishingLeader {
        inner: MemoryLeaseStore,
        finished: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl LeaseStore for FinishingLeader {
        fn store_type(&self) -> &'static str {
            "finishing"
        }
        async fn read(&self) -> Result<Option<LeaseRecord>> {
            if !self.finished.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.inner.mark_completed().await?;
                self.inner.remove().await?;
            }
            self.inner.read().await
        }
        async fn try_create(&self, record: &LeaseRecord) -> Result<bool> {
            self.inner.try_create(record).await
        }
        async fn overwrite(&self, record: &LeaseRecord) -> Result<()> {
            self.inner.overwrite(record).await
        }
        async fn remove(&self) -> Result<()> {
            self.inner.remove().await
        }
        async fn is_completed(&self) -> Result<bool> {
            self.inner.is_completed().await
        }
        async fn mark_completed(&self) -> Result<()> {
            self.inner.mark_completed().await
        }
        async fn is_in_progress(&self) -> Result<bool> {
            self.inner.is_in_progress().await
        }
        async fn mark_in_progress(&self) -> Result<()> {
            self.inner.mark_in_progress().await
        }
        async fn clear_in_progress(&self) -> Result<()> {
            self.inner.clear_in_progress().await
        }
    }

    #[tokio::test]
    async fn test_completion_during_claim_gives_lease_back() {
        let inner = MemoryLeaseStore::new();
        inner.set_lease(Some(LeaseRecord::new("leader", 1))).await;
        let store = Arc::new(FinishingLeader {
            inner: inner.clone(),
            finished: std::sync::atomic::AtomicBool::new(false),
        });
        let election = LeaderElection::with_holder_id(store, "late", timings());

        assert!(!election.try_become_leader().await.unwrap());
        assert!(inner.is_completed().await.unwrap());
        assert!(inner.read().await.unwrap().is_none());
        assert!(election.lease().held().is_none());
    }

    #[tokio::test]
    async fn test_live_leader_blocks_claim() {
        let store = MemoryLeaseStore::new();
        store.set_lease(Some(LeaseRecord::new("other", 4))).await;
        let election = LeaderElection::with_holder_id(Arc::new(store.clone()), "a", timings());

        assert!(!election.try_become_leader().await.unwrap());
        assert_eq!(store.read().await.unwrap().unwrap().holder_id, "other");
    }

    #[tokio::test]
    async fn test_stale_takeover_bumps_epoch_and_clears_in_progress() {
        let store = MemoryLeaseStore::new();
        store.set_lease(Some(stale_record("dead", 4))).await;
        store.mark_in_progress().await.unwrap();
        let election = LeaderElection::with_holder_id(Arc::new(store.clone()), "a", timings());

        assert!(election.try_become_leader().await.unwrap());
        let stored = store.read().await.unwrap().unwrap();
        assert_eq!(stored.holder_id, "a");
        assert_eq!(stored.epoch, 5);
        assert!(!store.is_in_progress().await.unwrap());
    }

    #[tokio::test]
    async fn test_renew_detects_takeover() {
        let store = MemoryLeaseStore::new();
        let election = LeaderElection::with_holder_id(Arc::new(store.clone()), "a", timings());
        assert!(election.try_become_leader().await.unwrap());
        election.lease().renew().await.unwrap();

        store.set_lease(Some(LeaseRecord::new("b", 2))).await;

        let err = election.lease().renew().await.unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::LeaseLost { ref holder, epoch: 2 } if holder == "b"
        ));
        assert!(election.lease().held().is_none());
    }

    #[tokio::test]
    async fn test_release_leaves_foreign_lease() {
        let store = MemoryLeaseStore::new();
        let election = LeaderElection::with_holder_id(Arc::new(store.clone()), "a", timings());
        assert!(election.try_become_leader().await.unwrap());

        store.set_lease(Some(LeaseRecord::new("b", 2))).await;
        election.lease().release().await.unwrap();
        assert_eq!(store.read().await.unwrap().unwrap().holder_id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_sees_completion() {
        let store = MemoryLeaseStore::new();
        store.set_lease(Some(LeaseRecord::new("leader", 1))).await;
        let election = LeaderElection::with_holder_id(Arc::new(store.clone()), "f", timings());

        let finisher = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            finisher.mark_completed().await.unwrap();
        });

        let outcome = election
            .wait_for_completion(|| async { false })
            .await
            .unwrap();
        assert_eq!(outcome, FollowerOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_promoted_when_leader_stale() {
        let store = MemoryLeaseStore::new();
        store.set_lease(Some(stale_record("dead", 1))).await;
        let election = LeaderElection::with_holder_id(Arc::new(store.clone()), "f", timings());

        let outcome = election.wait_for_completion(|| async { false }).await.unwrap();
        assert_eq!(outcome, FollowerOutcome::Promoted);
        assert_eq!(store.read().await.unwrap().unwrap().epoch, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_recovers_missing_marker() {
        let store = MemoryLeaseStore::new();
        store.set_lease(Some(LeaseRecord::new("leader", 1))).await;
        let election = LeaderElection::with_holder_id(Arc::new(store.clone()), "f", timings());

        let outcome = election.wait_for_completion(|| async { true }).await.unwrap();
        assert_eq!(outcome, FollowerOutcome::Recovered);
        assert!(store.is_completed().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_never_takes_over_stale_lease() {
        let store = MemoryLeaseStore::new();
        store.set_lease(Some(stale_record("dead", 3))).await;
        let election = LeaderElection::with_holder_id(Arc::new(store.clone()), "w", timings());

        let outcome = election.wait_without_promotion().await.unwrap();
        assert_eq!(outcome, FollowerOutcome::TimedOut);
        let stored = store.read().await.unwrap().unwrap();
        assert_eq!((stored.holder_id.as_str(), stored.epoch), ("dead", 3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_sees_completion() {
        let store = MemoryLeaseStore::new();
        let election = LeaderElection::with_holder_id(Arc::new(store.clone()), "w", timings());

        let finisher = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            finisher.mark_completed().await.unwrap();
        });

        let outcome = election.wait_without_promotion().await.unwrap();
        assert_eq!(outcome, FollowerOutcome::Completed);
    }

    #[test]
    fn test_heartbeat_interval_is_quarter_of_stale_timeout() {
        let store = Arc::new(MemoryLeaseStore::new());
        let election = LeaderElection::with_holder_id(store, "a", timings());
        assert_eq!(election.lease().heartbeat_interval(), Duration::from_secs(75));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_times_out() {
        let store = MemoryLeaseStore::new();
        store.set_lease(Some(LeaseRecord::new("leader", 1))).await;
        let election = LeaderElection::with_holder_id(Arc::new(store.clone()), "f", timings());

        let outcome = election.wait_for_completion(|| async { false }).await.unwrap();
        assert_eq!(outcome, FollowerOutcome::TimedOut);
        assert!(!store.is_completed().await.unwrap());
    }
}
