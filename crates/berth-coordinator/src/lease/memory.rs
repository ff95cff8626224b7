// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory lease store for testing.
//!
//! Clones share state, so several simulated replicas can race on one store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;
use crate::error::Result;

#[derive(Debug, Default)]
struct MemoryState {
    lease: Option<LeaseRecord>,
    completed: bool,
    in_progress: bool,
}

/// In-memory lease store.
#[derive(Debug, Clone, Default)]
pub struct MemoryLeaseStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLeaseStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored lease directly, bypassing the create-if-absent check.
    pub async fn set_lease(&self, record: Option<LeaseRecord>) {
        self.state.lock().await.lease = record;
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    fn store_type(&self) -> &'static str {
        "memory"
    }

    async fn read(&self) -> Result<Option<LeaseRecord>> {
        Ok(self.state.lock().await.lease.clone())
    }

    async fn try_create(&self, record: &LeaseRecord) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.lease.is_some() {
            return Ok(false);
        }
        state.lease = Some(record.clone());
        Ok(true)
    }

    async fn overwrite(&self, record: &LeaseRecord) -> Result<()> {
        self.state.lock().await.lease = Some(record.clone());
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        self.state.lock().await.lease = None;
        Ok(())
    }

    async fn is_completed(&self) -> Result<bool> {
        Ok(self.state.lock().await.completed)
    }

    async fn mark_completed(&self) -> Result<()> {
        self.state.lock().await.completed = true;
        Ok(())
    }

    async fn is_in_progress(&self) -> Result<bool> {
        Ok(self.state.lock().await.in_progress)
    }

    async fn mark_in_progress(&self) -> Result<()> {
        self.state.lock().await.in_progress = true;
        Ok(())
    }

    async fn clear_in_progress(&self) -> Result<()> {
        self.state.lock().await.in_progress = false;
        Ok(())
    }
}
