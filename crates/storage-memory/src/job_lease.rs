// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use chrono::Duration;
use opstore_data_model::{AcquireLeaseError, CleanupTask, Clock, JobLease, LeaseState, WorkerId};
use opstore_storage::job_lease::JobLeaseRepository;

use crate::{MemoryStore, MemoryStoreError};

/// An implementation of [`JobLeaseRepository`] for a [`MemoryStore`]
pub struct MemoryJobLeaseRepository<'c> {
    store: &'c MemoryStore,
}

impl<'c> MemoryJobLeaseRepository<'c> {
    /// Create a new [`MemoryJobLeaseRepository`] on top of the given store
    #[must_use]
    pub fn new(store: &'c MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobLeaseRepository for MemoryJobLeaseRepository<'_> {
    type Error = MemoryStoreError;

    async fn ensure(&mut self, task: CleanupTask) -> Result<bool, Self::Error> {
        let mut collections = self.store.lock()?;
        if collections.job_leases.contains_key(&task) {
            return Ok(false);
        }

        collections.job_leases.insert(task, LeaseState::Free);
        Ok(true)
    }

    async fn lookup(&mut self, task: CleanupTask) -> Result<Option<JobLease>, Self::Error> {
        let collections = self.store.lock()?;
        Ok(collections
            .job_leases
            .get(&task)
            .map(|state| JobLease {
                task,
                state: state.clone(),
            }))
    }

    #[tracing::instrument(
        name = "memory.job_lease.try_acquire",
        skip_all,
        fields(
            job_lease.task = %task,
            job_lease.worker_id = %worker,
        ),
        err,
    )]
    async fn try_acquire(
        &mut self,
        clock: &dyn Clock,
        task: CleanupTask,
        worker: &WorkerId,
        duration: Duration,
    ) -> Result<bool, Self::Error> {
        let now = clock.now();
        let mut collections = self.store.lock()?;
        let Some(state) = collections.job_leases.get_mut(&task) else {
            return Ok(false);
        };

        match state.clone().acquire(worker, now, duration) {
            Ok(acquired) => {
                *state = acquired;
                Ok(true)
            }
            Err(AcquireLeaseError::Unavailable(_)) => Ok(false),
            Err(AcquireLeaseError::Duration(e)) => Err(e.into()),
        }
    }

    #[tracing::instrument(
        name = "memory.job_lease.release",
        skip_all,
        fields(
            job_lease.task = %task,
            job_lease.worker_id = %worker,
        ),
        err,
    )]
    async fn release(
        &mut self,
        task: CleanupTask,
        worker: &WorkerId,
    ) -> Result<bool, Self::Error> {
        let mut collections = self.store.lock()?;
        let Some(state) = collections.job_leases.get_mut(&task) else {
            return Ok(false);
        };

        if !state.is_held_by(worker) {
            return Ok(false);
        }

        *state = state.clone().release(worker);
        Ok(true)
    }
}
