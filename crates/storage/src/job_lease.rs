// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repository to coordinate the cleanup tasks between workers
//!
//! Each [`CleanupTask`] has a single lease row. A worker may only run a task
//! while it holds its lease, and a lease is taken with a single conditional
//! update, so that when multiple workers race for the same lease, only one of
//! them wins.

use async_trait::async_trait;
use chrono::Duration;
use opstore_data_model::{CleanupTask, Clock, JobLease, WorkerId};

use crate::repository_impl;

/// A [`JobLeaseRepository`] helps acquiring and releasing [`JobLease`]s saved
/// in the storage backend
#[async_trait]
pub trait JobLeaseRepository: Send + Sync {
    /// The error type returned by the repository
    type Error;

    /// Create the lease row for the given task if it doesn't exist yet
    ///
    /// Returns `true` if the row was created. An existing row is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn ensure(&mut self, task: CleanupTask) -> Result<bool, Self::Error>;

    /// Lookup the [`JobLease`] of the given task
    ///
    /// Returns `None` if the lease row doesn't exist
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn lookup(&mut self, task: CleanupTask) -> Result<Option<JobLease>, Self::Error>;

    /// Try to acquire the lease of the given task for `duration`
    ///
    /// This succeeds only if the lease is free or expired, with a single
    /// atomic conditional update. Returns `true` if the lease is now held by
    /// `worker`.
    ///
    /// # Parameters
    ///
    /// * `clock`: The clock used to get the current time
    /// * `task`: The task to acquire the lease for
    /// * `worker`: The identity of the worker acquiring the lease
    /// * `duration`: How long the lease is valid for
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn try_acquire(
        &mut self,
        clock: &dyn Clock,
        task: CleanupTask,
        worker: &WorkerId,
        duration: Duration,
    ) -> Result<bool, Self::Error>;

    /// Release the lease of the given task, if it is still held by `worker`
    ///
    /// Returns `true` if the lease was released. Releasing a lease held by
    /// someone else is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn release(&mut self, task: CleanupTask, worker: &WorkerId)
    -> Result<bool, Self::Error>;
}

repository_impl!(JobLeaseRepository:
    async fn ensure(&mut self, task: CleanupTask) -> Result<bool, Self::Error>;
    async fn lookup(&mut self, task: CleanupTask) -> Result<Option<JobLease>, Self::Error>;
    async fn try_acquire(
        &mut self,
        clock: &dyn Clock,
        task: CleanupTask,
        worker: &WorkerId,
        duration: Duration,
    ) -> Result<bool, Self::Error>;
    async fn release(&mut self, task: CleanupTask, worker: &WorkerId) -> Result<bool, Self::Error>;
);
