// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! The cleanup engine
//!
//! For each [`CleanupTask`], the engine takes the lease of the task, removes
//! the matching artifacts in batches of [`CleanupOptions::batch_size`], oldest
//! first, and gives the lease back. Each batch runs in its own repository
//! transaction, so that a crash only loses the batch in progress.

use std::{collections::BTreeMap, sync::Arc};

use opentelemetry::KeyValue;
use opstore_data_model::{CleanupTask, Clock, WorkerId};
use opstore_storage::{BoxRepository, BoxRepositoryFactory, RepositoryAccess, RepositoryError};
use tracing::{debug, error, info, warn};

use crate::{BATCH_FAILURES_COUNTER, CleanupNotification, REMOVED_COUNTER};

/// How many batches in a row may fail before the engine gives up on a task
/// until the next pass
const MAX_CONSECUTIVE_FAILURES: usize = 3;

/// Tuning of the cleanup passes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOptions {
    /// Maximum number of artifacts removed in a single batch
    pub batch_size: usize,

    /// How long a lease is valid for once acquired. A pass taking longer than
    /// this may run concurrently with another worker's.
    pub lease_duration: chrono::Duration,

    /// Whether to run the [`CleanupTask::ConsumedGrants`] task
    pub remove_consumed_grants: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            lease_duration: chrono::Duration::minutes(10),
            remove_consumed_grants: false,
        }
    }
}

/// What happened to each task during a cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    removed: BTreeMap<CleanupTask, usize>,
    skipped: Vec<CleanupTask>,
    failed: Vec<CleanupTask>,
}

impl CleanupReport {
    /// How many artifacts the given task removed, or `None` if the task did
    /// not run on this worker
    #[must_use]
    pub fn removed(&self, task: CleanupTask) -> Option<usize> {
        self.removed.get(&task).copied()
    }

    /// How many artifacts were removed by all the tasks
    #[must_use]
    pub fn total_removed(&self) -> usize {
        self.removed.values().sum()
    }

    /// The tasks skipped because another worker held their lease
    #[must_use]
    pub fn skipped(&self) -> &[CleanupTask] {
        &self.skipped
    }

    /// The tasks which could not run because the store failed
    #[must_use]
    pub fn failed(&self) -> &[CleanupTask] {
        &self.failed
    }
}

/// A batch which was drained from the store
struct Batch {
    /// The keys selected for this batch
    keys: Vec<String>,

    /// How many of them were actually deleted
    removed: usize,
}

enum BatchError {
    /// The next batch could not be selected, so the loop can't go on
    Select(RepositoryError),

    /// The selected batch could not be deleted
    Delete {
        /// How many keys were selected for the batch
        selected: usize,
        source: RepositoryError,
    },
}

/// Runs the cleanup tasks on behalf of a worker
pub struct CleanupEngine {
    repository_factory: BoxRepositoryFactory,
    clock: Arc<dyn Clock + Send>,
    notifier: Option<Arc<dyn CleanupNotification>>,
    worker_id: WorkerId,
    options: CleanupOptions,
}

impl CleanupEngine {
    /// Create a new [`CleanupEngine`], without notification hook
    #[must_use]
    pub fn new(
        repository_factory: BoxRepositoryFactory,
        clock: Arc<dyn Clock + Send>,
        worker_id: WorkerId,
        mut options: CleanupOptions,
    ) -> Self {
        // An empty batch would never signal the end of the drain loop
        options.batch_size = options.batch_size.max(1);

        Self {
            repository_factory,
            clock,
            notifier: None,
            worker_id,
            options,
        }
    }

    /// Set the hook notified after each removed batch
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn CleanupNotification>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// The identity under which this engine takes the leases
    #[must_use]
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// The options this engine runs with
    #[must_use]
    pub fn options(&self) -> &CleanupOptions {
        &self.options
    }

    /// The tasks run by a pass, in order
    pub fn tasks(&self) -> impl Iterator<Item = CleanupTask> + '_ {
        CleanupTask::ALL.into_iter().filter(|task| {
            *task != CleanupTask::ConsumedGrants || self.options.remove_consumed_grants
        })
    }

    fn clock(&self) -> &dyn Clock {
        &*self.clock
    }

    async fn repository(&self) -> Result<BoxRepository, RepositoryError> {
        self.repository_factory.create().await
    }

    /// Create the lease rows which don't exist yet
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails
    #[tracing::instrument(name = "cleanup.ensure_leases", skip_all, err)]
    pub async fn ensure_leases(&self) -> Result<(), RepositoryError> {
        let mut repo = self.repository().await?;
        for task in CleanupTask::ALL {
            if repo.job_lease().ensure(task).await? {
                debug!(task.id = %task, "Created the lease row");
            }
        }
        repo.save().await
    }

    /// Run all the enabled tasks once, in order
    ///
    /// A task failing does not prevent the next ones from running.
    #[tracing::instrument(name = "cleanup.pass", skip_all, fields(worker.id = %self.worker_id))]
    pub async fn run_pass(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for task in self.tasks() {
            match self.run_task(task).await {
                Ok(Some(count)) => {
                    report.removed.insert(task, count);
                }
                Ok(None) => report.skipped.push(task),
                Err(e) => {
                    error!(
                        task.id = %task,
                        error = &e as &dyn std::error::Error,
                        "Failed to run cleanup task"
                    );
                    report.failed.push(task);
                }
            }
        }

        report
    }

    /// Run a single task, if its lease is available
    ///
    /// Returns the number of artifacts removed, or `None` if another worker
    /// holds the lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease could not be acquired because the store
    /// failed. Failures once the lease is acquired are logged instead.
    #[tracing::instrument(
        name = "cleanup.task",
        skip_all,
        fields(
            worker.id = %self.worker_id,
            task.id = %task,
        ),
    )]
    pub async fn run_task(&self, task: CleanupTask) -> Result<Option<usize>, RepositoryError> {
        if !self.acquire(task).await? {
            debug!("The lease is held by another worker, skipping");
            return Ok(None);
        }

        let total = self.drain(task).await;

        if let Err(e) = self.release(task).await {
            // The lease will expire on its own
            error!(
                error = &e as &dyn std::error::Error,
                "Failed to release the lease"
            );
        }

        if total == 0 {
            debug!("Nothing to clean up");
        } else {
            info!(count = total, "Cleaned up stale artifacts");
        }

        Ok(Some(total))
    }

    async fn acquire(&self, task: CleanupTask) -> Result<bool, RepositoryError> {
        let mut repo = self.repository().await?;
        let acquired = repo
            .job_lease()
            .try_acquire(
                self.clock(),
                task,
                &self.worker_id,
                self.options.lease_duration,
            )
            .await?;
        repo.save().await?;
        Ok(acquired)
    }

    async fn release(&self, task: CleanupTask) -> Result<(), RepositoryError> {
        let mut repo = self.repository().await?;
        let released = repo.job_lease().release(task, &self.worker_id).await?;
        repo.save().await?;

        if !released {
            warn!("The lease was taken over by another worker before the end of the task");
        }

        Ok(())
    }

    /// Remove batches until one comes out short, and return how many
    /// artifacts were removed
    async fn drain(&self, task: CleanupTask) -> usize {
        let attributes = [KeyValue::new("task", task.as_str())];
        let mut total = 0;
        let mut consecutive_failures = 0;

        loop {
            match self.drain_batch(task).await {
                Ok(batch) => {
                    consecutive_failures = 0;
                    total += batch.removed;
                    REMOVED_COUNTER.add(
                        u64::try_from(batch.removed).unwrap_or(u64::MAX),
                        &attributes,
                    );

                    if !batch.keys.is_empty() {
                        self.notify(task, &batch.keys).await;
                    }

                    if batch.keys.len() < self.options.batch_size {
                        break;
                    }
                }

                Err(BatchError::Select(e)) => {
                    BATCH_FAILURES_COUNTER.add(1, &attributes);
                    error!(
                        error = &e as &dyn std::error::Error,
                        "Failed to select the next batch"
                    );
                    break;
                }

                Err(BatchError::Delete { selected, source }) => {
                    BATCH_FAILURES_COUNTER.add(1, &attributes);
                    consecutive_failures += 1;
                    error!(
                        error = &source as &dyn std::error::Error,
                        count = selected,
                        "Failed to remove a batch"
                    );

                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        warn!(
                            failures = consecutive_failures,
                            "Too many failed batches, giving up until the next pass"
                        );
                        break;
                    }

                    // A short batch was the last one
                    if selected < self.options.batch_size {
                        break;
                    }
                }
            }
        }

        total
    }

    async fn drain_batch(&self, task: CleanupTask) -> Result<Batch, BatchError> {
        let limit = self.options.batch_size;
        let mut repo = self.repository().await.map_err(BatchError::Select)?;

        let keys = match task {
            CleanupTask::ExpiredGrants => repo.grant().find_expired(self.clock(), limit).await,
            CleanupTask::ConsumedGrants => repo.grant().find_consumed(self.clock(), limit).await,
            CleanupTask::ExpiredDeviceCodes => {
                repo.device_code().find_expired(self.clock(), limit).await
            }
        }
        .map_err(BatchError::Select)?;

        if keys.is_empty() {
            repo.cancel().await.map_err(BatchError::Select)?;
            return Ok(Batch { keys, removed: 0 });
        }

        let selected = keys.len();
        let delete_error = |source| BatchError::Delete { selected, source };

        let removed = match task {
            CleanupTask::ExpiredGrants | CleanupTask::ConsumedGrants => {
                repo.grant().remove_keys(&keys).await
            }
            CleanupTask::ExpiredDeviceCodes => repo.device_code().remove_device_codes(&keys).await,
        }
        .map_err(delete_error)?;

        repo.save().await.map_err(delete_error)?;

        Ok(Batch { keys, removed })
    }

    async fn notify(&self, task: CleanupTask, keys: &[String]) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        let res = match task {
            CleanupTask::ExpiredGrants | CleanupTask::ConsumedGrants => {
                notifier.grants_removed(keys).await
            }
            CleanupTask::ExpiredDeviceCodes => notifier.device_codes_removed(keys).await,
        };

        if let Err(e) = res {
            error!(
                error = &*e as &dyn std::error::Error,
                count = keys.len(),
                "Cleanup notification failed"
            );
        }
    }
}
