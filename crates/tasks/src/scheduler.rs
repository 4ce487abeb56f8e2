// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::CleanupEngine;

/// The lifecycle of a [`CleanupScheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Not started yet, or between a pass and the next sleep
    Idle,

    /// Waiting for the next pass
    Sleeping,

    /// A cleanup pass is in progress
    Running,

    /// The scheduler was cancelled and exited
    Stopped,
}

/// The long-running loop triggering a cleanup pass at a fixed interval
///
/// Cancellation is checked before and after sleeping. A pass which already
/// started always runs to completion.
pub struct CleanupScheduler {
    engine: CleanupEngine,
    interval: Duration,
    cancellation_token: CancellationToken,
    state: watch::Sender<SchedulerState>,
}

impl CleanupScheduler {
    /// Create a new [`CleanupScheduler`], in the [`SchedulerState::Idle`]
    /// state
    #[must_use]
    pub fn new(
        engine: CleanupEngine,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            engine,
            interval,
            cancellation_token,
            state,
        }
    }

    /// Follow the state of the scheduler
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    fn transition(&self, state: SchedulerState) {
        self.state.send_replace(state);
    }

    /// Run the scheduler until the cancellation token is cancelled
    #[tracing::instrument(
        name = "cleanup.scheduler",
        skip_all,
        fields(worker.id = %self.engine.worker_id()),
    )]
    pub async fn run(self) {
        info!(interval = ?self.interval, "Starting the cleanup scheduler");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            self.transition(SchedulerState::Sleeping);
            tokio::select! {
                biased;

                () = self.cancellation_token.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }

            if self.cancellation_token.is_cancelled() {
                break;
            }

            self.transition(SchedulerState::Running);
            self.run_once().await;
            self.transition(SchedulerState::Idle);
        }

        debug!("Cleanup scheduler cancelled, stopping");
        self.transition(SchedulerState::Stopped);
    }

    async fn run_once(&self) {
        // A missing row only makes the acquisition of its lease fail
        if let Err(e) = self.engine.ensure_leases().await {
            error!(
                error = &e as &dyn std::error::Error,
                "Failed to create the lease rows"
            );
        }

        let report = self.engine.run_pass().await;
        if !report.failed().is_empty() {
            warn!(
                failed = ?report.failed(),
                "Some cleanup tasks failed, they will run again on the next pass"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, atomic::Ordering};

    use chrono::Duration as ChronoDuration;
    use opstore_data_model::{CleanupTask, MockClock, WorkerId};
    use opstore_storage::{RepositoryAccess, grant::GrantFilter};
    use opstore_storage_memory::{MemoryRepository, MemoryStore};

    use super::*;
    use crate::test_utils::{FlakyFactory, engine, expiring_grant, options};

    #[tokio::test]
    async fn test_runs_passes_until_cancelled() {
        let store = MemoryStore::new();
        let clock = Arc::new(MockClock::default());
        let mut repo = MemoryRepository::new(store.clone());
        for key in ["a", "b", "c"] {
            repo.grant()
                .upsert(expiring_grant(key, &clock, ChronoDuration::hours(-1)))
                .await
                .unwrap();
        }

        let cancellation_token = CancellationToken::new();
        let scheduler = CleanupScheduler::new(
            engine(&store, &clock, options(2)),
            Duration::from_millis(10),
            cancellation_token.clone(),
        );
        let state = scheduler.subscribe();
        assert_eq!(*state.borrow(), SchedulerState::Idle);
        let handle = tokio::spawn(scheduler.run());

        tokio::time::timeout(Duration::from_secs(5), async {
            while !repo.grant().list(GrantFilter::new()).await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // The pass also created the lease rows, and released them
        for task in CleanupTask::ALL {
            let lease = repo.job_lease().lookup(task).await.unwrap().unwrap();
            assert!(lease.state.is_free());
        }

        cancellation_token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*state.borrow(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_cancelled_while_sleeping_skips_the_pass() {
        let store = MemoryStore::new();
        let clock = Arc::new(MockClock::default());
        let mut repo = MemoryRepository::new(store.clone());
        repo.grant()
            .upsert(expiring_grant("a", &clock, ChronoDuration::hours(-1)))
            .await
            .unwrap();

        let cancellation_token = CancellationToken::new();
        let scheduler = CleanupScheduler::new(
            engine(&store, &clock, options(2)),
            Duration::from_secs(3600),
            cancellation_token.clone(),
        );
        let mut state = scheduler.subscribe();
        let handle = tokio::spawn(scheduler.run());

        state
            .wait_for(|s| *s == SchedulerState::Sleeping)
            .await
            .unwrap();
        cancellation_token.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*state.borrow(), SchedulerState::Stopped);

        // No pass ran
        assert!(repo.grant().lookup("a").await.unwrap().is_some());
        assert!(
            repo.job_lease()
                .lookup(CleanupTask::ExpiredGrants)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = MemoryStore::new();
        let clock = Arc::new(MockClock::default());
        let cancellation_token = CancellationToken::new();
        cancellation_token.cancel();

        let scheduler = CleanupScheduler::new(
            engine(&store, &clock, options(2)),
            Duration::from_millis(1),
            cancellation_token,
        );
        let state = scheduler.subscribe();
        scheduler.run().await;

        assert_eq!(*state.borrow(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_failing_store_does_not_stop_the_loop() {
        let store = MemoryStore::new();
        let clock = Arc::new(MockClock::default());
        let cancellation_token = CancellationToken::new();

        let factory = FlakyFactory::new(&store, |_| true);
        let calls = factory.calls();
        let engine = CleanupEngine::new(
            Box::new(factory),
            clock,
            WorkerId::from("test-worker"),
            options(2),
        );
        let scheduler = CleanupScheduler::new(
            engine,
            Duration::from_millis(10),
            cancellation_token.clone(),
        );
        let handle = tokio::spawn(scheduler.run());

        // Each pass tries to create the lease rows, then to acquire two leases.
        // Wait for two of them to go through.
        tokio::time::timeout(Duration::from_secs(5), async {
            while calls.load(Ordering::SeqCst) < 6 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(!handle.is_finished());
        cancellation_token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
