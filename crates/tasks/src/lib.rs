// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Background cleanup of the operational store
//!
//! Every worker process runs one [`CleanupScheduler`]. Each pass of the
//! scheduler asks the [`CleanupEngine`] to run the cleanup tasks, which only
//! happen on the worker holding the lease of the task at that time.

use std::{sync::LazyLock, time::Duration};

use opentelemetry::metrics::{Counter, Meter};
use tokio::sync::watch;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

mod cleanup;
mod notification;
mod scheduler;

pub use self::{
    cleanup::{CleanupEngine, CleanupOptions, CleanupReport},
    notification::CleanupNotification,
    scheduler::{CleanupScheduler, SchedulerState},
};

static METER: LazyLock<Meter> = LazyLock::new(|| {
    let scope = opentelemetry::InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(opentelemetry_semantic_conventions::SCHEMA_URL)
        .build();

    opentelemetry::global::meter_with_scope(scope)
});

static REMOVED_COUNTER: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("opstore.cleanup.removed")
        .with_description("Number of artifacts removed by the cleanup tasks")
        .with_unit("{artifact}")
        .build()
});

static BATCH_FAILURES_COUNTER: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("opstore.cleanup.batch_failures")
        .with_description("Number of cleanup batches which failed")
        .with_unit("{batch}")
        .build()
});

/// How often the scheduler runs, and whether it runs at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// When `false`, the scheduler is never started
    pub enabled: bool,

    /// How long to sleep between two passes
    pub interval: Duration,
}

/// Initialise the cleanup scheduler and spawn it on the task tracker.
///
/// Returns a receiver following the state of the scheduler, or `None` if the
/// cleanup is disabled, in which case nothing is spawned.
pub fn init_and_run(
    settings: SchedulerSettings,
    engine: CleanupEngine,
    cancellation_token: CancellationToken,
    task_tracker: &TaskTracker,
) -> Option<watch::Receiver<SchedulerState>> {
    if !settings.enabled {
        tracing::info!("Cleanup is disabled, not starting the scheduler");
        return None;
    }

    let scheduler = CleanupScheduler::new(engine, settings.interval, cancellation_token);
    let state = scheduler.subscribe();
    task_tracker.spawn(scheduler.run());

    Some(state)
}

#[cfg(test)]
mod test_utils {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use chrono::Duration;
    use futures_util::future::BoxFuture;
    use opstore_data_model::{Clock, DeviceCode, Grant, MockClock, WorkerId};
    use opstore_storage::{
        BoxRepository, Repository, RepositoryAccess, RepositoryError, RepositoryFactory,
        RepositoryTransaction,
        device_code::{DeviceCodeRepository, DeviceCodeUpdate},
        grant::{GrantFilter, GrantRepository},
        job_lease::JobLeaseRepository,
        signing_key::SigningKeyRepository,
    };
    use opstore_storage_memory::{MemoryRepositoryFactory, MemoryStore};

    use crate::{CleanupEngine, CleanupNotification, CleanupOptions};

    /// Which hook was called, with which keys
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Notified {
        Grants(Vec<String>),
        DeviceCodes(Vec<String>),
    }

    /// A notification hook recording its calls, and optionally failing them
    #[derive(Default)]
    pub struct RecordingNotification {
        calls: Mutex<Vec<Notified>>,
        fail: bool,
    }

    impl RecordingNotification {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<Notified> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Notified) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.fail {
                anyhow::bail!("the hook is down");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CleanupNotification for RecordingNotification {
        async fn grants_removed(&self, keys: &[String]) -> anyhow::Result<()> {
            self.record(Notified::Grants(keys.to_vec()))
        }

        async fn device_codes_removed(&self, device_codes: &[String]) -> anyhow::Result<()> {
            self.record(Notified::DeviceCodes(device_codes.to_vec()))
        }
    }

    /// A repository factory which fails on some of its calls
    pub struct FlakyFactory {
        inner: MemoryRepositoryFactory,
        calls: Arc<AtomicUsize>,
        failing: Box<dyn Fn(usize) -> bool + Send + Sync>,
    }

    impl FlakyFactory {
        pub fn new(store: &MemoryStore, failing: impl Fn(usize) -> bool + Send + Sync + 'static) -> Self {
            Self {
                inner: MemoryRepositoryFactory::new(store.clone()),
                calls: Arc::new(AtomicUsize::new(0)),
                failing: Box::new(failing),
            }
        }

        /// A handle on the number of repositories requested so far
        pub fn calls(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.calls)
        }
    }

    #[async_trait]
    impl RepositoryFactory for FlakyFactory {
        async fn create(&self) -> Result<BoxRepository, RepositoryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if (self.failing)(call) {
                return Err(RepositoryError::from_error(std::io::Error::other(
                    "connection refused",
                )));
            }

            self.inner.create().await
        }
    }

    /// Counts the batch selections, and fails the batch removals picked by
    /// `failing` from their call index
    #[derive(Clone)]
    pub struct FailingRemovals {
        selections: Arc<AtomicUsize>,
        removals: Arc<AtomicUsize>,
        failing: Arc<dyn Fn(usize) -> bool + Send + Sync>,
    }

    impl FailingRemovals {
        pub fn new(failing: impl Fn(usize) -> bool + Send + Sync + 'static) -> Self {
            Self {
                selections: Arc::new(AtomicUsize::new(0)),
                removals: Arc::new(AtomicUsize::new(0)),
                failing: Arc::new(failing),
            }
        }

        /// How many batches were selected so far
        pub fn selections(&self) -> usize {
            self.selections.load(Ordering::SeqCst)
        }

        /// How many batch removals were attempted so far
        pub fn removals(&self) -> usize {
            self.removals.load(Ordering::SeqCst)
        }

        fn select(&self) {
            self.selections.fetch_add(1, Ordering::SeqCst);
        }

        fn remove(&self) -> Result<(), RepositoryError> {
            let call = self.removals.fetch_add(1, Ordering::SeqCst);
            if (self.failing)(call) {
                return Err(RepositoryError::from_error(std::io::Error::other(
                    "statement timeout",
                )));
            }
            Ok(())
        }
    }

    /// A repository factory over a [`MemoryStore`], whose batch removals
    /// fail as decided by a [`FailingRemovals`]
    pub struct FailingRemovalFactory {
        inner: MemoryRepositoryFactory,
        removals: FailingRemovals,
    }

    impl FailingRemovalFactory {
        pub fn new(store: &MemoryStore, removals: &FailingRemovals) -> Self {
            Self {
                inner: MemoryRepositoryFactory::new(store.clone()),
                removals: removals.clone(),
            }
        }
    }

    #[async_trait]
    impl RepositoryFactory for FailingRemovalFactory {
        async fn create(&self) -> Result<BoxRepository, RepositoryError> {
            let inner = self.inner.create().await?;
            Ok(Box::new(FailingRemovalRepository {
                inner,
                removals: self.removals.clone(),
            }))
        }
    }

    struct FailingRemovalRepository {
        inner: BoxRepository,
        removals: FailingRemovals,
    }

    impl Repository<RepositoryError> for FailingRemovalRepository {}

    impl RepositoryTransaction for FailingRemovalRepository {
        type Error = RepositoryError;

        fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
            let Self { inner, .. } = *self;
            inner.save()
        }

        fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
            let Self { inner, .. } = *self;
            inner.cancel()
        }
    }

    impl RepositoryAccess for FailingRemovalRepository {
        type Error = RepositoryError;

        fn grant<'c>(&'c mut self) -> Box<dyn GrantRepository<Error = Self::Error> + 'c> {
            Box::new(FailingRemovalGrants {
                inner: self.inner.grant(),
                removals: self.removals.clone(),
            })
        }

        fn device_code<'c>(
            &'c mut self,
        ) -> Box<dyn DeviceCodeRepository<Error = Self::Error> + 'c> {
            Box::new(FailingRemovalDeviceCodes {
                inner: self.inner.device_code(),
                removals: self.removals.clone(),
            })
        }

        fn signing_key<'c>(
            &'c mut self,
        ) -> Box<dyn SigningKeyRepository<Error = Self::Error> + 'c> {
            self.inner.signing_key()
        }

        fn job_lease<'c>(&'c mut self) -> Box<dyn JobLeaseRepository<Error = Self::Error> + 'c> {
            self.inner.job_lease()
        }
    }

    struct FailingRemovalGrants<'c> {
        inner: Box<dyn GrantRepository<Error = RepositoryError> + 'c>,
        removals: FailingRemovals,
    }

    #[async_trait]
    impl GrantRepository for FailingRemovalGrants<'_> {
        type Error = RepositoryError;

        async fn upsert(&mut self, grant: Grant) -> Result<Grant, Self::Error> {
            self.inner.upsert(grant).await
        }

        async fn lookup(&mut self, key: &str) -> Result<Option<Grant>, Self::Error> {
            self.inner.lookup(key).await
        }

        async fn list(&mut self, filter: GrantFilter<'_>) -> Result<Vec<Grant>, Self::Error> {
            self.inner.list(filter).await
        }

        async fn remove(&mut self, key: &str) -> Result<bool, Self::Error> {
            self.inner.remove(key).await
        }

        async fn remove_bulk(&mut self, filter: GrantFilter<'_>) -> Result<usize, Self::Error> {
            self.inner.remove_bulk(filter).await
        }

        async fn find_expired(
            &mut self,
            clock: &dyn Clock,
            limit: usize,
        ) -> Result<Vec<String>, Self::Error> {
            self.removals.select();
            self.inner.find_expired(clock, limit).await
        }

        async fn find_consumed(
            &mut self,
            clock: &dyn Clock,
            limit: usize,
        ) -> Result<Vec<String>, Self::Error> {
            self.removals.select();
            self.inner.find_consumed(clock, limit).await
        }

        async fn remove_keys(&mut self, keys: &[String]) -> Result<usize, Self::Error> {
            self.removals.remove()?;
            self.inner.remove_keys(keys).await
        }
    }

    struct FailingRemovalDeviceCodes<'c> {
        inner: Box<dyn DeviceCodeRepository<Error = RepositoryError> + 'c>,
        removals: FailingRemovals,
    }

    #[async_trait]
    impl DeviceCodeRepository for FailingRemovalDeviceCodes<'_> {
        type Error = RepositoryError;

        async fn add(&mut self, device_code: DeviceCode) -> Result<DeviceCode, Self::Error> {
            self.inner.add(device_code).await
        }

        async fn find_by_user_code(
            &mut self,
            user_code: &str,
        ) -> Result<Option<DeviceCode>, Self::Error> {
            self.inner.find_by_user_code(user_code).await
        }

        async fn find_by_device_code(
            &mut self,
            device_code: &str,
        ) -> Result<Option<DeviceCode>, Self::Error> {
            self.inner.find_by_device_code(device_code).await
        }

        async fn update_by_user_code(
            &mut self,
            user_code: &str,
            update: DeviceCodeUpdate,
        ) -> Result<Option<DeviceCode>, Self::Error> {
            self.inner.update_by_user_code(user_code, update).await
        }

        async fn remove_by_device_code(&mut self, device_code: &str) -> Result<bool, Self::Error> {
            self.inner.remove_by_device_code(device_code).await
        }

        async fn find_expired(
            &mut self,
            clock: &dyn Clock,
            limit: usize,
        ) -> Result<Vec<String>, Self::Error> {
            self.removals.select();
            self.inner.find_expired(clock, limit).await
        }

        async fn remove_device_codes(
            &mut self,
            device_codes: &[String],
        ) -> Result<usize, Self::Error> {
            self.removals.remove()?;
            self.inner.remove_device_codes(device_codes).await
        }
    }

    pub fn options(batch_size: usize) -> CleanupOptions {
        CleanupOptions {
            batch_size,
            ..CleanupOptions::default()
        }
    }

    pub fn engine(
        store: &MemoryStore,
        clock: &Arc<MockClock>,
        options: CleanupOptions,
    ) -> CleanupEngine {
        CleanupEngine::new(
            MemoryRepositoryFactory::new(store.clone()).boxed(),
            clock.clone(),
            WorkerId::from("test-worker"),
            options,
        )
    }

    /// A grant created a day ago, expiring at the given offset from now
    pub fn expiring_grant(key: &str, clock: &MockClock, expires_in: Duration) -> Grant {
        Grant {
            key: key.to_owned(),
            grant_type: "refresh_token".to_owned(),
            subject_id: Some("alice".to_owned()),
            session_id: None,
            client_id: "web".to_owned(),
            description: None,
            created_at: clock.now() - Duration::days(1),
            expires_at: Some(clock.now() + expires_in),
            consumed_at: None,
            data: "{}".to_owned(),
        }
    }

    pub fn expiring_device_code(code: &str, clock: &MockClock, expires_in: Duration) -> DeviceCode {
        DeviceCode {
            device_code: code.to_owned(),
            user_code: code.to_uppercase(),
            client_id: "tv".to_owned(),
            subject_id: None,
            session_id: None,
            description: None,
            created_at: clock.now() - Duration::days(1),
            expires_at: clock.now() + expires_in,
            data: "{}".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use opstore_data_model::MockClock;
    use opstore_storage_memory::MemoryStore;

    use super::*;
    use crate::test_utils::{engine, options};

    #[tokio::test]
    async fn test_disabled_scheduler_is_not_spawned() {
        let store = MemoryStore::new();
        let clock = Arc::new(MockClock::default());
        let task_tracker = TaskTracker::new();

        let state = init_and_run(
            SchedulerSettings {
                enabled: false,
                interval: Duration::from_millis(10),
            },
            engine(&store, &clock, options(10)),
            CancellationToken::new(),
            &task_tracker,
        );

        assert!(state.is_none());
        assert!(task_tracker.is_empty());
    }

    #[tokio::test]
    async fn test_enabled_scheduler_stops_on_cancellation() {
        let store = MemoryStore::new();
        let clock = Arc::new(MockClock::default());
        let task_tracker = TaskTracker::new();
        let cancellation_token = CancellationToken::new();

        let state = init_and_run(
            SchedulerSettings {
                enabled: true,
                interval: Duration::from_secs(3600),
            },
            engine(&store, &clock, options(10)),
            cancellation_token.clone(),
            &task_tracker,
        )
        .unwrap();

        assert_eq!(task_tracker.len(), 1);

        cancellation_token.cancel();
        task_tracker.close();
        tokio::time::timeout(Duration::from_secs(5), task_tracker.wait())
            .await
            .unwrap();

        assert_eq!(*state.borrow(), SchedulerState::Stopped);
    }
}
