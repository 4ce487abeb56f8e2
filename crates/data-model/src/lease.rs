// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use rand::{
    RngCore,
    distributions::{Alphanumeric, DistString},
};
use serde::Serialize;
use thiserror::Error;

/// The cleanup tasks coordinated between workers. Each of them has its own
/// lease row in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupTask {
    /// Remove the grants which expired
    ExpiredGrants,

    /// Remove the grants which were consumed
    ConsumedGrants,

    /// Remove the device codes which expired
    ExpiredDeviceCodes,
}

impl CleanupTask {
    /// All the cleanup tasks, in the order they run in a pass
    pub const ALL: [Self; 3] = [
        Self::ExpiredGrants,
        Self::ConsumedGrants,
        Self::ExpiredDeviceCodes,
    ];

    /// The identifier of the task, used as the key of the lease row
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExpiredGrants => "remove-expired-grants",
            Self::ConsumedGrants => "remove-consumed-grants",
            Self::ExpiredDeviceCodes => "remove-expired-device-codes",
        }
    }
}

impl fmt::Display for CleanupTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown cleanup task {0:?}")]
pub struct UnknownCleanupTaskError(String);

impl FromStr for CleanupTask {
    type Err = UnknownCleanupTaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|task| task.as_str() == s)
            .ok_or_else(|| UnknownCleanupTaskError(s.to_owned()))
    }
}

/// The identity of a worker process taking part in the cleanup
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Generate a new worker identity, made of the given prefix and a random
    /// suffix distinguishing multiple instances on the same host
    #[must_use]
    pub fn generate(prefix: &str, rng: &mut (impl RngCore + ?Sized)) -> Self {
        let suffix = Alphanumeric.sample_string(rng, 10);
        Self(format!("{prefix}-{suffix}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when decoding a lease row which has only one of its holder
/// columns set
#[derive(Debug, Error)]
#[error("lease has a holder without expiration, or an expiration without holder")]
pub struct InvalidLeaseError;

/// Error returned when trying to acquire a lease which is held by a worker
/// and not yet expired
#[derive(Debug, Error)]
#[error("lease is held by {worker_id} until {expires_at}")]
pub struct LeaseUnavailableError {
    pub worker_id: WorkerId,
    pub expires_at: DateTime<Utc>,
}

/// Error returned when a lease would expire past the last representable date
#[derive(Debug, Error)]
#[error("a lease of {duration} taken at {now} expires out of range")]
pub struct LeaseDurationError {
    pub now: DateTime<Utc>,
    pub duration: Duration,
}

/// Error returned by [`LeaseState::acquire`]
#[derive(Debug, Error)]
pub enum AcquireLeaseError {
    #[error(transparent)]
    Unavailable(#[from] LeaseUnavailableError),

    #[error(transparent)]
    Duration(#[from] LeaseDurationError),
}

/// Who owns a cleanup task, and until when
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LeaseState {
    #[default]
    Free,
    Held {
        worker_id: WorkerId,
        expires_at: DateTime<Utc>,
    },
}

impl LeaseState {
    /// Decode the lease from the nullable holder columns of the store
    ///
    /// # Errors
    ///
    /// Returns an error if only one of the two columns is set
    pub fn from_columns(
        worker_id: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self, InvalidLeaseError> {
        match (worker_id, expires_at) {
            (None, None) => Ok(Self::Free),
            (Some(worker_id), Some(expires_at)) => Ok(Self::Held {
                worker_id: WorkerId(worker_id),
                expires_at,
            }),
            _ => Err(InvalidLeaseError),
        }
    }

    /// Encode the lease into the nullable holder columns of the store
    #[must_use]
    pub fn to_columns(&self) -> (Option<&str>, Option<DateTime<Utc>>) {
        match self {
            Self::Free => (None, None),
            Self::Held {
                worker_id,
                expires_at,
            } => (Some(worker_id.as_str()), Some(*expires_at)),
        }
    }

    /// Returns `true` if the lease is [`Free`].
    ///
    /// [`Free`]: LeaseState::Free
    #[must_use]
    pub fn is_free(&self) -> bool {
        matches!(self, Self::Free)
    }

    /// Whether a worker could take the lease at `now`: it is either free, or
    /// its holder let it expire
    #[must_use]
    pub fn is_acquirable(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Free => true,
            Self::Held { expires_at, .. } => *expires_at < now,
        }
    }

    /// Whether the lease is currently held by the given worker
    #[must_use]
    pub fn is_held_by(&self, worker: &WorkerId) -> bool {
        matches!(self, Self::Held { worker_id, .. } if worker_id == worker)
    }

    /// When a lease taken at `now` for `duration` expires
    ///
    /// # Errors
    ///
    /// Returns an error if the expiration is not a representable date
    pub fn expiry(
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Result<DateTime<Utc>, LeaseDurationError> {
        now.checked_add_signed(duration)
            .ok_or(LeaseDurationError { now, duration })
    }

    /// Take the lease for `duration`
    ///
    /// # Errors
    ///
    /// Returns an error if the lease is held by a worker and not yet expired.
    /// This is also the case if the worker is the current holder: a lease is
    /// taken once per run and never renewed.
    ///
    /// Also returns an error if `duration` puts the expiration out of range.
    pub fn acquire(
        self,
        worker: &WorkerId,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Self, AcquireLeaseError> {
        match self {
            Self::Held {
                worker_id,
                expires_at,
            } if expires_at >= now => Err(LeaseUnavailableError {
                worker_id,
                expires_at,
            }
            .into()),
            Self::Free | Self::Held { .. } => Ok(Self::Held {
                worker_id: worker.clone(),
                expires_at: Self::expiry(now, duration)?,
            }),
        }
    }

    /// Give the lease back. This is a no-op if the lease is not held by the
    /// given worker.
    #[must_use]
    pub fn release(self, worker: &WorkerId) -> Self {
        if self.is_held_by(worker) {
            Self::Free
        } else {
            self
        }
    }
}

/// A lease row: the [`LeaseState`] of a [`CleanupTask`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobLease {
    pub task: CleanupTask,
    pub state: LeaseState,
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::{Clock, MockClock};

    #[test]
    fn test_task_identifiers() {
        for task in CleanupTask::ALL {
            assert_eq!(task.as_str().parse::<CleanupTask>().ok(), Some(task));
        }

        assert!("remove-everything".parse::<CleanupTask>().is_err());
    }

    #[test]
    fn test_worker_id_generation() {
        let mut rng = rand_chacha::ChaChaRng::seed_from_u64(42);
        let a = WorkerId::generate("host", &mut rng);
        let b = WorkerId::generate("host", &mut rng);

        assert!(a.as_str().starts_with("host-"));
        assert_eq!(a.as_str().len(), "host-".len() + 10);
        assert_ne!(a, b);
    }

    #[test]
    fn test_columns() {
        let clock = MockClock::default();
        let now = clock.now();

        assert_eq!(LeaseState::from_columns(None, None).ok(), Some(LeaseState::Free));
        assert_eq!(LeaseState::Free.to_columns(), (None, None));

        let held = LeaseState::from_columns(Some("w1".to_owned()), Some(now)).ok();
        assert_eq!(
            held,
            Some(LeaseState::Held {
                worker_id: "w1".into(),
                expires_at: now,
            })
        );

        assert!(LeaseState::from_columns(Some("w1".to_owned()), None).is_err());
        assert!(LeaseState::from_columns(None, Some(now)).is_err());
    }

    #[test]
    fn test_acquire_and_release() {
        let clock = MockClock::default();
        let duration = Duration::minutes(10);
        let w1 = WorkerId::from("w1");
        let w2 = WorkerId::from("w2");

        let state = LeaseState::Free;
        assert!(state.is_acquirable(clock.now()));

        let state = state.acquire(&w1, clock.now(), duration).unwrap();
        assert!(state.is_held_by(&w1));
        assert!(!state.is_acquirable(clock.now()));

        // Nobody can take it while it is valid, not even the holder
        assert!(state.clone().acquire(&w2, clock.now(), duration).is_err());
        assert!(state.clone().acquire(&w1, clock.now(), duration).is_err());

        // Releasing a lease held by someone else does nothing
        let state = state.release(&w2);
        assert!(state.is_held_by(&w1));

        // Exactly at the expiration it is still held
        clock.advance(duration);
        assert!(!state.is_acquirable(clock.now()));

        // Once expired, another worker can reclaim it
        clock.advance(Duration::seconds(1));
        assert!(state.is_acquirable(clock.now()));
        let state = state.acquire(&w2, clock.now(), duration).unwrap();
        assert!(state.is_held_by(&w2));

        // The previous holder releasing it is a no-op
        let state = state.release(&w1);
        assert!(state.is_held_by(&w2));

        let state = state.release(&w2);
        assert!(state.is_free());
    }

    #[test]
    fn test_out_of_range_duration() {
        let clock = MockClock::default();
        let worker = WorkerId::from("w1");
        let duration =
            Duration::from_std(std::time::Duration::from_secs(10_000_000_000_000)).unwrap();

        let res = LeaseState::Free.acquire(&worker, clock.now(), duration);
        assert!(matches!(res, Err(AcquireLeaseError::Duration(_))));
        assert!(LeaseState::expiry(clock.now(), Duration::MAX).is_err());

        // A held lease reports that it is held first
        let state = LeaseState::Free
            .acquire(&worker, clock.now(), Duration::minutes(10))
            .unwrap();
        let res = state.acquire(&worker, clock.now(), duration);
        assert!(matches!(res, Err(AcquireLeaseError::Unavailable(_))));
    }
}
