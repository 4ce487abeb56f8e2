// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! An in-process implementation of the storage repositories
//!
//! All the repositories created from the same [`MemoryStore`] share its
//! collections. Each operation takes the store lock once, which makes every
//! single operation atomic, like a conditional update on a single row of a
//! real database. There is no transaction isolation: writes are visible to
//! other repositories as soon as the operation returns, and
//! [`RepositoryTransaction::cancel`] does not roll anything back.
//!
//! [`RepositoryTransaction::cancel`]: opstore_storage::RepositoryTransaction::cancel

#![deny(clippy::future_not_send, missing_docs)]
#![allow(clippy::module_name_repetitions)]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use opstore_data_model::{
    CleanupTask, DeviceCode, Grant, InvalidArtifactError, LeaseDurationError, LeaseState,
    SigningKey,
};
use thiserror::Error;

mod device_code;
mod grant;
mod job_lease;
mod repository;
mod signing_key;

pub use self::{
    device_code::MemoryDeviceCodeRepository,
    grant::MemoryGrantRepository,
    job_lease::MemoryJobLeaseRepository,
    repository::{MemoryRepository, MemoryRepositoryFactory},
    signing_key::MemorySigningKeyRepository,
};

/// Generic error when interacting with the in-memory store
#[derive(Debug, Error)]
pub enum MemoryStoreError {
    /// A thread panicked while holding the store lock
    #[error("the store lock was poisoned")]
    Poisoned,

    /// The artifact does not satisfy the invariants of the store
    #[error(transparent)]
    InvalidArtifact(#[from] InvalidArtifactError),

    /// A lease was requested for longer than the store can represent
    #[error(transparent)]
    LeaseDuration(#[from] LeaseDurationError),

    /// A unique key is already in use
    #[error("{collection} already has a row with {field} = {value:?}")]
    Conflict {
        /// The collection in which the conflict happened
        collection: &'static str,

        /// The unique field
        field: &'static str,

        /// The conflicting value
        value: String,
    },
}

#[derive(Default)]
pub(crate) struct Collections {
    pub grants: HashMap<String, Grant>,
    /// Device codes, indexed by user code
    pub device_codes: HashMap<String, DeviceCode>,
    pub signing_keys: BTreeMap<String, SigningKey>,
    pub job_leases: BTreeMap<CleanupTask, LeaseState>,
}

/// The shared collections of the in-memory store
///
/// Cloning a [`MemoryStore`] gives another handle on the same collections.
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<Mutex<Collections>>,
}

impl MemoryStore {
    /// Create a new, empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Collections>, MemoryStoreError> {
        self.collections
            .lock()
            .map_err(|_| MemoryStoreError::Poisoned)
    }
}
