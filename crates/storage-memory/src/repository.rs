// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use futures_util::{FutureExt, future::BoxFuture};
use opstore_storage::{
    BoxRepository, BoxRepositoryFactory, MapErr, Repository, RepositoryAccess, RepositoryError,
    RepositoryFactory, RepositoryTransaction, device_code::DeviceCodeRepository,
    grant::GrantRepository, job_lease::JobLeaseRepository, signing_key::SigningKeyRepository,
};

use crate::{
    MemoryDeviceCodeRepository, MemoryGrantRepository, MemoryJobLeaseRepository,
    MemorySigningKeyRepository, MemoryStore, MemoryStoreError,
};

/// An implementation of the [`RepositoryFactory`] trait backed by a
/// [`MemoryStore`]
#[derive(Clone, Default)]
pub struct MemoryRepositoryFactory {
    store: MemoryStore,
}

impl MemoryRepositoryFactory {
    /// Create a new [`MemoryRepositoryFactory`] on top of the given store
    #[must_use]
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    /// Box the factory
    #[must_use]
    pub fn boxed(self) -> BoxRepositoryFactory {
        Box::new(self)
    }

    /// Get a handle on the underlying store
    #[must_use]
    pub fn store(&self) -> MemoryStore {
        self.store.clone()
    }
}

#[async_trait]
impl RepositoryFactory for MemoryRepositoryFactory {
    async fn create(&self) -> Result<BoxRepository, RepositoryError> {
        Ok(MemoryRepository::new(self.store.clone()).boxed())
    }
}

/// An implementation of the [`Repository`] trait backed by a [`MemoryStore`]
pub struct MemoryRepository {
    store: MemoryStore,
}

impl MemoryRepository {
    /// Create a new [`MemoryRepository`] on top of the given store
    #[must_use]
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    /// Transform the repository into a type-erased [`BoxRepository`]
    #[must_use]
    pub fn boxed(self) -> BoxRepository {
        Box::new(MapErr::new(self, RepositoryError::from_error))
    }
}

impl Repository<MemoryStoreError> for MemoryRepository {}

impl RepositoryTransaction for MemoryRepository {
    type Error = MemoryStoreError;

    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        futures_util::future::ok(()).boxed()
    }

    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        tracing::debug!("Cancelling an in-memory transaction, writes are kept");
        futures_util::future::ok(()).boxed()
    }
}

impl RepositoryAccess for MemoryRepository {
    type Error = MemoryStoreError;

    fn grant<'c>(&'c mut self) -> Box<dyn GrantRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryGrantRepository::new(&self.store))
    }

    fn device_code<'c>(&'c mut self) -> Box<dyn DeviceCodeRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryDeviceCodeRepository::new(&self.store))
    }

    fn signing_key<'c>(&'c mut self) -> Box<dyn SigningKeyRepository<Error = Self::Error> + 'c> {
        Box::new(MemorySigningKeyRepository::new(&self.store))
    }

    fn job_lease<'c>(&'c mut self) -> Box<dyn JobLeaseRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryJobLeaseRepository::new(&self.store))
    }
}
