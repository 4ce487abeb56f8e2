// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::{
    device_code::DeviceCodeRepository, grant::GrantRepository, job_lease::JobLeaseRepository,
    signing_key::SigningKeyRepository,
};

/// A [`RepositoryFactory`] is a factory that can create a [`BoxRepository`]
#[async_trait]
pub trait RepositoryFactory {
    /// Create a new [`BoxRepository`]
    async fn create(&self) -> Result<BoxRepository, RepositoryError>;
}

/// A type-erased [`RepositoryFactory`]
pub type BoxRepositoryFactory = Box<dyn RepositoryFactory + Send + Sync + 'static>;

/// A [`Repository`] helps interacting with the underlying storage backend.
pub trait Repository<E>:
    RepositoryAccess<Error = E> + RepositoryTransaction<Error = E> + Send
where
    E: std::error::Error + Send + Sync + 'static,
{
}

/// An opaque, type-erased error
#[derive(Debug, Error)]
#[error(transparent)]
pub struct RepositoryError {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl RepositoryError {
    /// Construct a [`RepositoryError`] from any error kind
    pub fn from_error<E>(value: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            source: Box::new(value),
        }
    }
}

/// A type-erased [`Repository`]
pub type BoxRepository = Box<dyn Repository<RepositoryError> + Send + Sync + 'static>;

/// A [`RepositoryTransaction`] can be saved or cancelled, after a series
/// of operations.
pub trait RepositoryTransaction {
    /// The error type used by the [`Self::save`] and [`Self::cancel`] functions
    type Error;

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage backend failed to commit the
    /// transaction.
    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>>;

    /// Rollback the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage backend failed to rollback
    /// the transaction.
    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>>;
}

/// Access the various repositories the backend implements.
///
/// All the methods return a boxed trait object, which can be used to access a
/// particular repository. The lifetime of the returned object is bound to the
/// lifetime of the whole repository, so that only one mutable reference to the
/// repository is used at a time.
///
/// When adding a new repository, you should add a new method to this trait, and
/// update the implementations for [`crate::MapErr`] and [`Box<R>`] below.
///
/// Note: this used to have generic associated types to avoid boxing all the
/// repository traits, but that was removed because it made almost impossible
/// to box the trait object. This might be a shortcoming of the initial
/// implementation of generic associated types, and might be fixed in the
/// future.
pub trait RepositoryAccess: Send {
    /// The backend-specific error type used by each repository.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Get a [`GrantRepository`]
    fn grant<'c>(&'c mut self) -> Box<dyn GrantRepository<Error = Self::Error> + 'c>;

    /// Get a [`DeviceCodeRepository`]
    fn device_code<'c>(&'c mut self) -> Box<dyn DeviceCodeRepository<Error = Self::Error> + 'c>;

    /// Get a [`SigningKeyRepository`]
    fn signing_key<'c>(&'c mut self) -> Box<dyn SigningKeyRepository<Error = Self::Error> + 'c>;

    /// Get a [`JobLeaseRepository`]
    fn job_lease<'c>(&'c mut self) -> Box<dyn JobLeaseRepository<Error = Self::Error> + 'c>;
}

/// Implementations of the [`RepositoryAccess`], [`RepositoryTransaction`] and
/// [`Repository`] for the [`crate::MapErr`] wrapper and [`Box<R>`]
mod impls {
    use futures_util::{FutureExt, TryFutureExt, future::BoxFuture};

    use super::RepositoryAccess;
    use crate::{
        MapErr, Repository, RepositoryTransaction, device_code::DeviceCodeRepository,
        grant::GrantRepository, job_lease::JobLeaseRepository,
        signing_key::SigningKeyRepository,
    };

    // --- Repository ---
    impl<R, F, E1, E2> Repository<E2> for MapErr<R, F>
    where
        R: Repository<E1> + RepositoryAccess<Error = E1> + RepositoryTransaction<Error = E1>,
        F: FnMut(E1) -> E2 + Send + Sync + 'static,
        E1: std::error::Error + Send + Sync + 'static,
        E2: std::error::Error + Send + Sync + 'static,
    {
    }

    // --- RepositoryTransaction --
    impl<R, F, E> RepositoryTransaction for MapErr<R, F>
    where
        R: RepositoryTransaction,
        R::Error: 'static,
        F: FnMut(R::Error) -> E + Send + Sync + 'static,
        E: std::error::Error,
    {
        type Error = E;

        fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
            Box::new(self.inner).save().map_err(self.mapper).boxed()
        }

        fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
            Box::new(self.inner).cancel().map_err(self.mapper).boxed()
        }
    }

    // --- RepositoryAccess --
    impl<R, F, E> RepositoryAccess for MapErr<R, F>
    where
        R: RepositoryAccess,
        R::Error: 'static,
        F: FnMut(R::Error) -> E + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        type Error = E;

        fn grant<'c>(&'c mut self) -> Box<dyn GrantRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.grant(), &mut self.mapper))
        }

        fn device_code<'c>(
            &'c mut self,
        ) -> Box<dyn DeviceCodeRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.device_code(), &mut self.mapper))
        }

        fn signing_key<'c>(
            &'c mut self,
        ) -> Box<dyn SigningKeyRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.signing_key(), &mut self.mapper))
        }

        fn job_lease<'c>(&'c mut self) -> Box<dyn JobLeaseRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.job_lease(), &mut self.mapper))
        }
    }

    impl<R: RepositoryAccess + ?Sized> RepositoryAccess for Box<R> {
        type Error = R::Error;

        fn grant<'c>(&'c mut self) -> Box<dyn GrantRepository<Error = Self::Error> + 'c> {
            (**self).grant()
        }

        fn device_code<'c>(
            &'c mut self,
        ) -> Box<dyn DeviceCodeRepository<Error = Self::Error> + 'c> {
            (**self).device_code()
        }

        fn signing_key<'c>(
            &'c mut self,
        ) -> Box<dyn SigningKeyRepository<Error = Self::Error> + 'c> {
            (**self).signing_key()
        }

        fn job_lease<'c>(&'c mut self) -> Box<dyn JobLeaseRepository<Error = Self::Error> + 'c> {
            (**self).job_lease()
        }
    }
}
