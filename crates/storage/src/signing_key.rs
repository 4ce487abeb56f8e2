// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repository to interact with serialized signing keys

use async_trait::async_trait;
use opstore_data_model::SigningKey;

use crate::repository_impl;

/// A [`SigningKeyRepository`] helps interacting with [`SigningKey`] saved in
/// the storage backend
#[async_trait]
pub trait SigningKeyRepository: Send + Sync {
    /// The error type returned by the repository
    type Error;

    /// Load all the [`SigningKey`]s
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn load_all(&mut self) -> Result<Vec<SigningKey>, Self::Error>;

    /// Save a new [`SigningKey`]
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if a key with the same ID already exists or if
    /// the underlying repository fails
    async fn add(&mut self, key: SigningKey) -> Result<SigningKey, Self::Error>;

    /// Remove a [`SigningKey`] by its ID
    ///
    /// Returns `true` if a key was removed. Removing a missing key is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn remove(&mut self, id: &str) -> Result<bool, Self::Error>;
}

repository_impl!(SigningKeyRepository:
    async fn load_all(&mut self) -> Result<Vec<SigningKey>, Self::Error>;
    async fn add(&mut self, key: SigningKey) -> Result<SigningKey, Self::Error>;
    async fn remove(&mut self, id: &str) -> Result<bool, Self::Error>;
);
