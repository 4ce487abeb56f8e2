// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repository to interact with device authorization codes

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opstore_data_model::{Clock, DeviceCode};

use crate::repository_impl;

/// The fields of a [`DeviceCode`] which can change once it was created,
/// typically when the user approves the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCodeUpdate {
    /// The subject which approved the request
    pub subject_id: Option<String>,

    /// The session in which the request was approved
    pub session_id: Option<String>,

    /// A description of the request
    pub description: Option<String>,

    /// When the device code expires
    pub expires_at: DateTime<Utc>,

    /// The new opaque payload
    pub data: String,
}

impl DeviceCodeUpdate {
    /// Apply the update on a [`DeviceCode`], keeping its codes, client and
    /// creation time
    #[must_use]
    pub fn apply(self, device_code: DeviceCode) -> DeviceCode {
        DeviceCode {
            subject_id: self.subject_id,
            session_id: self.session_id,
            description: self.description,
            expires_at: self.expires_at,
            data: self.data,
            ..device_code
        }
    }
}

/// A [`DeviceCodeRepository`] helps interacting with [`DeviceCode`] saved in
/// the storage backend
#[async_trait]
pub trait DeviceCodeRepository: Send + Sync {
    /// The error type returned by the repository
    type Error;

    /// Save a new [`DeviceCode`]
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the device code is invalid, if one of its
    /// codes is already in use, or if the underlying repository fails
    async fn add(&mut self, device_code: DeviceCode) -> Result<DeviceCode, Self::Error>;

    /// Lookup a [`DeviceCode`] by its user code
    ///
    /// Returns `None` if no [`DeviceCode`] was found
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn find_by_user_code(
        &mut self,
        user_code: &str,
    ) -> Result<Option<DeviceCode>, Self::Error>;

    /// Lookup a [`DeviceCode`] by its device code
    ///
    /// Returns `None` if no [`DeviceCode`] was found
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn find_by_device_code(
        &mut self,
        device_code: &str,
    ) -> Result<Option<DeviceCode>, Self::Error>;

    /// Update the [`DeviceCode`] with the given user code
    ///
    /// Returns the updated [`DeviceCode`], or `None` if no [`DeviceCode`] has
    /// this user code
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the updated device code is invalid or if the
    /// underlying repository fails
    async fn update_by_user_code(
        &mut self,
        user_code: &str,
        update: DeviceCodeUpdate,
    ) -> Result<Option<DeviceCode>, Self::Error>;

    /// Remove a [`DeviceCode`] by its device code
    ///
    /// Returns `true` if a device code was removed. Removing a missing device
    /// code is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn remove_by_device_code(&mut self, device_code: &str) -> Result<bool, Self::Error>;

    /// Find up to `limit` device codes which expired, oldest expiration first
    ///
    /// # Parameters
    ///
    /// * `clock`: The clock used to get the current time
    /// * `limit`: The maximum number of device codes to return
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn find_expired(
        &mut self,
        clock: &dyn Clock,
        limit: usize,
    ) -> Result<Vec<String>, Self::Error>;

    /// Remove the device codes in the given list
    ///
    /// Device codes which don't exist anymore are ignored. Returns the number
    /// of removed device codes.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn remove_device_codes(&mut self, device_codes: &[String])
    -> Result<usize, Self::Error>;
}

repository_impl!(DeviceCodeRepository:
    async fn add(&mut self, device_code: DeviceCode) -> Result<DeviceCode, Self::Error>;
    async fn find_by_user_code(
        &mut self,
        user_code: &str,
    ) -> Result<Option<DeviceCode>, Self::Error>;
    async fn find_by_device_code(
        &mut self,
        device_code: &str,
    ) -> Result<Option<DeviceCode>, Self::Error>;
    async fn update_by_user_code(
        &mut self,
        user_code: &str,
        update: DeviceCodeUpdate,
    ) -> Result<Option<DeviceCode>, Self::Error>;
    async fn remove_by_device_code(&mut self, device_code: &str) -> Result<bool, Self::Error>;
    async fn find_expired(
        &mut self,
        clock: &dyn Clock,
        limit: usize,
    ) -> Result<Vec<String>, Self::Error>;
    async fn remove_device_codes(&mut self, device_codes: &[String]) -> Result<usize, Self::Error>;
);
