// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{InvalidArtifactError, MAX_DATA_LENGTH, MAX_KEY_LENGTH, ensure_max_len, ensure_not_empty};

/// A pending device authorization, identified by its device code and looked
/// up by the user code the user types in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub client_id: String,
    pub subject_id: Option<String>,
    pub session_id: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub data: String,
}

impl DeviceCode {
    /// Whether the user approved the request, which sets the subject
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.subject_id.is_some()
    }

    /// Whether the device code is expired
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Check that the device code can be persisted
    ///
    /// # Errors
    ///
    /// Returns an error if one of the codes is empty or too long, or if the
    /// payload is too large
    pub fn validate(&self) -> Result<(), InvalidArtifactError> {
        ensure_not_empty("device_code", &self.device_code)?;
        ensure_max_len("device_code", &self.device_code, MAX_KEY_LENGTH)?;
        ensure_not_empty("user_code", &self.user_code)?;
        ensure_max_len("user_code", &self.user_code, MAX_KEY_LENGTH)?;
        ensure_not_empty("client_id", &self.client_id)?;
        ensure_max_len("data", &self.data, MAX_DATA_LENGTH)?;
        Ok(())
    }
}
