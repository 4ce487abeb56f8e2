// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{InvalidArtifactError, MAX_DATA_LENGTH, MAX_KEY_LENGTH, ensure_max_len, ensure_not_empty};

/// A persisted authorization artifact: an authorization code, a token handle,
/// a consent record...
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grant {
    pub key: String,
    pub grant_type: String,
    pub subject_id: Option<String>,
    pub session_id: Option<String>,
    pub client_id: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub data: String,
}

impl Grant {
    /// Whether the grant is expired
    ///
    /// Always returns `false` if the grant does not have an expiry time.
    ///
    /// # Parameters
    ///
    /// * `now` - The current time
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at < now,
            None => false,
        }
    }

    /// Whether the grant was consumed before `now`
    #[must_use]
    pub fn is_consumed(&self, now: DateTime<Utc>) -> bool {
        match self.consumed_at {
            Some(consumed_at) => consumed_at < now,
            None => false,
        }
    }

    /// Check that the grant can be persisted
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or too long, if the payload is too
    /// large, or if the grant was consumed before it was created
    pub fn validate(&self) -> Result<(), InvalidArtifactError> {
        ensure_not_empty("key", &self.key)?;
        ensure_max_len("key", &self.key, MAX_KEY_LENGTH)?;
        ensure_not_empty("type", &self.grant_type)?;
        ensure_not_empty("client_id", &self.client_id)?;
        ensure_max_len("data", &self.data, MAX_DATA_LENGTH)?;

        if let Some(consumed_at) = self.consumed_at {
            if consumed_at < self.created_at {
                return Err(InvalidArtifactError::ConsumedBeforeCreated);
            }
        }

        Ok(())
    }
}
