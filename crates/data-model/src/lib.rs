// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Domain types for the operational store: grants, device codes, signing keys
//! and the job leases used to coordinate cleanup between workers.

#![allow(clippy::module_name_repetitions)]

use thiserror::Error;

pub mod clock;
mod device_code;
mod grant;
mod lease;
mod signing_key;

/// Maximum length of a grant key
pub const MAX_KEY_LENGTH: usize = 200;

/// Maximum size of the opaque serialized payload of an artifact, in bytes
pub const MAX_DATA_LENGTH: usize = 50_000;

/// Error returned when an artifact does not satisfy the invariants of the
/// store
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidArtifactError {
    #[error("the {field} field must not be empty")]
    Empty { field: &'static str },

    #[error("the {field} field is {len} characters long, the maximum is {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("the artifact was consumed before it was created")]
    ConsumedBeforeCreated,
}

pub use self::{
    clock::{Clock, MockClock, SystemClock},
    device_code::DeviceCode,
    grant::Grant,
    lease::{
        AcquireLeaseError, CleanupTask, InvalidLeaseError, JobLease, LeaseDurationError,
        LeaseState, LeaseUnavailableError, UnknownCleanupTaskError, WorkerId,
    },
    signing_key::SigningKey,
};

pub(crate) fn ensure_not_empty(field: &'static str, value: &str) -> Result<(), InvalidArtifactError> {
    if value.is_empty() {
        return Err(InvalidArtifactError::Empty { field });
    }

    Ok(())
}

pub(crate) fn ensure_max_len(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<(), InvalidArtifactError> {
    let len = value.len();
    if len > max {
        return Err(InvalidArtifactError::TooLong { field, len, max });
    }

    Ok(())
}
