// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Serialized signing key material, along with its metadata
///
/// Signing keys share the persistence contract of the other artifacts but are
/// never touched by the cleanup tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SigningKey {
    pub id: String,
    pub version: i32,
    pub key_use: String,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub is_x509_certificate: bool,
    pub data_protected: bool,
    pub data: String,
}
