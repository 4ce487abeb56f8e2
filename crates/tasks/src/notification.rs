// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;

/// Hook called by the cleanup engine after each batch it removed
///
/// Calls are best effort: an error is logged by the engine, and never stops
/// the cleanup. Implementations must accept an empty slice, even though the
/// engine does not notify empty batches.
#[async_trait]
pub trait CleanupNotification: Send + Sync {
    /// Called with the keys of the grants removed in a batch
    ///
    /// # Errors
    ///
    /// Any error is logged and otherwise ignored
    async fn grants_removed(&self, keys: &[String]) -> anyhow::Result<()>;

    /// Called with the device codes removed in a batch
    ///
    /// # Errors
    ///
    /// Any error is logged and otherwise ignored
    async fn device_codes_removed(&self, device_codes: &[String]) -> anyhow::Result<()>;
}
