// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! An implementation of the storage repositories for a PostgreSQL database
//!
//! This is the shared store the cleanup workers coordinate through. Each
//! repository wraps a transaction, which is committed with
//! [`RepositoryTransaction::save`].
//!
//! Queries are built at runtime, either as plain SQL strings or with
//! [`sea_query`] when they depend on a filter. Every query records its text
//! as `db.query.text` in the current span, through [`ExecuteExt::traced`].
//!
//! # Schema
//!
//! The schema is managed by the embedded [`MIGRATOR`]:
//!
//! - `grants`, keyed by `key`, with indexes on `expires_at`, `consumed_at`,
//!   `(subject_id, client_id, grant_type)` and
//!   `(subject_id, session_id, grant_type)`
//! - `device_codes`, keyed by `user_code`, with a unique `device_code` and an
//!   index on `expires_at`
//! - `signing_keys`, keyed by `id`, with an index on `key_use`
//! - `job_leases`, one row per cleanup task, keyed by `task_id`
//!
//! [`RepositoryTransaction::save`]: opstore_storage::RepositoryTransaction::save

#![deny(clippy::future_not_send, missing_docs)]
#![allow(clippy::module_name_repetitions)]

use sqlx::migrate::Migrator;

pub mod device_code;
mod errors;
pub(crate) mod filter;
pub mod grant;
pub(crate) mod iden;
pub mod job_lease;
pub(crate) mod repository;
pub mod signing_key;
pub(crate) mod tracing;

pub use self::{
    errors::{DatabaseError, DatabaseInconsistencyError},
    repository::{PgRepository, PgRepositoryFactory},
    tracing::ExecuteExt,
};

/// Embedded migrations, allowing them to run on startup
pub static MIGRATOR: Migrator = sqlx::migrate!();

/// Value bound to a `LIMIT` parameter, saturating at `i64::MAX`
pub(crate) fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
