// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Interactions with the storage backend
//!
//! This crate provides a set of traits that can be implemented to interact with
//! the storage backend. Those traits are called repositories and are grouped by
//! the type of data they manage: grants, device codes, signing keys and the
//! job leases used to coordinate the cleanup between workers.
//!
//! Each of those repositories can be accessed via the [`RepositoryAccess`]
//! trait. This trait can be wrapped in a [`BoxRepository`] to allow using it
//! without caring about the underlying storage backend, and without carrying
//! around the generic type parameter.
//!
//! Operations that need the current time take a [`Clock`] parameter, so that
//! tests can drive time with a [`MockClock`].
//!
//! [`MockClock`]: opstore_data_model::MockClock
//!
//! # Defining a new repository
//!
//! To define a new repository, you have to:
//!   1. Define a new (async) repository trait, with the methods you need
//!   2. Write an implementation of this trait for each storage backend
//!      (`opstore-storage-pg` and `opstore-storage-memory`)
//!   3. Make it accessible via the [`RepositoryAccess`] trait
//!
//! Repository traits define an associated error type, use `&mut self` so that
//! only one operation runs at a time on a repository instance, and are
//! forwarded through [`MapErr`] and [`Box`] with the [`repository_impl!`]
//! macro.

#![deny(clippy::future_not_send, missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod device_code;
pub mod grant;
pub mod job_lease;
pub(crate) mod repository;
pub mod signing_key;
mod utils;

pub use opstore_data_model::{Clock, SystemClock};

pub use self::{
    repository::{
        BoxRepository, BoxRepositoryFactory, Repository, RepositoryAccess, RepositoryError,
        RepositoryFactory, RepositoryTransaction,
    },
    utils::MapErr,
};
