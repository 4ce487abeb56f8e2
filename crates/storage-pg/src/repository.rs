// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{sync::LazyLock, time::Instant};

use async_trait::async_trait;
use futures_util::{FutureExt, TryFutureExt, future::BoxFuture};
use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Histogram, Meter},
};
use opentelemetry_semantic_conventions as semcov;
use opstore_storage::{
    BoxRepository, BoxRepositoryFactory, MapErr, Repository, RepositoryAccess, RepositoryError,
    RepositoryFactory, RepositoryTransaction, device_code::DeviceCodeRepository,
    grant::GrantRepository, job_lease::JobLeaseRepository, signing_key::SigningKeyRepository,
};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::Instrument;

use crate::{
    DatabaseError, device_code::PgDeviceCodeRepository, grant::PgGrantRepository,
    job_lease::PgJobLeaseRepository, signing_key::PgSigningKeyRepository,
};

static METER: LazyLock<Meter> = LazyLock::new(|| {
    let scope = InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semcov::SCHEMA_URL)
        .build();

    opentelemetry::global::meter_with_scope(scope)
});

static TRANSACTION_BEGIN_TIME: LazyLock<Histogram<u64>> = LazyLock::new(|| {
    METER
        .u64_histogram("opstore.db.transaction.begin_time")
        .with_description("Time spent waiting for a pooled connection and starting a transaction")
        .with_unit("ms")
        .build()
});

/// Hands out one [`PgRepository`] per unit of work, each wrapping its own
/// transaction on the shared pool
#[derive(Clone)]
pub struct PgRepositoryFactory {
    pool: PgPool,
}

impl PgRepositoryFactory {
    /// Create a factory on top of a connection pool
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Type-erase the factory, for use by the cleanup engine
    #[must_use]
    pub fn boxed(self) -> BoxRepositoryFactory {
        Box::new(self)
    }
}

#[async_trait]
impl RepositoryFactory for PgRepositoryFactory {
    async fn create(&self) -> Result<BoxRepository, RepositoryError> {
        let start = Instant::now();
        let result = PgRepository::from_pool(&self.pool).await;

        let elapsed = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        let outcome = if result.is_ok() { "ok" } else { "error" };
        TRANSACTION_BEGIN_TIME.record(elapsed, &[KeyValue::new("outcome", outcome)]);

        result
            .map(PgRepository::boxed)
            .map_err(RepositoryError::from_error)
    }
}

/// Every repository of the PostgreSQL store, sharing one connection.
///
/// By default the connection is a transaction, committed by
/// [`RepositoryTransaction::save`] and rolled back by
/// [`RepositoryTransaction::cancel`]. Dropping it without saving also rolls
/// back.
pub struct PgRepository<C = Transaction<'static, Postgres>> {
    conn: C,
}

impl PgRepository {
    /// Start a transaction on the pool
    ///
    /// # Errors
    ///
    /// Returns a [`DatabaseError`] if no connection could be acquired or the
    /// transaction could not be started
    #[tracing::instrument(name = "db.begin", skip_all, err)]
    pub async fn from_pool(pool: &PgPool) -> Result<Self, DatabaseError> {
        let txn = pool.begin().await?;
        Ok(Self::from_conn(txn))
    }

    /// Type-erase the repository into a [`BoxRepository`]
    pub fn boxed(self) -> BoxRepository {
        Box::new(MapErr::new(self, RepositoryError::from_error))
    }
}

impl<C> PgRepository<C> {
    /// Wrap an existing connection. Nothing is committed or rolled back on
    /// behalf of the caller unless `C` is a transaction.
    pub fn from_conn(conn: C) -> Self {
        PgRepository { conn }
    }
}

impl Repository<DatabaseError> for PgRepository {}

impl RepositoryTransaction for PgRepository {
    type Error = DatabaseError;

    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        self.conn
            .commit()
            .map_err(DatabaseError::from)
            .instrument(tracing::info_span!("db.commit"))
            .boxed()
    }

    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        self.conn
            .rollback()
            .map_err(DatabaseError::from)
            .instrument(tracing::info_span!("db.rollback"))
            .boxed()
    }
}

impl<C> RepositoryAccess for PgRepository<C>
where
    C: AsMut<PgConnection> + Send,
{
    type Error = DatabaseError;

    fn grant<'c>(&'c mut self) -> Box<dyn GrantRepository<Error = Self::Error> + 'c> {
        Box::new(PgGrantRepository::new(self.conn.as_mut()))
    }

    fn device_code<'c>(&'c mut self) -> Box<dyn DeviceCodeRepository<Error = Self::Error> + 'c> {
        Box::new(PgDeviceCodeRepository::new(self.conn.as_mut()))
    }

    fn signing_key<'c>(&'c mut self) -> Box<dyn SigningKeyRepository<Error = Self::Error> + 'c> {
        Box::new(PgSigningKeyRepository::new(self.conn.as_mut()))
    }

    fn job_lease<'c>(&'c mut self) -> Box<dyn JobLeaseRepository<Error = Self::Error> + 'c> {
        Box::new(PgJobLeaseRepository::new(self.conn.as_mut()))
    }
}
