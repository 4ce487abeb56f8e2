// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the
//! [`JobLeaseRepository`]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use opstore_data_model::{CleanupTask, Clock, JobLease, LeaseState, WorkerId};
use opstore_storage::job_lease::JobLeaseRepository;
use sqlx::PgConnection;

use crate::{DatabaseError, DatabaseInconsistencyError, tracing::ExecuteExt};

/// An implementation of [`JobLeaseRepository`] for a PostgreSQL connection
pub struct PgJobLeaseRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgJobLeaseRepository<'c> {
    /// Create a new [`PgJobLeaseRepository`] from an active PostgreSQL
    /// connection
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(sqlx::FromRow)]
struct JobLeaseLookup {
    worker_id: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
impl JobLeaseRepository for PgJobLeaseRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.job_lease.ensure",
        skip_all,
        fields(
            db.query.text,
            job_lease.task = %task,
        ),
        err,
    )]
    async fn ensure(&mut self, task: CleanupTask) -> Result<bool, Self::Error> {
        let res = sqlx::query(
            r#"
                INSERT INTO job_leases (task_id)
                VALUES ($1)
                ON CONFLICT (task_id) DO NOTHING
            "#,
        )
        .bind(task.as_str())
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    #[tracing::instrument(
        name = "db.job_lease.lookup",
        skip_all,
        fields(
            db.query.text,
            job_lease.task = %task,
        ),
        err,
    )]
    async fn lookup(&mut self, task: CleanupTask) -> Result<Option<JobLease>, Self::Error> {
        let res: Option<JobLeaseLookup> = sqlx::query_as(
            r#"
                SELECT worker_id
                     , lease_expires_at
                FROM job_leases
                WHERE task_id = $1
            "#,
        )
        .bind(task.as_str())
        .traced()
        .fetch_optional(&mut *self.conn)
        .await?;

        let Some(res) = res else { return Ok(None) };

        let state = LeaseState::from_columns(res.worker_id, res.lease_expires_at).map_err(|e| {
            DatabaseInconsistencyError::on("job_leases")
                .column("worker_id")
                .row(task.as_str())
                .source(e)
        })?;

        Ok(Some(JobLease { task, state }))
    }

    #[tracing::instrument(
        name = "db.job_lease.try_acquire",
        skip_all,
        fields(
            db.query.text,
            job_lease.task = %task,
            job_lease.worker_id = %worker,
        ),
        err,
    )]
    async fn try_acquire(
        &mut self,
        clock: &dyn Clock,
        task: CleanupTask,
        worker: &WorkerId,
        duration: Duration,
    ) -> Result<bool, Self::Error> {
        let now = clock.now();
        let expires_at = LeaseState::expiry(now, duration)?;

        // Concurrent updates on the same row are serialized by the row lock,
        // and the condition is evaluated again on the latest version of the
        // row, so only one worker can match it
        let res = sqlx::query(
            r#"
                UPDATE job_leases
                SET worker_id = $2
                  , lease_expires_at = $3
                WHERE task_id = $1
                  AND (
                    (worker_id IS NULL AND lease_expires_at IS NULL)
                    OR lease_expires_at < $4
                  )
            "#,
        )
        .bind(task.as_str())
        .bind(worker.as_str())
        .bind(expires_at)
        .bind(now)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    #[tracing::instrument(
        name = "db.job_lease.release",
        skip_all,
        fields(
            db.query.text,
            job_lease.task = %task,
            job_lease.worker_id = %worker,
        ),
        err,
    )]
    async fn release(
        &mut self,
        task: CleanupTask,
        worker: &WorkerId,
    ) -> Result<bool, Self::Error> {
        let res = sqlx::query(
            r#"
                UPDATE job_leases
                SET worker_id = NULL
                  , lease_expires_at = NULL
                WHERE task_id = $1
                  AND worker_id = $2
            "#,
        )
        .bind(task.as_str())
        .bind(worker.as_str())
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}
