// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the
//! [`DeviceCodeRepository`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opstore_data_model::{Clock, DeviceCode};
use opstore_storage::device_code::{DeviceCodeRepository, DeviceCodeUpdate};
use sqlx::PgConnection;

use crate::{DatabaseError, limit_param, tracing::ExecuteExt};

/// An implementation of [`DeviceCodeRepository`] for a PostgreSQL connection
pub struct PgDeviceCodeRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgDeviceCodeRepository<'c> {
    /// Create a new [`PgDeviceCodeRepository`] from an active PostgreSQL
    /// connection
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(sqlx::FromRow)]
struct DeviceCodeLookup {
    device_code: String,
    user_code: String,
    client_id: String,
    subject_id: Option<String>,
    session_id: Option<String>,
    description: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    data: String,
}

impl From<DeviceCodeLookup> for DeviceCode {
    fn from(value: DeviceCodeLookup) -> Self {
        DeviceCode {
            device_code: value.device_code,
            user_code: value.user_code,
            client_id: value.client_id,
            subject_id: value.subject_id,
            session_id: value.session_id,
            description: value.description,
            created_at: value.created_at,
            expires_at: value.expires_at,
            data: value.data,
        }
    }
}

#[async_trait]
impl DeviceCodeRepository for PgDeviceCodeRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.device_code.add",
        skip_all,
        fields(
            db.query.text,
            device_code.user_code = %device_code.user_code,
            device_code.client_id = %device_code.client_id,
        ),
        err,
    )]
    async fn add(&mut self, device_code: DeviceCode) -> Result<DeviceCode, Self::Error> {
        device_code.validate()?;

        sqlx::query(
            r#"
                INSERT INTO device_codes
                    ( device_code
                    , user_code
                    , client_id
                    , subject_id
                    , session_id
                    , description
                    , created_at
                    , expires_at
                    , data
                    )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&device_code.device_code)
        .bind(&device_code.user_code)
        .bind(&device_code.client_id)
        .bind(device_code.subject_id.as_deref())
        .bind(device_code.session_id.as_deref())
        .bind(device_code.description.as_deref())
        .bind(device_code.created_at)
        .bind(device_code.expires_at)
        .bind(&device_code.data)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(device_code)
    }

    #[tracing::instrument(
        name = "db.device_code.find_by_user_code",
        skip_all,
        fields(
            db.query.text,
            device_code.user_code = user_code,
        ),
        err,
    )]
    async fn find_by_user_code(
        &mut self,
        user_code: &str,
    ) -> Result<Option<DeviceCode>, Self::Error> {
        let res: Option<DeviceCodeLookup> = sqlx::query_as(
            r#"
                SELECT device_code
                     , user_code
                     , client_id
                     , subject_id
                     , session_id
                     , description
                     , created_at
                     , expires_at
                     , data
                FROM device_codes
                WHERE user_code = $1
            "#,
        )
        .bind(user_code)
        .traced()
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(res.map(DeviceCode::from))
    }

    #[tracing::instrument(
        name = "db.device_code.find_by_device_code",
        skip_all,
        fields(
            db.query.text,
        ),
        err,
    )]
    async fn find_by_device_code(
        &mut self,
        device_code: &str,
    ) -> Result<Option<DeviceCode>, Self::Error> {
        let res: Option<DeviceCodeLookup> = sqlx::query_as(
            r#"
                SELECT device_code
                     , user_code
                     , client_id
                     , subject_id
                     , session_id
                     , description
                     , created_at
                     , expires_at
                     , data
                FROM device_codes
                WHERE device_code = $1
            "#,
        )
        .bind(device_code)
        .traced()
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(res.map(DeviceCode::from))
    }

    #[tracing::instrument(
        name = "db.device_code.update_by_user_code",
        skip_all,
        fields(
            db.query.text,
            device_code.user_code = user_code,
        ),
        err,
    )]
    async fn update_by_user_code(
        &mut self,
        user_code: &str,
        update: DeviceCodeUpdate,
    ) -> Result<Option<DeviceCode>, Self::Error> {
        // Lock the row, so that the update is checked against what it replaces
        let existing: Option<DeviceCodeLookup> = sqlx::query_as(
            r#"
                SELECT device_code
                     , user_code
                     , client_id
                     , subject_id
                     , session_id
                     , description
                     , created_at
                     , expires_at
                     , data
                FROM device_codes
                WHERE user_code = $1
                FOR UPDATE
            "#,
        )
        .bind(user_code)
        .traced()
        .fetch_optional(&mut *self.conn)
        .await?;

        let Some(existing) = existing else {
            return Ok(None);
        };

        let updated = update.apply(existing.into());
        updated.validate()?;

        let res = sqlx::query(
            r#"
                UPDATE device_codes
                SET subject_id = $2
                  , session_id = $3
                  , description = $4
                  , expires_at = $5
                  , data = $6
                WHERE user_code = $1
            "#,
        )
        .bind(user_code)
        .bind(updated.subject_id.as_deref())
        .bind(updated.session_id.as_deref())
        .bind(updated.description.as_deref())
        .bind(updated.expires_at)
        .bind(&updated.data)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        DatabaseError::ensure_affected_rows(&res, 1)?;

        Ok(Some(updated))
    }

    #[tracing::instrument(
        name = "db.device_code.remove_by_device_code",
        skip_all,
        fields(
            db.query.text,
        ),
        err,
    )]
    async fn remove_by_device_code(&mut self, device_code: &str) -> Result<bool, Self::Error> {
        let res = sqlx::query(
            r#"
                DELETE FROM device_codes
                WHERE device_code = $1
            "#,
        )
        .bind(device_code)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    #[tracing::instrument(
        name = "db.device_code.find_expired",
        skip_all,
        fields(
            db.query.text,
            limit = limit,
        ),
        err,
    )]
    async fn find_expired(
        &mut self,
        clock: &dyn Clock,
        limit: usize,
    ) -> Result<Vec<String>, Self::Error> {
        let device_codes = sqlx::query_scalar(
            r#"
                SELECT device_code
                FROM device_codes
                WHERE expires_at < $1
                ORDER BY expires_at, device_code
                LIMIT $2
            "#,
        )
        .bind(clock.now())
        .bind(limit_param(limit))
        .traced()
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(device_codes)
    }

    #[tracing::instrument(
        name = "db.device_code.remove_device_codes",
        skip_all,
        fields(
            db.query.text,
            count = device_codes.len(),
        ),
        err,
    )]
    async fn remove_device_codes(
        &mut self,
        device_codes: &[String],
    ) -> Result<usize, Self::Error> {
        let res = sqlx::query(
            r#"
                DELETE FROM device_codes
                WHERE device_code = ANY($1)
            "#,
        )
        .bind(device_codes)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(res.rows_affected().try_into().unwrap_or(usize::MAX))
    }
}
