// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the
//! [`SigningKeyRepository`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opstore_data_model::SigningKey;
use opstore_storage::signing_key::SigningKeyRepository;
use sqlx::PgConnection;

use crate::{DatabaseError, tracing::ExecuteExt};

/// An implementation of [`SigningKeyRepository`] for a PostgreSQL connection
pub struct PgSigningKeyRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgSigningKeyRepository<'c> {
    /// Create a new [`PgSigningKeyRepository`] from an active PostgreSQL
    /// connection
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(sqlx::FromRow)]
struct SigningKeyLookup {
    id: String,
    version: i32,
    key_use: String,
    algorithm: String,
    created_at: DateTime<Utc>,
    is_x509_certificate: bool,
    data_protected: bool,
    data: String,
}

impl From<SigningKeyLookup> for SigningKey {
    fn from(value: SigningKeyLookup) -> Self {
        SigningKey {
            id: value.id,
            version: value.version,
            key_use: value.key_use,
            algorithm: value.algorithm,
            created_at: value.created_at,
            is_x509_certificate: value.is_x509_certificate,
            data_protected: value.data_protected,
            data: value.data,
        }
    }
}

#[async_trait]
impl SigningKeyRepository for PgSigningKeyRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.signing_key.load_all",
        skip_all,
        fields(
            db.query.text,
        ),
        err,
    )]
    async fn load_all(&mut self) -> Result<Vec<SigningKey>, Self::Error> {
        let keys: Vec<SigningKeyLookup> = sqlx::query_as(
            r#"
                SELECT id
                     , version
                     , key_use
                     , algorithm
                     , created_at
                     , is_x509_certificate
                     , data_protected
                     , data
                FROM signing_keys
                ORDER BY id
            "#,
        )
        .traced()
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(keys.into_iter().map(SigningKey::from).collect())
    }

    #[tracing::instrument(
        name = "db.signing_key.add",
        skip_all,
        fields(
            db.query.text,
            signing_key.id = %key.id,
            signing_key.algorithm = %key.algorithm,
        ),
        err,
    )]
    async fn add(&mut self, key: SigningKey) -> Result<SigningKey, Self::Error> {
        sqlx::query(
            r#"
                INSERT INTO signing_keys
                    ( id
                    , version
                    , key_use
                    , algorithm
                    , created_at
                    , is_x509_certificate
                    , data_protected
                    , data
                    )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&key.id)
        .bind(key.version)
        .bind(&key.key_use)
        .bind(&key.algorithm)
        .bind(key.created_at)
        .bind(key.is_x509_certificate)
        .bind(key.data_protected)
        .bind(&key.data)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(key)
    }

    #[tracing::instrument(
        name = "db.signing_key.remove",
        skip_all,
        fields(
            db.query.text,
            signing_key.id = id,
        ),
        err,
    )]
    async fn remove(&mut self, id: &str) -> Result<bool, Self::Error> {
        let res = sqlx::query(
            r#"
                DELETE FROM signing_keys
                WHERE id = $1
            "#,
        )
        .bind(id)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(res.rows_affected() > 0)
    }
}
