// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the
//! [`GrantRepository`]

use async_trait::async_trait;
use opstore_data_model::{Clock, Grant};
use opstore_storage::grant::{GrantFilter, GrantRepository};
use sea_query::{Expr, PostgresQueryBuilder, Query};
use sea_query_binder::SqlxBinder;
use sqlx::PgConnection;

use crate::{
    DatabaseError,
    filter::{Filter, StatementExt},
    iden::Grants,
    limit_param,
    tracing::ExecuteExt,
};

/// An implementation of [`GrantRepository`] for a PostgreSQL connection
pub struct PgGrantRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgGrantRepository<'c> {
    /// Create a new [`PgGrantRepository`] from an active PostgreSQL connection
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

mod priv_ {
    // The enum_def macro generates a public enum, which we don't want, because it
    // triggers the missing docs warning
    #![allow(missing_docs)]

    use chrono::{DateTime, Utc};
    use sea_query::enum_def;

    #[derive(Debug, Clone, sqlx::FromRow)]
    #[enum_def]
    pub(super) struct GrantLookup {
        pub(super) key: String,
        pub(super) grant_type: String,
        pub(super) subject_id: Option<String>,
        pub(super) session_id: Option<String>,
        pub(super) client_id: String,
        pub(super) description: Option<String>,
        pub(super) created_at: DateTime<Utc>,
        pub(super) expires_at: Option<DateTime<Utc>>,
        pub(super) consumed_at: Option<DateTime<Utc>>,
        pub(super) data: String,
    }
}

use priv_::{GrantLookup, GrantLookupIden};

impl From<GrantLookup> for Grant {
    fn from(value: GrantLookup) -> Self {
        Grant {
            key: value.key,
            grant_type: value.grant_type,
            subject_id: value.subject_id,
            session_id: value.session_id,
            client_id: value.client_id,
            description: value.description,
            created_at: value.created_at,
            expires_at: value.expires_at,
            consumed_at: value.consumed_at,
            data: value.data,
        }
    }
}

impl Filter for GrantFilter<'_> {
    fn generate_condition(&self) -> impl sea_query::IntoCondition {
        sea_query::Condition::all()
            .add_option(
                self.subject_id()
                    .map(|subject_id| Expr::col((Grants::Table, Grants::SubjectId)).eq(subject_id)),
            )
            .add_option(
                self.session_id()
                    .map(|session_id| Expr::col((Grants::Table, Grants::SessionId)).eq(session_id)),
            )
            .add_option(
                self.client_id()
                    .map(|client_id| Expr::col((Grants::Table, Grants::ClientId)).eq(client_id)),
            )
            .add_option(
                self.grant_type()
                    .map(|grant_type| Expr::col((Grants::Table, Grants::GrantType)).eq(grant_type)),
            )
    }
}

#[async_trait]
impl GrantRepository for PgGrantRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.grant.upsert",
        skip_all,
        fields(
            db.query.text,
            grant.key = %grant.key,
            grant.client_id = %grant.client_id,
        ),
        err,
    )]
    async fn upsert(&mut self, grant: Grant) -> Result<Grant, Self::Error> {
        grant.validate()?;

        sqlx::query(
            r#"
                INSERT INTO grants
                    ( key
                    , grant_type
                    , subject_id
                    , session_id
                    , client_id
                    , description
                    , created_at
                    , expires_at
                    , consumed_at
                    , data
                    )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (key) DO UPDATE
                SET grant_type = EXCLUDED.grant_type
                  , subject_id = EXCLUDED.subject_id
                  , session_id = EXCLUDED.session_id
                  , client_id = EXCLUDED.client_id
                  , description = EXCLUDED.description
                  , created_at = EXCLUDED.created_at
                  , expires_at = EXCLUDED.expires_at
                  , consumed_at = EXCLUDED.consumed_at
                  , data = EXCLUDED.data
            "#,
        )
        .bind(&grant.key)
        .bind(&grant.grant_type)
        .bind(grant.subject_id.as_deref())
        .bind(grant.session_id.as_deref())
        .bind(&grant.client_id)
        .bind(grant.description.as_deref())
        .bind(grant.created_at)
        .bind(grant.expires_at)
        .bind(grant.consumed_at)
        .bind(&grant.data)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(grant)
    }

    #[tracing::instrument(
        name = "db.grant.lookup",
        skip_all,
        fields(
            db.query.text,
            grant.key = key,
        ),
        err,
    )]
    async fn lookup(&mut self, key: &str) -> Result<Option<Grant>, Self::Error> {
        let res: Option<GrantLookup> = sqlx::query_as(
            r#"
                SELECT key
                     , grant_type
                     , subject_id
                     , session_id
                     , client_id
                     , description
                     , created_at
                     , expires_at
                     , consumed_at
                     , data
                FROM grants
                WHERE key = $1
            "#,
        )
        .bind(key)
        .traced()
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(res.map(Grant::from))
    }

    #[tracing::instrument(
        name = "db.grant.list",
        skip_all,
        fields(
            db.query.text,
        ),
        err,
    )]
    async fn list(&mut self, filter: GrantFilter<'_>) -> Result<Vec<Grant>, Self::Error> {
        let (sql, arguments) = Query::select()
            .expr_as(
                Expr::col((Grants::Table, Grants::Key)),
                GrantLookupIden::Key,
            )
            .expr_as(
                Expr::col((Grants::Table, Grants::GrantType)),
                GrantLookupIden::GrantType,
            )
            .expr_as(
                Expr::col((Grants::Table, Grants::SubjectId)),
                GrantLookupIden::SubjectId,
            )
            .expr_as(
                Expr::col((Grants::Table, Grants::SessionId)),
                GrantLookupIden::SessionId,
            )
            .expr_as(
                Expr::col((Grants::Table, Grants::ClientId)),
                GrantLookupIden::ClientId,
            )
            .expr_as(
                Expr::col((Grants::Table, Grants::Description)),
                GrantLookupIden::Description,
            )
            .expr_as(
                Expr::col((Grants::Table, Grants::CreatedAt)),
                GrantLookupIden::CreatedAt,
            )
            .expr_as(
                Expr::col((Grants::Table, Grants::ExpiresAt)),
                GrantLookupIden::ExpiresAt,
            )
            .expr_as(
                Expr::col((Grants::Table, Grants::ConsumedAt)),
                GrantLookupIden::ConsumedAt,
            )
            .expr_as(
                Expr::col((Grants::Table, Grants::Data)),
                GrantLookupIden::Data,
            )
            .from(Grants::Table)
            .apply_filter(filter)
            .order_by((Grants::Table, Grants::Key), sea_query::Order::Asc)
            .build_sqlx(PostgresQueryBuilder);

        let grants: Vec<GrantLookup> = sqlx::query_as_with(&sql, arguments)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(grants.into_iter().map(Grant::from).collect())
    }

    #[tracing::instrument(
        name = "db.grant.remove",
        skip_all,
        fields(
            db.query.text,
            grant.key = key,
        ),
        err,
    )]
    async fn remove(&mut self, key: &str) -> Result<bool, Self::Error> {
        let res = sqlx::query(
            r#"
                DELETE FROM grants
                WHERE key = $1
            "#,
        )
        .bind(key)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    #[tracing::instrument(
        name = "db.grant.remove_bulk",
        skip_all,
        fields(
            db.query.text,
        ),
        err,
    )]
    async fn remove_bulk(&mut self, filter: GrantFilter<'_>) -> Result<usize, Self::Error> {
        let (sql, arguments) = Query::delete()
            .from_table(Grants::Table)
            .apply_filter(filter)
            .build_sqlx(PostgresQueryBuilder);

        let res = sqlx::query_with(&sql, arguments)
            .traced()
            .execute(&mut *self.conn)
            .await?;

        Ok(res.rows_affected().try_into().unwrap_or(usize::MAX))
    }

    #[tracing::instrument(
        name = "db.grant.find_expired",
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
        let keys = sqlx::query_scalar(
            r#"
                SELECT key
                FROM grants
                WHERE expires_at < $1
                ORDER BY expires_at, key
                LIMIT $2
            "#,
        )
        .bind(clock.now())
        .bind(limit_param(limit))
        .traced()
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(keys)
    }

    #[tracing::instrument(
        name = "db.grant.find_consumed",
        skip_all,
        fields(
            db.query.text,
            limit = limit,
        ),
        err,
    )]
    async fn find_consumed(
        &mut self,
        clock: &dyn Clock,
        limit: usize,
    ) -> Result<Vec<String>, Self::Error> {
        let keys = sqlx::query_scalar(
            r#"
                SELECT key
                FROM grants
                WHERE consumed_at < $1
                ORDER BY consumed_at, key
                LIMIT $2
            "#,
        )
        .bind(clock.now())
        .bind(limit_param(limit))
        .traced()
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(keys)
    }

    #[tracing::instrument(
        name = "db.grant.remove_keys",
        skip_all,
        fields(
            db.query.text,
            count = keys.len(),
        ),
        err,
    )]
    async fn remove_keys(&mut self, keys: &[String]) -> Result<usize, Self::Error> {
        let res = sqlx::query(
            r#"
                DELETE FROM grants
                WHERE key = ANY($1)
            "#,
        )
        .bind(keys)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(res.rows_affected().try_into().unwrap_or(usize::MAX))
    }
}
