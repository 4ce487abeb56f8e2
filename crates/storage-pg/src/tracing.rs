// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use opentelemetry_semantic_conventions::attribute::DB_QUERY_TEXT;
use tracing::Span;

/// Extension trait recording the SQL of a [`sqlx::Execute`] query on a span
///
/// Repository methods declare an empty `db.query.text` field on their span,
/// which gets filled when the query is about to run.
pub trait ExecuteExt<'q, DB>: Sized {
    /// Fill `db.query.text` on the current span
    #[must_use]
    fn traced(self) -> Self {
        self.record(&Span::current())
    }

    /// Fill `db.query.text` on the given span
    #[must_use]
    fn record(self, span: &Span) -> Self;
}

impl<'q, DB, Q> ExecuteExt<'q, DB> for Q
where
    Q: sqlx::Execute<'q, DB>,
    DB: sqlx::Database,
{
    fn record(self, span: &Span) -> Self {
        span.record(DB_QUERY_TEXT, self.sql());
        self
    }
}
