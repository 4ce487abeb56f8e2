// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Table and column identifiers used by [`sea_query`]

/// The `grants` table and its columns
#[derive(sea_query::Iden)]
pub enum Grants {
    Table,
    Key,
    GrantType,
    SubjectId,
    SessionId,
    ClientId,
    Description,
    CreatedAt,
    ExpiresAt,
    ConsumedAt,
    Data,
}
