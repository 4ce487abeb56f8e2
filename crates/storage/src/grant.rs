// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repository to interact with persisted grants

use async_trait::async_trait;
use opstore_data_model::{Clock, Grant};

use crate::repository_impl;

/// Filter parameters for listing and removing grants
///
/// Every criterion which is not set matches all the grants. An empty filter
/// matches every grant in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GrantFilter<'a> {
    subject_id: Option<&'a str>,
    session_id: Option<&'a str>,
    client_id: Option<&'a str>,
    grant_type: Option<&'a str>,
}

impl<'a> GrantFilter<'a> {
    /// Create a new [`GrantFilter`] with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter for grants of a specific subject
    #[must_use]
    pub fn for_subject(mut self, subject_id: &'a str) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    /// Filter for grants issued in a specific session
    #[must_use]
    pub fn for_session(mut self, session_id: &'a str) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Filter for grants issued to a specific client
    #[must_use]
    pub fn for_client(mut self, client_id: &'a str) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Filter for grants of a specific type
    #[must_use]
    pub fn with_type(mut self, grant_type: &'a str) -> Self {
        self.grant_type = Some(grant_type);
        self
    }

    /// Get the subject filter
    ///
    /// Returns [`None`] if no subject filter is set
    #[must_use]
    pub fn subject_id(&self) -> Option<&'a str> {
        self.subject_id
    }

    /// Get the session filter
    ///
    /// Returns [`None`] if no session filter is set
    #[must_use]
    pub fn session_id(&self) -> Option<&'a str> {
        self.session_id
    }

    /// Get the client filter
    ///
    /// Returns [`None`] if no client filter is set
    #[must_use]
    pub fn client_id(&self) -> Option<&'a str> {
        self.client_id
    }

    /// Get the grant type filter
    ///
    /// Returns [`None`] if no grant type filter is set
    #[must_use]
    pub fn grant_type(&self) -> Option<&'a str> {
        self.grant_type
    }

    /// Whether no criterion is set, in which case the filter matches every
    /// grant
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the given grant matches all the criteria of the filter
    #[must_use]
    pub fn matches(&self, grant: &Grant) -> bool {
        fn check(criterion: Option<&str>, value: Option<&str>) -> bool {
            criterion.is_none_or(|criterion| value == Some(criterion))
        }

        check(self.subject_id, grant.subject_id.as_deref())
            && check(self.session_id, grant.session_id.as_deref())
            && check(self.client_id, Some(&grant.client_id))
            && check(self.grant_type, Some(&grant.grant_type))
    }
}

/// A [`GrantRepository`] helps interacting with [`Grant`] saved in the storage
/// backend
#[async_trait]
pub trait GrantRepository: Send + Sync {
    /// The error type returned by the repository
    type Error;

    /// Save a [`Grant`], replacing any existing grant with the same key
    ///
    /// Returns the saved [`Grant`]
    ///
    /// # Parameters
    ///
    /// * `grant`: The [`Grant`] to save
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the grant is invalid or if the underlying
    /// repository fails
    async fn upsert(&mut self, grant: Grant) -> Result<Grant, Self::Error>;

    /// Lookup a [`Grant`] by its key
    ///
    /// Returns `None` if no [`Grant`] was found
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn lookup(&mut self, key: &str) -> Result<Option<Grant>, Self::Error>;

    /// List the [`Grant`]s matching the given filter
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn list(&mut self, filter: GrantFilter<'_>) -> Result<Vec<Grant>, Self::Error>;

    /// Remove a [`Grant`] by its key
    ///
    /// Returns `true` if a grant was removed, `false` if there was no grant
    /// with this key. Removing a missing grant is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn remove(&mut self, key: &str) -> Result<bool, Self::Error>;

    /// Remove all the [`Grant`]s matching the given filter
    ///
    /// An empty filter removes every grant: callers are responsible for
    /// guarding against that.
    ///
    /// Returns the number of removed grants
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn remove_bulk(&mut self, filter: GrantFilter<'_>) -> Result<usize, Self::Error>;

    /// Find the keys of up to `limit` grants which expired, oldest expiration
    /// first
    ///
    /// # Parameters
    ///
    /// * `clock`: The clock used to get the current time
    /// * `limit`: The maximum number of keys to return
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn find_expired(
        &mut self,
        clock: &dyn Clock,
        limit: usize,
    ) -> Result<Vec<String>, Self::Error>;

    /// Find the keys of up to `limit` grants which were consumed, oldest
    /// consumption first
    ///
    /// # Parameters
    ///
    /// * `clock`: The clock used to get the current time
    /// * `limit`: The maximum number of keys to return
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn find_consumed(
        &mut self,
        clock: &dyn Clock,
        limit: usize,
    ) -> Result<Vec<String>, Self::Error>;

    /// Remove the grants with the given keys
    ///
    /// Keys which don't exist anymore are ignored. Returns the number of
    /// removed grants.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn remove_keys(&mut self, keys: &[String]) -> Result<usize, Self::Error>;
}

repository_impl!(GrantRepository:
    async fn upsert(&mut self, grant: Grant) -> Result<Grant, Self::Error>;
    async fn lookup(&mut self, key: &str) -> Result<Option<Grant>, Self::Error>;
    async fn list(&mut self, filter: GrantFilter<'_>) -> Result<Vec<Grant>, Self::Error>;
    async fn remove(&mut self, key: &str) -> Result<bool, Self::Error>;
    async fn remove_bulk(&mut self, filter: GrantFilter<'_>) -> Result<usize, Self::Error>;
    async fn find_expired(
        &mut self,
        clock: &dyn Clock,
        limit: usize,
    ) -> Result<Vec<String>, Self::Error>;
    async fn find_consumed(
        &mut self,
        clock: &dyn Clock,
        limit: usize,
    ) -> Result<Vec<String>, Self::Error>;
    async fn remove_keys(&mut self, keys: &[String]) -> Result<usize, Self::Error>;
);

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;

    fn grant(client_id: &str, subject_id: Option<&str>) -> Grant {
        Grant {
            key: "key".to_owned(),
            grant_type: "refresh_token".to_owned(),
            subject_id: subject_id.map(ToOwned::to_owned),
            session_id: Some("session".to_owned()),
            client_id: client_id.to_owned(),
            description: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            expires_at: None,
            consumed_at: None,
            data: String::new(),
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = GrantFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&grant("a", None)));
        assert!(filter.matches(&grant("b", Some("alice"))));
    }

    #[test]
    fn test_filter_composition() {
        let filter = GrantFilter::new().for_client("a");
        assert!(!filter.is_empty());
        assert!(filter.matches(&grant("a", None)));
        assert!(filter.matches(&grant("a", Some("alice"))));
        assert!(!filter.matches(&grant("b", Some("alice"))));

        let filter = filter.for_subject("alice");
        assert!(!filter.matches(&grant("a", None)));
        assert!(filter.matches(&grant("a", Some("alice"))));

        let filter = filter.with_type("authorization_code");
        assert!(!filter.matches(&grant("a", Some("alice"))));

        let filter = GrantFilter::new().for_session("other");
        assert!(!filter.matches(&grant("a", Some("alice"))));
    }
}
