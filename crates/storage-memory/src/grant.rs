// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use opstore_data_model::{Clock, Grant};
use opstore_storage::grant::{GrantFilter, GrantRepository};

use crate::{MemoryStore, MemoryStoreError};

/// An implementation of [`GrantRepository`] for a [`MemoryStore`]
pub struct MemoryGrantRepository<'c> {
    store: &'c MemoryStore,
}

impl<'c> MemoryGrantRepository<'c> {
    /// Create a new [`MemoryGrantRepository`] on top of the given store
    #[must_use]
    pub fn new(store: &'c MemoryStore) -> Self {
        Self { store }
    }
}

/// Pick the keys of the grants with a timestamp before `now`, oldest first
fn oldest_before<'a>(
    grants: impl Iterator<Item = &'a Grant>,
    timestamp: impl Fn(&Grant) -> Option<chrono::DateTime<chrono::Utc>>,
    now: chrono::DateTime<chrono::Utc>,
    limit: usize,
) -> Vec<String> {
    let mut candidates: Vec<_> = grants
        .filter_map(|grant| {
            timestamp(grant)
                .filter(|t| *t < now)
                .map(|t| (t, &grant.key))
        })
        .collect();
    candidates.sort_unstable();

    candidates
        .into_iter()
        .take(limit)
        .map(|(_, key)| key.clone())
        .collect()
}

#[async_trait]
impl GrantRepository for MemoryGrantRepository<'_> {
    type Error = MemoryStoreError;

    #[tracing::instrument(
        name = "memory.grant.upsert",
        skip_all,
        fields(grant.key = %grant.key),
        err,
    )]
    async fn upsert(&mut self, grant: Grant) -> Result<Grant, Self::Error> {
        grant.validate()?;
        let mut collections = self.store.lock()?;
        collections.grants.insert(grant.key.clone(), grant.clone());
        Ok(grant)
    }

    async fn lookup(&mut self, key: &str) -> Result<Option<Grant>, Self::Error> {
        let collections = self.store.lock()?;
        Ok(collections.grants.get(key).cloned())
    }

    async fn list(&mut self, filter: GrantFilter<'_>) -> Result<Vec<Grant>, Self::Error> {
        let collections = self.store.lock()?;
        let mut grants: Vec<Grant> = collections
            .grants
            .values()
            .filter(|grant| filter.matches(grant))
            .cloned()
            .collect();
        grants.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(grants)
    }

    async fn remove(&mut self, key: &str) -> Result<bool, Self::Error> {
        let mut collections = self.store.lock()?;
        Ok(collections.grants.remove(key).is_some())
    }

    #[tracing::instrument(name = "memory.grant.remove_bulk", skip_all, err)]
    async fn remove_bulk(&mut self, filter: GrantFilter<'_>) -> Result<usize, Self::Error> {
        let mut collections = self.store.lock()?;
        let before = collections.grants.len();
        collections.grants.retain(|_, grant| !filter.matches(grant));
        Ok(before - collections.grants.len())
    }

    async fn find_expired(
        &mut self,
        clock: &dyn Clock,
        limit: usize,
    ) -> Result<Vec<String>, Self::Error> {
        let collections = self.store.lock()?;
        Ok(oldest_before(
            collections.grants.values(),
            |grant| grant.expires_at,
            clock.now(),
            limit,
        ))
    }

    async fn find_consumed(
        &mut self,
        clock: &dyn Clock,
        limit: usize,
    ) -> Result<Vec<String>, Self::Error> {
        let collections = self.store.lock()?;
        Ok(oldest_before(
            collections.grants.values(),
            |grant| grant.consumed_at,
            clock.now(),
            limit,
        ))
    }

    async fn remove_keys(&mut self, keys: &[String]) -> Result<usize, Self::Error> {
        let mut collections = self.store.lock()?;
        Ok(keys
            .iter()
            .filter(|key| collections.grants.remove(key.as_str()).is_some())
            .count())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Duration;
    use opstore_data_model::MockClock;
    use opstore_storage::{RepositoryAccess, RepositoryTransaction};

    use super::*;
    use crate::{MemoryRepository, MemoryStore};

    fn grant(key: &str, client_id: &str, clock: &MockClock) -> Grant {
        Grant {
            key: key.to_owned(),
            grant_type: "refresh_token".to_owned(),
            subject_id: Some("alice".to_owned()),
            session_id: None,
            client_id: client_id.to_owned(),
            description: None,
            created_at: clock.now(),
            expires_at: None,
            consumed_at: None,
            data: "{}".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_lookup() {
        let clock = MockClock::default();
        let mut repo = MemoryRepository::new(MemoryStore::new());

        assert!(repo.grant().lookup("a").await.unwrap().is_none());

        let mut g = grant("a", "client", &clock);
        repo.grant().upsert(g.clone()).await.unwrap();
        assert_eq!(repo.grant().lookup("a").await.unwrap(), Some(g.clone()));

        // Saving again replaces the grant
        g.description = Some("updated".to_owned());
        repo.grant().upsert(g.clone()).await.unwrap();
        assert_eq!(repo.grant().lookup("a").await.unwrap(), Some(g));
        assert_eq!(repo.grant().list(GrantFilter::new()).await.unwrap().len(), 1);

        // Invalid grants are rejected
        let mut invalid = grant("b", "client", &clock);
        invalid.consumed_at = Some(clock.now() - Duration::seconds(1));
        assert_matches!(
            repo.grant().upsert(invalid).await,
            Err(MemoryStoreError::InvalidArtifact(_))
        );

        Box::new(repo).save().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let clock = MockClock::default();
        let mut repo = MemoryRepository::new(MemoryStore::new());
        repo.grant()
            .upsert(grant("a", "client", &clock))
            .await
            .unwrap();

        assert!(repo.grant().remove("a").await.unwrap());
        assert!(!repo.grant().remove("a").await.unwrap());

        let keys = vec!["a".to_owned(), "missing".to_owned()];
        assert_eq!(repo.grant().remove_keys(&keys).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_bulk() {
        let clock = MockClock::default();
        let mut repo = MemoryRepository::new(MemoryStore::new());
        for (key, client) in [("a", "one"), ("b", "one"), ("c", "two")] {
            repo.grant().upsert(grant(key, client, &clock)).await.unwrap();
        }

        let removed = repo
            .grant()
            .remove_bulk(GrantFilter::new().for_client("one"))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let left = repo.grant().list(GrantFilter::new()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].key, "c");

        repo.grant().upsert(grant("d", "three", &clock)).await.unwrap();
        let removed = repo.grant().remove_bulk(GrantFilter::new()).await.unwrap();
        assert_eq!(removed, 2);
        assert!(repo.grant().list(GrantFilter::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_expired_and_consumed() {
        let clock = MockClock::default();
        let mut repo = MemoryRepository::new(MemoryStore::new());

        let mut late = grant("late", "client", &clock);
        late.expires_at = Some(clock.now() + Duration::minutes(2));
        let mut early = grant("early", "client", &clock);
        early.expires_at = Some(clock.now() + Duration::minutes(1));
        let mut never = grant("never", "client", &clock);
        never.consumed_at = Some(clock.now());

        for g in [late, early, never] {
            repo.grant().upsert(g).await.unwrap();
        }

        assert!(repo.grant().find_expired(&clock, 10).await.unwrap().is_empty());
        assert!(repo.grant().find_consumed(&clock, 10).await.unwrap().is_empty());

        clock.advance(Duration::minutes(5));
        assert_eq!(
            repo.grant().find_expired(&clock, 10).await.unwrap(),
            vec!["early".to_owned(), "late".to_owned()]
        );
        assert_eq!(
            repo.grant().find_expired(&clock, 1).await.unwrap(),
            vec!["early".to_owned()]
        );
        assert_eq!(
            repo.grant().find_consumed(&clock, 10).await.unwrap(),
            vec!["never".to_owned()]
        );
    }
}
