// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use opstore_data_model::SigningKey;
use opstore_storage::signing_key::SigningKeyRepository;

use crate::{MemoryStore, MemoryStoreError};

/// An implementation of [`SigningKeyRepository`] for a [`MemoryStore`]
pub struct MemorySigningKeyRepository<'c> {
    store: &'c MemoryStore,
}

impl<'c> MemorySigningKeyRepository<'c> {
    /// Create a new [`MemorySigningKeyRepository`] on top of the given store
    #[must_use]
    pub fn new(store: &'c MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SigningKeyRepository for MemorySigningKeyRepository<'_> {
    type Error = MemoryStoreError;

    async fn load_all(&mut self) -> Result<Vec<SigningKey>, Self::Error> {
        let collections = self.store.lock()?;
        Ok(collections.signing_keys.values().cloned().collect())
    }

    async fn add(&mut self, key: SigningKey) -> Result<SigningKey, Self::Error> {
        let mut collections = self.store.lock()?;
        if collections.signing_keys.contains_key(&key.id) {
            return Err(MemoryStoreError::Conflict {
                collection: "signing_keys",
                field: "id",
                value: key.id,
            });
        }

        collections.signing_keys.insert(key.id.clone(), key.clone());
        Ok(key)
    }

    async fn remove(&mut self, id: &str) -> Result<bool, Self::Error> {
        let mut collections = self.store.lock()?;
        Ok(collections.signing_keys.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use opstore_data_model::{Clock, MockClock};
    use opstore_storage::RepositoryAccess;

    use super::*;
    use crate::MemoryRepository;

    #[tokio::test]
    async fn test_signing_keys() {
        let clock = MockClock::default();
        let mut repo = MemoryRepository::new(MemoryStore::new());

        let key = SigningKey {
            id: "kid".to_owned(),
            version: 1,
            key_use: "signing".to_owned(),
            algorithm: "RS256".to_owned(),
            created_at: clock.now(),
            is_x509_certificate: false,
            data_protected: true,
            data: "secret".to_owned(),
        };

        repo.signing_key().add(key.clone()).await.unwrap();
        assert!(repo.signing_key().add(key.clone()).await.is_err());
        assert_eq!(repo.signing_key().load_all().await.unwrap(), vec![key]);

        assert!(repo.signing_key().remove("kid").await.unwrap());
        assert!(!repo.signing_key().remove("kid").await.unwrap());
        assert!(repo.signing_key().load_all().await.unwrap().is_empty());
    }
}
