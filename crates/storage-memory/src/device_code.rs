// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use opstore_data_model::{Clock, DeviceCode};
use opstore_storage::device_code::{DeviceCodeRepository, DeviceCodeUpdate};

use crate::{MemoryStore, MemoryStoreError};

/// An implementation of [`DeviceCodeRepository`] for a [`MemoryStore`]
pub struct MemoryDeviceCodeRepository<'c> {
    store: &'c MemoryStore,
}

impl<'c> MemoryDeviceCodeRepository<'c> {
    /// Create a new [`MemoryDeviceCodeRepository`] on top of the given store
    #[must_use]
    pub fn new(store: &'c MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DeviceCodeRepository for MemoryDeviceCodeRepository<'_> {
    type Error = MemoryStoreError;

    #[tracing::instrument(
        name = "memory.device_code.add",
        skip_all,
        fields(device_code.user_code = %device_code.user_code),
        err,
    )]
    async fn add(&mut self, device_code: DeviceCode) -> Result<DeviceCode, Self::Error> {
        device_code.validate()?;
        let mut collections = self.store.lock()?;

        if collections.device_codes.contains_key(&device_code.user_code) {
            return Err(MemoryStoreError::Conflict {
                collection: "device_codes",
                field: "user_code",
                value: device_code.user_code,
            });
        }

        if collections
            .device_codes
            .values()
            .any(|existing| existing.device_code == device_code.device_code)
        {
            return Err(MemoryStoreError::Conflict {
                collection: "device_codes",
                field: "device_code",
                value: device_code.device_code,
            });
        }

        collections
            .device_codes
            .insert(device_code.user_code.clone(), device_code.clone());
        Ok(device_code)
    }

    async fn find_by_user_code(
        &mut self,
        user_code: &str,
    ) -> Result<Option<DeviceCode>, Self::Error> {
        let collections = self.store.lock()?;
        Ok(collections.device_codes.get(user_code).cloned())
    }

    async fn find_by_device_code(
        &mut self,
        device_code: &str,
    ) -> Result<Option<DeviceCode>, Self::Error> {
        let collections = self.store.lock()?;
        Ok(collections
            .device_codes
            .values()
            .find(|existing| existing.device_code == device_code)
            .cloned())
    }

    async fn update_by_user_code(
        &mut self,
        user_code: &str,
        update: DeviceCodeUpdate,
    ) -> Result<Option<DeviceCode>, Self::Error> {
        let mut collections = self.store.lock()?;
        let Some(existing) = collections.device_codes.get_mut(user_code) else {
            return Ok(None);
        };

        let updated = update.apply(existing.clone());
        updated.validate()?;
        *existing = updated.clone();

        Ok(Some(updated))
    }

    async fn remove_by_device_code(&mut self, device_code: &str) -> Result<bool, Self::Error> {
        let mut collections = self.store.lock()?;
        let before = collections.device_codes.len();
        collections
            .device_codes
            .retain(|_, existing| existing.device_code != device_code);
        Ok(collections.device_codes.len() != before)
    }

    async fn find_expired(
        &mut self,
        clock: &dyn Clock,
        limit: usize,
    ) -> Result<Vec<String>, Self::Error> {
        let now = clock.now();
        let collections = self.store.lock()?;
        let mut candidates: Vec<_> = collections
            .device_codes
            .values()
            .filter(|code| code.is_expired(now))
            .map(|code| (code.expires_at, &code.device_code))
            .collect();
        candidates.sort_unstable();

        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|(_, device_code)| device_code.clone())
            .collect())
    }

    async fn remove_device_codes(
        &mut self,
        device_codes: &[String],
    ) -> Result<usize, Self::Error> {
        let mut collections = self.store.lock()?;
        let before = collections.device_codes.len();
        collections
            .device_codes
            .retain(|_, existing| !device_codes.contains(&existing.device_code));
        Ok(before - collections.device_codes.len())
    }
}
