// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod cleanup;
mod database;

pub use self::{cleanup::CleanupConfig, database::DatabaseConfig};
use crate::{ConfigurationError, util::ConfigurationSection};

/// Application configuration root
#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct RootConfig {
    /// Database connection configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Configuration of the periodic cleanup of expired artifacts
    #[serde(default, skip_serializing_if = "CleanupConfig::is_default")]
    pub cleanup: CleanupConfig,
}

impl ConfigurationSection for RootConfig {
    fn validate(&self, figment: &figment::Figment) -> Result<(), ConfigurationError> {
        self.database.validate(figment)?;
        self.cleanup.validate(figment)?;

        Ok(())
    }
}

/// Partial configuration used by the cleanup worker
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// Database connection configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Configuration of the periodic cleanup of expired artifacts
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl ConfigurationSection for WorkerConfig {
    fn validate(&self, figment: &figment::Figment) -> Result<(), ConfigurationError> {
        self.database.validate(figment)?;
        self.cleanup.validate(figment)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use figment::{
        Figment, Jail,
        providers::{Env, Format, Yaml},
    };

    use super::*;

    #[test]
    fn load_root_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    database:
                      uri: postgresql://localhost/opstore
                    cleanup:
                      enabled: true
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config: RootConfig = figment.extract()?;
            assert!(config.validate(&figment).is_ok());

            assert!(config.cleanup.enabled);
            assert_eq!(config.cleanup.interval, Duration::from_secs(3600));

            Ok(())
        });
    }

    #[test]
    fn missing_database_section_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", "cleanup: {}")?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            assert!(RootConfig::extract(&figment).is_err());

            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    database:
                      database: opstore
                    cleanup:
                      batch_size: 10
                ",
            )?;
            jail.set_env("OPSTORE_CLEANUP__BATCH_SIZE", "25");

            let figment = Figment::new()
                .merge(Yaml::file("config.yaml"))
                .merge(Env::prefixed("OPSTORE_").split("__"));
            let config: WorkerConfig = figment.extract()?;

            assert_eq!(config.cleanup.batch_size, 25);
            assert_eq!(config.database.database.as_deref(), Some("opstore"));

            Ok(())
        });
    }
}
