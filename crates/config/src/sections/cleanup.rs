// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none};

use crate::{ConfigurationError, ConfigurationSection};

/// Longest accepted interval and lease duration: one year
const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn default_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_batch_size() -> usize {
    100
}

fn default_lease_duration() -> Duration {
    Duration::from_secs(10 * 60)
}

/// Configuration of the periodic removal of expired artifacts
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, JsonSchema, Clone, PartialEq, Eq)]
pub struct CleanupConfig {
    /// Whether this process runs the cleanup scheduler. Defaults to `false`.
    #[serde(default)]
    pub enabled: bool,

    /// Seconds to sleep between two cleanup passes. Defaults to one hour.
    #[schemars(with = "u64", range(min = 1, max = 31_536_000))]
    #[serde(default = "default_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub interval: Duration,

    /// Maximum number of artifacts removed in one batch. Defaults to 100.
    #[schemars(range(min = 1))]
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds a worker holds a task once it acquired it. Defaults to 10
    /// minutes.
    ///
    /// Should be longer than a full pass, otherwise another worker may start
    /// the same task while the first one is still draining it.
    #[schemars(with = "u64", range(min = 1, max = 31_536_000))]
    #[serde(default = "default_lease_duration")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub lease_duration: Duration,

    /// Also remove grants which were consumed. Defaults to `false`.
    #[serde(default)]
    pub remove_consumed_grants: bool,

    /// Prefix of the identity this worker uses when holding leases. Defaults
    /// to the host name.
    #[serde(default)]
    pub worker_name: Option<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_interval(),
            batch_size: default_batch_size(),
            lease_duration: default_lease_duration(),
            remove_consumed_grants: false,
            worker_name: None,
        }
    }
}

impl CleanupConfig {
    pub(crate) fn is_default(&self) -> bool {
        self == &Self::default()
    }
}

impl ConfigurationSection for CleanupConfig {
    const PATH: Option<&'static str> = Some("cleanup");

    fn validate(&self, figment: &figment::Figment) -> Result<(), ConfigurationError> {
        let annotate = |mut error: figment::Error, field: &str| -> ConfigurationError {
            error.metadata = figment.find_metadata(&format!("cleanup.{field}")).cloned();
            error.profile = Some(figment::Profile::Default);
            error.path = vec!["cleanup".to_owned(), field.to_owned()];
            Box::new(error)
        };

        if self.batch_size == 0 {
            return Err(annotate(
                figment::Error::from("must be at least 1".to_owned()),
                "batch_size",
            ));
        }

        if self.interval.is_zero() {
            return Err(annotate(
                figment::Error::from("must not be zero".to_owned()),
                "interval",
            ));
        }

        if self.lease_duration.is_zero() {
            return Err(annotate(
                figment::Error::from("must not be zero".to_owned()),
                "lease_duration",
            ));
        }

        for (field, value) in [
            ("interval", self.interval),
            ("lease_duration", self.lease_duration),
        ] {
            if value > MAX_DURATION {
                return Err(annotate(
                    figment::Error::from("must be at most one year".to_owned()),
                    field,
                ));
            }
        }

        if self.worker_name.as_deref().is_some_and(str::is_empty) {
            return Err(annotate(
                figment::Error::from("must not be empty".to_owned()),
                "worker_name",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use figment::{
        Figment, Jail,
        providers::{Format, Yaml},
    };

    use super::*;

    #[test]
    fn load_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    cleanup:
                      enabled: true
                      interval: 300
                      batch_size: 500
                      remove_consumed_grants: true
                      worker_name: node-a
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config: CleanupConfig = figment.extract_inner("cleanup")?;
            assert!(config.validate(&figment).is_ok());

            assert!(config.enabled);
            assert_eq!(config.interval, Duration::from_secs(300));
            assert_eq!(config.batch_size, 500);
            assert_eq!(config.lease_duration, Duration::from_secs(600));
            assert!(config.remove_consumed_grants);
            assert_eq!(config.worker_name.as_deref(), Some("node-a"));

            Ok(())
        });
    }

    #[test]
    fn empty_section_uses_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", "cleanup: {}")?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config: CleanupConfig = figment.extract_inner("cleanup")?;

            assert_eq!(config, CleanupConfig::default());
            assert!(!config.enabled);
            assert_eq!(config.batch_size, 100);

            Ok(())
        });
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    cleanup:
                      batch_size: 0
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let error = CleanupConfig::extract(&figment).unwrap_err();
            assert!(error.to_string().contains("must be at least 1"));

            Ok(())
        });
    }

    #[test]
    fn zero_lease_duration_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    cleanup:
                      lease_duration: 0
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            assert!(CleanupConfig::extract(&figment).is_err());

            Ok(())
        });
    }

    #[test]
    fn durations_are_capped() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    cleanup:
                      lease_duration: 10000000000000
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let error = CleanupConfig::extract(&figment).unwrap_err();
            assert!(error.to_string().contains("must be at most one year"));

            jail.create_file(
                "config.yaml",
                r"
                    cleanup:
                      interval: 31536001
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            assert!(CleanupConfig::extract(&figment).is_err());

            // The bound itself is accepted
            jail.create_file(
                "config.yaml",
                r"
                    cleanup:
                      interval: 31536000
                      lease_duration: 31536000
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = CleanupConfig::extract(&figment).unwrap();
            assert_eq!(config.lease_duration, MAX_DURATION);

            Ok(())
        });
    }
}
