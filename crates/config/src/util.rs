// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use figment::Figment;
use serde::de::DeserializeOwned;

/// Boxed error returned when a section fails to load or validate
pub type ConfigurationError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A part of the configuration which can be loaded on its own
pub trait ConfigurationSection: Sized + DeserializeOwned {
    /// Key under which this section lives, `None` for the root
    const PATH: Option<&'static str> = None;

    /// Check the values of the section once it has been deserialized
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    fn validate(&self, _figment: &Figment) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// Load and validate the section from a [`Figment`]
    ///
    /// # Errors
    ///
    /// Returns an error if the section is missing, malformed, or invalid
    fn extract(figment: &Figment) -> Result<Self, ConfigurationError> {
        let this: Self = match Self::PATH {
            Some(path) => figment.extract_inner(path)?,
            None => figment.extract()?,
        };

        this.validate(figment)?;
        Ok(this)
    }
}

/// Loads a section, falling back to its default when it is absent
pub trait ConfigurationSectionExt: ConfigurationSection + Default {
    /// Like [`ConfigurationSection::extract`], but a missing section yields
    /// [`Default::default`] instead of an error
    ///
    /// # Errors
    ///
    /// Returns an error if the section is present but malformed or invalid
    fn extract_or_default(figment: &Figment) -> Result<Self, ConfigurationError> {
        match Self::PATH {
            Some(path) if !figment.contains(path) => Ok(Self::default()),
            _ => Self::extract(figment),
        }
    }
}

impl<T: ConfigurationSection + Default> ConfigurationSectionExt for T {}
