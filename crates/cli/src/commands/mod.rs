// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};

mod config;
mod database;
mod worker;

#[derive(Parser, Debug)]
enum Subcommand {
    /// Configuration-related commands
    Config(self::config::Options),

    /// Manage the database
    Database(self::database::Options),

    /// Run the cleanup worker
    Worker(self::worker::Options),
}

#[derive(Parser, Debug)]
#[command(version)]
pub struct Options {
    /// Path to the configuration file
    ///
    /// Can be repeated, later files override earlier ones
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Append,
        default_value = "config.yaml"
    )]
    config: Vec<Utf8PathBuf>,

    #[command(subcommand)]
    subcommand: Option<Subcommand>,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        use Subcommand as S;
        match self.subcommand {
            Some(S::Config(c)) => c.run(figment).await,
            Some(S::Database(c)) => c.run(figment).await,
            Some(S::Worker(c)) => c.run(figment).await,
            None => self::worker::Options::default().run(figment).await,
        }
    }

    /// Get a [`Figment`] instance with the configuration loaded
    pub fn figment(&self) -> Figment {
        self.config
            .iter()
            .fold(Figment::new(), |f, path| f.merge(Yaml::file(path)))
            .merge(Env::prefixed("OPSTORE_").split("__"))
    }
}
