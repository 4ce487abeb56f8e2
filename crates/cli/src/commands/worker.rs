// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{process::ExitCode, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use figment::Figment;
use opstore_config::{CleanupConfig, ConfigurationSection, WorkerConfig};
use opstore_data_model::{SystemClock, WorkerId};
use opstore_storage_pg::PgRepositoryFactory;
use opstore_tasks::{CleanupEngine, CleanupOptions, SchedulerSettings};
use rand::SeedableRng;
use tracing::{info, info_span};

use crate::{shutdown::ShutdownManager, util::database_pool_from_config};

/// How long an in-flight pass may take to finish once shutdown is requested
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser, Debug, Default)]
pub(super) struct Options {}

/// Prefix of the worker identity: the configured name, else the host name
fn worker_prefix(config: &CleanupConfig) -> String {
    config
        .worker_name
        .clone()
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
        .unwrap_or_else(|| "worker".to_owned())
}

fn cleanup_options(config: &CleanupConfig) -> anyhow::Result<CleanupOptions> {
    Ok(CleanupOptions {
        batch_size: config.batch_size,
        lease_duration: chrono::Duration::from_std(config.lease_duration)
            .context("invalid cleanup configuration: lease_duration is too large")?,
        remove_consumed_grants: config.remove_consumed_grants,
    })
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let span = info_span!("cli.worker.init").entered();
        let config = WorkerConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;

        if !config.cleanup.enabled {
            info!("Cleanup is disabled in the configuration, nothing to do");
            return Ok(ExitCode::SUCCESS);
        }

        let shutdown = ShutdownManager::new(SHUTDOWN_GRACE_PERIOD)?;

        info!("Connecting to the database");
        let pool = database_pool_from_config(&config.database).await?;

        let mut rng = rand_chacha::ChaChaRng::from_entropy();
        let worker_id = WorkerId::generate(&worker_prefix(&config.cleanup), &mut rng);

        let engine = CleanupEngine::new(
            PgRepositoryFactory::new(pool).boxed(),
            Arc::new(SystemClock::default()),
            worker_id.clone(),
            cleanup_options(&config.cleanup)?,
        );

        let settings = SchedulerSettings {
            enabled: config.cleanup.enabled,
            interval: config.cleanup.interval,
        };

        info!(worker.id = %worker_id, "Starting cleanup scheduler");
        opstore_tasks::init_and_run(
            settings,
            engine,
            shutdown.cancellation_token(),
            shutdown.task_tracker(),
        );

        span.exit();

        shutdown.run().await;

        Ok(ExitCode::SUCCESS)
    }
}
