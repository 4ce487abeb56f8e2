// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use tokio::signal::unix::{Signal, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Listens for SIGTERM and SIGINT and stops the tracked tasks.
///
/// The first signal cancels the token handed out by [`Self::cancellation_token`]
/// and waits for the tracked tasks to finish. A second signal, or the grace
/// period running out, stops waiting.
pub struct ShutdownManager {
    cancellation_token: CancellationToken,
    task_tracker: TaskTracker,
    sigterm: Signal,
    sigint: Signal,
    grace_period: Duration,
}

impl ShutdownManager {
    /// Create a new shutdown manager, installing the signal handlers
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handler could not be installed
    pub fn new(grace_period: Duration) -> Result<Self, std::io::Error> {
        Ok(Self {
            cancellation_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
            sigterm: tokio::signal::unix::signal(SignalKind::terminate())?,
            sigint: tokio::signal::unix::signal(SignalKind::interrupt())?,
            grace_period,
        })
    }

    #[must_use]
    pub fn task_tracker(&self) -> &TaskTracker {
        &self.task_tracker
    }

    /// Token cancelled on the first shutdown signal
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Run until every tracked task stopped, or until shutdown is forced
    pub async fn run(mut self) {
        self.task_tracker.close();

        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Shutdown signal received (SIGTERM), shutting down");
            },
            _ = self.sigint.recv() => {
                tracing::info!("Shutdown signal received (SIGINT), shutting down");
            },
            () = self.task_tracker.wait() => {
                tracing::info!("All tasks stopped on their own");
                return;
            },
        };

        self.cancellation_token.cancel();

        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::warn!("Second shutdown signal received (SIGTERM), abort");
            },
            _ = self.sigint.recv() => {
                tracing::warn!("Second shutdown signal received (SIGINT), abort");
            },
            () = tokio::time::sleep(self.grace_period) => {
                tracing::warn!("Shutdown grace period elapsed, abort");
            },
            () = self.task_tracker.wait() => {
                tracing::info!("All tasks are done, exiting");
            },
        }
    }
}
