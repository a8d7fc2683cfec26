// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use strata_core::output::OutputId;

/// Failures of the scheduling layer.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Planning, preparing or committing failed.
    #[error(transparent)]
    Core(#[from] strata_core::Error),
    /// A worker thread could not be started.
    #[error("failed to spawn worker thread {name}")]
    Spawn {
        /// Name of the thread.
        name: String,
        /// Cause.
        #[source]
        source: std::io::Error,
    },
    /// The output's scheduler has shut down.
    #[error("{0:?} no longer accepts compositions")]
    Closed(OutputId),
}
