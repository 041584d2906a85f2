// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types for instance lifecycle management.

use crate::lifecycle::LifecycleState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Stable, machine-readable classification of an [`InstanceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The OS refused to create the process.
    SpawnFailure,
    /// `stop` was called with no trackable process.
    NotRunning,
    /// `start` was called more than once.
    DoubleStart,
    /// Removing the temporary directory failed. Never surfaced to callers.
    CleanupFailure,
    /// Delivering a termination signal to the owned process failed.
    KillFailure,
    /// Waiting on the owned process failed.
    WaitFailure,
    /// A platform termination command could not be run.
    TerminationCommandFailure,
    /// The named-application quit path has no application name to address.
    MissingProcessName,
}

impl ErrorKind {
    /// Stable string tag, identical to the serialised form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpawnFailure => "SPAWN_FAILURE",
            Self::NotRunning => "NOT_RUNNING",
            Self::DoubleStart => "DOUBLE_START",
            Self::CleanupFailure => "CLEANUP_FAILURE",
            Self::KillFailure => "KILL_FAILURE",
            Self::WaitFailure => "WAIT_FAILURE",
            Self::TerminationCommandFailure => "TERMINATION_COMMAND_FAILURE",
            Self::MissingProcessName => "MISSING_PROCESS_NAME",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from starting, observing and stopping an instance.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// Failed to spawn the process.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        /// Command that was launched.
        command: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// No process is trackable for the selected termination strategy.
    #[error("instance is not running")]
    NotRunning,

    /// The instance was already started.
    #[error("instance already started (state={state})")]
    DoubleStart {
        /// State the instance was in when `start` was called.
        state: LifecycleState,
    },

    /// Failed to remove the temporary directory.
    #[error("failed to remove temp dir {}: {source}", path.display())]
    Cleanup {
        /// Directory that was being removed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to deliver a termination signal.
    #[error("failed to signal process {pid}: {source}")]
    Kill {
        /// Target process id.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to wait on the process.
    #[error("failed to wait for process {pid}: {source}")]
    Wait {
        /// Target process id.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A platform termination command (`taskkill`, `osascript`) could not run.
    #[error("termination command '{command}' failed: {source}")]
    TerminationCommand {
        /// Program that was invoked.
        command: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// `command` is the open-by-name launcher but no `process_name` is set.
    #[error("named-application quit requires a process_name")]
    MissingProcessName,
}

impl InstanceError {
    /// The stable kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Spawn { .. } => ErrorKind::SpawnFailure,
            Self::NotRunning => ErrorKind::NotRunning,
            Self::DoubleStart { .. } => ErrorKind::DoubleStart,
            Self::Cleanup { .. } => ErrorKind::CleanupFailure,
            Self::Kill { .. } => ErrorKind::KillFailure,
            Self::Wait { .. } => ErrorKind::WaitFailure,
            Self::TerminationCommand { .. } => ErrorKind::TerminationCommandFailure,
            Self::MissingProcessName => ErrorKind::MissingProcessName,
        }
    }
}
