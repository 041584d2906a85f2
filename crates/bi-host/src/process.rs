// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process status tracking for an instance.

use crate::lifecycle::LifecycleState;
use crate::strategy::TerminationStrategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What is known about the OS process behind an instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessStatus {
    /// `start` has not been called.
    NotStarted,
    /// The process is running and owned by the instance.
    Running {
        /// OS process identifier.
        pid: u32,
    },
    /// A transient launcher was started; its handle is not retained.
    HandedOff {
        /// Process identifier of the launcher.
        pid: u32,
    },
    /// The process exited on its own.
    Exited {
        /// Exit code, or `None` when terminated by a signal.
        code: Option<i32>,
    },
    /// The instance was stopped through a termination strategy.
    Terminated {
        /// Strategy that ended the instance.
        strategy: TerminationStrategy,
    },
    /// The OS refused to create the process.
    SpawnFailed,
}

impl ProcessStatus {
    /// Process id while the process is (believed to be) alive.
    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::Running { pid } | Self::HandedOff { pid } => Some(*pid),
            _ => None,
        }
    }

    /// Returns `true` once the process is known to be gone.
    pub fn is_terminated(&self) -> bool {
        matches!(
            self,
            Self::Exited { .. } | Self::Terminated { .. } | Self::SpawnFailed
        )
    }
}

/// Point-in-time snapshot of an instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Unique id assigned at construction.
    pub id: Uuid,
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Process status.
    pub status: ProcessStatus,
    /// Process id recorded at spawn time.
    pub pid: Option<u32>,
    /// Strategy applied by the first accepted `stop`, if any.
    pub stop_strategy: Option<TerminationStrategy>,
    /// When `start` spawned the process.
    pub started_at: Option<DateTime<Utc>>,
    /// When the `stop` event fired.
    pub ended_at: Option<DateTime<Utc>>,
}

impl InstanceInfo {
    /// Wall-clock time between start and stop, when both are known.
    pub fn run_time(&self) -> Option<chrono::Duration> {
        Some(self.ended_at? - self.started_at?)
    }
}
