// SPDX-License-Identifier: MIT OR Apache-2.0
//! Instance lifecycle state machine: `created → running → stopped`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Lifecycle state of an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Constructed, `start` not yet called.
    Created,
    /// `start` has been called and the instance has not stopped.
    Running,
    /// Terminal. The `stop` event has fired.
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Record of a single state transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleTransition {
    /// State before the transition.
    pub from: LifecycleState,
    /// State after the transition.
    pub to: LifecycleState,
    /// RFC 3339 timestamp of the transition.
    pub timestamp: String,
    /// Optional human-readable reason.
    pub reason: Option<String>,
}

/// Rejected transition.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// The state machine does not allow `from → to`.
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },
    /// Already in the requested state.
    #[error("already in state {0}")]
    AlreadyInState(LifecycleState),
}

/// Tracks the current state and enforces the allowed transitions.
#[derive(Debug)]
pub struct LifecycleManager {
    state: LifecycleState,
    history: Vec<LifecycleTransition>,
    running_since: Option<Instant>,
}

impl LifecycleManager {
    /// Create a manager in [`LifecycleState::Created`].
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Created,
            history: Vec::new(),
            running_since: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Move to `to`, recording the transition.
    pub fn transition(
        &mut self,
        to: LifecycleState,
        reason: Option<String>,
    ) -> Result<(), LifecycleError> {
        if self.state == to {
            return Err(LifecycleError::AlreadyInState(to));
        }
        if !self.can_transition(to) {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                to,
            });
        }

        let from = self.state;
        self.state = to;
        match to {
            LifecycleState::Running => self.running_since = Some(Instant::now()),
            LifecycleState::Stopped => self.running_since = None,
            LifecycleState::Created => {}
        }

        self.history.push(LifecycleTransition {
            from,
            to,
            timestamp: chrono::Utc::now().to_rfc3339(),
            reason,
        });
        Ok(())
    }

    /// Returns `true` if `to` is reachable from the current state.
    pub fn can_transition(&self, to: LifecycleState) -> bool {
        matches!(
            (self.state, to),
            (LifecycleState::Created, LifecycleState::Running)
                | (LifecycleState::Running, LifecycleState::Stopped)
        )
    }

    /// Every transition so far, oldest first.
    pub fn history(&self) -> &[LifecycleTransition] {
        &self.history
    }

    /// Time spent in [`LifecycleState::Running`], if currently running.
    pub fn uptime(&self) -> Option<Duration> {
        self.running_since.map(|t| t.elapsed())
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
