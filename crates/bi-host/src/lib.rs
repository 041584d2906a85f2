// SPDX-License-Identifier: MIT OR Apache-2.0
//! bi-host
//!
//! Lifecycle management for externally launched browser processes.
//!
//! An [`Instance`] spawns one process from a [`LaunchConfig`], publishes
//! `error`/`stop` events, and terminates it on request using the strategy the
//! platform calls for ([`TerminationStrategy`]). When the instance stops, its
//! temporary directory (if any) is removed in the background.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod instance;
pub mod lifecycle;
pub mod process;
pub mod strategy;
pub mod system;

pub use bi_config::{LaunchConfig, Platform};
pub use error::{ErrorKind, InstanceError};
pub use events::{EventBus, EventStream, InstanceEvent};
pub use instance::{Instance, InstanceBuilder, StopCallback};
pub use lifecycle::{LifecycleError, LifecycleManager, LifecycleState, LifecycleTransition};
pub use process::{InstanceInfo, ProcessStatus};
pub use strategy::{TerminationStrategy, select_termination_strategy, uses_transient_launcher};
pub use system::{DirRemover, FsRemover, OSASCRIPT, OsCommands, SystemCommands, TASKKILL, quit_script};
