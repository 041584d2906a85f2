// SPDX-License-Identifier: MIT OR Apache-2.0
//! Platform termination policy.
//!
//! All platform special-casing lives in the two functions in this module:
//! [`select_termination_strategy`] is consulted once at the top of
//! `Instance::stop`, and [`uses_transient_launcher`] once in `Instance::start`.

use bi_config::{LaunchConfig, Platform, TRANSIENT_LAUNCHER_APPS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a running instance is forced to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationStrategy {
    /// Force-kill every process with the configured image name, then emit
    /// `stop` once the kill command completes.
    ImageKill,
    /// Ask the named application to quit through OS scripting. This path
    /// never emits `stop` itself.
    NamedQuit,
    /// Signal the owned process; its exit observer emits `stop`.
    DirectKill,
}

impl fmt::Display for TerminationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ImageKill => "image_kill",
            Self::NamedQuit => "named_quit",
            Self::DirectKill => "direct_kill",
        };
        f.write_str(s)
    }
}

/// Pick the termination strategy for `config` on `platform`.
///
/// Precedence: image kill (Windows with an image name), then named quit
/// (`open` launcher), then direct kill. Depends only on `command`, `image`
/// and the platform.
pub fn select_termination_strategy(
    config: &LaunchConfig,
    platform: Platform,
) -> TerminationStrategy {
    if platform.is_windows() && config.image.is_some() {
        TerminationStrategy::ImageKill
    } else if config.uses_open_launcher() {
        TerminationStrategy::NamedQuit
    } else {
        TerminationStrategy::DirectKill
    }
}

/// Returns `true` when the spawned process is a launcher that exits right
/// after handing off to the real application window.
///
/// For these no exit observer is attached: its exit says nothing about the
/// application, so callers only learn about the end of the instance through
/// an explicit `stop`.
pub fn uses_transient_launcher(config: &LaunchConfig, platform: Platform) -> bool {
    platform.is_windows()
        && config
            .name
            .as_deref()
            .is_some_and(|name| TRANSIENT_LAUNCHER_APPS.contains(&name))
}
