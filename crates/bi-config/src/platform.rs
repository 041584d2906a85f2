// SPDX-License-Identifier: MIT OR Apache-2.0
//! Host platform identification.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating system family an instance is launched on.
///
/// Termination policy differs per family, so it is modelled as data rather
/// than scattered `cfg!` checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Microsoft Windows.
    Windows,
    /// Apple macOS.
    MacOs,
    /// Linux.
    Linux,
    /// Any other target (BSDs, etc.).
    Other,
}

impl Platform {
    /// The platform this binary was compiled for.
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Other
        }
    }

    /// Returns `true` for [`Platform::Windows`].
    pub fn is_windows(self) -> bool {
        self == Self::Windows
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Linux => "linux",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}
