// SPDX-License-Identifier: MIT OR Apache-2.0
//! External OS capabilities used by an instance besides spawning.
//!
//! Each capability is a trait so hosts (and tests) can substitute their own.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Platform commands that terminate an application without a process handle.
#[async_trait]
pub trait SystemCommands: Send + Sync + 'static {
    /// Force-kill every process whose image name is `image`.
    ///
    /// Resolves when the kill command has finished, with its exit code.
    async fn kill_image(&self, image: &str) -> io::Result<Option<i32>>;

    /// Ask the application called `name` to quit gracefully.
    async fn quit_application(&self, name: &str) -> io::Result<()>;
}

/// Program used by [`OsCommands::kill_image`].
pub const TASKKILL: &str = "taskkill";
/// Program used by [`OsCommands::quit_application`].
pub const OSASCRIPT: &str = "osascript";

/// [`SystemCommands`] backed by `taskkill` and `osascript`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsCommands;

#[async_trait]
impl SystemCommands for OsCommands {
    async fn kill_image(&self, image: &str) -> io::Result<Option<i32>> {
        debug!(target: "bi.instance.system", image, "{TASKKILL} /F /IM");
        let status = Command::new(TASKKILL)
            .args(["/F", "/IM", image])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        Ok(status.code())
    }

    async fn quit_application(&self, name: &str) -> io::Result<()> {
        debug!(target: "bi.instance.system", name, "{OSASCRIPT} quit");
        // The quit request is fire-and-forget; only a failure to launch
        // osascript is reported.
        Command::new(OSASCRIPT)
            .arg("-e")
            .arg(quit_script(name))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(drop)
    }
}

/// AppleScript asking `name` to quit.
pub fn quit_script(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("tell application \"{escaped}\" to quit")
}

/// Recursive directory removal.
#[async_trait]
pub trait DirRemover: Send + Sync + 'static {
    /// Remove `path` and everything below it.
    async fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// [`DirRemover`] backed by [`tokio::fs::remove_dir_all`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRemover;

#[async_trait]
impl DirRemover for FsRemover {
    async fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
