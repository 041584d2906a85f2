// SPDX-License-Identifier: MIT OR Apache-2.0
//! Launch configuration for browser instances.
//!
//! [`LaunchConfig`] is the fully-resolved description of how to start an
//! instance and, where the platform needs it, how to terminate it. The
//! [`LauncherConfig`] file format wraps it with host settings; helpers here
//! load it from TOML, apply environment overrides, merge overlays and produce
//! advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod platform;

pub use platform::Platform;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found or could not be read.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent launching but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A field is set but has no effect with the rest of the configuration.
    IgnoredField {
        /// Name of the ignored field.
        field: String,
        /// Why it is ignored.
        reason: String,
    },
    /// The application uses a transient launcher and nothing is configured
    /// to terminate the real application window.
    UnstoppableLauncher {
        /// Application name.
        name: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::IgnoredField { field, reason } => {
                write!(f, "field '{field}' is ignored: {reason}")
            }
            ConfigWarning::UnstoppableLauncher { name } => {
                write!(
                    f,
                    "'{name}' starts through a transient launcher; without 'image' it cannot be stopped"
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Generic "open application by name" launcher command.
pub const OPEN_LAUNCHER_COMMAND: &str = "open";

/// Applications that hand off to a separate window process on Windows and
/// exit immediately.
pub const TRANSIENT_LAUNCHER_APPS: &[&str] = &["opera"];

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Immutable description of how to start (and, if needed, specially
/// terminate) a single instance.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Application identifier (e.g. `"firefox"`, `"opera"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Executable or program identifier to launch.
    pub command: String,

    /// Ordered command-line arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the spawned process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Inherit the parent environment underneath `env`. When `false` (the
    /// default) `env` is the child's entire environment.
    #[serde(default)]
    pub inherit_env: bool,

    /// Start the process detached from the controlling session.
    #[serde(default)]
    pub detached: bool,

    /// Process image name used for force-kill on Windows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Application name used to request a quit through OS scripting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,

    /// Temporary directory removed once the instance stops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// Environment variables set on the spawned process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl LaunchConfig {
    /// Create a config for `command` with no arguments and an empty environment.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            name: None,
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            inherit_env: false,
            detached: false,
            image: None,
            process_name: None,
            temp_dir: None,
        }
    }

    /// Returns `true` when `command` is the generic open-by-name launcher.
    pub fn uses_open_launcher(&self) -> bool {
        self.command == OPEN_LAUNCHER_COMMAND
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// On-disk configuration consumed by the `bi` binary.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct LauncherConfig {
    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// The instance to launch.
    pub instance: LaunchConfig,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".into()),
            instance: LaunchConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`LauncherConfig`] from a TOML file and apply environment overrides.
pub fn load_config(path: &Path) -> Result<LauncherConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.display().to_string(),
    })?;
    let mut config = parse_toml(&content)?;
    apply_env_overrides(&mut config);
    debug!(target: "bi.config", path = %path.display(), "loaded launcher config");
    Ok(config)
}

/// Parse a TOML string into a [`LauncherConfig`].
pub fn parse_toml(content: &str) -> Result<LauncherConfig, ConfigError> {
    toml::from_str::<LauncherConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply overrides from the process environment.
///
/// Recognised variables:
/// - `BI_LOG_LEVEL`
/// - `BI_TEMP_DIR`
pub fn apply_env_overrides(config: &mut LauncherConfig) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Apply overrides using an arbitrary variable lookup.
pub fn apply_overrides_from<F>(config: &mut LauncherConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("BI_LOG_LEVEL") {
        config.log_level = Some(val);
    }
    if let Some(val) = lookup("BI_TEMP_DIR") {
        config.instance.temp_dir = Some(PathBuf::from(val));
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a launcher config for the current host platform.
pub fn validate_config(config: &LauncherConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    validate_config_for(config, Platform::current())
}

/// Validate a launcher config as it would run on `platform`.
pub fn validate_config_for(
    config: &LauncherConfig,
    platform: Platform,
) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors = Vec::new();
    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!("invalid log_level '{level}'"));
    }

    match validate_launch(&config.instance, platform) {
        Ok(warnings) if errors.is_empty() => Ok(warnings),
        Ok(_) => Err(ConfigError::ValidationError { reasons: errors }),
        Err(ConfigError::ValidationError { reasons }) => {
            errors.extend(reasons);
            Err(ConfigError::ValidationError { reasons: errors })
        }
        Err(other) => Err(other),
    }
}

/// Validate a single [`LaunchConfig`] as it would run on `platform`.
///
/// Hard errors come back as [`ConfigError::ValidationError`]; soft issues as
/// warnings.
pub fn validate_launch(
    config: &LaunchConfig,
    platform: Platform,
) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.command.trim().is_empty() {
        errors.push("command must not be empty".into());
    }

    for key in config.env.keys() {
        if key.is_empty() {
            errors.push("env variable name must not be empty".into());
        } else if key.contains('=') {
            errors.push(format!("env variable name '{key}' must not contain '='"));
        }
    }

    if config.uses_open_launcher() {
        match config.process_name.as_deref() {
            Some(name) if !name.trim().is_empty() => {}
            _ => errors.push(format!(
                "process_name is required when command is '{OPEN_LAUNCHER_COMMAND}'"
            )),
        }
    } else if config.process_name.is_some() {
        warnings.push(ConfigWarning::IgnoredField {
            field: "process_name".into(),
            reason: format!("only used when command is '{OPEN_LAUNCHER_COMMAND}'"),
        });
    }

    if config.image.is_some() && !platform.is_windows() {
        warnings.push(ConfigWarning::IgnoredField {
            field: "image".into(),
            reason: format!("image kill is only used on windows, not {platform}"),
        });
    }

    if platform.is_windows()
        && config.image.is_none()
        && let Some(name) = config.name.as_deref()
        && TRANSIENT_LAUNCHER_APPS.contains(&name)
    {
        warnings.push(ConfigWarning::UnstoppableLauncher { name: name.into() });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations.  Values in `overlay` take precedence over `base`.
///
/// A non-empty overlay `command` or `args` replaces the base value, optional
/// fields fall back to the base, env maps are combined (overlay wins on
/// collisions), and `detached` and `inherit_env` are set if either side sets them.
pub fn merge_configs(base: LauncherConfig, overlay: LauncherConfig) -> LauncherConfig {
    let b = base.instance;
    let o = overlay.instance;

    let mut env = b.env;
    env.extend(o.env);

    LauncherConfig {
        log_level: overlay.log_level.or(base.log_level),
        instance: LaunchConfig {
            name: o.name.or(b.name),
            command: if o.command.is_empty() { b.command } else { o.command },
            args: if o.args.is_empty() { b.args } else { o.args },
            cwd: o.cwd.or(b.cwd),
            env,
            inherit_env: o.inherit_env || b.inherit_env,
            detached: o.detached || b.detached,
            image: o.image.or(b.image),
            process_name: o.process_name.or(b.process_name),
            temp_dir: o.temp_dir.or(b.temp_dir),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn firefox() -> LaunchConfig {
        let mut cfg = LaunchConfig::new("firefox");
        cfg.name = Some("firefox".into());
        cfg.args = vec!["-no-remote".into(), "http://localhost:9876".into()];
        cfg
    }

    // -- Defaults -----------------------------------------------------------

    #[test]
    fn new_config_has_own_env_and_is_attached() {
        let cfg = LaunchConfig::new("chrome");
        assert_eq!(cfg.command, "chrome");
        assert!(!cfg.inherit_env);
        assert!(!cfg.detached);
        assert!(cfg.env.is_empty());
        assert!(cfg.temp_dir.is_none());
    }

    #[test]
    fn default_launcher_config_is_invalid_without_command() {
        let err = validate_config(&LauncherConfig::default()).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("command must not be empty")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    // -- Parsing ------------------------------------------------------------

    #[test]
    fn parse_full_instance_table() {
        let toml = r#"
            log_level = "debug"

            [instance]
            name = "firefox"
            command = "firefox"
            args = ["-profile", "/tmp/p"]
            cwd = "/tmp"
            detached = true
            temp_dir = "/tmp/p"

            [instance.env]
            MOZ_NO_REMOTE = "1"
        "#;
        let cfg = parse_toml(toml).unwrap();
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.instance.command, "firefox");
        assert_eq!(cfg.instance.args, ["-profile", "/tmp/p"]);
        assert_eq!(cfg.instance.cwd.as_deref(), Some(Path::new("/tmp")));
        assert!(cfg.instance.detached);
        assert!(!cfg.instance.inherit_env);
        assert_eq!(cfg.instance.env["MOZ_NO_REMOTE"], "1");
    }

    #[test]
    fn parse_missing_instance_gives_parse_error() {
        let err = parse_toml(r#"log_level = "info""#).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let err = parse_toml("this is [not valid toml =").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn toml_roundtrip() {
        let mut instance = firefox();
        instance.env.insert("DISPLAY".into(), ":0".into());
        instance.temp_dir = Some("/tmp/ff".into());
        let cfg = LauncherConfig {
            log_level: Some("warn".into()),
            instance,
        };
        let serialized = toml::to_string(&cfg).unwrap();
        let back: LauncherConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launcher.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[instance]\ncommand = \"chromium\"").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.instance.command, "chromium");
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Path::new("/nonexistent/launcher.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    // -- Env overrides ------------------------------------------------------

    #[test]
    fn overrides_apply_log_level_and_temp_dir() {
        let mut cfg = LauncherConfig {
            log_level: None,
            instance: firefox(),
        };
        apply_overrides_from(&mut cfg, |key| match key {
            "BI_LOG_LEVEL" => Some("trace".into()),
            "BI_TEMP_DIR" => Some("/var/tmp/bi".into()),
            _ => None,
        });
        assert_eq!(cfg.log_level.as_deref(), Some("trace"));
        assert_eq!(
            cfg.instance.temp_dir.as_deref(),
            Some(Path::new("/var/tmp/bi"))
        );
    }

    #[test]
    fn overrides_leave_unset_values_alone() {
        let mut cfg = LauncherConfig {
            log_level: Some("info".into()),
            instance: firefox(),
        };
        apply_overrides_from(&mut cfg, |_| None);
        assert_eq!(cfg.log_level.as_deref(), Some("info"));
        assert!(cfg.instance.temp_dir.is_none());
    }

    // -- Validation ---------------------------------------------------------

    #[test]
    fn plain_config_has_no_warnings() {
        let warnings = validate_launch(&firefox(), Platform::Linux).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn open_without_process_name_is_an_error() {
        let cfg = LaunchConfig::new("open");
        let err = validate_launch(&cfg, Platform::MacOs).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn open_with_process_name_is_valid() {
        let mut cfg = LaunchConfig::new("open");
        cfg.args = vec!["-a".into(), "Safari".into()];
        cfg.process_name = Some("Safari".into());
        assert!(validate_launch(&cfg, Platform::MacOs).unwrap().is_empty());
    }

    #[test]
    fn image_on_linux_is_ignored() {
        let mut cfg = firefox();
        cfg.image = Some("firefox.exe".into());
        let warnings = validate_launch(&cfg, Platform::Linux).unwrap();
        assert!(warnings.iter().any(
            |w| matches!(w, ConfigWarning::IgnoredField { field, .. } if field == "image")
        ));
        assert!(validate_launch(&cfg, Platform::Windows).unwrap().is_empty());
    }

    #[test]
    fn opera_on_windows_without_image_warns() {
        let mut cfg = LaunchConfig::new("launcher.exe");
        cfg.name = Some("opera".into());
        let warnings = validate_launch(&cfg, Platform::Windows).unwrap();
        assert_eq!(
            warnings,
            vec![ConfigWarning::UnstoppableLauncher {
                name: "opera".into()
            }]
        );
        cfg.image = Some("opera.exe".into());
        assert!(validate_launch(&cfg, Platform::Windows).unwrap().is_empty());
    }

    #[test]
    fn env_key_with_equals_is_an_error() {
        let mut cfg = firefox();
        cfg.env.insert("A=B".into(), "1".into());
        let err = validate_launch(&cfg, Platform::Linux).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("A=B")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn invalid_log_level_is_reported_with_instance_errors() {
        let cfg = LauncherConfig {
            log_level: Some("verbose".into()),
            instance: LaunchConfig::new(" "),
        };
        match validate_config(&cfg).unwrap_err() {
            ConfigError::ValidationError { reasons } => assert_eq!(reasons.len(), 2),
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    // -- Merging ------------------------------------------------------------

    #[test]
    fn merge_overlay_overrides_base() {
        let base = LauncherConfig {
            log_level: Some("info".into()),
            instance: firefox(),
        };
        let mut overlay_instance = LaunchConfig::new("firefox-nightly");
        overlay_instance.temp_dir = Some("/tmp/nightly".into());
        let overlay = LauncherConfig {
            log_level: None,
            instance: overlay_instance,
        };
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.log_level.as_deref(), Some("info"));
        assert_eq!(merged.instance.command, "firefox-nightly");
        assert_eq!(merged.instance.args, firefox().args);
        assert_eq!(merged.instance.name.as_deref(), Some("firefox"));
        assert!(merged.instance.temp_dir.is_some());
    }

    #[test]
    fn merge_combines_env_maps() {
        let mut base = LauncherConfig::default();
        base.instance.env.insert("A".into(), "1".into());
        base.instance.env.insert("B".into(), "1".into());
        let mut overlay = LauncherConfig::default();
        overlay.instance.env.insert("B".into(), "2".into());
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.instance.env["A"], "1");
        assert_eq!(merged.instance.env["B"], "2");
    }

    // -- Display ------------------------------------------------------------

    #[test]
    fn warning_display_mentions_subject() {
        let w = ConfigWarning::IgnoredField {
            field: "image".into(),
            reason: "not windows".into(),
        };
        assert!(w.to_string().contains("image"));
        let w = ConfigWarning::UnstoppableLauncher {
            name: "opera".into(),
        };
        assert!(w.to_string().contains("opera"));
    }
}
