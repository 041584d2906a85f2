// SPDX-License-Identifier: MIT OR Apache-2.0
//! Platform-specific validation, overrides and merge behaviour.

use bi_config::{
    ConfigError, ConfigWarning, LaunchConfig, LauncherConfig, Platform, apply_overrides_from,
    load_config, merge_configs, parse_toml, validate_launch,
};
use std::collections::HashMap;
use std::path::PathBuf;

fn reasons(err: ConfigError) -> Vec<String> {
    match err {
        ConfigError::ValidationError { reasons } => reasons,
        other => panic!("expected ValidationError, got {other:?}"),
    }
}

fn safari_via_open() -> LaunchConfig {
    let mut cfg = LaunchConfig::new("open");
    cfg.name = Some("safari".into());
    cfg.args = vec!["-a".into(), "Safari".into()];
    cfg.process_name = Some("Safari".into());
    cfg
}

// ── Open launcher ───────────────────────────────────────────────────

#[test]
fn open_launcher_with_process_name_is_clean() {
    let warnings = validate_launch(&safari_via_open(), Platform::MacOs).unwrap();
    assert!(warnings.is_empty());
}

#[test]
fn open_launcher_requires_process_name() {
    let mut cfg = safari_via_open();
    cfg.process_name = None;
    let r = reasons(validate_launch(&cfg, Platform::MacOs).unwrap_err());
    assert_eq!(r, vec!["process_name is required when command is 'open'"]);
}

#[test]
fn blank_process_name_counts_as_missing() {
    let mut cfg = safari_via_open();
    cfg.process_name = Some("   ".into());
    assert!(validate_launch(&cfg, Platform::MacOs).is_err());
}

#[test]
fn process_name_without_open_is_ignored() {
    let mut cfg = LaunchConfig::new("firefox");
    cfg.process_name = Some("Firefox".into());
    let warnings = validate_launch(&cfg, Platform::Linux).unwrap();
    assert!(matches!(
        warnings.as_slice(),
        [ConfigWarning::IgnoredField { field, .. }] if field == "process_name"
    ));
}

// ── Windows image kill and transient launchers ──────────────────────

#[test]
fn image_is_ignored_off_windows() {
    let mut cfg = LaunchConfig::new("chrome");
    cfg.image = Some("chrome.exe".into());

    assert!(validate_launch(&cfg, Platform::Windows).unwrap().is_empty());
    let warnings = validate_launch(&cfg, Platform::Linux).unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].to_string().contains("linux"));
}

#[test]
fn opera_without_image_warns_on_windows() {
    let mut cfg = LaunchConfig::new("C:\\Program Files\\Opera\\launcher.exe");
    cfg.name = Some("opera".into());

    let warnings = validate_launch(&cfg, Platform::Windows).unwrap();
    assert_eq!(
        warnings,
        vec![ConfigWarning::UnstoppableLauncher {
            name: "opera".into()
        }]
    );
    assert!(validate_launch(&cfg, Platform::Linux).unwrap().is_empty());

    cfg.image = Some("opera.exe".into());
    assert!(validate_launch(&cfg, Platform::Windows).unwrap().is_empty());
}

// ── Errors accumulate ───────────────────────────────────────────────

#[test]
fn all_problems_reported_together() {
    let mut cfg = LaunchConfig::new(" ");
    cfg.env.insert(String::new(), "x".into());
    cfg.env.insert("A=B".into(), "y".into());

    let r = reasons(validate_launch(&cfg, Platform::Linux).unwrap_err());
    assert_eq!(r.len(), 3, "{r:?}");
    assert!(r.iter().any(|m| m.contains("must not contain '='")));
}

// ── Overrides ───────────────────────────────────────────────────────

#[test]
fn overrides_come_from_lookup() {
    let vars: HashMap<&str, &str> =
        HashMap::from([("BI_LOG_LEVEL", "trace"), ("BI_TEMP_DIR", "/var/tmp/bi")]);
    let mut config = LauncherConfig::default();
    apply_overrides_from(&mut config, |k| vars.get(k).map(|v| v.to_string()));

    assert_eq!(config.log_level.as_deref(), Some("trace"));
    assert_eq!(config.instance.temp_dir, Some(PathBuf::from("/var/tmp/bi")));
}

#[test]
fn absent_overrides_leave_config_untouched() {
    let mut config = LauncherConfig::default();
    let before = config.clone();
    apply_overrides_from(&mut config, |_| None);
    assert_eq!(config, before);
}

// ── Loading ─────────────────────────────────────────────────────────

#[test]
fn load_reports_parse_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bi.toml");
    std::fs::write(&path, "[instance]\nargs = 3\n").unwrap();

    match load_config(&path).unwrap_err() {
        ConfigError::ParseError { reason } => assert!(!reason.is_empty()),
        other => panic!("expected ParseError, got {other:?}"),
    }
}

#[test]
fn missing_instance_table_is_a_parse_error() {
    assert!(matches!(
        parse_toml("log_level = \"info\"\n"),
        Err(ConfigError::ParseError { .. })
    ));
}

// ── Merge ───────────────────────────────────────────────────────────

#[test]
fn merge_overlays_platform_fields() {
    let base = LauncherConfig {
        log_level: Some("info".into()),
        instance: safari_via_open(),
    };
    let mut overlay_instance = LaunchConfig::default();
    overlay_instance.image = Some("safari.exe".into());
    overlay_instance.temp_dir = Some(PathBuf::from("/tmp/safari"));
    overlay_instance.env.insert("LANG".into(), "C".into());
    let overlay = LauncherConfig {
        log_level: None,
        instance: overlay_instance,
    };

    let merged = merge_configs(base, overlay);
    assert_eq!(merged.log_level.as_deref(), Some("info"));
    assert_eq!(merged.instance.command, "open");
    assert_eq!(merged.instance.args, vec!["-a", "Safari"]);
    assert_eq!(merged.instance.process_name.as_deref(), Some("Safari"));
    assert_eq!(merged.instance.image.as_deref(), Some("safari.exe"));
    assert_eq!(merged.instance.env["LANG"], "C");
}

#[test]
fn merge_keeps_env_inheritance_opt_in() {
    let mut base = LauncherConfig::default();
    base.instance.inherit_env = true;
    let merged = merge_configs(base, LauncherConfig::default());
    assert!(merged.instance.inherit_env);

    let merged = merge_configs(LauncherConfig::default(), LauncherConfig::default());
    assert!(!merged.instance.inherit_env);
}

// ── Environment ─────────────────────────────────────────────────────

#[test]
fn env_replaces_parent_environment_unless_opted_in() {
    let cfg = parse_toml("[instance]\ncommand = \"chromium\"\n").unwrap();
    assert!(!cfg.instance.inherit_env);

    let cfg =
        parse_toml("[instance]\ncommand = \"chromium\"\ninherit_env = true\n").unwrap();
    assert!(cfg.instance.inherit_env);
}
