use procwatch::core::config::{MonitorConfig, CONFIG_ENV_VAR};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_config_default_is_valid() {
    let config = MonitorConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.top_limit, 10);
    assert_eq!(config.vanish_confirmations, 2);
    assert_eq!(config.command_timeout_ms, 5000);
    assert!(config.alert_rules.is_empty());
}

// All env-dependent assertions live in one test so they cannot race
#[test]
fn test_config_load_honours_env_override() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("procwatch.json");

    std::env::set_var(CONFIG_ENV_VAR, &path);
    assert_eq!(MonitorConfig::get_config_path(), Some(path.clone()));

    // Missing file gives defaults
    assert_eq!(MonitorConfig::load().unwrap(), MonitorConfig::default());

    fs::write(&path, r#"{ "poll_interval_ms": 500, "top_limit": 3 }"#).unwrap();
    let loaded = MonitorConfig::load().unwrap();
    assert_eq!(loaded.poll_interval_ms, 500);
    assert_eq!(loaded.top_limit, 3);

    // Invalid content is ignored rather than fatal
    fs::write(&path, r#"{ "history_capacity": 0 }"#).unwrap();
    assert_eq!(MonitorConfig::load().unwrap(), MonitorConfig::default());

    fs::write(&path, "not json").unwrap();
    assert_eq!(MonitorConfig::load().unwrap(), MonitorConfig::default());

    std::env::remove_var(CONFIG_ENV_VAR);
}

#[test]
fn test_config_load_from_rejects_garbage() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    fs::write(&path, "{ broken").unwrap();

    assert!(MonitorConfig::load_from(&path).is_err());
}

#[test]
fn test_config_roundtrip_with_rules() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");

    let mut config = MonitorConfig {
        alert_rules: vec!["cpu > 80% for 30s".to_string(), "critical:rss > 1GB".to_string()],
        fallback_total_memory_bytes: Some(8 * 1024 * 1024 * 1024),
        ..Default::default()
    };
    config.managed_runtime.enabled = false;
    config.save_to(&path).unwrap();

    let loaded = MonitorConfig::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.fallback_total_memory(), 8 * 1024 * 1024 * 1024);
}
