use ghostlink_settings::{Config, ConfigError, SettingsError};
use tempfile::tempdir;

#[test]
fn test_toml_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::new();
    config.connection.host = "192.168.1.40".to_string();
    config.connection.auto_reconnect = false;
    config.protocol.readiness_timeout_ms = 5000;
    config.save_to_file(&path).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_json_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");

    let mut config = Config::new();
    config.diagnostics.log_capacity = 50;
    config.save_to_file(&path).unwrap();

    assert_eq!(Config::load_from_file(&path).unwrap(), config);
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[connection]\nport = 1337\n").unwrap();

    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.connection.port, 1337);
    assert_eq!(config.connection.host, "localhost");
    assert_eq!(config.protocol.heartbeat_interval_ms, 60000);
}

#[test]
fn test_missing_file_loads_defaults() {
    let dir = tempdir().unwrap();
    let config = Config::load_or_default(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_invalid_values_are_rejected_on_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"protocol": {"heartbeat_interval_ms": 0}}"#).unwrap();

    let err = Config::load_from_file(&path).unwrap_err();
    assert!(matches!(
        err,
        SettingsError::Config(ConfigError::ValueOutOfRange { ref key, .. })
            if key == "protocol.heartbeat_interval_ms"
    ));
}

#[test]
fn test_unsupported_extension() {
    let dir = tempdir().unwrap();
    let err = Config::new()
        .save_to_file(&dir.path().join("config.yaml"))
        .unwrap_err();
    assert!(matches!(
        err,
        SettingsError::Config(ConfigError::UnsupportedFormat(ref ext)) if ext == "yaml"
    ));
}
