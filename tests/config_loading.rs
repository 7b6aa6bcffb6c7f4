use std::env;
use std::io::Write;
use std::time::Duration;

use chatgate::{load_config, ConfigError};
use serial_test::serial;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[tokio::test]
#[serial]
async fn explicit_file_is_loaded() {
    let file = write_config(
        r#"
log_level: warn
throttle:
  burst: 3
  window: 2m
  drain_interval: 1m
audit_buffer: 8
"#,
    );
    let loaded = load_config(Some(file.path())).await.unwrap();
    assert_eq!(loaded.path.as_deref(), Some(file.path()));
    let config = loaded.config;
    assert_eq!(config.log_level, "warn");
    assert_eq!(config.audit_buffer, 8);

    let throttle = config.throttle_config();
    assert_eq!(throttle.burst, 3);
    assert_eq!(throttle.window, Duration::from_secs(120));
    assert_eq!(throttle.drain_interval, Duration::from_secs(60));
}

#[tokio::test]
#[serial]
async fn environment_overrides_the_file() {
    let file = write_config("throttle:\n  burst: 3\n");
    env::set_var("CHATGATE__THROTTLE__BURST", "5");
    env::set_var("CHATGATE__THROTTLE__DRAIN_INTERVAL", "30s");
    let loaded = load_config(Some(file.path())).await;
    env::remove_var("CHATGATE__THROTTLE__BURST");
    env::remove_var("CHATGATE__THROTTLE__DRAIN_INTERVAL");

    let config = loaded.unwrap().config;
    assert_eq!(config.throttle.burst, 5);
    assert_eq!(config.throttle.drain_interval, Duration::from_secs(30));
    assert_eq!(config.throttle.window, Duration::from_secs(600));
}

#[tokio::test]
#[serial]
async fn missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");
    let err = load_config(Some(&path)).await.err().expect("load should fail");
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[tokio::test]
#[serial]
async fn invalid_values_are_rejected() {
    let file = write_config("throttle:\n  burst: 0\n");
    assert!(matches!(
        load_config(Some(file.path())).await,
        Err(ConfigError::Invalid(_))
    ));

    let file = write_config("throttle: [1, 2]\n");
    assert!(matches!(
        load_config(Some(file.path())).await,
        Err(ConfigError::Parse(_))
    ));
}
