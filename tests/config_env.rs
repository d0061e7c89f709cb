// tests/config_env.rs
//
// EngineConfig::load: file discovery and env overrides. Mutates process env,
// so every test is serialized.

use std::{env, fs, path::PathBuf};

use serial_test::serial;
use surveillance_ingest::config::EngineConfig;

const VARS: &[&str] = &[
    "ENGINE_CONFIG_PATH",
    "DATABASE_URL",
    "BIND_ADDR",
    "EXPORT_DIR",
    "INGEST_MAX_ATTEMPTS",
    "NOMINATIM_TIMEOUT_MS",
];

fn clear_env() {
    for v in VARS {
        env::remove_var(v);
    }
}

#[test]
#[serial]
fn explicit_path_then_env_overrides() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    fs::write(
        &path,
        r#"
bind_addr = "127.0.0.1:9000"
export_dir = "/srv/exports"

[worker]
max_attempts = 7
"#,
    )
    .unwrap();

    env::set_var("ENGINE_CONFIG_PATH", &path);
    env::set_var("BIND_ADDR", "127.0.0.1:9100");
    env::set_var("NOMINATIM_TIMEOUT_MS", "not-a-number");

    let cfg = EngineConfig::load().unwrap();
    assert_eq!(cfg.bind_addr, "127.0.0.1:9100");
    assert_eq!(cfg.export_dir, PathBuf::from("/srv/exports"));
    assert_eq!(cfg.worker.max_attempts, 7);
    assert_eq!(cfg.geocoding.timeout_ms, 10_000);
    clear_env();
}

#[test]
#[serial]
fn missing_explicit_file_is_an_error() {
    clear_env();
    env::set_var("ENGINE_CONFIG_PATH", "/definitely/not/here.toml");
    assert!(EngineConfig::load().is_err());
    clear_env();
}

#[test]
#[serial]
fn defaults_without_file_or_env() {
    clear_env();
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();

    let cfg = EngineConfig::load();

    env::set_current_dir(old).unwrap();
    let cfg = cfg.unwrap();
    assert!(cfg.database_url.is_none());
    assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
    assert!(cfg.run_on_startup);
    assert_eq!(cfg.worker.max_attempts, 3);
}
