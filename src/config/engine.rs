// src/config/engine.rs
//! Engine configuration: optional TOML file, then environment overrides.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const ENV_ENGINE_CONFIG_PATH: &str = "ENGINE_CONFIG_PATH";
pub const DEFAULT_ENGINE_CONFIG_PATH: &str = "config/engine.toml";

pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_NOMINATIM_USER_AGENT: &str =
    "SurveillanceTrackerBot/1.0 (+https://github.com/chand/aintivirus-survaillance-tracker)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Sent as the `From` header when present.
    pub email: Option<String>,
    pub timeout_ms: u64,
    /// Minimum spacing between requests, process-wide.
    pub rate_limit_ms: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_NOMINATIM_URL.to_string(),
            user_agent: DEFAULT_NOMINATIM_USER_AGENT.to_string(),
            email: None,
            timeout_ms: 10_000,
            rate_limit_ms: 1_100,
        }
    }
}

const STALL_GRACE_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub job_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    /// Linear backoff step; attempt `n` waits `n * backoff_secs`.
    pub backoff_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: 1_800,
            poll_interval_ms: 1_000,
            max_attempts: 3,
            backoff_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// How long a job may sit active before its worker is presumed dead:
    /// the collect timeout plus slack for persistence and export.
    pub fn stalled_after(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs.saturating_add(STALL_GRACE_SECS))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub export_dir: PathBuf,
    pub samples_dir: PathBuf,
    /// Absent means in-memory store and queue.
    pub database_url: Option<String>,
    pub bind_addr: String,
    /// Enqueue one job per connector at boot besides the recurring schedule.
    pub run_on_startup: bool,
    pub geocoding: GeocodingConfig,
    pub worker: WorkerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("exports"),
            samples_dir: PathBuf::from("samples"),
            database_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
            run_on_startup: true,
            geocoding: GeocodingConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

// parse an optional env value; garbage keeps the current value
fn parse_env<T: FromStr>(key: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring invalid numeric env value");
            None
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing engine config")
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Resolve the config file (`$ENGINE_CONFIG_PATH`, else
    /// `config/engine.toml` if present, else defaults) and apply env overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_ENGINE_CONFIG_PATH) {
            Ok(p) => Self::load_from_file(Path::new(&p))?,
            Err(_) => {
                let default = PathBuf::from(DEFAULT_ENGINE_CONFIG_PATH);
                if default.exists() {
                    Self::load_from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    /// Override fields from an env-like lookup.
    pub fn apply_env<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = non_empty(get("EXPORT_DIR")) {
            self.export_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty(get("SAMPLES_DIR")) {
            self.samples_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty(get("DATABASE_URL")) {
            self.database_url = Some(v);
        }
        if let Some(v) = non_empty(get("BIND_ADDR")) {
            self.bind_addr = v;
        }
        if let Some(raw) = non_empty(get("INGEST_RUN_ON_STARTUP")) {
            match parse_bool(&raw) {
                Some(b) => self.run_on_startup = b,
                None => tracing::warn!(value = %raw, "ignoring invalid INGEST_RUN_ON_STARTUP"),
            }
        }

        let g = &mut self.geocoding;
        if let Some(v) = non_empty(get("NOMINATIM_BASE_URL")) {
            g.base_url = v;
        }
        if let Some(v) = non_empty(get("NOMINATIM_USER_AGENT")) {
            g.user_agent = v;
        }
        if let Some(v) = non_empty(get("NOMINATIM_EMAIL")) {
            g.email = Some(v);
        }
        if let Some(v) = parse_env("NOMINATIM_TIMEOUT_MS", get("NOMINATIM_TIMEOUT_MS")) {
            g.timeout_ms = v;
        }
        if let Some(v) = parse_env("NOMINATIM_RATE_LIMIT_MS", get("NOMINATIM_RATE_LIMIT_MS")) {
            g.rate_limit_ms = v;
        }

        let w = &mut self.worker;
        if let Some(v) = parse_env("INGEST_JOB_TIMEOUT_SECS", get("INGEST_JOB_TIMEOUT_SECS")) {
            w.job_timeout_secs = v;
        }
        if let Some(v) = parse_env("INGEST_POLL_INTERVAL_MS", get("INGEST_POLL_INTERVAL_MS")) {
            w.poll_interval_ms = v;
        }
        if let Some(v) = parse_env::<u32>("INGEST_MAX_ATTEMPTS", get("INGEST_MAX_ATTEMPTS")) {
            w.max_attempts = v.max(1);
        }
        if let Some(v) = parse_env("INGEST_BACKOFF_SECS", get("INGEST_BACKOFF_SECS")) {
            w.backoff_secs = v;
        }
    }
}
