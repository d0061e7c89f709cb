// src/connectors/samples.rs
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

pub const ATLAS_SAMPLE: &str = "atlasofsurveillance.sample.json";
pub const OVERPASS_SAMPLE: &str = "overpass.sample.json";
pub const REDLIGHT_SAMPLE: &str = "redlightcameralist.sample.json";

/// Read one sample file from the configured samples directory.
pub fn try_load_samples<T: DeserializeOwned>(dir: &Path, file_name: &str) -> Result<Vec<T>> {
    let path = dir.join(file_name);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading sample {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing sample {}", path.display()))
}

/// Load a bundled offline sample. Failure degrades to an empty sample and is
/// logged; it never aborts startup.
pub fn load_samples<T: DeserializeOwned>(dir: &Path, file_name: &str) -> Vec<T> {
    match try_load_samples(dir, file_name) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(
                error = ?e,
                sample = file_name,
                dir = %dir.display(),
                "unable to load sample data; check SAMPLES_DIR"
            );
            Vec::new()
        }
    }
}
