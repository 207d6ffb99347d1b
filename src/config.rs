use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, StorageError};
use crate::model::{Region, RegionBounds};
use crate::store;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 1_000;
pub const DEFAULT_CROP_FRACTION: f32 = 0.5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_USER_AGENT: &str = concat!("panoscout/", env!("CARGO_PKG_VERSION"));

const CATALOGUE_FILE: &str = "catalogue.json";
const LEDGER_FILE: &str = "ledger.json";
const IMAGES_DIR: &str = "images";
const SCRUB_HISTORY_FILE: &str = "scrub-history.jsonl";

/// On-disk layout under the data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    pub root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn catalogue(&self) -> PathBuf {
        self.root.join(CATALOGUE_FILE)
    }

    pub fn ledger(&self) -> PathBuf {
        self.root.join(LEDGER_FILE)
    }

    pub fn images(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    pub fn scrub_history(&self) -> PathBuf {
        self.root.join(SCRUB_HISTORY_FILE)
    }
}

/// Credentials and client knobs shared by every HTTP-backed service.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub api_key: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl HttpSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn blocking_client(&self) -> Result<reqwest::blocking::Client, ConfigError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .build()?;
        Ok(client)
    }
}

/// Resolve the API key: an explicit value wins, otherwise the trimmed contents of `key_file`.
pub fn resolve_api_key(explicit: Option<&str>, key_file: &Path) -> Result<String, ConfigError> {
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    if !key_file.exists() {
        return Err(ConfigError::MissingApiKey {
            path: key_file.to_path_buf(),
        });
    }
    let raw = fs::read_to_string(key_file).map_err(|e| StorageError::io(key_file, e))?;
    let key = raw.trim();
    if key.is_empty() {
        return Err(ConfigError::EmptyApiKey {
            path: key_file.to_path_buf(),
        });
    }
    Ok(key.to_string())
}

/// Load `{"name": {min_lat, max_lat, min_lng, max_lng, density}, ...}` and validate every box.
pub fn load_regions(path: &Path) -> Result<Vec<Region>, ConfigError> {
    if !path.exists() {
        return Err(StorageError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "region file not found"),
        )
        .into());
    }
    let file: BTreeMap<String, RegionBounds> = store::load_json_or_default(path)?;
    file.into_iter()
        .map(|(name, bounds)| {
            validate_bounds(&name, &bounds)?;
            Ok(Region::new(name, bounds))
        })
        .collect()
}

fn validate_bounds(name: &str, b: &RegionBounds) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidRegion {
        name: name.to_string(),
        reason,
    };
    let values = [b.min_lat, b.max_lat, b.min_lng, b.max_lng];
    if values.iter().any(|v| !v.is_finite()) {
        return Err(invalid("bounds must be finite".to_string()));
    }
    if !(-90.0..=90.0).contains(&b.min_lat) || !(-90.0..=90.0).contains(&b.max_lat) {
        return Err(invalid(format!(
            "latitude range {}..{} outside [-90, 90]",
            b.min_lat, b.max_lat
        )));
    }
    if !(-180.0..=180.0).contains(&b.min_lng) || !(-180.0..=180.0).contains(&b.max_lng) {
        return Err(invalid(format!(
            "longitude range {}..{} outside [-180, 180]",
            b.min_lng, b.max_lng
        )));
    }
    if b.min_lat > b.max_lat || b.min_lng > b.max_lng {
        return Err(invalid("min bound exceeds max bound".to_string()));
    }
    Ok(())
}
