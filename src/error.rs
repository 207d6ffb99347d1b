use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Geocoder returned status {status}")]
    Status { status: u16 },

    #[error("No address found for {lat},{lng}")]
    NoAddress { lat: f64, lng: f64 },

    #[error("Address has no components: {address:?}")]
    NoComponents { address: String },
}

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Translator returned status {status}")]
    Status { status: u16 },

    #[error("Malformed translation payload: {message}")]
    Malformed { message: String },

    #[error("Empty translation for {text:?}")]
    Empty { text: String },
}

/// Why a sample's country could not be resolved. Recoverable per sample.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Geocoding failed: {0}")]
    Geocode(#[from] GeocodeError),

    #[error("Translation failed: {0}")]
    Translation(#[from] TranslationError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Image error on {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StorageError::Json {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No API key: pass --api-key, set STREETVIEW_API_KEY or create {path}")]
    MissingApiKey { path: PathBuf },

    #[error("API key file {path} is empty")]
    EmptyApiKey { path: PathBuf },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Region {name:?} is invalid: {reason}")]
    InvalidRegion { name: String, reason: String },

    #[error("HTTP client could not be built: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tile request returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Tile is not a decodable image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Ledger and on-disk images disagree even after the additive repair.
#[derive(Debug, Error)]
#[error(
    "Ledger holds {ledger} ids but {on_disk} images exist on disk (extra ids: {extra:?}, ids with several images: {duplicated:?})"
)]
pub struct ConsistencyViolation {
    pub ledger: usize,
    pub on_disk: usize,
    pub extra: Vec<String>,
    pub duplicated: Vec<String>,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Consistency(#[from] ConsistencyViolation),
}
