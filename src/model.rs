use serde::{Deserialize, Serialize};

/// Search radius in meters for high-density regions.
pub const HIGH_DENSITY_RADIUS_M: u32 = 1_000;
pub const MEDIUM_DENSITY_RADIUS_M: u32 = 5_000;
pub const LOW_DENSITY_RADIUS_M: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }

    /// `lat,lng` as the imagery endpoints expect it.
    pub fn to_query(&self) -> String {
        format!("{},{}", self.lat, self.lng)
    }
}

/// Coarse imagery density of a region; decides the coverage search radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DensityTier {
    #[serde(alias = "High", alias = "HIGH")]
    High,
    #[serde(alias = "Medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "Low", alias = "LOW")]
    Low,
}

impl DensityTier {
    pub fn radius_m(self) -> u32 {
        match self {
            DensityTier::High => HIGH_DENSITY_RADIUS_M,
            DensityTier::Medium => MEDIUM_DENSITY_RADIUS_M,
            DensityTier::Low => LOW_DENSITY_RADIUS_M,
        }
    }
}

/// Bounding box as it appears in the region file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
    pub density: DensityTier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub bounds: RegionBounds,
}

impl Region {
    pub fn new(name: impl Into<String>, bounds: RegionBounds) -> Self {
        Self {
            name: name.into(),
            bounds,
        }
    }

    pub fn radius_m(&self) -> u32 {
        self.bounds.density.radius_m()
    }

    pub fn contains(&self, coord: Coordinate) -> bool {
        let b = &self.bounds;
        (b.min_lat..=b.max_lat).contains(&coord.lat) && (b.min_lng..=b.max_lng).contains(&coord.lng)
    }
}

/// A panorama the provider reported, at its canonical coordinate.
///
/// The panorama id is the identity; two records with the same id are the same
/// capture even if their coordinates differ in the last few digits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanoramaRecord {
    pub lat: f64,
    pub lng: f64,
    pub pano_id: String,
}

impl PanoramaRecord {
    pub fn new(coord: Coordinate, pano_id: impl Into<String>) -> Self {
        Self {
            lat: coord.lat,
            lng: coord.lng,
            pano_id: pano_id.into(),
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }

    /// Persisted form: `[lat, lng, pano_id]`.
    pub fn to_triple(&self) -> (f64, f64, String) {
        (self.lat, self.lng, self.pano_id.clone())
    }

    pub fn from_triple((lat, lng, pano_id): (f64, f64, String)) -> Self {
        Self { lat, lng, pano_id }
    }
}
