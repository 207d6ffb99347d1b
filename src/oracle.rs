use serde::Deserialize;
use tracing::debug;

use crate::config::HttpSettings;
use crate::error::ConfigError;
use crate::model::{Coordinate, PanoramaRecord};

pub const DEFAULT_METADATA_URL: &str = "https://maps.googleapis.com/maps/api/streetview/metadata";

#[derive(Debug, Clone, PartialEq)]
pub struct CoverageReport {
    /// The panorama at its canonical coordinate, when one was found.
    pub panorama: Option<PanoramaRecord>,
    /// HTTP status, absent when the request never completed.
    pub http_status: Option<u16>,
    pub raw: String,
}

impl CoverageReport {
    pub fn found(&self) -> bool {
        self.panorama.is_some()
    }

    pub fn miss(http_status: Option<u16>, raw: impl Into<String>) -> Self {
        Self {
            panorama: None,
            http_status,
            raw: raw.into(),
        }
    }
}

pub trait CoverageOracle {
    fn check_coverage(&self, coord: Coordinate, radius_m: u32) -> CoverageReport;
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    status: String,
    pano_id: Option<String>,
    location: Option<MetadataLocation>,
}

#[derive(Debug, Deserialize)]
struct MetadataLocation {
    lat: f64,
    lng: f64,
}

/// Interpret a metadata response body.
pub fn parse_metadata(http_status: u16, body: &str) -> CoverageReport {
    if !(200..300).contains(&http_status) {
        return CoverageReport::miss(Some(http_status), body);
    }
    let parsed: MetadataResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => return CoverageReport::miss(Some(http_status), format!("{e}: {body}")),
    };
    match parsed {
        MetadataResponse {
            status,
            pano_id: Some(pano_id),
            location: Some(loc),
        } if status == "OK" && !pano_id.is_empty() => CoverageReport {
            panorama: Some(PanoramaRecord::new(Coordinate::new(loc.lat, loc.lng), pano_id)),
            http_status: Some(http_status),
            raw: body.to_string(),
        },
        _ => CoverageReport::miss(Some(http_status), body),
    }
}

pub struct StreetViewOracle {
    client: reqwest::blocking::Client,
    api_key: String,
    endpoint: String,
}

impl StreetViewOracle {
    pub fn new(settings: &HttpSettings) -> Result<Self, ConfigError> {
        Self::with_endpoint(settings, DEFAULT_METADATA_URL)
    }

    pub fn with_endpoint(
        settings: &HttpSettings,
        endpoint: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            client: settings.blocking_client()?,
            api_key: settings.api_key.clone(),
            endpoint: endpoint.into(),
        })
    }
}

impl CoverageOracle for StreetViewOracle {
    fn check_coverage(&self, coord: Coordinate, radius_m: u32) -> CoverageReport {
        if !coord.is_valid() || radius_m == 0 {
            return CoverageReport::miss(
                None,
                format!("invalid query {} radius {radius_m}", coord.to_query()),
            );
        }
        let radius = radius_m.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("location", coord.to_query().as_str()),
                ("radius", radius.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send();

        let response = match response {
            Ok(response) => response,
            Err(e) => return CoverageReport::miss(None, e.to_string()),
        };
        let status = response.status().as_u16();
        let body = match response.text() {
            Ok(body) => body,
            Err(e) => return CoverageReport::miss(Some(status), e.to_string()),
        };
        let report = parse_metadata(status, &body);
        debug!(
            lat = coord.lat,
            lng = coord.lng,
            radius_m,
            status,
            found = report.found(),
            "coverage query"
        );
        report
    }
}
