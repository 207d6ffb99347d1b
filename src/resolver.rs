use serde::Deserialize;
use tracing::debug;

use crate::config::HttpSettings;
use crate::error::{ConfigError, GeocodeError, ResolveError, TranslationError};
use crate::model::Coordinate;

pub const DEFAULT_REVERSE_URL: &str = "https://nominatim.openstreetmap.org/reverse";
pub const DEFAULT_TRANSLATE_URL: &str = "https://translate.googleapis.com/translate_a/single";

pub trait Geocoder {
    /// Formatted address for `coord`, `None` when the service knows no address there.
    fn reverse(&self, coord: Coordinate) -> Result<Option<String>, GeocodeError>;
}

pub trait Translator {
    fn to_english(&self, text: &str) -> Result<String, TranslationError>;
}

/// Last non-empty comma-separated component of an address.
pub fn country_component(address: &str) -> Option<&str> {
    address
        .rsplit(',')
        .map(str::trim)
        .find(|part| !part.is_empty())
}

/// Trim and replace path separators so the name can key a directory.
pub fn normalize_country(name: &str) -> String {
    name.trim().replace(['/', '\\'], "-")
}

pub struct CountryResolver<G, T> {
    geocoder: G,
    translator: T,
}

impl<G: Geocoder, T: Translator> CountryResolver<G, T> {
    pub fn new(geocoder: G, translator: T) -> Self {
        Self {
            geocoder,
            translator,
        }
    }

    pub fn resolve_country(&self, coord: Coordinate) -> Result<String, ResolveError> {
        let address = self
            .geocoder
            .reverse(coord)?
            .ok_or(GeocodeError::NoAddress {
                lat: coord.lat,
                lng: coord.lng,
            })?;
        let raw = country_component(&address)
            .ok_or_else(|| GeocodeError::NoComponents {
                address: address.clone(),
            })?
            .to_string();
        let english = self.translator.to_english(&raw)?;
        let country = normalize_country(&english);
        if country.is_empty() {
            return Err(TranslationError::Empty { text: raw }.into());
        }
        debug!(lat = coord.lat, lng = coord.lng, raw = %raw, country = %country, "resolved country");
        Ok(country)
    }
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
    error: Option<String>,
}

/// Nominatim-compatible reverse geocoder.
pub struct NominatimGeocoder {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl NominatimGeocoder {
    pub fn new(settings: &HttpSettings) -> Result<Self, ConfigError> {
        Self::with_endpoint(settings, DEFAULT_REVERSE_URL)
    }

    pub fn with_endpoint(
        settings: &HttpSettings,
        endpoint: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            client: settings.blocking_client()?,
            endpoint: endpoint.into(),
        })
    }
}

impl Geocoder for NominatimGeocoder {
    fn reverse(&self, coord: Coordinate) -> Result<Option<String>, GeocodeError> {
        let lat = coord.lat.to_string();
        let lon = coord.lng.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("format", "jsonv2"), ("lat", lat.as_str()), ("lon", lon.as_str())])
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status {
                status: status.as_u16(),
            });
        }
        let body: ReverseResponse = response.json()?;
        if let Some(error) = body.error {
            debug!(lat = coord.lat, lng = coord.lng, %error, "geocoder has no address");
            return Ok(None);
        }
        Ok(body.display_name.filter(|a| !a.trim().is_empty()))
    }
}

/// Translate client speaking the public `translate_a/single` protocol.
pub struct WebTranslator {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl WebTranslator {
    pub fn new(settings: &HttpSettings) -> Result<Self, ConfigError> {
        Self::with_endpoint(settings, DEFAULT_TRANSLATE_URL)
    }

    pub fn with_endpoint(
        settings: &HttpSettings,
        endpoint: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            client: settings.blocking_client()?,
            endpoint: endpoint.into(),
        })
    }
}

impl Translator for WebTranslator {
    fn to_english(&self, text: &str) -> Result<String, TranslationError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", "en"),
                ("dt", "t"),
                ("q", text),
            ])
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(TranslationError::Status {
                status: status.as_u16(),
            });
        }
        let payload: serde_json::Value = response.json()?;
        parse_translation(text, &payload)
    }
}

/// Pull the translated text out of `[[["France","Frankreich",...], ...], null, "de", ...]`.
pub fn parse_translation(
    source: &str,
    payload: &serde_json::Value,
) -> Result<String, TranslationError> {
    if payload.get(2).and_then(|v| v.as_str()) == Some("en") {
        return Ok(source.to_string());
    }
    let segments = payload
        .get(0)
        .and_then(|v| v.as_array())
        .ok_or_else(|| TranslationError::Malformed {
            message: "missing segment list".to_string(),
        })?;
    let translated: String = segments
        .iter()
        .filter_map(|seg| seg.get(0).and_then(|s| s.as_str()))
        .collect();
    if translated.trim().is_empty() {
        return Err(TranslationError::Empty {
            text: source.to_string(),
        });
    }
    Ok(translated)
}
