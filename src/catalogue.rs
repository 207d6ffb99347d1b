use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::StorageError;
use crate::model::PanoramaRecord;
use crate::store;

type CatalogueFile = BTreeMap<String, Vec<(f64, f64, String)>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "CatalogueFile", into = "CatalogueFile")]
pub struct Catalogue {
    countries: BTreeMap<String, BTreeMap<String, PanoramaRecord>>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, StorageError> {
        store::load_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        store::save_json(path, self)
    }

    /// Insert a record under `country`. Returns `false` when the panorama id was
    /// already catalogued for that country; the first-seen coordinates win.
    pub fn insert(&mut self, country: &str, record: PanoramaRecord) -> bool {
        let records = self.countries.entry(country.to_string()).or_default();
        if records.contains_key(&record.pano_id) {
            return false;
        }
        records.insert(record.pano_id.clone(), record);
        true
    }

    /// Union `other` into `self`, country by country. Returns the number of new records.
    pub fn merge(&mut self, other: &Catalogue) -> usize {
        let mut added = 0;
        for (country, record) in other.iter() {
            if self.insert(country, record.clone()) {
                added += 1;
            }
        }
        added
    }

    /// A new snapshot holding the union of both catalogues.
    pub fn merged(&self, other: &Catalogue) -> Catalogue {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Drop every record carrying `pano_id`, whatever its coordinates.
    /// Returns the countries it was removed from.
    pub fn remove_pano(&mut self, pano_id: &str) -> Vec<String> {
        let mut touched = Vec::new();
        for (country, records) in self.countries.iter_mut() {
            if records.remove(pano_id).is_some() {
                touched.push(country.clone());
            }
        }
        touched
    }

    pub fn contains_pano(&self, pano_id: &str) -> bool {
        self.countries.values().any(|r| r.contains_key(pano_id))
    }

    pub fn countries(&self) -> impl Iterator<Item = &str> {
        self.countries.keys().map(String::as_str)
    }

    pub fn records(&self, country: &str) -> impl Iterator<Item = &PanoramaRecord> {
        self.countries.get(country).into_iter().flat_map(|r| r.values())
    }

    /// Every (country, record) pair in country order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PanoramaRecord)> {
        self.countries
            .iter()
            .flat_map(|(c, records)| records.values().map(move |r| (c.as_str(), r)))
    }

    pub fn pano_ids(&self) -> BTreeSet<String> {
        self.iter().map(|(_, r)| r.pano_id.clone()).collect()
    }

    pub fn country_count(&self) -> usize {
        self.countries.len()
    }

    pub fn record_count(&self) -> usize {
        self.countries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }
}

impl From<CatalogueFile> for Catalogue {
    fn from(file: CatalogueFile) -> Self {
        let mut catalogue = Catalogue::new();
        for (country, triples) in file {
            // Countries with no records still round-trip.
            catalogue.countries.entry(country.clone()).or_default();
            for triple in triples {
                catalogue.insert(&country, PanoramaRecord::from_triple(triple));
            }
        }
        catalogue
    }
}

impl From<Catalogue> for CatalogueFile {
    fn from(catalogue: Catalogue) -> Self {
        catalogue
            .countries
            .into_iter()
            .map(|(country, records)| {
                let triples = records.into_values().map(|r| r.to_triple()).collect();
                (country, triples)
            })
            .collect()
    }
}
