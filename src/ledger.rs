use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::StorageError;
use crate::store;

/// Panorama ids that already have a stitched image on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    ids: BTreeSet<String>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, StorageError> {
        store::load_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        store::save_json(path, self)
    }

    pub fn contains(&self, pano_id: &str) -> bool {
        self.ids.contains(pano_id)
    }

    pub fn insert(&mut self, pano_id: impl Into<String>) -> bool {
        self.ids.insert(pano_id.into())
    }

    pub fn remove(&mut self, pano_id: &str) -> bool {
        self.ids.remove(pano_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Ledger {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}
