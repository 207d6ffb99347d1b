//! Files on disk are authoritative: missing ledger ids are added from them.
//! Ledger ids with no image, or one id stored twice, stop the audit instead.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::catalogue::Catalogue;
use crate::config::DataLayout;
use crate::error::{AuditError, ConsistencyViolation};
use crate::ledger::Ledger;
use crate::scan::{pano_id_of, scan_images};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub on_disk: usize,
    pub ledger_before: usize,
    pub ledger_after: usize,
    /// Ids added to the ledger from disk.
    pub added: Vec<String>,
    /// Catalogue size, reported for manual comparison only.
    pub catalogue_records: usize,
}

impl AuditReport {
    pub fn was_synced(&self) -> bool {
        self.added.is_empty() && self.ledger_before == self.on_disk
    }
}

/// Image files under the image root, grouped by panorama id.
#[derive(Debug, Default)]
pub struct DiskInventory {
    pub files: usize,
    pub ids: BTreeMap<String, usize>,
}

impl DiskInventory {
    pub fn scan(root: &Path) -> Self {
        let mut inventory = Self::default();
        for path in scan_images(root) {
            inventory.files += 1;
            if let Some(id) = pano_id_of(&path) {
                *inventory.ids.entry(id).or_default() += 1;
            }
        }
        inventory
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// Ids stored under more than one country directory.
    pub fn duplicated(&self) -> Vec<String> {
        self.ids
            .iter()
            .filter(|(_, n)| **n > 1)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

pub struct SyncAuditor {
    layout: DataLayout,
}

impl SyncAuditor {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    /// Repair `ledger` in memory against the images on disk.
    pub fn reconcile(
        &self,
        ledger: &mut Ledger,
        catalogue_records: usize,
    ) -> Result<AuditReport, ConsistencyViolation> {
        let inventory = DiskInventory::scan(&self.layout.images());
        let on_disk = inventory.files;
        let ledger_before = ledger.len();

        let mut added = Vec::new();
        if ledger_before != on_disk {
            warn!(ledger = ledger_before, on_disk, "ledger out of sync, repairing from disk");
            for id in inventory.ids.keys() {
                if ledger.insert(id.clone()) {
                    added.push(id.clone());
                }
            }
        }

        if ledger.len() != on_disk {
            let extra = ledger
                .iter()
                .filter(|id| !inventory.contains(id))
                .map(str::to_string)
                .collect();
            let duplicated = inventory.duplicated();
            if !duplicated.is_empty() {
                warn!(ids = ?duplicated, "panorama ids stored under several countries");
            }
            return Err(ConsistencyViolation {
                ledger: ledger.len(),
                on_disk,
                extra,
                duplicated,
            });
        }

        if catalogue_records != ledger.len() {
            info!(
                catalogue = catalogue_records,
                ledger = ledger.len(),
                "catalogue and ledger sizes differ"
            );
        }

        Ok(AuditReport {
            on_disk,
            ledger_before,
            ledger_after: ledger.len(),
            added,
            catalogue_records,
        })
    }

    /// Load, reconcile, and save the ledger when it was repaired.
    /// A consistency violation leaves the stored ledger untouched.
    pub fn run(&self) -> Result<AuditReport, AuditError> {
        let catalogue = Catalogue::load(&self.layout.catalogue())?;
        let mut ledger = Ledger::load(&self.layout.ledger())?;

        let report = self.reconcile(&mut ledger, catalogue.record_count())?;
        if !report.added.is_empty() {
            ledger.save(&self.layout.ledger())?;
            info!(added = report.added.len(), "ledger repaired");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coordinate, PanoramaRecord};
    use std::fs;
    use tempfile::TempDir;

    fn layout_with_images(ids: &[&str]) -> (TempDir, DataLayout) {
        let temp = TempDir::new().unwrap();
        let layout = DataLayout::new(temp.path());
        let dir = layout.images().join("France");
        fs::create_dir_all(&dir).unwrap();
        for id in ids {
            fs::write(dir.join(format!("{id}.jpg")), b"jpeg").unwrap();
        }
        (temp, layout)
    }

    #[test]
    fn test_synced_is_noop() {
        let (_temp, layout) = layout_with_images(&["a", "b"]);
        let ledger: Ledger = ["a", "b"].into_iter().collect();
        ledger.save(&layout.ledger()).unwrap();

        let report = SyncAuditor::new(layout.clone()).run().unwrap();

        assert!(report.was_synced());
        assert_eq!(report.ledger_after, 2);
    }

    #[test]
    fn test_missing_ids_are_added_from_disk() {
        let (_temp, layout) = layout_with_images(&["a", "b", "c"]);
        let ledger: Ledger = ["a", "b"].into_iter().collect();
        ledger.save(&layout.ledger()).unwrap();
        let mut catalogue = Catalogue::new();
        catalogue.insert("France", PanoramaRecord::new(Coordinate::new(1.0, 1.0), "a"));
        catalogue.save(&layout.catalogue()).unwrap();

        let report = SyncAuditor::new(layout.clone()).run().unwrap();

        assert_eq!(report.added, vec!["c".to_string()]);
        assert_eq!(report.ledger_after, report.on_disk);
        assert_eq!(report.catalogue_records, 1);
        let expected: Ledger = ["a", "b", "c"].into_iter().collect();
        assert_eq!(Ledger::load(&layout.ledger()).unwrap(), expected);
    }

    #[test]
    fn test_ledger_ids_without_images_halt() {
        let (_temp, layout) = layout_with_images(&["a"]);
        let ledger: Ledger = ["a", "ghost"].into_iter().collect();
        ledger.save(&layout.ledger()).unwrap();

        let err = SyncAuditor::new(layout.clone()).run().unwrap_err();

        match err {
            AuditError::Consistency(v) => {
                assert_eq!(v.ledger, 2);
                assert_eq!(v.on_disk, 1);
                assert_eq!(v.extra, vec!["ghost".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        // Stored ledger left as it was.
        assert_eq!(Ledger::load(&layout.ledger()).unwrap(), ledger);
    }

    #[test]
    fn test_same_id_in_two_countries_is_not_synced() {
        let (_temp, layout) = layout_with_images(&["a", "b"]);
        let monaco = layout.images().join("Monaco");
        fs::create_dir_all(&monaco).unwrap();
        fs::write(monaco.join("b.jpg"), b"jpeg").unwrap();
        let ledger: Ledger = ["a", "b"].into_iter().collect();
        ledger.save(&layout.ledger()).unwrap();

        let err = SyncAuditor::new(layout.clone()).run().unwrap_err();

        match err {
            AuditError::Consistency(v) => {
                assert_eq!(v.ledger, 2);
                assert_eq!(v.on_disk, 3);
                assert!(v.extra.is_empty());
                assert_eq!(v.duplicated, vec!["b".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(Ledger::load(&layout.ledger()).unwrap(), ledger);
    }
}
