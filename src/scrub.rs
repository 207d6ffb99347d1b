//! Placeholders share their central region even when borders differ, so
//! matching uses a mean hash of the center crop only.

use chrono::Utc;
use image::DynamicImage;
use image_hasher::{HashAlg, Hasher, HasherConfig, ImageHash};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::catalogue::Catalogue;
use crate::config::{DEFAULT_CROP_FRACTION, DataLayout};
use crate::error::StorageError;
use crate::ledger::Ledger;
use crate::scan::{pano_id_of, scan_images};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScrubRecord {
    pub timestamp: String,
    pub path: String,
    pub pano_id: String,
    pub countries: Vec<String>,
}

/// Matches found by a scan, to be confirmed before anything is deleted.
#[derive(Debug, Default, Clone)]
pub struct ScrubPlan {
    pub matches: Vec<PathBuf>,
    pub scanned: usize,
    pub unreadable: usize,
}

#[derive(Debug, Default)]
pub struct ScrubReport {
    pub scanned: usize,
    pub matched: Vec<PathBuf>,
    pub unreadable: usize,
    pub dry_run: bool,
}

/// Centered crop covering `fraction` of each dimension.
pub fn center_crop(img: &DynamicImage, fraction: f32) -> DynamicImage {
    let fraction = fraction.clamp(0.01, 1.0);
    let (width, height) = (img.width(), img.height());
    let crop_w = ((width as f32 * fraction).round() as u32).clamp(1, width.max(1));
    let crop_h = ((height as f32 * fraction).round() as u32).clamp(1, height.max(1));
    let x = (width - crop_w.min(width)) / 2;
    let y = (height - crop_h.min(height)) / 2;
    img.crop_imm(x, y, crop_w, crop_h)
}

pub struct Scrubber {
    hasher: Hasher,
    template_hash: ImageHash,
    template_path: PathBuf,
    crop_fraction: f32,
}

impl Scrubber {
    pub fn from_template(template: &Path) -> Result<Self, StorageError> {
        Self::with_crop_fraction(template, DEFAULT_CROP_FRACTION)
    }

    pub fn with_crop_fraction(template: &Path, crop_fraction: f32) -> Result<Self, StorageError> {
        let hasher = HasherConfig::new().hash_alg(HashAlg::Mean).to_hasher();
        let img = open_image(template)?;
        let template_hash = hasher.hash_image(&center_crop(&img, crop_fraction));
        info!(
            template = %template.display(),
            hash = %template_hash.to_base64(),
            "placeholder template hashed"
        );
        Ok(Self {
            hasher,
            template_hash,
            template_path: template.canonicalize().unwrap_or_else(|_| template.to_path_buf()),
            crop_fraction,
        })
    }

    pub fn center_hash(&self, path: &Path) -> Result<ImageHash, StorageError> {
        let img = open_image(path)?;
        Ok(self.hasher.hash_image(&center_crop(&img, self.crop_fraction)))
    }

    pub fn matches(&self, path: &Path) -> Result<bool, StorageError> {
        Ok(self.center_hash(path)? == self.template_hash)
    }

    fn is_template(&self, path: &Path) -> bool {
        path.canonicalize()
            .map(|p| p == self.template_path)
            .unwrap_or(false)
    }

    /// Walk `root` and collect every image whose center hash equals the template's.
    pub fn find_matches(&self, root: &Path) -> ScrubPlan {
        let mut plan = ScrubPlan::default();
        for path in scan_images(root) {
            if self.is_template(&path) {
                continue;
            }
            plan.scanned += 1;
            match self.matches(&path) {
                Ok(true) => plan.matches.push(path),
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not hash image, skipping");
                    plan.unreadable += 1;
                }
            }
        }
        plan
    }

    /// Delete `matches` and repair `catalogue` and `ledger` in memory, stopping
    /// at the first file that cannot be deleted. Everything removed before
    /// that point is in `removed`.
    pub fn remove_matches(
        &self,
        matches: &[PathBuf],
        catalogue: &mut Catalogue,
        ledger: &mut Ledger,
        removed: &mut Vec<(PathBuf, ScrubRecord)>,
    ) -> Result<(), StorageError> {
        for path in matches {
            let Some(pano_id) = pano_id_of(path) else {
                warn!(path = %path.display(), "matched image has no usable file name");
                continue;
            };
            fs::remove_file(path).map_err(|e| StorageError::io(path, e))?;
            ledger.remove(&pano_id);
            let countries = catalogue.remove_pano(&pano_id);
            info!(
                path = %path.display(),
                pano_id = %pano_id,
                countries = ?countries,
                "placeholder removed"
            );
            let record = ScrubRecord {
                timestamp: Utc::now().to_rfc3339(),
                path: path.to_string_lossy().into_owned(),
                pano_id,
                countries,
            };
            removed.push((path.clone(), record));
        }
        Ok(())
    }

    /// Carry out `plan` against the data directory. Catalogue, ledger and
    /// history are written for whatever was removed, even when a deletion fails.
    pub fn apply(
        &self,
        layout: &DataLayout,
        plan: &ScrubPlan,
        dry_run: bool,
    ) -> Result<ScrubReport, StorageError> {
        let mut report = ScrubReport {
            scanned: plan.scanned,
            unreadable: plan.unreadable,
            dry_run,
            matched: Vec::new(),
        };
        if dry_run {
            for path in &plan.matches {
                info!(path = %path.display(), "[dry-run] would remove placeholder");
            }
            report.matched = plan.matches.clone();
            return Ok(report);
        }

        let mut catalogue = Catalogue::load(&layout.catalogue())?;
        let mut ledger = Ledger::load(&layout.ledger())?;
        let mut removed = Vec::new();
        let result = self.remove_matches(&plan.matches, &mut catalogue, &mut ledger, &mut removed);

        if !removed.is_empty() {
            ledger.save(&layout.ledger())?;
            catalogue.save(&layout.catalogue())?;
            let records: Vec<_> = removed.iter().map(|(_, r)| r.clone()).collect();
            append_history(&layout.scrub_history(), &records)?;
        }
        result?;

        report.matched = removed.into_iter().map(|(path, _)| path).collect();
        Ok(report)
    }

    pub fn run(&self, layout: &DataLayout, dry_run: bool) -> Result<ScrubReport, StorageError> {
        let plan = self.find_matches(&layout.images());
        self.apply(layout, &plan, dry_run)
    }
}

fn open_image(path: &Path) -> Result<DynamicImage, StorageError> {
    image::open(path).map_err(|e| StorageError::Image {
        path: path.to_path_buf(),
        source: e,
    })
}

fn append_history(path: &Path, records: &[ScrubRecord]) -> Result<(), StorageError> {
    if records.is_empty() {
        return Ok(());
    }
    let mut out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StorageError::io(path, e))?;
    for record in records {
        let line = serde_json::to_string(record).map_err(|e| StorageError::json(path, e))?;
        writeln!(out, "{line}").map_err(|e| StorageError::io(path, e))?;
    }
    Ok(())
}

/// Read back the scrub history; malformed lines are skipped.
pub fn read_history(path: &Path) -> Result<Vec<ScrubRecord>, StorageError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
    Ok(raw
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(i, line)| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(line = i, error = %e, "skipping malformed history entry");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coordinate, PanoramaRecord};
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    /// 64×64 image: `border` everywhere, a split-tone 32×32 block in the middle.
    fn framed(border: u8, inverted: bool) -> RgbImage {
        RgbImage::from_fn(64, 64, |x, y| {
            let inside = (16..48).contains(&x) && (16..48).contains(&y);
            if !inside {
                return Rgb([border, border, border]);
            }
            let left = x < 32;
            if left != inverted {
                Rgb([30, 30, 30])
            } else {
                Rgb([220, 220, 220])
            }
        })
    }

    struct Fixture {
        _temp: TempDir,
        layout: DataLayout,
        template: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let layout = DataLayout::new(temp.path().join("data"));
        let france = layout.images().join("France");
        fs::create_dir_all(&france).unwrap();

        let template = temp.path().join("placeholder.png");
        framed(0, false).save(&template).unwrap();
        // Same center, different border: a placeholder.
        framed(255, false).save(france.join("P1.png")).unwrap();
        // Different center: a real capture.
        framed(0, true).save(france.join("R1.png")).unwrap();

        let mut catalogue = Catalogue::new();
        catalogue.insert("France", PanoramaRecord::new(Coordinate::new(48.05, 2.05), "P1"));
        catalogue.insert("France", PanoramaRecord::new(Coordinate::new(48.06, 2.06), "R1"));
        catalogue.insert("Monaco", PanoramaRecord::new(Coordinate::new(43.7300001, 7.42), "P1"));
        catalogue.save(&layout.catalogue()).unwrap();
        let ledger: Ledger = ["P1", "R1"].into_iter().collect();
        ledger.save(&layout.ledger()).unwrap();

        Fixture {
            _temp: temp,
            layout,
            template,
        }
    }

    #[test]
    fn test_center_crop_geometry() {
        let img = DynamicImage::ImageRgb8(framed(0, false));
        let crop = center_crop(&img, 0.5);
        assert_eq!((crop.width(), crop.height()), (32, 32));
        // The crop starts exactly at the inner block.
        assert_eq!(crop.to_rgb8().get_pixel(0, 0), &Rgb([30, 30, 30]));
        assert_eq!(crop.to_rgb8().get_pixel(31, 0), &Rgb([220, 220, 220]));

        let full = center_crop(&img, 1.0);
        assert_eq!((full.width(), full.height()), (64, 64));
    }

    #[test]
    fn test_border_does_not_affect_match() {
        let f = fixture();
        let scrubber = Scrubber::from_template(&f.template).unwrap();
        let france = f.layout.images().join("France");

        assert!(scrubber.matches(&france.join("P1.png")).unwrap());
        assert!(!scrubber.matches(&france.join("R1.png")).unwrap());
    }

    #[test]
    fn test_scrub_removes_placeholder_everywhere() {
        let f = fixture();
        let scrubber = Scrubber::from_template(&f.template).unwrap();

        let report = scrubber.run(&f.layout, false).unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.matched.len(), 1);
        let france = f.layout.images().join("France");
        assert!(!france.join("P1.png").exists());
        assert!(france.join("R1.png").exists());

        let ledger = Ledger::load(&f.layout.ledger()).unwrap();
        assert!(!ledger.contains("P1"));
        assert!(ledger.contains("R1"));

        let catalogue = Catalogue::load(&f.layout.catalogue()).unwrap();
        assert!(!catalogue.contains_pano("P1"));
        assert!(catalogue.contains_pano("R1"));
        assert_eq!(catalogue.records("Monaco").count(), 0);

        let history = read_history(&f.layout.scrub_history()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].pano_id, "P1");
        assert_eq!(history[0].countries, vec!["France".to_string(), "Monaco".to_string()]);
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let f = fixture();
        let scrubber = Scrubber::from_template(&f.template).unwrap();

        let report = scrubber.run(&f.layout, true).unwrap();

        assert!(report.dry_run);
        assert_eq!(report.matched.len(), 1);
        assert!(f.layout.images().join("France").join("P1.png").exists());
        assert!(Ledger::load(&f.layout.ledger()).unwrap().contains("P1"));
        assert!(!f.layout.scrub_history().exists());
    }

    #[test]
    fn test_template_inside_root_is_kept_and_bad_files_skipped() {
        let f = fixture();
        let inside = f.layout.images().join("template.png");
        framed(0, false).save(&inside).unwrap();
        fs::write(f.layout.images().join("France").join("broken.jpg"), b"not an image").unwrap();
        let scrubber = Scrubber::from_template(&inside).unwrap();

        let plan = scrubber.find_matches(&f.layout.images());
        assert_eq!(plan.unreadable, 1);
        assert_eq!(plan.matches.len(), 1);

        let report = scrubber.apply(&f.layout, &plan, false).unwrap();
        assert!(inside.exists());
        assert_eq!(report.matched.len(), 1);
    }

    #[test]
    fn test_failed_delete_keeps_earlier_removals() {
        let f = fixture();
        let france = f.layout.images().join("France");
        framed(128, false).save(france.join("P2.png")).unwrap();
        let mut catalogue = Catalogue::load(&f.layout.catalogue()).unwrap();
        catalogue.insert("France", PanoramaRecord::new(Coordinate::new(48.07, 2.07), "P2"));
        catalogue.save(&f.layout.catalogue()).unwrap();
        let ledger: Ledger = ["P1", "P2", "R1"].into_iter().collect();
        ledger.save(&f.layout.ledger()).unwrap();

        let scrubber = Scrubber::from_template(&f.template).unwrap();
        let plan = scrubber.find_matches(&f.layout.images());
        assert_eq!(plan.matches.len(), 2);
        // Gone before the scrub reaches it, so its deletion fails.
        fs::remove_file(france.join("P2.png")).unwrap();

        let err = scrubber.apply(&f.layout, &plan, false).unwrap_err();

        assert!(matches!(err, StorageError::Io { ref path, .. } if path.ends_with("P2.png")));
        assert!(!france.join("P1.png").exists());
        let ledger = Ledger::load(&f.layout.ledger()).unwrap();
        assert!(!ledger.contains("P1"));
        assert!(ledger.contains("P2"));
        let catalogue = Catalogue::load(&f.layout.catalogue()).unwrap();
        assert!(!catalogue.contains_pano("P1"));
        assert!(catalogue.contains_pano("P2"));
        let history = read_history(&f.layout.scrub_history()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].pano_id, "P1");
    }

    #[test]
    fn test_apply_only_touches_planned_files() {
        let f = fixture();
        let scrubber = Scrubber::from_template(&f.template).unwrap();
        let plan = scrubber.find_matches(&f.layout.images());

        // Appears after the matches were confirmed.
        let late = f.layout.images().join("France").join("P3.png");
        framed(200, false).save(&late).unwrap();

        let report = scrubber.apply(&f.layout, &plan, false).unwrap();

        assert_eq!(report.matched, plan.matches);
        assert!(late.exists());
        assert!(!f.layout.images().join("France").join("P1.png").exists());
    }

    #[test]
    fn test_missing_template_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            Scrubber::from_template(&temp.path().join("nope.png")),
            Err(StorageError::Image { .. })
        ));
    }
}
