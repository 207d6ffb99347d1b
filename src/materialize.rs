use image::{DynamicImage, ImageFormat, RgbImage, imageops};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::catalogue::Catalogue;
use crate::config::HttpSettings;
use crate::error::{ConfigError, FetchError, StorageError};
use crate::ledger::Ledger;
use crate::model::{Coordinate, PanoramaRecord};

pub const DEFAULT_TILE_URL: &str = "https://maps.googleapis.com/maps/api/streetview";
pub const HEADINGS: [u16; 4] = [0, 90, 180, 270];
pub const TILE_SIZE: u32 = 640;
pub const TILE_PITCH: i32 = 0;
pub const TILE_FOV: u32 = 90;

pub trait TileFetcher {
    fn fetch_tile(&self, coord: Coordinate, heading: u16) -> Result<DynamicImage, FetchError>;
}

pub struct StreetViewTiles {
    client: reqwest::blocking::Client,
    api_key: String,
    endpoint: String,
}

impl StreetViewTiles {
    pub fn new(settings: &HttpSettings) -> Result<Self, ConfigError> {
        Self::with_endpoint(settings, DEFAULT_TILE_URL)
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

impl TileFetcher for StreetViewTiles {
    fn fetch_tile(&self, coord: Coordinate, heading: u16) -> Result<DynamicImage, FetchError> {
        let size = format!("{TILE_SIZE}x{TILE_SIZE}");
        let heading = heading.to_string();
        let pitch = TILE_PITCH.to_string();
        let fov = TILE_FOV.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("size", size.as_str()),
                ("location", coord.to_query().as_str()),
                ("heading", heading.as_str()),
                ("pitch", pitch.as_str()),
                ("fov", fov.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        let bytes = response.bytes()?;
        Ok(image::load_from_memory(&bytes)?)
    }
}

/// Paste tiles left to right. Every tile is fitted to the first tile's size.
pub fn stitch_tiles(tiles: &[DynamicImage]) -> RgbImage {
    let Some(first) = tiles.first() else {
        return RgbImage::new(0, 0);
    };
    let (tile_w, tile_h) = (first.width(), first.height());
    let mut canvas = RgbImage::new(tile_w * tiles.len() as u32, tile_h);
    for (i, tile) in tiles.iter().enumerate() {
        let tile = if tile.width() == tile_w && tile.height() == tile_h {
            tile.to_rgb8()
        } else {
            tile.resize_exact(tile_w, tile_h, imageops::FilterType::Triangle)
                .to_rgb8()
        };
        imageops::replace(&mut canvas, &tile, i as i64 * tile_w as i64, 0);
    }
    canvas
}

pub fn image_path(images_root: &Path, country: &str, pano_id: &str) -> PathBuf {
    images_root.join(country).join(format!("{pano_id}.jpg"))
}

/// Encode next to `path` and rename into place, so `path` is either absent or complete.
fn write_jpeg(img: &RgbImage, path: &Path) -> Result<(), StorageError> {
    let tmp = path.with_extension("jpg.tmp");
    if let Err(e) = img.save_with_format(&tmp, ImageFormat::Jpeg) {
        let _ = fs::remove_file(&tmp);
        return Err(StorageError::Image {
            path: path.to_path_buf(),
            source: e,
        });
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StorageError::io(path, e)
    })
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MaterializeReport {
    pub written: usize,
    pub already_done: usize,
    /// `(pano_id, reason)` for panoramas left for a later run.
    pub failed: Vec<(String, String)>,
}

pub struct Materializer<F> {
    fetcher: F,
    images_root: PathBuf,
}

impl<F: TileFetcher> Materializer<F> {
    pub fn new(fetcher: F, images_root: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            images_root: images_root.into(),
        }
    }

    fn fetch_panorama(&self, record: &PanoramaRecord) -> Result<RgbImage, FetchError> {
        let coord = record.coordinate();
        let tiles = HEADINGS
            .iter()
            .map(|&heading| self.fetcher.fetch_tile(coord, heading))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stitch_tiles(&tiles))
    }

    /// Materialize every catalogued panorama missing from `ledger`.
    pub fn materialize(
        &self,
        catalogue: &Catalogue,
        ledger: &mut Ledger,
    ) -> Result<MaterializeReport, StorageError> {
        let mut report = MaterializeReport::default();
        let pending: Vec<_> = catalogue
            .iter()
            .filter(|(_, r)| {
                let done = ledger.contains(&r.pano_id);
                if done {
                    report.already_done += 1;
                }
                !done
            })
            .collect();

        let bar = ProgressBar::new(pending.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
            bar.set_style(style);
        }

        for (country, record) in pending {
            bar.set_message(format!("{country}/{}", record.pano_id));
            let dir = self.images_root.join(country);
            fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDir {
                path: dir.clone(),
                source: e,
            })?;

            let stitched = match self.fetch_panorama(record) {
                Ok(stitched) => stitched,
                Err(e) => {
                    warn!(
                        country,
                        pano_id = %record.pano_id,
                        lat = record.lat,
                        lng = record.lng,
                        error = %e,
                        "tile fetch failed, leaving panorama for a later run"
                    );
                    report.failed.push((record.pano_id.clone(), e.to_string()));
                    bar.inc(1);
                    continue;
                }
            };

            let path = image_path(&self.images_root, country, &record.pano_id);
            write_jpeg(&stitched, &path)?;
            ledger.insert(record.pano_id.clone());
            report.written += 1;
            info!(country, pano_id = %record.pano_id, path = %path.display(), "panorama stitched");
            bar.inc(1);
        }
        bar.finish_and_clear();
        Ok(report)
    }

    /// Load the ledger, materialize, and save the ledger even when a storage
    /// failure aborts the run part way.
    pub fn run(
        &self,
        catalogue: &Catalogue,
        ledger_path: &Path,
    ) -> Result<MaterializeReport, StorageError> {
        let mut ledger = Ledger::load(ledger_path)?;
        let result = self.materialize(catalogue, &mut ledger);
        ledger.save(ledger_path)?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::cell::Cell;
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// Solid tiles whose red channel encodes the heading.
    struct SolidTiles {
        failing: HashSet<String>,
        calls: Cell<usize>,
    }

    impl SolidTiles {
        fn new() -> Self {
            Self {
                failing: HashSet::new(),
                calls: Cell::new(0),
            }
        }

        fn failing_at(lat: f64) -> Self {
            Self {
                failing: HashSet::from([lat.to_string()]),
                calls: Cell::new(0),
            }
        }
    }

    impl TileFetcher for SolidTiles {
        fn fetch_tile(&self, coord: Coordinate, heading: u16) -> Result<DynamicImage, FetchError> {
            self.calls.set(self.calls.get() + 1);
            if self.failing.contains(&coord.lat.to_string()) {
                return Err(FetchError::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            let shade = (heading / 2) as u8;
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                8,
                8,
                Rgb([shade, 0, 0]),
            )))
        }
    }

    fn catalogue() -> Catalogue {
        let mut catalogue = Catalogue::new();
        catalogue.insert("France", PanoramaRecord::new(Coordinate::new(48.05, 2.05), "X1"));
        catalogue.insert("France", PanoramaRecord::new(Coordinate::new(48.06, 2.06), "X2"));
        catalogue.insert("Japan", PanoramaRecord::new(Coordinate::new(35.6, 139.7), "J1"));
        catalogue
    }

    #[test]
    fn test_stitch_places_tiles_left_to_right() {
        let tiles: Vec<_> = [10u8, 20, 30, 40]
            .iter()
            .map(|&v| DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 3, Rgb([v, v, v]))))
            .collect();

        let stitched = stitch_tiles(&tiles);

        assert_eq!(stitched.dimensions(), (16, 3));
        assert_eq!(stitched.get_pixel(0, 0), &Rgb([10, 10, 10]));
        assert_eq!(stitched.get_pixel(5, 2), &Rgb([20, 20, 20]));
        assert_eq!(stitched.get_pixel(15, 1), &Rgb([40, 40, 40]));
    }

    #[test]
    fn test_materialize_skips_ledgered_ids() {
        let temp_dir = TempDir::new().unwrap();
        let materializer = Materializer::new(SolidTiles::new(), temp_dir.path());
        let mut ledger: Ledger = ["X1"].into_iter().collect();

        let report = materializer.materialize(&catalogue(), &mut ledger).unwrap();

        assert_eq!(report.written, 2);
        assert_eq!(report.already_done, 1);
        assert_eq!(materializer.fetcher.calls.get(), 2 * HEADINGS.len());
        assert!(temp_dir.path().join("France").join("X2.jpg").exists());
        assert!(temp_dir.path().join("Japan").join("J1.jpg").exists());
        assert!(!temp_dir.path().join("France").join("X1.jpg").exists());
        assert_eq!(ledger.len(), 3);

        let saved = image::open(temp_dir.path().join("Japan").join("J1.jpg")).unwrap();
        assert_eq!(saved.width(), 32);
        assert_eq!(saved.height(), 8);
    }

    #[test]
    fn test_failed_fetch_is_not_ledgered() {
        let temp_dir = TempDir::new().unwrap();
        let materializer = Materializer::new(SolidTiles::failing_at(35.6), temp_dir.path());
        let mut ledger = Ledger::new();

        let report = materializer.materialize(&catalogue(), &mut ledger).unwrap();

        assert_eq!(report.written, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "J1");
        assert!(!ledger.contains("J1"));
        assert!(ledger.contains("X1"));
    }

    #[test]
    fn test_directory_failure_aborts_and_flushes_ledger() {
        let temp_dir = TempDir::new().unwrap();
        let images = temp_dir.path().join("images");
        fs::create_dir_all(&images).unwrap();
        // A plain file where the Japan directory should go.
        fs::write(images.join("Japan"), b"not a dir").unwrap();
        let ledger_path = temp_dir.path().join("ledger.json");

        let materializer = Materializer::new(SolidTiles::new(), &images);
        let err = materializer.run(&catalogue(), &ledger_path).unwrap_err();

        assert!(matches!(err, StorageError::CreateDir { .. }));
        let ledger = Ledger::load(&ledger_path).unwrap();
        assert!(ledger.contains("X1"));
        assert!(ledger.contains("X2"));
        assert!(!ledger.contains("J1"));
    }

    #[test]
    fn test_failed_write_leaves_no_image_and_no_ledger_entry() {
        let temp_dir = TempDir::new().unwrap();
        let images = temp_dir.path().join("images");
        // A directory where the temporary file for X2 would be written.
        fs::create_dir_all(images.join("France").join("X2.jpg.tmp")).unwrap();
        let ledger_path = temp_dir.path().join("ledger.json");

        let materializer = Materializer::new(SolidTiles::new(), &images);
        let err = materializer.run(&catalogue(), &ledger_path).unwrap_err();

        assert!(matches!(err, StorageError::Image { ref path, .. } if path.ends_with("X2.jpg")));
        assert!(images.join("France").join("X1.jpg").exists());
        assert!(!images.join("France").join("X2.jpg").exists());
        assert!(!images.join("France").join("X1.jpg.tmp").exists());
        let ledger = Ledger::load(&ledger_path).unwrap();
        assert!(ledger.contains("X1"));
        assert!(!ledger.contains("X2"));
        assert!(!ledger.contains("J1"));
    }
}
