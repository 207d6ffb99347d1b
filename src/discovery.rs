use rand::Rng;
use std::path::Path;
use tracing::{info, warn};

use crate::catalogue::Catalogue;
use crate::config::DEFAULT_MAX_ATTEMPTS;
use crate::error::StorageError;
use crate::model::{Coordinate, PanoramaRecord, Region};
use crate::oracle::CoverageOracle;
use crate::resolver::{CountryResolver, Geocoder, Translator};

#[derive(Debug, Clone, PartialEq)]
pub enum RegionOutcome {
    Committed {
        region: String,
        country: String,
        record: PanoramaRecord,
        attempts: u32,
        /// `false` when the panorama was already known for that country.
        new: bool,
    },
    /// No coverage within `attempts` samples.
    Exhausted { region: String, attempts: u32 },
    /// Coverage found but the country lookup failed; nothing committed.
    Unresolved {
        region: String,
        record: PanoramaRecord,
        reason: String,
    },
}

#[derive(Debug, Default)]
pub struct PassReport {
    /// Records found during this pass only.
    pub additions: Catalogue,
    pub outcomes: Vec<RegionOutcome>,
}

impl PassReport {
    pub fn committed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, RegionOutcome::Committed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.committed()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub passes: u32,
    pub committed: usize,
    pub failed: usize,
    /// Records that were not in the catalogue before this run.
    pub new_records: usize,
    pub total_records: usize,
}

/// Uniform sample inside the region's bounding box.
pub fn sample_coordinate<R: Rng + ?Sized>(region: &Region, rng: &mut R) -> Coordinate {
    let b = &region.bounds;
    Coordinate::new(
        rng.gen_range(b.min_lat..=b.max_lat),
        rng.gen_range(b.min_lng..=b.max_lng),
    )
}

pub struct Discovery<O, G, T> {
    oracle: O,
    resolver: CountryResolver<G, T>,
    max_attempts: u32,
}

impl<O, G, T> Discovery<O, G, T>
where
    O: CoverageOracle,
    G: Geocoder,
    T: Translator,
{
    pub fn new(oracle: O, resolver: CountryResolver<G, T>) -> Self {
        Self {
            oracle,
            resolver,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Zero is raised to one; the CLI rejects it before it gets here.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sample until coverage is found or the attempt budget runs out.
    fn find_panorama<R: Rng + ?Sized>(
        &self,
        region: &Region,
        rng: &mut R,
    ) -> Option<(PanoramaRecord, u32)> {
        let radius = region.radius_m();
        for attempt in 1..=self.max_attempts {
            let sample = sample_coordinate(region, rng);
            let report = self.oracle.check_coverage(sample, radius);
            if let Some(panorama) = report.panorama {
                return Some((panorama, attempt));
            }
        }
        None
    }

    fn discover_region<R: Rng + ?Sized>(
        &self,
        region: &Region,
        additions: &mut Catalogue,
        rng: &mut R,
    ) -> RegionOutcome {
        let Some((record, attempts)) = self.find_panorama(region, rng) else {
            warn!(region = %region.name, attempts = self.max_attempts, "no coverage found, region exhausted");
            return RegionOutcome::Exhausted {
                region: region.name.clone(),
                attempts: self.max_attempts,
            };
        };

        match self.resolver.resolve_country(record.coordinate()) {
            Ok(country) => {
                let new = additions.insert(&country, record.clone());
                info!(
                    region = %region.name,
                    country = %country,
                    pano_id = %record.pano_id,
                    lat = record.lat,
                    lng = record.lng,
                    attempts,
                    "panorama committed"
                );
                RegionOutcome::Committed {
                    region: region.name.clone(),
                    country,
                    record,
                    attempts,
                    new,
                }
            }
            Err(e) => {
                warn!(
                    region = %region.name,
                    pano_id = %record.pano_id,
                    lat = record.lat,
                    lng = record.lng,
                    error = %e,
                    "country lookup failed, skipping region for this pass"
                );
                RegionOutcome::Unresolved {
                    region: region.name.clone(),
                    record,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// One sample per region. Nothing is persisted.
    pub fn run_pass<R: Rng + ?Sized>(&self, regions: &[Region], rng: &mut R) -> PassReport {
        let mut report = PassReport::default();
        for region in regions {
            let outcome = self.discover_region(region, &mut report.additions, rng);
            report.outcomes.push(outcome);
        }
        report
    }

    /// Run `passes` passes, merging each into the on-disk catalogue at `path`.
    pub fn run<R: Rng + ?Sized>(
        &self,
        regions: &[Region],
        passes: u32,
        path: &Path,
        rng: &mut R,
    ) -> Result<DiscoverySummary, StorageError> {
        let mut summary = DiscoverySummary::default();
        for pass in 1..=passes {
            let snapshot = Catalogue::load(path)?;
            let report = self.run_pass(regions, rng);
            let merged = snapshot.merged(&report.additions);
            merged.save(path)?;

            let new_records = merged.record_count() - snapshot.record_count();
            info!(
                pass,
                committed = report.committed(),
                failed = report.failed(),
                new_records,
                total = merged.record_count(),
                "discovery pass saved"
            );
            summary.passes = pass;
            summary.committed += report.committed();
            summary.failed += report.failed();
            summary.new_records += new_records;
            summary.total_records = merged.record_count();
        }
        Ok(summary)
    }
}
