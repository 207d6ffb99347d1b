//! Catalogue and ledger files are read once per phase and rewritten whole,
//! so only one process may work on a data directory at a time.

pub mod audit;
pub mod catalogue;
pub mod config;
pub mod discovery;
pub mod error;
pub mod ledger;
pub mod materialize;
pub mod model;
pub mod oracle;
pub mod resolver;
pub mod scan;
pub mod scrub;
pub mod store;

pub use audit::{AuditReport, SyncAuditor};
pub use catalogue::Catalogue;
pub use config::{DataLayout, HttpSettings};
pub use discovery::{Discovery, DiscoverySummary, PassReport, RegionOutcome};
pub use ledger::Ledger;
pub use materialize::{MaterializeReport, Materializer, StreetViewTiles, TileFetcher};
pub use model::{Coordinate, DensityTier, PanoramaRecord, Region, RegionBounds};
pub use oracle::{CoverageOracle, CoverageReport, StreetViewOracle};
pub use resolver::{CountryResolver, Geocoder, NominatimGeocoder, Translator, WebTranslator};
pub use scrub::{ScrubPlan, ScrubReport, Scrubber};
