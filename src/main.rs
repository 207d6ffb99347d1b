use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use panoscout::audit::DiskInventory;
use panoscout::config::{
    DEFAULT_CROP_FRACTION, DEFAULT_MAX_ATTEMPTS, DEFAULT_USER_AGENT, load_regions, resolve_api_key,
};
use panoscout::{
    Catalogue, CountryResolver, DataLayout, Discovery, HttpSettings, Ledger, Materializer,
    NominatimGeocoder, Scrubber, StreetViewOracle, StreetViewTiles, SyncAuditor, WebTranslator,
};
use panoscout::scrub::read_history;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

/// Phases run in the order listed below; any combination of flags may be given.
#[derive(Parser, Debug)]
#[command(
    name = "panoscout",
    version,
    about = "Discover, stitch and scrub street-level panoramas"
)]
struct Cli {
    /// Directory holding the catalogue, ledger and images
    #[arg(long, value_name = "DIR", default_value = "data", env = "PANOSCOUT_DATA_DIR")]
    data_dir: PathBuf,

    /// Region configuration file
    #[arg(long, value_name = "FILE", default_value = "regions.json")]
    regions: PathBuf,

    /// Street-view API key (overrides the key file)
    #[arg(long, env = "STREETVIEW_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// File containing the API key
    #[arg(long, value_name = "FILE", default_value = "API.txt")]
    api_key_file: PathBuf,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// User agent sent to the geocoder
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    /// Run N discovery passes over every region
    #[arg(long, value_name = "N")]
    discover: Option<u32>,

    /// Samples per region before giving up on it for the pass
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_ATTEMPTS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    max_attempts: u32,

    /// Fetch and stitch every catalogued panorama not in the ledger
    #[arg(long)]
    materialize: bool,

    /// Remove images matching this placeholder template
    #[arg(long, value_name = "IMAGE")]
    scrub: Option<PathBuf>,

    /// Share of width and height used for the center-crop hash
    #[arg(long, default_value_t = DEFAULT_CROP_FRACTION)]
    crop_fraction: f32,

    /// Only show what the scrub would remove
    #[arg(long)]
    dry_run: bool,

    /// Do not ask before deleting
    #[arg(long, short = 'y')]
    yes: bool,

    /// Reconcile the ledger with the images on disk
    #[arg(long)]
    audit: bool,

    /// Print catalogue, ledger and image counts
    #[arg(long)]
    status: bool,
}

impl Cli {
    fn http_settings(&self) -> Result<HttpSettings> {
        let api_key = resolve_api_key(self.api_key.as_deref(), &self.api_key_file)?;
        Ok(HttpSettings {
            api_key,
            timeout: Duration::from_secs(self.timeout_secs),
            user_agent: self.user_agent.clone(),
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "panoscout=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let layout = DataLayout::new(&cli.data_dir);
    info!(data_dir = %layout.root.display(), "panoscout starting");

    let nothing_selected = cli.discover.is_none()
        && !cli.materialize
        && cli.scrub.is_none()
        && !cli.audit
        && !cli.status;

    if let Some(passes) = cli.discover {
        run_discovery(&cli, &layout, passes)?;
    }
    if cli.materialize {
        run_materialize(&cli, &layout)?;
    }
    if let Some(template) = &cli.scrub {
        run_scrub(&cli, &layout, template)?;
    }
    if cli.audit {
        run_audit(&layout)?;
    }
    if cli.status || nothing_selected {
        print_status(&layout)?;
    }

    Ok(())
}

fn run_discovery(cli: &Cli, layout: &DataLayout, passes: u32) -> Result<()> {
    let regions = load_regions(&cli.regions)
        .with_context(|| format!("Failed to load regions from {:?}", cli.regions))?;
    println!(
        "▶ Discovering panoramas: {} pass(es) over {} region(s)",
        passes,
        regions.len()
    );

    let settings = cli.http_settings()?;
    let resolver = CountryResolver::new(
        NominatimGeocoder::new(&settings)?,
        WebTranslator::new(&settings)?,
    );
    let discovery = Discovery::new(StreetViewOracle::new(&settings)?, resolver)
        .with_max_attempts(cli.max_attempts);

    let mut rng = rand::thread_rng();
    let summary = benchmark("discovery", || {
        discovery.run(&regions, passes, &layout.catalogue(), &mut rng)
    })
    .with_context(|| format!("Failed to update catalogue {:?}", layout.catalogue()))?;

    println!(
        "✅ {} committed, {} failed, {} new record(s); catalogue now holds {}",
        summary.committed, summary.failed, summary.new_records, summary.total_records
    );
    Ok(())
}

fn run_materialize(cli: &Cli, layout: &DataLayout) -> Result<()> {
    let catalogue = Catalogue::load(&layout.catalogue())
        .with_context(|| format!("Failed to load catalogue {:?}", layout.catalogue()))?;
    println!(
        "▶ Materializing {} catalogued panorama(s) into {}",
        catalogue.record_count(),
        layout.images().display()
    );

    let settings = cli.http_settings()?;
    let materializer = Materializer::new(StreetViewTiles::new(&settings)?, layout.images());
    let report = benchmark("materialization", || {
        materializer.run(&catalogue, &layout.ledger())
    })
    .context("Materialization aborted")?;

    println!(
        "✅ {} stitched, {} already present, {} left for a later run",
        report.written,
        report.already_done,
        report.failed.len()
    );
    for (pano_id, reason) in &report.failed {
        eprintln!("⚠️  {pano_id}: {reason}");
    }
    Ok(())
}

fn run_scrub(cli: &Cli, layout: &DataLayout, template: &Path) -> Result<()> {
    println!(
        "▶ Scrubbing placeholders matching {} in {}",
        template.display(),
        layout.images().display()
    );
    let scrubber = Scrubber::with_crop_fraction(template, cli.crop_fraction)
        .with_context(|| format!("Failed to hash template {:?}", template))?;

    let plan = benchmark("scan", || scrubber.find_matches(&layout.images()));
    if plan.matches.is_empty() {
        println!("No placeholders found among {} image(s).", plan.scanned);
        return Ok(());
    }
    if !cli.dry_run && !cli.yes {
        let proceed = Confirm::new()
            .with_prompt(format!("Delete {} placeholder image(s)?", plan.matches.len()))
            .default(false)
            .interact()?;
        if !proceed {
            println!("Aborted; nothing was deleted.");
            return Ok(());
        }
    }

    let report = scrubber
        .apply(layout, &plan, cli.dry_run)
        .context("Scrub failed")?;

    for path in &report.matched {
        if report.dry_run {
            println!("   📦 [dry-run] REMOVE {}", path.display());
        } else {
            println!("   🗑️  Deleted {}", path.display());
        }
    }
    if report.unreadable > 0 {
        eprintln!("⚠️  {} image(s) could not be read", report.unreadable);
    }
    if report.dry_run {
        println!("\n⚠️  Dry-run only; no files were changed.");
    } else {
        println!(
            "\n✅ Removed {} of {} image(s); history in {}",
            report.matched.len(),
            report.scanned,
            layout.scrub_history().display()
        );
    }
    Ok(())
}

fn run_audit(layout: &DataLayout) -> Result<()> {
    println!("▶ Auditing ledger against {}", layout.images().display());
    let report = SyncAuditor::new(layout.clone())
        .run()
        .context("Ledger audit failed")?;

    if report.was_synced() {
        println!("✅ Ledger in sync ({} image(s))", report.on_disk);
    } else {
        println!(
            "🔄 Ledger repaired: {} → {} id(s), {} added from disk",
            report.ledger_before,
            report.ledger_after,
            report.added.len()
        );
    }
    println!(
        "   catalogue records: {}, ledger ids: {}",
        report.catalogue_records, report.ledger_after
    );
    Ok(())
}

fn print_status(layout: &DataLayout) -> Result<()> {
    let catalogue = Catalogue::load(&layout.catalogue())
        .with_context(|| format!("Failed to load catalogue {:?}", layout.catalogue()))?;
    let ledger = Ledger::load(&layout.ledger())
        .with_context(|| format!("Failed to load ledger {:?}", layout.ledger()))?;
    let on_disk = DiskInventory::scan(&layout.images()).files;
    let scrubbed = read_history(&layout.scrub_history())
        .with_context(|| format!("Failed to read {:?}", layout.scrub_history()))?
        .len();

    println!("🗂️  {}", layout.root.display());
    println!("     countries: {}", catalogue.country_count());
    println!("     catalogue records: {}", catalogue.record_count());
    println!("     ledger ids: {}", ledger.len());
    println!("     images on disk: {}", on_disk);
    println!("     placeholders scrubbed: {}", scrubbed);
    Ok(())
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
