//! Check that a catalogue is forest-sorted and that every temporal ID in it
//! resolves. Exits non-zero if any violation is found.

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

use forest_sorter::config::{parse_field_list, parse_multiplier};
use forest_sorter::logging::init_logging;
use forest_sorter::verify::MAX_VIOLATIONS_PER_SNAPSHOT;
use forest_sorter::{verify_catalogue, Catalogue, SortConfig};

#[derive(Parser)]
#[command(name = "verify_forest_order")]
#[command(about = "Verify sort order and ID consistency of a halo catalogue")]
struct Cli {
    /// Catalogue directory to check
    catalogue: PathBuf,

    /// Comma-separated sort keys the catalogue should be ordered by
    #[arg(short = 's', long = "sort-fields", env = "FOREST_SORTER_SORT_FIELDS")]
    sort_fields: Option<String>,

    /// Field holding each halo's own temporal ID
    #[arg(short = 'i', long = "halo-id", env = "FOREST_SORTER_HALO_ID")]
    halo_id: Option<String>,

    /// Comma-separated fields holding temporal IDs
    #[arg(short = 'p', long = "id-fields", env = "FOREST_SORTER_ID_FIELDS")]
    id_fields: Option<String>,

    /// Temporal ID multiplier (e.g. 1e12)
    #[arg(
        short = 'x',
        long = "index-mult-factor",
        env = "FOREST_SORTER_INDEX_MULT_FACTOR",
        value_parser = parse_multiplier
    )]
    index_mult_factor: Option<u64>,
}

fn run(cli: &Cli) -> Result<bool> {
    let mut config = SortConfig::default();
    if let Some(fields) = &cli.sort_fields {
        config.sort_fields = parse_field_list(fields);
    }
    if let Some(halo_id) = &cli.halo_id {
        config.unique_id_field = halo_id.clone();
    }
    if let Some(fields) = &cli.id_fields {
        config.id_fields = parse_field_list(fields);
    }
    if let Some(multiplier) = cli.index_mult_factor {
        config.multiplier = multiplier;
    }

    let catalogue = Catalogue::open(&cli.catalogue)?;
    if let Some(provenance) = &catalogue.manifest().provenance {
        info!(
            "Written by {} {} at {} from {}",
            provenance.tool, provenance.version, provenance.created_at, provenance.source
        );
    }

    let report = verify_catalogue(&catalogue, &config)?;
    for violation in &report.violations {
        error!("{}", violation);
    }
    if report.suppressed > 0 {
        error!(
            "... and {} more (at most {} are listed per snapshot)",
            report.suppressed, MAX_VIOLATIONS_PER_SNAPSHOT
        );
    }

    if report.is_ok() {
        println!(
            "OK: {} snapshots, {} halos, {} references",
            report.snapshots_checked, report.halos_checked, report.references_checked
        );
    } else {
        println!("FAILED: {} violations", report.violation_count());
    }
    Ok(report.is_ok())
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_logging();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}
