//! forest-sorter CLI tool
//!
//! Sorts every snapshot of a halo catalogue into forest order and renumbers
//! all temporal IDs to match. The output catalogue is staged next to its
//! destination and only appears once the whole run has succeeded.
//!
//! Options can also be given as `FOREST_SORTER_*` environment variables or in
//! a `.env` file.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use forest_sorter::config::{parse_field_list, parse_multiplier};
use forest_sorter::logging::{format_duration, init_logging};
use forest_sorter::{
    sort_catalogue, sort_error, verify_catalogue, Catalogue, Provenance, SortConfig,
    StagedCatalogue,
};

#[cfg(feature = "low-mem-alloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "forest-sorter")]
#[command(version, about = "Sort halo catalogues into forest order and renumber temporal IDs")]
struct Cli {
    /// Input catalogue directory
    #[arg(short = 'f', long = "fname-in", env = "FOREST_SORTER_INPUT")]
    fname_in: PathBuf,

    /// Output catalogue directory
    #[arg(short = 'o', long = "fname-out", env = "FOREST_SORTER_OUTPUT")]
    fname_out: PathBuf,

    /// Comma-separated sort keys, outer-most first ("none" disables a key)
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

    /// Worker threads (defaults to the number of CPUs)
    #[arg(long, env = "FOREST_SORTER_THREADS")]
    threads: Option<usize>,

    /// JSON file with defaults for the options above
    #[arg(long, env = "FOREST_SORTER_CONFIG")]
    config: Option<PathBuf>,

    /// Replace an existing output catalogue
    #[arg(long)]
    overwrite: bool,

    /// Check the output after writing it
    #[arg(long)]
    verify: bool,
}

impl Cli {
    fn sort_config(&self) -> Result<SortConfig> {
        let mut config = match &self.config {
            Some(path) => SortConfig::from_json_file(path)?,
            None => SortConfig::default(),
        };
        if let Some(fields) = &self.sort_fields {
            config.sort_fields = parse_field_list(fields);
        }
        if let Some(halo_id) = &self.halo_id {
            config.unique_id_field = halo_id.clone();
        }
        if let Some(fields) = &self.id_fields {
            config.id_fields = parse_field_list(fields);
        }
        if let Some(multiplier) = self.index_mult_factor {
            config.multiplier = multiplier;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        Ok(config.validate()?)
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.sort_config()?;

    info!("Running forest-sorter with:");
    info!("  input:           {}", cli.fname_in.display());
    info!("  output:          {}", cli.fname_out.display());
    info!("  sort fields:     {}", config.sort_fields.join(", "));
    info!("  halo ID field:   {}", config.unique_id_field);
    info!("  ID fields:       {}", config.id_fields.join(", "));
    info!("  ID multiplier:   {}", config.multiplier);
    info!("  threads:         {}", config.threads);

    let start_time = Instant::now();
    let source = Catalogue::open(&cli.fname_in)?;
    let staged = StagedCatalogue::create(&source, &cli.fname_out, cli.overwrite)?;

    let summary = sort_catalogue(&source, &staged, &config)?;

    let provenance = Provenance {
        tool: "forest-sorter".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        created_at: Utc::now(),
        source: cli.fname_in.display().to_string(),
        sort_fields: config.sort_fields.clone(),
        multiplier: config.multiplier,
    };
    let output = staged
        .commit(Some(provenance))
        .with_context(|| format!("Failed to commit output to {}", cli.fname_out.display()))?;

    info!(
        "Sorted {} snapshots ({} halos) in {}; {} empty, {} copied",
        summary.sorted_snapshots.len(),
        summary.halos,
        format_duration(start_time.elapsed()),
        summary.empty_snapshots.len(),
        summary.copied_groups.len()
    );

    if cli.verify {
        let report = verify_catalogue(&output, &config)?;
        if !report.is_ok() {
            for violation in &report.violations {
                error!("{}", violation);
            }
            anyhow::bail!(
                "Output failed verification with {} violations",
                report.violation_count()
            );
        }
        info!("Output verified");
    }

    Ok(())
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_logging();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match sort_error(&e) {
                Some(kind) => error!("Sort aborted ({}): {:#}", kind.kind(), e),
                None => error!("{:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}
