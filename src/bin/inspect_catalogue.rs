//! Print the groups, fields and provenance of a catalogue

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use forest_sorter::logging::init_logging;
use forest_sorter::snapshot::snapshot_number;
use forest_sorter::Catalogue;

#[derive(Parser)]
#[command(name = "inspect_catalogue")]
#[command(about = "Show the layout of a halo catalogue")]
struct Cli {
    /// Catalogue directory
    catalogue: PathBuf,

    /// Print the manifest as JSON instead
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let catalogue = Catalogue::open(&cli.catalogue)?;
    let manifest = catalogue.manifest();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(manifest)?);
        return Ok(());
    }

    println!("Catalogue: {}", catalogue.root().display());
    println!("Format version: {}", manifest.format_version);
    match &manifest.provenance {
        Some(p) => {
            println!("Written by: {} {} at {}", p.tool, p.version, p.created_at);
            println!("Source: {}", p.source);
            println!("Sort fields: {}", p.sort_fields.join(", "));
            println!("ID multiplier: {}", p.multiplier);
        }
        None => println!("Written by: (no provenance)"),
    }

    for group in &manifest.groups {
        let kind = match snapshot_number(&group.name) {
            Some(number) => format!("snapshot {}", number),
            None => "metadata".to_string(),
        };
        let short_sha = &group.sha256[..12.min(group.sha256.len())];
        println!("\n{} [{}] {} ({}...)", group.name, kind, group.file, short_sha);
        for field in &group.fields {
            println!(
                "  {:<24} {:>4} x{:<3} {:>12} records",
                field.name, field.dtype, field.width, field.len
            );
        }
    }
    Ok(())
}
