//! Sovereignty Atlas - command line entry point
//!
//! Recomputes the period cache from a JSON dataset, exports the tile index,
//! and queries or invalidates a persisted cache snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;

use sovereignty_atlas::cache::sources::Dataset;
use sovereignty_atlas::cache::store::{MemoryStore, SovereigntyStore};
use sovereignty_atlas::core::config::AtlasConfig;
use sovereignty_atlas::core::error::Result;
use sovereignty_atlas::core::period::Period;
use sovereignty_atlas::AtlasService;

#[derive(Parser, Debug)]
#[command(name = "sovereignty-atlas")]
#[command(about = "Resolve and cache historical sovereignty per map region")]
struct Cli {
    /// Optional TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild cached sovereignty for a year range
    Recompute {
        /// Directory holding regions.json, markers.json and countries.json
        #[arg(long)]
        data: PathBuf,
        /// Cache snapshot file, created if missing
        #[arg(long)]
        cache: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        start: i32,
        #[arg(long, allow_hyphen_values = true)]
        end: i32,
        /// One period per month instead of per year
        #[arg(long)]
        monthly: bool,
    },
    /// Write the tile index for a dataset as JSON
    Tiles {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Print cached records for one period
    Query {
        #[arg(long)]
        cache: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        year: i32,
        #[arg(long)]
        month: Option<u8>,
    },
    /// Delete cached records for everything, a year, or one month
    Invalidate {
        #[arg(long)]
        cache: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        year: Option<i32>,
        #[arg(long, requires = "year")]
        month: Option<u8>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sovereignty_atlas=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AtlasConfig::load(path)?,
        None => AtlasConfig::default(),
    };

    match cli.command {
        Command::Recompute {
            data,
            cache,
            start,
            end,
            monthly,
        } => recompute(&config, &data, &cache, start, end, monthly),
        Command::Tiles { data, out } => export_tiles(&config, &data, &out),
        Command::Query { cache, year, month } => query(&cache, year, month),
        Command::Invalidate { cache, year, month } => invalidate(&cache, year, month),
    }
}

fn recompute(
    config: &AtlasConfig,
    data: &Path,
    cache: &Path,
    start: i32,
    end: i32,
    monthly: bool,
) -> Result<()> {
    let dataset = Arc::new(Dataset::load(data)?);
    let store = Arc::new(MemoryStore::load(cache)?);
    let service = AtlasService::from_dataset(config, dataset, store.clone())?;

    let rt = Runtime::new()?;
    let _guard = rt.enter();
    let handle = service.trigger_recompute(start, end, monthly)?;
    let status = rt.block_on(handle.wait());

    store.save(cache)?;

    let snapshot = handle.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    tracing::info!(
        job_id = %handle.id(),
        ?status,
        records = store.len(),
        "Recompute complete"
    );
    Ok(())
}

fn export_tiles(config: &AtlasConfig, data: &Path, out: &Path) -> Result<()> {
    let dataset = Arc::new(Dataset::load(data)?);
    let service = AtlasService::from_dataset(config, dataset, Arc::new(MemoryStore::new()))?;

    let index = service.tiles();
    let json = serde_json::to_string_pretty(&index.to_tiles())?;
    std::fs::write(out, json)?;
    tracing::info!(
        tiles = index.tile_count(),
        regions = index.region_count(),
        out = %out.display(),
        "Tile index written"
    );
    Ok(())
}

fn query(cache: &Path, year: i32, month: Option<u8>) -> Result<()> {
    let store = MemoryStore::load(cache)?;
    let records = store.find(Period { year, month })?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

fn invalidate(cache: &Path, year: Option<i32>, month: Option<u8>) -> Result<()> {
    let store = MemoryStore::load(cache)?;
    let removed = store.invalidate(year, month)?;
    store.save(cache)?;
    println!("Removed {removed} cached records");
    Ok(())
}
