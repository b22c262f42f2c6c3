//! Command-line inspector for Serato libraries

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use serato_core::{
    CrateId, Database, Id3MarkerStore, LibraryConfig, MarkerFieldStore, TrackMarkers,
};

#[derive(Parser)]
#[command(name = "srt")]
#[command(about = "Inspect and edit Serato library files")]
#[command(version)]
struct Cli {
    /// Volume holding the _Serato_ folder
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Additional volume with its own subcrates (repeatable)
    #[arg(long = "volume")]
    volumes: Vec<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database state, track and crate counts
    Info,

    /// Crate hierarchy with entry counts
    Crates,

    /// Every track in the database
    Tracks,

    /// Markers embedded in an MP3 file, as JSON
    Markers {
        file: PathBuf,
    },

    /// Create a crate and save the library
    Mkcrate {
        name: String,

        /// Full name of the parent crate
        #[arg(short, long)]
        parent: Option<String>,
    },
}

#[derive(Serialize)]
struct MarkersReport<'a> {
    file: String,
    markers: &'a TrackMarkers,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = cli
        .volumes
        .iter()
        .fold(LibraryConfig::new(&cli.root), |config, volume| {
            config.with_volume(volume)
        });
    debug!("Library config: {:?}", config);

    match cli.command {
        Commands::Info => info(config),
        Commands::Crates => crates(config),
        Commands::Tracks => tracks(config),
        Commands::Markers { file } => markers(&file),
        Commands::Mkcrate { name, parent } => mkcrate(config, &name, parent.as_deref()),
    }
}

fn open(config: LibraryConfig) -> anyhow::Result<Database<Id3MarkerStore>> {
    let root = config.root.clone();
    Database::open(config, Id3MarkerStore::new())
        .with_context(|| format!("Cannot open library at {:?}", root))
}

fn info(config: LibraryConfig) -> anyhow::Result<()> {
    let db = open(config)?;

    println!("Database: {}", if db.is_valid() { "valid" } else { "invalid (not loaded)" });
    println!("Tracks:   {}", db.tracks().len());
    println!("Crates:   {}", db.crates().len());

    let unknown = db.crate_order().unknown_crate_names();
    if !unknown.is_empty() {
        println!("Unresolved crate names: {}", unknown.len());
    }
    Ok(())
}

fn crates(config: LibraryConfig) -> anyhow::Result<()> {
    let db = open(config)?;
    let tree = db.crates();

    for id in tree.depth_first() {
        let krate = tree.get(id);
        println!(
            "{}{} ({})",
            "  ".repeat(tree.depth(id)),
            krate.short_name(),
            krate.track_count()
        );
    }
    Ok(())
}

fn tracks(config: LibraryConfig) -> anyhow::Result<()> {
    let db = open(config)?;

    for track in db.tracks() {
        println!(
            "{}  {} - {}",
            track.path(),
            track.artist().unwrap_or("?"),
            track.title().unwrap_or("?")
        );
    }
    Ok(())
}

fn markers(file: &Path) -> anyhow::Result<()> {
    let store = Id3MarkerStore::new();
    let fields = store
        .read_fields(file)
        .with_context(|| format!("Cannot read tags of {:?}", file))?;
    let markers = TrackMarkers::from_fields(&fields, store.legacy_layout())?;

    let report = MarkersReport {
        file: file.display().to_string(),
        markers: &markers,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn mkcrate(config: LibraryConfig, name: &str, parent: Option<&str>) -> anyhow::Result<()> {
    let mut db = open(config)?;

    let parent_id = match parent {
        Some(parent_name) => match db.crates().find_by_full_name(parent_name) {
            Some(id) => id,
            None => bail!("No crate named {:?}", parent_name),
        },
        None => CrateId::ROOT,
    };

    let id = db.crates_mut().try_create_child(parent_id, name)?;
    let full_name = db.crates().get(id).name().to_string();
    let summary = db.save_if_modified()?;
    println!("✓ Created {} ({} files written)", full_name, summary.files_written());
    Ok(())
}
