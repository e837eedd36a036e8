use std::path::PathBuf;

/// Vector tiles from shapefile datasets
#[derive(clap::Parser, Debug)]
#[command(name = "vectile", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// JSON configuration file
    #[arg(short, long, global = true, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Assemble one tile and write its encoded bytes
    Tile(TileArgs),

    /// Print the layers, keys and decoded geometry of an encoded tile
    Inspect(InspectArgs),

    /// Print the WGS84 and Mercator envelopes of a tile
    Envelope(EnvelopeArgs),

    /// Print the cache directory a descriptor maps to
    CachePath(CachePathArgs),

    /// Disk cache administration
    Cache(CacheArgs),
}

#[derive(clap::Args, Debug)]
pub struct TileArgs {
    /// Dataset URI (http, https or file), or a path relative to --context
    pub descriptor: String,
    pub z: u8,
    pub x: u32,
    pub y: u32,

    /// Hex version tag of the dataset
    #[arg(short, long)]
    pub time_tag: Option<String>,

    /// Base URI for relative descriptors
    #[arg(long)]
    pub context: Option<String>,

    /// Output file, defaults to "<z>_<x>_<y>.mvt"
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct InspectArgs {
    /// Encoded tile file
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub file: PathBuf,

    /// Also print every feature's decoded rings
    #[arg(long)]
    pub rings: bool,
}

#[derive(clap::Args, Debug)]
pub struct EnvelopeArgs {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

#[derive(clap::Args, Debug)]
pub struct CachePathArgs {
    pub descriptor: String,

    #[arg(short, long)]
    pub time_tag: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(clap::Subcommand, Debug)]
pub enum CacheAction {
    /// List leaf directories with file counts and sizes
    List,
    /// Delete cache files, keeping directories
    Flush,
    /// Remove a subtree (relative to the cache root)
    Delete {
        path: PathBuf,
    },
    /// Run one expiry pass now
    Expire,
}
