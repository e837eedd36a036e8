mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::{cache, cache_path, envelope, inspect, tile};
use tracing_subscriber::EnvFilter;

/// Log to stderr. `-v` enables info, `-vv` debug; RUST_LOG overrides both.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

pub fn run() -> anyhow::Result<()> {
    use clap::Parser;

    let cli = Cli::parse();
    init_logging(cli.verbose);
    match &cli.command {
        Commands::Tile(args) => tile::run(&cli, args),
        Commands::Inspect(args) => inspect::run(&cli, args),
        Commands::Envelope(args) => envelope::run(&cli, args),
        Commands::CachePath(args) => cache_path::run(&cli, args),
        Commands::Cache(args) => cache::run(&cli, args),
    }
}

fn main() -> anyhow::Result<()> { run() }
