pub mod cache;
pub mod cache_path;
pub mod envelope;
pub mod inspect;
pub mod tile;

use anyhow::Result;
use vectile::Config;

/// Config from `--config`, or defaults.
pub fn load_config(cli: &crate::cli::Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}
