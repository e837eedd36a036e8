use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use vectile::mvt::encode_tile;

pub fn run(cli: &crate::cli::Cli, args: &crate::cli::TileArgs) -> Result<()> {
    let config = super::load_config(cli)?;
    let out_path = args.output.clone().unwrap_or_else(|| PathBuf::from(format!("{}_{}_{}.mvt", args.z, args.x, args.y)));

    // keep the expiry thread alive for the duration of the request
    let _disk_cache = config.disk_cache_manager()?;
    let assembler = config.tile_assembler();

    let tile = assembler
        .try_request_tile(&args.descriptor, args.time_tag.as_deref(), args.z, args.x, args.y, args.context.as_deref())
        .with_context(|| format!("tile {}/{}/{} of {}", args.z, args.x, args.y, args.descriptor))?;
    let bytes = encode_tile(&tile)?;

    std::fs::write(&out_path, &bytes).with_context(|| format!("write {}", out_path.display()))?;
    let features: usize = tile.layers.iter().map(|l| l.features.len()).sum();
    info!(path = %out_path.display(), bytes = bytes.len(), features, "tile written");
    println!("{} ({} bytes, {} features)", out_path.display(), bytes.len(), features);
    Ok(())
}
