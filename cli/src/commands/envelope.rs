use anyhow::{bail, Result};
use vectile::{TileCoord, TileEnvelope};

pub fn run(cli: &crate::cli::Cli, args: &crate::cli::EnvelopeArgs) -> Result<()> {
    let config = super::load_config(cli)?;
    let tile = TileCoord::new(args.z, args.x, args.y);
    if !tile.is_valid() {
        bail!("tile {tile} is outside the grid");
    }

    let env = TileEnvelope::for_tile_with(config.mercator, tile);
    let (w, m) = (env.wgs84(), env.mercator());
    println!("tile      {tile}");
    println!("wgs84     min ({:.6}, {:.6})  max ({:.6}, {:.6})", w.min().x, w.min().y, w.max().x, w.max().y);
    println!("mercator  min ({:.2}, {:.2})  max ({:.2}, {:.2})", m.min().x, m.min().y, m.max().x, m.max().y);
    Ok(())
}
