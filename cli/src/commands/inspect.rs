use anyhow::{Context, Result};
use vectile::mvt::{decode_geometry, decode_tile, Value};

fn show(value: &Value) -> String {
    if let Some(s) = &value.string_value { return format!("{s:?}") }
    if let Some(n) = value.int_value { return n.to_string() }
    if let Some(n) = value.uint_value { return n.to_string() }
    if let Some(n) = value.sint_value { return n.to_string() }
    if let Some(n) = value.double_value { return n.to_string() }
    if let Some(n) = value.float_value { return n.to_string() }
    if let Some(b) = value.bool_value { return b.to_string() }
    "null".to_string()
}

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::InspectArgs) -> Result<()> {
    let bytes = std::fs::read(&args.file).with_context(|| format!("read {}", args.file.display()))?;
    let tile = decode_tile(&bytes).with_context(|| format!("decode {}", args.file.display()))?;

    for layer in &tile.layers {
        println!(
            "layer {:?}: version {}, extent {}, {} features, {} keys, {} values",
            layer.name, layer.version, layer.extent(), layer.features.len(), layer.keys.len(), layer.values.len()
        );
        println!("  keys: {}", layer.keys.join(", "));

        for (i, feature) in layer.features.iter().enumerate() {
            let tags: Vec<String> = feature
                .tags
                .chunks(2)
                .filter_map(|kv| Some(format!("{}={}", layer.keys.get(kv[0] as usize)?, show(layer.values.get(*kv.get(1)? as usize)?))))
                .collect();
            let rings = decode_geometry(&feature.geometry);
            let ring_count = rings.as_ref().map_or(0, Vec::len);
            println!("  [{i}] {:?} rings={ring_count} {}", feature.r#type(), tags.join(" "));

            if args.rings {
                match rings {
                    Some(rings) => {
                        for ring in rings {
                            println!("      {ring:?}");
                        }
                    }
                    None => println!("      (malformed geometry stream)"),
                }
            }
        }
    }
    Ok(())
}
