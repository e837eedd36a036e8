use std::path::Path;
use std::sync::Arc;

use shapefile::dbase::{self, FieldValue, TableWriterBuilder};
use shapefile::{Point, Polygon, PolygonRing};
use tempfile::TempDir;
use url::Url;
use vectile::mvt::{decode_geometry, decode_tile, encode_tile};
use vectile::{DatasetCache, ShapefileLoader, TileAssembler, MARKER_KEY, VERSION};

const WGS84_PRJ: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137,298.257223563]],PRIMEM["Greenwich",0],UNIT["Degree",0.017453292519943295]]"#;

/// Two lon/lat squares: one inside tile 6/31/21, one in the southern hemisphere.
fn write_dataset(dir: &Path) -> Url {
    let table = TableWriterBuilder::new()
        .add_character_field("NAME".try_into().unwrap(), 32)
        .add_numeric_field("POP".try_into().unwrap(), 10, 0);
    let path = dir.join("world.shp");
    let mut writer = shapefile::Writer::from_path(&path, table).unwrap();

    let square = |x0: f64, y0: f64, size: f64| {
        // clockwise outer ring
        Polygon::new(PolygonRing::Outer(vec![
            Point::new(x0, y0),
            Point::new(x0, y0 + size),
            Point::new(x0 + size, y0 + size),
            Point::new(x0 + size, y0),
            Point::new(x0, y0),
        ]))
    };
    for (shape, name, pop) in [(square(-4.0, 49.5, 2.5), "cornwall", 42.0), (square(150.0, -30.0, 1.0), "far", 7.0)] {
        let mut record = dbase::Record::default();
        record.insert("NAME".to_string(), FieldValue::Character(Some(name.to_string())));
        record.insert("POP".to_string(), FieldValue::Numeric(Some(pop)));
        writer.write_shape_and_record(&shape, &record).unwrap();
    }
    drop(writer);
    std::fs::write(dir.join("world.prj"), WGS84_PRJ).unwrap();

    Url::from_file_path(&path).unwrap()
}

fn assembler(geometry_cache: &Path) -> TileAssembler {
    let loader = ShapefileLoader::new(geometry_cache);
    TileAssembler::new(Arc::new(DatasetCache::new(Arc::new(loader))))
}

#[test]
fn shapefile_to_tile() {
    let src = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let descriptor = write_dataset(src.path());

    let tile = assembler(cache.path()).try_request_tile(descriptor.as_str(), None, 6, 31, 21, None).unwrap();
    let layer = &tile.layers[0];
    assert_eq!(layer.name, "world");
    assert_eq!(layer.keys, vec!["NAME", "POP", MARKER_KEY]);
    assert_eq!(layer.features.len(), 1);

    let feature = &layer.features[0];
    let value = |i: usize| &layer.values[feature.tags[2 * i + 1] as usize];
    assert_eq!(value(0).string_value.as_deref(), Some("cornwall"));
    assert_eq!(value(1).int_value, Some(42));
    assert_eq!(value(2).string_value.as_deref(), Some(VERSION));

    let rings = decode_geometry(&feature.geometry).unwrap();
    assert_eq!(rings.len(), 1);
    // lon -4 lies 1.625/5.625 of the way across the tile
    assert!(rings[0].iter().any(|&(x, _)| (x - 1183).abs() <= 2));
    assert!(rings[0].iter().all(|&(x, y)| (0..=4096).contains(&x) && (0..=4096).contains(&y)));
}

#[test]
fn reprojected_copy_is_reused() {
    let src = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let descriptor = write_dataset(src.path());

    let first = assembler(cache.path()).request_tile_bytes(descriptor.as_str(), None, 6, 31, 21, None).unwrap();
    let local = ShapefileLoader::new(cache.path()).local_dir(descriptor.as_str()).unwrap();
    assert!(local.join("world_reprojected.shp").is_file());
    assert!(local.join("world_reprojected.dbf").is_file());

    // the source is gone; a fresh cache must be served from the reprojected copy
    drop(src);
    let second = assembler(cache.path()).request_tile_bytes(descriptor.as_str(), None, 6, 31, 21, None).unwrap();
    assert_eq!(first, second);

    let tile = decode_tile(&second).unwrap();
    assert_eq!(encode_tile(&tile).unwrap(), second);
}

#[test]
fn damaged_reprojected_copy_is_rebuilt() {
    let src = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let descriptor = write_dataset(src.path());

    let first = assembler(cache.path()).request_tile_bytes(descriptor.as_str(), None, 6, 31, 21, None).unwrap();
    let local = ShapefileLoader::new(cache.path()).local_dir(descriptor.as_str()).unwrap();
    std::fs::remove_file(local.join("world_reprojected.dbf")).unwrap();

    let second = assembler(cache.path()).request_tile_bytes(descriptor.as_str(), None, 6, 31, 21, None).unwrap();
    assert_eq!(first, second);
    assert!(local.join("world_reprojected.dbf").is_file());
}

#[test]
fn missing_dataset_fails_cleanly() {
    let cache = TempDir::new().unwrap();
    let missing = Url::from_file_path(cache.path().join("nowhere/none.shp")).unwrap();
    let assembler = assembler(cache.path());
    assert!(assembler.request_tile(missing.as_str(), None, 0, 0, 0, None).is_none());
    assert!(assembler.cache().is_empty());
}
