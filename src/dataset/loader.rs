use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use geo::{Coord, Geometry, MapCoords};
use proj4rs::{proj::Proj as Proj4, transform::transform};
use shapefile::dbase::{self, FieldValue};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::cache_key_dir;
use crate::dataset::download::fetch_component;
use crate::dataset::shape::{geometry_to_shape, shape_to_geometry};
use crate::dataset::{AttributeValue, Attributes, Feature};
use crate::tile::Mercator;

/// Latitude bound applied before projecting geographic coordinates.
const LAT_CLAMP: f64 = 84.0;

/// Source of datasets for the in-memory cache. Returned features are in
/// Mercator meters.
pub trait DatasetLoader: Send + Sync {
    fn load(&self, descriptor: &str) -> Result<Vec<Feature>>;
}

impl<F> DatasetLoader for F
where
    F: Fn(&str) -> Result<Vec<Feature>> + Send + Sync,
{
    fn load(&self, descriptor: &str) -> Result<Vec<Feature>> { self(descriptor) }
}

/// Coordinate system of a shapefile's coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceCrs {
    /// Geographic degrees (any `GEOGCS` without a projection).
    LonLat,
    /// Already Web Mercator meters.
    WebMercator,
    /// Anything else, described by a PROJ.4 string.
    Proj(String),
}

impl SourceCrs {
    /// Classify a `.prj` WKT. An explicit PROJ.4 override wins over the file.
    pub fn detect(prj: Option<&str>, source_proj: Option<&str>) -> Result<Self> {
        if let Some(proj) = source_proj {
            return Ok(SourceCrs::Proj(proj.to_string()));
        }
        let Some(wkt) = prj.map(str::trim).filter(|s| !s.is_empty()) else {
            warn!("no .prj supplied, assuming geographic lon/lat");
            return Ok(SourceCrs::LonLat);
        };

        let upper = wkt.to_ascii_uppercase();
        if upper.starts_with("PROJCS") {
            const MERCATOR_NAMES: [&str; 4] = ["PSEUDO", "AUXILIARY_SPHERE", "WEB_MERCATOR", "MERCATOR"];
            let other_variant = upper.contains("TRANSVERSE") || upper.contains("OBLIQUE");
            if !other_variant && MERCATOR_NAMES.iter().any(|n| upper.contains(n)) {
                return Ok(SourceCrs::WebMercator);
            }
            bail!("unsupported projected coordinate system; supply a PROJ.4 source_proj: {}", first_name(wkt));
        }
        if upper.starts_with("GEOGCS") {
            return Ok(SourceCrs::LonLat);
        }
        bail!("unrecognized .prj contents: {}", first_name(wkt))
    }

    /// Reproject `geometry` into Mercator meters under `model`.
    pub fn to_mercator(&self, geometry: &Geometry<f64>, model: Mercator) -> Result<Geometry<f64>> {
        match self {
            SourceCrs::LonLat => Ok(geometry.map_coords(|c| geographic(c.x, c.y, model))),
            SourceCrs::WebMercator => Ok(geometry.map_coords(|c| {
                let (lon, lat) = Mercator::Spherical.unproject(c.x, c.y);
                geographic(lon, lat, model)
            })),
            SourceCrs::Proj(proj) => {
                let from = Proj4::from_proj_string(proj)
                    .map_err(|e| anyhow!("failed to build source PROJ.4 '{proj}': {e:?}"))?;
                let to = Proj4::from_proj_string("+proj=longlat +datum=WGS84 +no_defs")
                    .map_err(|e| anyhow!("failed to build WGS84 PROJ.4: {e:?}"))?;
                let angular = proj.contains("+proj=longlat") || proj.contains("+proj=latlong");

                geometry.try_map_coords(|c: Coord<f64>| -> Result<Coord<f64>> {
                    let mut point = if angular { (c.x.to_radians(), c.y.to_radians(), 0.0) } else { (c.x, c.y, 0.0) };
                    transform(&from, &to, &mut point).map_err(|e| anyhow!("CRS transform failed: {e:?}"))?;
                    Ok(geographic(point.0.to_degrees(), point.1.to_degrees(), model))
                })
            }
        }
    }
}

#[inline]
fn geographic(lon: f64, lat: f64, model: Mercator) -> Coord<f64> {
    let (x, y) = model.project(lon, lat.clamp(-LAT_CLAMP, LAT_CLAMP));
    Coord { x, y }
}

/// First quoted name in a WKT string, for error messages.
fn first_name(wkt: &str) -> &str {
    wkt.split('"').nth(1).unwrap_or(wkt)
}

/// Loads `.shp` descriptors (http(s) or file URIs) into Mercator features,
/// keeping a reprojected copy under the geometry cache directory.
#[derive(Debug, Clone)]
pub struct ShapefileLoader {
    geometry_cache_dir: PathBuf,
    source_proj: Option<String>,
    mercator: Mercator,
}

impl ShapefileLoader {
    pub fn new(geometry_cache_dir: impl Into<PathBuf>) -> Self {
        Self { geometry_cache_dir: geometry_cache_dir.into(), source_proj: None, mercator: Mercator::default() }
    }

    /// Use a PROJ.4 string for sources whose `.prj` is not lon/lat or Mercator.
    pub fn with_source_proj(mut self, proj: Option<String>) -> Self {
        self.source_proj = proj;
        self
    }

    pub fn with_mercator(mut self, mercator: Mercator) -> Self {
        self.mercator = mercator;
        self
    }

    #[inline] pub fn geometry_cache_dir(&self) -> &Path { &self.geometry_cache_dir }

    /// Local directory holding the fetched and reprojected files of `descriptor`.
    pub fn local_dir(&self, descriptor: &str) -> Result<PathBuf> {
        Ok(self.geometry_cache_dir.join(cache_key_dir(descriptor, None)?))
    }

    fn fetch(&self, url: &Url, dir: &Path, stem: &str) -> Result<()> {
        for (ext, required) in [("shp", true), ("dbf", true), ("shx", false), ("prj", false)] {
            let name = format!("{stem}.{ext}");
            let component = url.join(&name).with_context(|| format!("resolve {name} against {url}"))?;
            let present = fetch_component(&component, &dir.join(&name))?;
            if !present && required {
                bail!("missing dataset component {component}");
            }
            if !present {
                debug!(%component, "optional component not found");
            }
        }
        Ok(())
    }
}

impl DatasetLoader for ShapefileLoader {
    fn load(&self, descriptor: &str) -> Result<Vec<Feature>> {
        let url = Url::parse(descriptor).with_context(|| format!("invalid descriptor {descriptor}"))?;
        let stem = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .and_then(|f| Path::new(f).file_stem())
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("descriptor has no file name: {descriptor}"))?
            .to_string();
        let dir = self.local_dir(descriptor)?;

        let reprojected = dir.join(format!("{stem}_reprojected.shp"));
        if reprojected.is_file() {
            match read_reprojected(&reprojected) {
                Ok(features) => {
                    info!(path = %reprojected.display(), "using cached reprojected geometry");
                    return Ok(features);
                }
                Err(e) => warn!(
                    error = %format!("{e:#}"),
                    path = %reprojected.display(),
                    "cached reprojected geometry unreadable, refetching"
                ),
            }
        }

        self.fetch(&url, &dir, &stem)?;
        let prj = fs::read_to_string(dir.join(format!("{stem}.prj"))).ok();
        let crs = SourceCrs::detect(prj.as_deref(), self.source_proj.as_deref())?;
        debug!(?crs, descriptor, "detected source coordinate system");

        let records = read_shapefile(&dir.join(format!("{stem}.shp")))?;
        let mut features = Vec::with_capacity(records.len());
        let mut skipped = 0usize;
        for (shape, attributes) in records {
            let Some(geometry) = shape_to_geometry(&shape) else {
                skipped += 1;
                continue;
            };
            features.push(Feature::new(crs.to_mercator(&geometry, self.mercator)?, attributes));
        }

        if skipped == 0 {
            if let Err(e) = write_reprojected(&features, &dir, &stem) {
                warn!(error = %format!("{e:#}"), path = %reprojected.display(), "could not write reprojected geometry");
            }
        } else {
            debug!(skipped, "null shapes present, not caching reprojected geometry");
        }
        Ok(features)
    }
}

fn read_reprojected(path: &Path) -> Result<Vec<Feature>> {
    Ok(read_shapefile(path)?
        .into_iter()
        .filter_map(|(shape, attributes)| Some(Feature::new(shape_to_geometry(&shape)?, attributes)))
        .collect())
}

/// Read every shape with its attributes in dBASE field order.
pub fn read_shapefile(path: &Path) -> Result<Vec<(shapefile::Shape, Attributes)>> {
    let dbf = path.with_extension("dbf");
    let fields: Vec<String> = dbase::Reader::from_path(&dbf)
        .with_context(|| format!("Failed to open dBASE file: {}", dbf.display()))?
        .fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect();

    let mut reader = shapefile::Reader::from_path(path)
        .with_context(|| format!("Failed to open shapefile: {}", path.display()))?;

    let mut items = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.context("Error reading shape+record")?;
        let attributes = fields
            .iter()
            .map(|name| (name.clone(), record.get(name).map_or_else(|| String::new().into(), attribute_value)))
            .collect();
        items.push((shape, attributes));
    }
    Ok(items)
}

fn attribute_value(value: &FieldValue) -> AttributeValue {
    fn date(d: &dbase::Date) -> AttributeValue {
        AttributeValue::String(format!("{:04}{:02}{:02}", d.year(), d.month(), d.day()))
    }
    let empty = || AttributeValue::String(String::new());

    match value {
        FieldValue::Character(s) => s.as_deref().map_or_else(empty, AttributeValue::from),
        FieldValue::Memo(s) => AttributeValue::String(s.clone()),
        FieldValue::Numeric(Some(n)) if n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64 => {
            AttributeValue::Int32(*n as i32)
        }
        FieldValue::Numeric(n) => n.map_or_else(empty, AttributeValue::Double),
        FieldValue::Float(n) => n.map_or_else(empty, AttributeValue::Float),
        FieldValue::Integer(n) => AttributeValue::Int32(*n),
        FieldValue::Double(n) | FieldValue::Currency(n) => AttributeValue::Double(*n),
        FieldValue::Logical(b) => b.map_or_else(empty, |b| AttributeValue::String(b.to_string())),
        FieldValue::Date(d) => d.as_ref().map_or_else(empty, date),
        FieldValue::DateTime(dt) => date(&dt.date()),
    }
}

/// Write the reprojected shapes next to a copy of the original `.dbf`.
/// Mixed shape kinds cannot share one shapefile and are not cached.
fn write_reprojected(features: &[Feature], dir: &Path, stem: &str) -> Result<()> {
    let shapes: Vec<shapefile::Shape> = features
        .iter()
        .map(|f| geometry_to_shape(&f.geometry).ok_or_else(|| anyhow!("geometry kind has no shapefile form")))
        .collect::<Result<_>>()?;
    let Some(first) = shapes.first() else { return Ok(()) };
    if shapes.iter().any(|s| std::mem::discriminant(s) != std::mem::discriminant(first)) {
        bail!("mixed shape types");
    }

    let out = dir.join(format!("{stem}_reprojected.shp"));
    let tmp = dir.join(format!("{stem}_reprojected.tmp.shp"));

    macro_rules! write_all {
        ($variant:ident) => {{
            let mut writer = shapefile::ShapeWriter::from_path(&tmp)
                .with_context(|| format!("create {}", tmp.display()))?;
            for shape in &shapes {
                if let shapefile::Shape::$variant(s) = shape {
                    writer.write_shape(s)?;
                }
            }
            // the header is rewritten and the .shx flushed on drop
            drop(writer);
        }};
    }
    match first {
        shapefile::Shape::Point(_) => write_all!(Point),
        shapefile::Shape::Multipoint(_) => write_all!(Multipoint),
        shapefile::Shape::Polyline(_) => write_all!(Polyline),
        shapefile::Shape::Polygon(_) => write_all!(Polygon),
        _ => bail!("unexpected shape kind"),
    }

    fs::copy(dir.join(format!("{stem}.dbf")), dir.join(format!("{stem}_reprojected.dbf")))?;
    fs::rename(tmp.with_extension("shx"), out.with_extension("shx"))?;
    // the .shp appears last so a partial write is never picked up
    fs::rename(&tmp, &out)?;
    debug!(path = %out.display(), shapes = shapes.len(), "wrote reprojected geometry");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{BoundingRect, Point, polygon};

    const WGS84_PRJ: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137,298.257223563]],PRIMEM["Greenwich",0],UNIT["Degree",0.017453292519943295]]"#;
    const WEB_MERCATOR_PRJ: &str = r#"PROJCS["WGS_1984_Web_Mercator_Auxiliary_Sphere",GEOGCS["GCS_WGS_1984"],PROJECTION["Mercator_Auxiliary_Sphere"]]"#;
    const BNG_PRJ: &str = r#"PROJCS["British_National_Grid",GEOGCS["GCS_OSGB_1936"],PROJECTION["Transverse_Mercator"]]"#;

    #[test]
    fn detects_coordinate_systems() {
        assert_eq!(SourceCrs::detect(Some(WGS84_PRJ), None).unwrap(), SourceCrs::LonLat);
        assert_eq!(SourceCrs::detect(Some(WEB_MERCATOR_PRJ), None).unwrap(), SourceCrs::WebMercator);
        assert_eq!(SourceCrs::detect(None, None).unwrap(), SourceCrs::LonLat);
        assert!(matches!(
            SourceCrs::detect(Some(BNG_PRJ), Some("+proj=tmerc")).unwrap(),
            SourceCrs::Proj(_)
        ));
        assert!(SourceCrs::detect(Some(BNG_PRJ), None).is_err());
        assert!(SourceCrs::detect(Some("LOCAL_CS[\"x\"]"), None).is_err());
    }

    #[test]
    fn lonlat_projects_and_clamps() {
        let g: Geometry<f64> = Point::new(180.0, 90.0).into();
        let Geometry::Point(p) = SourceCrs::LonLat.to_mercator(&g, Mercator::Spherical).unwrap() else { panic!() };
        let (_, y84) = Mercator::Spherical.project(0.0, 84.0);
        assert!((p.x() - 20037508.342789244).abs() < 1e-6);
        assert!((p.y() - y84).abs() < 1e-6);
    }

    #[test]
    fn web_mercator_passes_through_spherical() {
        let g: Geometry<f64> = polygon![(x: 1000.0, y: 2000.0), (x: 3000.0, y: 2000.0), (x: 3000.0, y: 5000.0)].into();
        let out = SourceCrs::WebMercator.to_mercator(&g, Mercator::Spherical).unwrap();
        let (a, b) = (g.bounding_rect().unwrap(), out.bounding_rect().unwrap());
        assert!((a.min().x - b.min().x).abs() < 1e-6);
        assert!((a.max().y - b.max().y).abs() < 1e-6);
    }

    #[test]
    fn numeric_fields_map_to_narrowest_type() {
        assert_eq!(attribute_value(&FieldValue::Numeric(Some(42.0))), AttributeValue::Int32(42));
        assert_eq!(attribute_value(&FieldValue::Numeric(Some(4.5))), AttributeValue::Double(4.5));
        assert_eq!(attribute_value(&FieldValue::Numeric(Some(1e12))), AttributeValue::Double(1e12));
        assert_eq!(attribute_value(&FieldValue::Numeric(None)), AttributeValue::String(String::new()));
        assert_eq!(attribute_value(&FieldValue::Logical(Some(true))), AttributeValue::from("true"));
        assert_eq!(attribute_value(&FieldValue::Character(Some("GBR".into()))), AttributeValue::from("GBR"));
    }

    #[test]
    fn closure_is_a_loader() {
        let loader = |_: &str| -> Result<Vec<Feature>> { Ok(vec![]) };
        assert!(DatasetLoader::load(&loader, "file:///x.shp").unwrap().is_empty());
    }
}
