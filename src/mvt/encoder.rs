use std::collections::HashMap;

use geo::{Geometry, LineString, Polygon, Rect};
use tracing::trace;

use crate::dataset::AttributeValue;
use crate::error::{Result, TileError};
use crate::mvt::command::{command_encode, zigzag_encode, CMD_CLOSE_PATH, CMD_LINE_TO, CMD_MOVE_TO};
use crate::mvt::proto::{Feature, GeomType, Layer, Tile, Value};

/// Tile-local coordinate range.
pub const EXTENT: u32 = 4096;
/// Vector tile format version written to every layer.
pub const VERSION: u32 = 2;

/// Points closer than this (squared pixel distance) to the previous one are dropped.
const MIN_SQUARED_DELTA: f64 = 1.4;

/// Builds a single layer: key/value dictionaries plus encoded features.
#[derive(Debug, Clone)]
pub struct LayerEncoder {
    layer: Layer,
    key_index: HashMap<String, u32>,
}

impl LayerEncoder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            layer: Layer { name: name.into(), ..Default::default() },
            key_index: HashMap::new(),
        }
    }

    #[inline] pub fn name(&self) -> &str { &self.layer.name }

    #[inline] pub fn feature_count(&self) -> usize { self.layer.features.len() }

    #[inline] pub fn keys(&self) -> &[String] { &self.layer.keys }

    #[inline] pub fn values(&self) -> &[Value] { &self.layer.values }

    /// Register `name` in the key dictionary, returning its index.
    /// Registering the same name again returns the existing index.
    pub fn add_key_tag(&mut self, name: &str) -> u32 {
        if let Some(&idx) = self.key_index.get(name) {
            return idx;
        }
        let idx = self.layer.keys.len() as u32;
        self.layer.keys.push(name.to_string());
        self.key_index.insert(name.to_string(), idx);
        idx
    }

    /// Index of an already registered key.
    #[inline]
    pub fn key_tag(&self, name: &str) -> Option<u32> { self.key_index.get(name).copied() }

    /// Append `value` to the value list and return its index. Values are never deduplicated.
    pub fn add_value_tag(&mut self, value: &AttributeValue) -> u32 {
        let idx = self.layer.values.len() as u32;
        self.layer.values.push(value.to_mvt());
        idx
    }

    /// Encode one feature. Every entry of `names` must have been registered
    /// with [`add_key_tag`](Self::add_key_tag), and `values` pairs up with `names`.
    pub fn add_geographic_feature<S: AsRef<str>>(
        &mut self,
        envelope: &Rect<f64>,
        geometry: &Geometry<f64>,
        names: &[S],
        values: &[AttributeValue],
    ) -> Result<()> {
        if names.len() != values.len() {
            return Err(TileError::AttributeCount { names: names.len(), values: values.len() });
        }

        let mut tags = Vec::with_capacity(2 * names.len());
        for (name, value) in names.iter().zip(values) {
            let name = name.as_ref();
            let key = self.key_tag(name).ok_or_else(|| TileError::UnregisteredKey(name.to_string()))?;
            tags.push(key);
            tags.push(self.add_value_tag(value));
        }

        let mut feature = Feature { tags, ..Default::default() };
        GeometryWriter::new(envelope, &mut feature).write(geometry);
        self.layer.features.push(feature);
        Ok(())
    }

    /// Finish the layer (extent 4096, version 2) and wrap it in a single-layer tile.
    pub fn build_tile(self) -> Tile {
        Tile { layers: vec![self.build_layer()] }
    }

    /// Finish the layer for callers composing multi-layer tiles.
    pub fn build_layer(mut self) -> Layer {
        self.layer.extent = Some(EXTENT);
        self.layer.version = VERSION;
        self.layer
    }
}

/// Appends commands for one feature. The cursor starts at (0, 0) per feature
/// and carries across its rings.
struct GeometryWriter<'a> {
    min_x: f64,
    max_y: f64,
    width: f64,
    height: f64,
    cursor: (i32, i32),
    feature: &'a mut Feature,
}

impl<'a> GeometryWriter<'a> {
    fn new(envelope: &Rect<f64>, feature: &'a mut Feature) -> Self {
        Self {
            min_x: envelope.min().x,
            max_y: envelope.max().y,
            width: envelope.width(),
            height: envelope.height(),
            cursor: (0, 0),
            feature,
        }
    }

    fn write(&mut self, geometry: &Geometry<f64>) {
        match geometry {
            Geometry::Polygon(poly) => {
                self.feature.set_type(GeomType::Polygon);
                self.polygon(poly);
            }
            Geometry::MultiPolygon(mp) => {
                self.feature.set_type(GeomType::Polygon);
                for poly in mp {
                    self.polygon(poly);
                }
            }
            Geometry::GeometryCollection(gc) => {
                for g in gc {
                    self.write(g);
                }
            }
            Geometry::Rect(rect) => self.write(&Geometry::Polygon(rect.to_polygon())),
            Geometry::Triangle(tri) => self.write(&Geometry::Polygon(tri.to_polygon())),
            // TODO: encode points and lines once consumers need them
            other => trace!(kind = geometry_kind(other), "geometry kind not encoded"),
        }
    }

    fn polygon(&mut self, poly: &Polygon<f64>) {
        if poly.exterior().0.is_empty() {
            return;
        }
        self.ring(poly.exterior());
        for hole in poly.interiors() {
            self.ring(hole);
        }
    }

    fn ring(&mut self, ring: &LineString<f64>) {
        let points: Vec<(i32, i32)> = ring.0.iter().map(|c| self.to_tile(c.x, c.y)).collect();
        let Some((&first, rest)) = points.split_first() else { return };

        self.emit(CMD_MOVE_TO, first);
        for &p in rest {
            let dx = (p.0 as i64 - self.cursor.0 as i64) as f64;
            let dy = (p.1 as i64 - self.cursor.1 as i64) as f64;
            if dx * dx + dy * dy < MIN_SQUARED_DELTA {
                continue;
            }
            self.emit(CMD_LINE_TO, p);
        }
        self.feature.geometry.push(command_encode(CMD_CLOSE_PATH, 1));
    }

    fn emit(&mut self, command: u32, p: (i32, i32)) {
        let g = &mut self.feature.geometry;
        g.push(command_encode(command, 1));
        g.push(zigzag_encode(p.0.wrapping_sub(self.cursor.0)));
        g.push(zigzag_encode(p.1.wrapping_sub(self.cursor.1)));
        self.cursor = p;
    }

    /// Map meters to tile pixels, y flipped so the origin is top left.
    #[inline]
    fn to_tile(&self, x: f64, y: f64) -> (i32, i32) {
        let extent = EXTENT as f64;
        (
            ((x - self.min_x) / self.width * extent) as i32,
            ((self.max_y - y) / self.height * extent) as i32,
        )
    }
}

fn geometry_kind(g: &Geometry<f64>) -> &'static str {
    match g {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvt::command::decode_geometry;
    use geo::{coord, polygon, MultiPolygon, Point};

    fn unit_envelope() -> Rect<f64> {
        Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 4096.0, y: 4096.0 })
    }

    fn square(x0: f64, y0: f64, side: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + side, y: y0),
            (x: x0 + side, y: y0 + side),
            (x: x0, y: y0 + side),
            (x: x0, y: y0),
        ]
    }

    #[test]
    fn key_tags_are_unique() {
        let mut enc = LayerEncoder::new("layer");
        assert_eq!(enc.add_key_tag("NAME"), 0);
        assert_eq!(enc.add_key_tag("POP"), 1);
        assert_eq!(enc.add_key_tag("NAME"), 0);
        assert_eq!(enc.keys(), &["NAME".to_string(), "POP".to_string()]);
    }

    #[test]
    fn value_tags_are_not_deduplicated() {
        let mut enc = LayerEncoder::new("layer");
        let v = AttributeValue::String("x".into());
        assert_eq!(enc.add_value_tag(&v), 0);
        assert_eq!(enc.add_value_tag(&v), 1);
        assert_eq!(enc.values().len(), 2);
    }

    #[test]
    fn value_kinds_map_to_fields() {
        let mut enc = LayerEncoder::new("layer");
        enc.add_value_tag(&AttributeValue::Int32(-4));
        enc.add_value_tag(&AttributeValue::Int64(1 << 40));
        enc.add_value_tag(&AttributeValue::UInt32(7));
        enc.add_value_tag(&AttributeValue::Double(2.5));
        enc.add_value_tag(&AttributeValue::Float(0.5));
        let v = enc.values();
        assert_eq!(v[0].int_value, Some(-4));
        assert_eq!(v[1].int_value, Some(1 << 40));
        assert_eq!(v[2].uint_value, Some(7));
        assert_eq!(v[3].double_value, Some(2.5));
        assert_eq!(v[4].float_value, Some(0.5));
    }

    #[test]
    fn unregistered_key_is_an_error() {
        let mut enc = LayerEncoder::new("layer");
        let geom = Geometry::Polygon(square(10.0, 10.0, 100.0));
        let err = enc
            .add_geographic_feature(&unit_envelope(), &geom, &["missing"], &[AttributeValue::Int32(1)])
            .unwrap_err();
        assert!(matches!(err, TileError::UnregisteredKey(name) if name == "missing"));
    }

    #[test]
    fn square_ring_round_trips() {
        let mut enc = LayerEncoder::new("layer");
        enc.add_key_tag("id");
        let geom = Geometry::Polygon(square(100.0, 100.0, 1000.0));
        enc.add_geographic_feature(&unit_envelope(), &geom, &["id"], &[AttributeValue::Int32(9)]).unwrap();

        let tile = enc.build_tile();
        let layer = &tile.layers[0];
        assert_eq!(layer.extent, Some(EXTENT));
        assert_eq!(layer.version, VERSION);

        let feature = &layer.features[0];
        assert_eq!(feature.r#type(), GeomType::Polygon);
        assert_eq!(feature.tags, vec![0, 0]);

        let rings = decode_geometry(&feature.geometry).unwrap();
        // y is flipped: meters 100 -> pixel 3996
        assert_eq!(rings, vec![vec![(100, 3996), (1100, 3996), (1100, 2996), (100, 2996), (100, 3996)]]);
        assert_eq!(*feature.geometry.last().unwrap(), command_encode(CMD_CLOSE_PATH, 1));
    }

    #[test]
    fn near_duplicate_points_are_skipped() {
        let mut enc = LayerEncoder::new("layer");
        let poly = polygon![
            (x: 10.0, y: 10.0),
            (x: 10.5, y: 10.0),
            (x: 500.0, y: 10.0),
            (x: 500.0, y: 500.0),
            (x: 10.0, y: 10.0),
        ];
        enc.add_geographic_feature::<&str>(&unit_envelope(), &Geometry::Polygon(poly), &[], &[]).unwrap();
        let layer = enc.build_layer();
        let rings = decode_geometry(&layer.features[0].geometry).unwrap();
        assert_eq!(rings[0].len(), 4);
    }

    #[test]
    fn cursor_resets_per_feature_and_persists_across_rings() {
        let mut enc = LayerEncoder::new("layer");
        let mp = MultiPolygon::new(vec![square(100.0, 100.0, 200.0), square(1000.0, 1000.0, 200.0)]);
        let geom = Geometry::MultiPolygon(mp);
        enc.add_geographic_feature::<&str>(&unit_envelope(), &geom, &[], &[]).unwrap();
        enc.add_geographic_feature::<&str>(&unit_envelope(), &geom, &[], &[]).unwrap();
        let layer = enc.build_layer();

        // identical features encode identically: cursor started from (0,0) both times
        assert_eq!(layer.features[0].geometry, layer.features[1].geometry);

        let rings = decode_geometry(&layer.features[0].geometry).unwrap();
        assert_eq!(rings.len(), 2);
        assert_eq!(rings[1][0], (1000, 3096));

        // second MoveTo is relative to the end of the first ring, (100, 3996)
        let second_move = layer.features[0]
            .geometry
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == command_encode(CMD_MOVE_TO, 1))
            .nth(1)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(layer.features[0].geometry[second_move + 1], zigzag_encode(900));
        assert_eq!(layer.features[0].geometry[second_move + 2], zigzag_encode(-900));
    }

    #[test]
    fn points_produce_feature_without_geometry() {
        let mut enc = LayerEncoder::new("layer");
        let geom = Geometry::Point(Point::new(5.0, 5.0));
        enc.add_geographic_feature::<&str>(&unit_envelope(), &geom, &[], &[]).unwrap();
        let layer = enc.build_layer();
        assert_eq!(layer.features.len(), 1);
        assert!(layer.features[0].geometry.is_empty());
        assert_eq!(layer.features[0].r#type(), GeomType::Unknown);
    }

    fn signed_area(ring: &[(i32, i32)]) -> i64 {
        ring.windows(2).map(|w| w[0].0 as i64 * w[1].1 as i64 - w[1].0 as i64 * w[0].1 as i64).sum()
    }

    #[test]
    fn holes_follow_exterior_with_winding_kept() {
        let mut enc = LayerEncoder::new("layer");
        let hole = LineString::from(vec![(1000.0, 1000.0), (1000.0, 2000.0), (2000.0, 2000.0), (2000.0, 1000.0), (1000.0, 1000.0)]);
        let poly = Polygon::new(square(500.0, 500.0, 3000.0).exterior().clone(), vec![hole]);
        let geom = Geometry::Polygon(poly);
        enc.add_geographic_feature::<&str>(&unit_envelope(), &geom, &[], &[]).unwrap();
        let layer = enc.build_layer();
        let stream = &layer.features[0].geometry;

        let rings = decode_geometry(stream).unwrap();
        assert_eq!(rings.len(), 2);
        assert_eq!(rings[0][0], (500, 3596));
        assert_eq!(rings[1][0], (1000, 3096));
        // the y flip mirrors both rings, so their signs stay opposite
        assert!(signed_area(&rings[0]) * signed_area(&rings[1]) < 0);

        let closes = stream.iter().filter(|c| **c == command_encode(CMD_CLOSE_PATH, 1)).count();
        assert_eq!(closes, 2);
    }

    #[test]
    fn far_outside_coordinates_saturate_without_panicking() {
        let mut enc = LayerEncoder::new("layer");
        let envelope = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
        let ring = LineString::from(vec![(1e12, 0.5), (-1e12, 0.5), (0.5, 0.5), (1e12, 0.5)]);
        let geom = Geometry::Polygon(Polygon::new(ring, vec![]));
        enc.add_geographic_feature::<&str>(&envelope, &geom, &[], &[]).unwrap();
        let layer = enc.build_layer();

        let rings = decode_geometry(&layer.features[0].geometry).unwrap();
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0][0].0, i32::MAX);
        assert_eq!(rings[0][1].0, i32::MIN);
    }
}
