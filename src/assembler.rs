//! Request pipeline: descriptor to dataset to clipped, simplified features to one encoded layer.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use geo::{BooleanOps, Coord, CoordsIter, Geometry, LineString, MultiLineString, MultiPolygon, Polygon, Rect, SimplifyVwPreserve};
use tracing::{debug, warn};
use url::Url;

use crate::cache::normalize_time_tag;
use crate::dataset::{AttributeValue, DatasetCache};
use crate::error::{Result, TileError};
use crate::mvt::{encode_tile, LayerEncoder, Tile};
use crate::tile::{Mercator, TileCoord, TileEnvelope};
use crate::VERSION;

/// Attribute added to every feature naming the producer and its version.
pub const MARKER_KEY: &str = "vectile";

/// Fraction of the tile height added on each side before clipping.
const CLIP_BUFFER: f64 = 0.1;

/// Simplification tolerance as a fraction of the tile height.
const SIMPLIFY_DIVISOR: f64 = 1024.0;

/// Features with fewer coordinates than this after clipping are dropped.
const MIN_POINTS: usize = 3;

/// Resolve a descriptor to an absolute URI, joining relative ones onto `context`.
pub fn resolve_descriptor(descriptor: &str, context: Option<&str>) -> Result<String> {
    match Url::parse(descriptor) {
        Ok(url) => Ok(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let Some(context) = context.filter(|c| !c.is_empty()) else {
                return Err(TileError::RelativeDescriptor(descriptor.to_string()));
            };
            let base = Url::parse(context).map_err(|_| TileError::InvalidDescriptor(context.to_string()))?;
            let joined = base.join(descriptor).map_err(|_| TileError::InvalidDescriptor(descriptor.to_string()))?;
            Ok(joined.to_string())
        }
        Err(_) => Err(TileError::InvalidDescriptor(descriptor.to_string())),
    }
}

/// Base file name of a descriptor without its extension, used as the layer name.
pub fn layer_name(descriptor: &str) -> String {
    let file = descriptor.rsplit(['/', '\\']).next().unwrap_or(descriptor);
    let file = file.split(['?', '#']).next().unwrap_or(file);
    match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file.to_string(),
    }
}

/// Builds tiles from datasets held in a shared [`DatasetCache`].
pub struct TileAssembler {
    cache: Arc<DatasetCache>,
    mercator: Mercator,
}

impl TileAssembler {
    pub fn new(cache: Arc<DatasetCache>) -> Self { Self { cache, mercator: Mercator::default() } }

    /// Mercator model for tile envelopes; must match the loader's.
    pub fn with_mercator(mut self, mercator: Mercator) -> Self {
        self.mercator = mercator;
        self
    }

    #[inline] pub fn cache(&self) -> &Arc<DatasetCache> { &self.cache }

    /// Build one tile, or `None` if anything along the way fails.
    pub fn request_tile(
        &self,
        descriptor: &str,
        time_tag: Option<&str>,
        z: u8,
        x: u32,
        y: u32,
        context: Option<&str>,
    ) -> Option<Tile> {
        match self.try_request_tile(descriptor, time_tag, z, x, y, context) {
            Ok(tile) => Some(tile),
            Err(e) => {
                warn!(descriptor, z, x, y, error = %e, "tile request failed");
                None
            }
        }
    }

    /// Like [`request_tile`](Self::request_tile) but returns the encoded bytes.
    pub fn request_tile_bytes(
        &self,
        descriptor: &str,
        time_tag: Option<&str>,
        z: u8,
        x: u32,
        y: u32,
        context: Option<&str>,
    ) -> Option<Bytes> {
        let tile = self.request_tile(descriptor, time_tag, z, x, y, context)?;
        encode_tile(&tile).ok()
    }

    pub fn try_request_tile(
        &self,
        descriptor: &str,
        time_tag: Option<&str>,
        z: u8,
        x: u32,
        y: u32,
        context: Option<&str>,
    ) -> Result<Tile> {
        let started = Instant::now();
        let descriptor = resolve_descriptor(descriptor, context)?;
        let tile = TileCoord::new(z, x, y);
        if !tile.is_valid() {
            return Err(TileError::InvalidTile(tile.to_string()));
        }

        let envelope = TileEnvelope::for_tile_with(self.mercator, tile);
        let time_tag = time_tag.filter(|t| !t.is_empty()).map(|t| normalize_time_tag(Some(t))).unwrap_or_default();
        let dataset = self.cache.try_get(&descriptor, &time_tag)?;

        let bounds = *envelope.mercator();
        let candidates = dataset.features().query(&bounds);

        // schema is taken from the first feature
        let mut names: Vec<String> = candidates.first().map(|f| f.attributes.names().map(str::to_string).collect()).unwrap_or_default();
        let mut encoder = LayerEncoder::new(layer_name(&descriptor));
        for name in &names {
            encoder.add_key_tag(name);
        }
        encoder.add_key_tag(MARKER_KEY);
        names.push(MARKER_KEY.to_string());

        let tolerance = bounds.height() / SIMPLIFY_DIVISOR;
        let clip = buffered(&bounds, bounds.height() * CLIP_BUFFER);
        let marker = AttributeValue::from(VERSION);

        for feature in &candidates {
            let Some(geometry) = fit_to_tile(&feature.geometry, tolerance, &clip) else { continue };
            if geometry.coords_count() < MIN_POINTS {
                continue;
            }
            let values: Vec<AttributeValue> = names[..names.len() - 1]
                .iter()
                .map(|n| feature.attributes.get(n).cloned().unwrap_or_else(|| AttributeValue::from("")))
                .chain(std::iter::once(marker.clone()))
                .collect();
            encoder.add_geographic_feature(&bounds, &geometry, &names, &values)?;
        }

        debug!(
            %tile,
            descriptor,
            candidates = candidates.len(),
            features = encoder.feature_count(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "tile assembled"
        );
        Ok(encoder.build_tile())
    }
}

fn buffered(rect: &Rect<f64>, by: f64) -> Polygon<f64> {
    Rect::new(
        Coord { x: rect.min().x - by, y: rect.min().y - by },
        Coord { x: rect.max().x + by, y: rect.max().y + by },
    )
    .to_polygon()
}

/// Simplify a polygon without letting rings cross, dropping rings that
/// collapse below a closed triangle. `tolerance` is a distance; the
/// Visvalingam-Whyatt threshold is its square, an area.
fn simplify_polygon(poly: &Polygon<f64>, tolerance: f64) -> Option<Polygon<f64>> {
    let simplified = poly.simplify_vw_preserve(&(tolerance * tolerance));
    let (exterior, interiors) = simplified.into_inner();
    let exterior = Some(exterior).filter(|r| r.0.len() >= 4)?;
    let interiors = interiors.into_iter().filter(|r| r.0.len() >= 4).collect();
    Some(Polygon::new(exterior, interiors))
}

fn simplify_line(ls: &LineString<f64>, tolerance: f64) -> LineString<f64> {
    ls.simplify_vw_preserve(&(tolerance * tolerance))
}

/// Simplify then clip to `clip`. Points pass through unchanged.
fn fit_to_tile(geometry: &Geometry<f64>, tolerance: f64, clip: &Polygon<f64>) -> Option<Geometry<f64>> {
    fn polygons(polys: Vec<Polygon<f64>>, clip: &Polygon<f64>) -> Option<Geometry<f64>> {
        let clipped = MultiPolygon(polys).intersection(clip);
        (!clipped.0.is_empty()).then(|| Geometry::MultiPolygon(clipped))
    }
    fn lines(lines: MultiLineString<f64>, clip: &Polygon<f64>) -> Option<Geometry<f64>> {
        let clipped = clip.clip(&lines, false);
        (!clipped.0.is_empty()).then(|| Geometry::MultiLineString(clipped))
    }

    match geometry {
        Geometry::Polygon(p) => polygons(simplify_polygon(p, tolerance).into_iter().collect(), clip),
        Geometry::MultiPolygon(mp) => polygons(mp.iter().filter_map(|p| simplify_polygon(p, tolerance)).collect(), clip),
        Geometry::Rect(r) => polygons(simplify_polygon(&r.to_polygon(), tolerance).into_iter().collect(), clip),
        Geometry::LineString(ls) if ls.0.len() >= 2 => lines(MultiLineString(vec![simplify_line(ls, tolerance)]), clip),
        Geometry::MultiLineString(mls) => lines(
            MultiLineString(mls.iter().filter(|ls| ls.0.len() >= 2).map(|ls| simplify_line(ls, tolerance)).collect()),
            clip,
        ),
        other => Some(other.clone()),
    }
}
