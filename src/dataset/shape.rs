//! Conversions between shapefile records and `geo` geometry.

use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use shapefile as shp;

/// Convert any 2D/M/Z shapefile shape to geometry, dropping M and Z.
/// `NullShape` yields `None`.
pub fn shape_to_geometry(shape: &shp::Shape) -> Option<Geometry<f64>> {
    use shp::Shape as S;
    let geometry = match shape {
        S::NullShape => return None,
        S::Point(p) => Point::new(p.x, p.y).into(),
        S::PointM(p) => Point::new(p.x, p.y).into(),
        S::PointZ(p) => Point::new(p.x, p.y).into(),
        S::Multipoint(m) => multipoint(m.points(), |p| (p.x, p.y)).into(),
        S::MultipointM(m) => multipoint(m.points(), |p| (p.x, p.y)).into(),
        S::MultipointZ(m) => multipoint(m.points(), |p| (p.x, p.y)).into(),
        S::Polyline(l) => polyline(l.parts(), |p| (p.x, p.y)).into(),
        S::PolylineM(l) => polyline(l.parts(), |p| (p.x, p.y)).into(),
        S::PolylineZ(l) => polyline(l.parts(), |p| (p.x, p.y)).into(),
        S::Polygon(p) => polygon(p.rings(), |p| (p.x, p.y)).into(),
        S::PolygonM(p) => polygon(p.rings(), |p| (p.x, p.y)).into(),
        S::PolygonZ(p) => polygon(p.rings(), |p| (p.x, p.y)).into(),
        S::Multipatch(_) => return None,
    };
    Some(geometry)
}

fn multipoint<P>(points: &[P], xy: impl Fn(&P) -> (f64, f64)) -> MultiPoint<f64> {
    MultiPoint(points.iter().map(|p| Point::from(xy(p))).collect())
}

fn polyline<P>(parts: &[Vec<P>], xy: impl Fn(&P) -> (f64, f64)) -> MultiLineString<f64> {
    MultiLineString(parts.iter().map(|part| LineString(part.iter().map(|p| coord(xy(p))).collect())).collect())
}

#[inline]
fn coord((x, y): (f64, f64)) -> Coord<f64> { Coord { x, y } }

/// Get the signed area of a coordinate ring (negative when clockwise).
fn signed_area(pts: &[Coord<f64>]) -> f64 {
    pts.windows(2).map(|w| w[0].x * w[1].y - w[1].x * w[0].y).sum::<f64>() / 2.0
}

/// Group rings into polygons. Shapefiles store each clockwise outer ring
/// followed by its counter-clockwise holes.
fn polygon<P>(rings: &[shp::PolygonRing<P>], xy: impl Fn(&P) -> (f64, f64)) -> MultiPolygon<f64> {
    let mut polys = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes = Vec::new();

    for ring in rings {
        let mut coords: Vec<_> = ring.points().iter().map(|p| coord(xy(p))).collect();
        if coords.is_empty() {
            continue;
        }
        if coords.first() != coords.last() {
            coords.push(coords[0]);
        }
        let is_exterior = signed_area(&coords) < 0.0;
        let ls = LineString(coords);

        if is_exterior {
            if let Some(ext) = exterior.take() {
                polys.push(Polygon::new(ext, std::mem::take(&mut holes)));
            }
            exterior = Some(ls);
        } else {
            holes.push(ls);
        }
    }
    match exterior {
        Some(ext) => polys.push(Polygon::new(ext, holes)),
        // only counter-clockwise rings: treat each as a shell
        None => polys.extend(holes.into_iter().map(|ls| Polygon::new(ls, vec![]))),
    }

    MultiPolygon(polys)
}

/// Convert geometry back into a 2D shapefile shape for the reprojected
/// geometry cache. Kinds with no shapefile counterpart yield `None`.
pub fn geometry_to_shape(geometry: &Geometry<f64>) -> Option<shp::Shape> {
    #[inline]
    fn pt(c: Coord<f64>) -> shp::Point { shp::Point { x: c.x, y: c.y } }

    fn ring(ls: &LineString<f64>, clockwise: bool) -> Vec<shp::Point> {
        let mut coords = ls.0.clone();
        if coords.first() != coords.last() && !coords.is_empty() {
            coords.push(coords[0]);
        }
        if (signed_area(&coords) < 0.0) != clockwise {
            coords.reverse();
        }
        coords.into_iter().map(pt).collect()
    }

    fn rings(mp: &[Polygon<f64>]) -> Vec<shp::PolygonRing<shp::Point>> {
        mp.iter()
            .flat_map(|poly| {
                std::iter::once(shp::PolygonRing::Outer(ring(poly.exterior(), true)))
                    .chain(poly.interiors().iter().map(|h| shp::PolygonRing::Inner(ring(h, false))))
            })
            .collect()
    }

    let shape = match geometry {
        Geometry::Point(p) => shp::Shape::Point(pt(p.0)),
        Geometry::MultiPoint(m) => shp::Shape::Multipoint(shp::Multipoint::new(m.iter().map(|p| pt(p.0)).collect())),
        Geometry::LineString(ls) => shp::Shape::Polyline(shp::Polyline::new(ls.coords().copied().map(pt).collect())),
        Geometry::MultiLineString(m) => shp::Shape::Polyline(shp::Polyline::with_parts(
            m.iter().map(|ls| ls.coords().copied().map(pt).collect()).collect(),
        )),
        Geometry::Polygon(p) => shp::Shape::Polygon(shp::Polygon::with_rings(rings(std::slice::from_ref(p)))),
        Geometry::MultiPolygon(m) => shp::Shape::Polygon(shp::Polygon::with_rings(rings(&m.0))),
        _ => return None,
    };
    Some(shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, polygon};

    #[test]
    fn outer_and_hole_group_into_one_polygon() {
        let outer = vec![
            shp::Point::new(0.0, 0.0), shp::Point::new(0.0, 10.0), shp::Point::new(10.0, 10.0),
            shp::Point::new(10.0, 0.0), shp::Point::new(0.0, 0.0),
        ];
        let hole = vec![
            shp::Point::new(2.0, 2.0), shp::Point::new(4.0, 2.0), shp::Point::new(4.0, 4.0),
            shp::Point::new(2.0, 4.0), shp::Point::new(2.0, 2.0),
        ];
        let shape = shp::Shape::Polygon(shp::Polygon::with_rings(vec![
            shp::PolygonRing::Outer(outer),
            shp::PolygonRing::Inner(hole),
        ]));

        let Some(Geometry::MultiPolygon(mp)) = shape_to_geometry(&shape) else { panic!("expected multipolygon") };
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0].interiors().len(), 1);
        assert!((mp.unsigned_area() - 96.0).abs() < 1e-9);
    }

    #[test]
    fn null_shape_is_none() {
        assert!(shape_to_geometry(&shp::Shape::NullShape).is_none());
    }

    #[test]
    fn polygon_survives_write_back() {
        let poly = polygon![(x: 0.0, y: 0.0), (x: 5.0, y: 0.0), (x: 5.0, y: 5.0), (x: 0.0, y: 5.0)];
        let shape = geometry_to_shape(&Geometry::Polygon(poly)).unwrap();
        let Some(Geometry::MultiPolygon(mp)) = shape_to_geometry(&shape) else { panic!("expected multipolygon") };
        assert!((mp.unsigned_area() - 25.0).abs() < 1e-9);
    }
}
