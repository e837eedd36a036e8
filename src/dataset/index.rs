use geo::{BoundingRect, Rect};
use rstar::{RTree, RTreeObject, AABB};

use crate::dataset::Feature;

/// A feature's bounding box in the R-tree, tied back to the feature by index.
#[derive(Debug, Clone)]
struct BoundingBox {
    idx: usize,
    bbox: Rect<f64>,
}

impl RTreeObject for BoundingBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.bbox.min().into(), self.bbox.max().into())
    }
}

/// Features plus an R-tree over their bounding boxes.
#[derive(Debug)]
pub struct FeatureIndex {
    features: Vec<Feature>,
    rtree: RTree<BoundingBox>,
}

impl FeatureIndex {
    /// Bulk-load the index. Features without a bounding box (empty geometry) are kept but never returned by queries.
    pub fn new(features: Vec<Feature>) -> Self {
        let boxes = features.iter().enumerate()
            .filter_map(|(idx, f)| f.geometry.bounding_rect().map(|bbox| BoundingBox { idx, bbox }))
            .collect();
        Self { rtree: RTree::bulk_load(boxes), features }
    }

    #[inline] pub fn len(&self) -> usize { self.features.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.features.is_empty() }

    /// All features in load order.
    #[inline] pub fn features(&self) -> &[Feature] { &self.features }

    /// Features whose bounding box intersects `envelope`, in load order.
    pub fn query(&self, envelope: &Rect<f64>) -> Vec<&Feature> {
        let aabb = AABB::from_corners(envelope.min().into(), envelope.max().into());
        let mut hits: Vec<usize> = self.rtree.locate_in_envelope_intersecting(&aabb).map(|b| b.idx).collect();
        hits.sort_unstable();
        hits.into_iter().map(|i| &self.features[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Attributes;
    use geo::{coord, Point};

    fn point(x: f64, y: f64, id: i32) -> Feature {
        let mut attrs = Attributes::new();
        attrs.push("id", id);
        Feature::new(Point::new(x, y), attrs)
    }

    #[test]
    fn query_returns_hits_in_load_order() {
        let index = FeatureIndex::new(vec![point(5.0, 5.0, 0), point(50.0, 50.0, 1), point(6.0, 6.0, 2)]);
        let hits = index.query(&Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 }));
        let ids: Vec<_> = hits.iter().map(|f| f.attributes.get("id").cloned()).collect();
        assert_eq!(ids, vec![Some(0.into()), Some(2.into())]);
    }
}
