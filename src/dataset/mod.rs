//! In-memory datasets: features, typed attributes, the spatial index and the single-flight cache.
mod cache;
mod download;
mod index;
mod loader;
mod shape;

use std::fmt;
use std::time::SystemTime;

use geo::Geometry;

use crate::mvt::Value;

pub use cache::{DatasetCache, DEFAULT_CAPACITY, DEFAULT_LOAD_TIMEOUT};
pub use index::FeatureIndex;
pub use loader::{DatasetLoader, ShapefileLoader, SourceCrs};

/// A typed attribute value, fixed when the dataset is loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    Double(f64),
    Float(f32),
}

impl AttributeValue {
    /// Wire representation for a layer's value list.
    pub(crate) fn to_mvt(&self) -> Value {
        let mut v = Value::default();
        match self {
            AttributeValue::String(s) => v.string_value = Some(s.clone()),
            AttributeValue::Int32(n) => v.int_value = Some(*n as i64),
            AttributeValue::Int64(n) => v.int_value = Some(*n),
            AttributeValue::UInt32(n) => v.uint_value = Some(*n as u64),
            AttributeValue::Double(n) => v.double_value = Some(*n),
            AttributeValue::Float(n) => v.float_value = Some(*n),
        }
        v
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Int32(n) => write!(f, "{n}"),
            AttributeValue::Int64(n) => write!(f, "{n}"),
            AttributeValue::UInt32(n) => write!(f, "{n}"),
            AttributeValue::Double(n) => write!(f, "{n}"),
            AttributeValue::Float(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self { AttributeValue::String(s.to_string()) }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self { AttributeValue::String(s) }
}

impl From<i32> for AttributeValue {
    fn from(n: i32) -> Self { AttributeValue::Int32(n) }
}

impl From<f64> for AttributeValue {
    fn from(n: f64) -> Self { AttributeValue::Double(n) }
}

/// Attribute name/value pairs in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<(String, AttributeValue)>);

impl Attributes {
    pub fn new() -> Self { Self::default() }

    /// Append a column. Names are expected to be unique.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    #[inline] pub fn len(&self) -> usize { self.0.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn names(&self) -> impl Iterator<Item = &str> { self.0.iter().map(|(n, _)| n.as_str()) }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl FromIterator<(String, AttributeValue)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One geometry with its attributes, in Mercator meters.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub attributes: Attributes,
}

impl Feature {
    pub fn new(geometry: impl Into<Geometry<f64>>, attributes: Attributes) -> Self {
        Self { geometry: geometry.into(), attributes }
    }
}

/// A loaded dataset. Published once and never mutated afterwards, so it is
/// shared between requests behind an `Arc` without further locking.
#[derive(Debug)]
pub struct DatasetEntry {
    descriptor: String,
    time_tag: String,
    loaded_at: SystemTime,
    features: FeatureIndex,
}

impl DatasetEntry {
    pub fn new(descriptor: impl Into<String>, time_tag: impl Into<String>, features: Vec<Feature>) -> Self {
        Self {
            descriptor: descriptor.into(),
            time_tag: time_tag.into(),
            loaded_at: SystemTime::now(),
            features: FeatureIndex::new(features),
        }
    }

    #[inline] pub fn descriptor(&self) -> &str { &self.descriptor }

    /// Time tag the entry was requested with (empty if none).
    #[inline] pub fn time_tag(&self) -> &str { &self.time_tag }

    #[inline] pub fn loaded_at(&self) -> SystemTime { self.loaded_at }

    #[inline] pub fn features(&self) -> &FeatureIndex { &self.features }
}
