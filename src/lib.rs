#![doc = "Vectile: shapefile datasets served as Mapbox vector tiles, with in-memory and on-disk caches"]
mod assembler;
pub mod cache;
mod config;
pub mod dataset;
mod error;
pub mod mvt;
pub mod tile;

/// Crate version, stamped into every tile's provenance attribute.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[doc(inline)]
pub use assembler::{layer_name, resolve_descriptor, TileAssembler, MARKER_KEY};

#[doc(inline)]
pub use cache::{cache_key_dir, normalize_time_tag, CacheState, DiskCacheManager};

#[doc(inline)]
pub use config::{format_size, parse_size, Config, SizeParseError, GEOMETRY_CACHE_DIR};

#[doc(inline)]
pub use dataset::{AttributeValue, Attributes, DatasetCache, DatasetEntry, DatasetLoader, Feature, ShapefileLoader};

#[doc(inline)]
pub use error::{Result, TileError};

#[doc(inline)]
pub use tile::{envelope_for_tile, Mercator, TileCoord, TileEnvelope};
