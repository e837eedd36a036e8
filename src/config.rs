//! Service configuration loaded from JSON, and wiring of the caches it describes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::assembler::TileAssembler;
use crate::cache::{DiskCacheManager, DEFAULT_EXPIRE_INTERVAL, DEFAULT_MAX_CACHE_SIZE, DEFAULT_OLDEST_ACCESS};
use crate::dataset::{DatasetCache, DatasetLoader, ShapefileLoader, DEFAULT_CAPACITY, DEFAULT_LOAD_TIMEOUT};
use crate::tile::Mercator;

/// Subdirectory of the cache root holding fetched and reprojected datasets.
pub const GEOMETRY_CACHE_DIR: &str = "geomcache";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid size '{0}', expected bytes or a value like '500MB' or '1GB'")]
pub struct SizeParseError(String);

/// Parse `"1024"`, `"64KB"`, `"500 MB"`, `"1gb"` and so on into bytes (binary units).
pub fn parse_size(s: &str) -> std::result::Result<u64, SizeParseError> {
    const UNITS: [(&str, u64); 7] = [
        ("KB", 1 << 10), ("MB", 1 << 20), ("GB", 1 << 30), ("TB", 1 << 40),
        ("K", 1 << 10), ("M", 1 << 20), ("G", 1 << 30),
    ];
    let err = || SizeParseError(s.to_string());
    let upper = s.trim().to_ascii_uppercase();
    let (digits, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, m)| upper.strip_suffix(suffix).map(|d| (d.trim_end(), *m)))
        .unwrap_or((upper.as_str(), 1));
    let n: u64 = digits.trim_end_matches('B').trim().parse().map_err(|_| err())?;
    n.checked_mul(multiplier).ok_or_else(err)
}

/// Render bytes with the largest unit that divides them exactly.
pub fn format_size(bytes: u64) -> String {
    for (suffix, unit) in [("GB", 1u64 << 30), ("MB", 1 << 20), ("KB", 1 << 10)] {
        if bytes >= unit && bytes % unit == 0 {
            return format!("{}{suffix}", bytes / unit);
        }
    }
    bytes.to_string()
}

fn deserialize_size<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bytes(u64),
        Text(String),
    }
    match Raw::deserialize(d)? {
        Raw::Bytes(n) => Ok(n),
        Raw::Text(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

/// Every field has a default, so `{}` is a complete configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Disk cache root; `None` disables the disk cache manager.
    pub cache_dir: Option<PathBuf>,
    #[serde(deserialize_with = "deserialize_size")]
    pub max_cache_size: u64,
    pub expire_interval_secs: u64,
    pub oldest_access_secs: u64,
    /// Schedule anchor; defaults to startup time.
    pub expire_base_unix_secs: Option<u64>,
    pub dataset_capacity: usize,
    pub load_timeout_secs: u64,
    /// PROJ.4 string for datasets whose `.prj` is neither lon/lat nor Mercator.
    pub source_proj: Option<String>,
    pub mercator: Mercator,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            expire_interval_secs: DEFAULT_EXPIRE_INTERVAL.as_secs(),
            oldest_access_secs: DEFAULT_OLDEST_ACCESS.as_secs(),
            expire_base_unix_secs: None,
            dataset_capacity: DEFAULT_CAPACITY,
            load_timeout_secs: DEFAULT_LOAD_TIMEOUT.as_secs(),
            source_proj: None,
            mercator: Mercator::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn expire_base(&self) -> SystemTime {
        self.expire_base_unix_secs
            .map_or_else(SystemTime::now, |s| UNIX_EPOCH + Duration::from_secs(s))
    }

    /// Where the shapefile loader keeps its files. Falls back to the system
    /// temp directory when no cache root is configured.
    pub fn geometry_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| std::env::temp_dir().join("vectile")).join(GEOMETRY_CACHE_DIR)
    }

    pub fn disk_cache_manager(&self) -> crate::error::Result<DiskCacheManager> {
        DiskCacheManager::new(
            self.cache_dir.clone(),
            self.max_cache_size,
            self.expire_base(),
            Duration::from_secs(self.expire_interval_secs),
            Duration::from_secs(self.oldest_access_secs),
        )
    }

    pub fn shapefile_loader(&self) -> ShapefileLoader {
        ShapefileLoader::new(self.geometry_cache_dir())
            .with_source_proj(self.source_proj.clone())
            .with_mercator(self.mercator)
    }

    pub fn dataset_cache(&self, loader: Arc<dyn DatasetLoader>) -> DatasetCache {
        DatasetCache::with_capacity(loader, self.dataset_capacity.max(1))
            .with_load_timeout(Duration::from_secs(self.load_timeout_secs))
    }

    /// Assembler over a fresh dataset cache backed by the shapefile loader.
    pub fn tile_assembler(&self) -> TileAssembler {
        let cache = self.dataset_cache(Arc::new(self.shapefile_loader()));
        TileAssembler::new(Arc::new(cache)).with_mercator(self.mercator)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cache_dir {
            Some(dir) => writeln!(f, "cache_dir: {}", dir.display())?,
            None => writeln!(f, "cache_dir: (disabled)")?,
        }
        writeln!(f, "max_cache_size: {}", format_size(self.max_cache_size))?;
        writeln!(f, "expire_interval: {}s, oldest_access: {}s", self.expire_interval_secs, self.oldest_access_secs)?;
        write!(f, "dataset_capacity: {}, load_timeout: {}s, mercator: {:?}", self.dataset_capacity, self.load_timeout_secs, self.mercator)
    }
}
