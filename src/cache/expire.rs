//! Filesystem side of the disk cache: matching, aging and deleting cache files.

use std::fs::{self, Metadata, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use regex::Regex;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Highest zoom level whose cache files are kept.
pub const MAX_CACHED_ZOOM: u32 = 19;

/// Cache files: shapefile components, optionally prefixed with `<zoom>_`.
fn cache_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(?:(\d+)_)?.+\.(?:shp|shx|dbf|prj|cpg)$").expect("valid cache file pattern")
    })
}

/// True if `name` is a file the cache owns.
pub fn is_cache_file(name: &str) -> bool { cache_file_pattern().is_match(name) }

/// Zoom prefix of a cache file name, if any.
fn zoom_of(name: &str) -> Option<u32> {
    cache_file_pattern().captures(name)?.get(1)?.as_str().parse().ok()
}

/// Totals for one expiry or flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryStats {
    pub files_deleted: u64,
    pub dirs_deleted: u64,
    pub bytes_freed: u64,
}

impl std::ops::AddAssign for ExpiryStats {
    fn add_assign(&mut self, rhs: Self) {
        self.files_deleted += rhs.files_deleted;
        self.dirs_deleted += rhs.dirs_deleted;
        self.bytes_freed += rhs.bytes_freed;
    }
}

/// One leaf directory of the cache tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEndpoint {
    pub path: PathBuf,
    pub file_count: u64,
    pub bytes: u64,
}

#[inline]
fn is_readonly(meta: &Metadata) -> bool { meta.permissions().readonly() }

/// Time since last access, falling back to modification time.
fn age(meta: &Metadata, now: SystemTime) -> Duration {
    meta.accessed()
        .or_else(|_| meta.modified())
        .map(|t| now.duration_since(t).unwrap_or(Duration::ZERO))
        .unwrap_or(Duration::ZERO)
}

/// Delete a file only if it can be opened for writing first. A file held
/// elsewhere or marked read-only is left for a later pass.
pub fn safe_delete(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) if is_readonly(&meta) => {
            debug!(path = %path.display(), "skipping read-only file");
            return false;
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot stat file for delete");
            return false;
        }
        Ok(_) => {}
    }
    if let Err(e) = OpenOptions::new().read(true).write(true).open(path) {
        debug!(path = %path.display(), error = %e, "file in use, leaving for next pass");
        return false;
    }
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "delete failed");
            false
        }
    }
}

/// Total bytes of all files below `root`.
pub fn directory_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn contains_readonly(dir: &Path) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|e| e.metadata().ok())
        .any(|m| is_readonly(&m))
}

/// Expire one directory tree relative to `now`.
///
/// Read-only directories are never entered. A directory older than
/// `oldest_access` is removed whole; otherwise children are expired first,
/// then files with zoom above [`MAX_CACHED_ZOOM`] go unconditionally and the
/// remaining cache files go when older than `oldest_access`, highest zoom
/// first. Empty subdirectories are pruned; `dir` itself is kept.
pub fn expire_dir(dir: &Path, oldest_access: Duration, now: SystemTime) -> ExpiryStats {
    let mut stats = ExpiryStats::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "cannot read cache directory");
            return stats;
        }
    };

    let mut files = Vec::new();
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };

        if meta.is_dir() {
            if is_readonly(&meta) {
                trace!(dir = %path.display(), "read-only subtree skipped");
                continue;
            }
            if age(&meta, now) > oldest_access && !contains_readonly(&path) {
                let bytes = directory_size(&path);
                match fs::remove_dir_all(&path) {
                    Ok(()) => {
                        stats.dirs_deleted += 1;
                        stats.bytes_freed += bytes;
                    }
                    Err(e) => debug!(dir = %path.display(), error = %e, "could not remove stale directory"),
                }
                continue;
            }
            stats += expire_dir(&path, oldest_access, now);
            let empty = fs::read_dir(&path).map(|mut d| d.next().is_none()).unwrap_or(false);
            if empty && fs::remove_dir(&path).is_ok() {
                stats.dirs_deleted += 1;
            }
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()).filter(|n| is_cache_file(n)) {
            files.push((zoom_of(name), path.clone(), meta));
        }
    }

    // highest zoom first, unprefixed files last
    files.sort_by(|a, b| b.0.cmp(&a.0));
    for (zoom, path, meta) in files {
        let excessive = zoom.is_some_and(|z| z > MAX_CACHED_ZOOM);
        if (excessive || age(&meta, now) > oldest_access) && safe_delete(&path) {
            stats.files_deleted += 1;
            stats.bytes_freed += meta.len();
        }
    }
    stats
}

/// Every directory under `root` with no subdirectories, with its file count and size.
pub fn enumerate_cache(root: &Path) -> Vec<CacheEndpoint> {
    let mut endpoints = Vec::new();
    let mut subdirs = Vec::new();
    let (mut file_count, mut bytes) = (0u64, 0u64);

    let Ok(entries) = fs::read_dir(root) else { return endpoints };
    for entry in entries.filter_map(Result::ok) {
        match entry.metadata() {
            Ok(m) if m.is_dir() => subdirs.push(entry.path()),
            Ok(m) => {
                file_count += 1;
                bytes += m.len();
            }
            Err(_) => {}
        }
    }

    if subdirs.is_empty() {
        endpoints.push(CacheEndpoint { path: root.to_path_buf(), file_count, bytes });
    } else {
        subdirs.sort();
        for dir in subdirs {
            endpoints.extend(enumerate_cache(&dir));
        }
    }
    endpoints
}

/// Delete every cache file below `dir`, keeping the directories.
pub fn flush_files(dir: &Path) -> ExpiryStats {
    let mut stats = ExpiryStats::default();
    let walker = WalkDir::new(dir).into_iter().filter_entry(|e| {
        e.depth() == 0 || !e.file_type().is_dir() || e.metadata().map(|m| !is_readonly(&m)).unwrap_or(false)
    });
    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() || !entry.file_name().to_str().is_some_and(is_cache_file) {
            continue;
        }
        let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if safe_delete(entry.path()) {
            stats.files_deleted += 1;
            stats.bytes_freed += len;
        }
    }
    stats
}

/// Remove `path` and everything below it.
pub fn delete(path: &Path) -> std::io::Result<()> {
    if path.is_dir() { fs::remove_dir_all(path) } else { fs::remove_file(path) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{File, FileTimes};
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn write(path: &Path, len: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; len]).unwrap();
    }

    fn backdate(path: &Path, by: Duration) {
        let t = SystemTime::now() - by;
        File::open(path).unwrap().set_times(FileTimes::new().set_accessed(t).set_modified(t)).unwrap();
    }

    #[test]
    fn pattern_and_zoom() {
        assert!(is_cache_file("world_reprojected.shp"));
        assert!(is_cache_file("12_world.DBF"));
        assert!(!is_cache_file("notes.txt"));
        assert_eq!(zoom_of("12_world.shp"), Some(12));
        assert_eq!(zoom_of("23_world.prj"), Some(23));
        assert_eq!(zoom_of("world.shp"), None);
    }

    #[test]
    fn excessive_zoom_goes_regardless_of_age() {
        let tmp = TempDir::new().unwrap();
        let deep = tmp.path().join("a/21_x.shp");
        let fresh = tmp.path().join("a/12_x.shp");
        write(&deep, 10);
        write(&fresh, 10);

        let stats = expire_dir(tmp.path(), 7 * DAY, SystemTime::now());
        assert_eq!(stats.files_deleted, 1);
        assert!(!deep.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn old_files_go_and_empty_dirs_are_pruned() {
        let tmp = TempDir::new().unwrap();
        let old = tmp.path().join("org/example/a/shp/00000000/a_reprojected.shp");
        let other = tmp.path().join("org/example/a/shp/00000000/readme.txt");
        let young = tmp.path().join("org/example/b/shp/00000000/b_reprojected.shp");
        write(&old, 100);
        write(&other, 5);
        write(&young, 100);
        backdate(&old, 10 * DAY);

        let stats = expire_dir(tmp.path(), 7 * DAY, SystemTime::now());
        assert!(!old.exists());
        assert!(other.exists(), "non-cache files are not touched");
        assert!(young.exists());
        assert!(stats.bytes_freed >= 100);

        fs::remove_file(&other).unwrap();
        expire_dir(tmp.path(), 7 * DAY, SystemTime::now());
        assert!(!tmp.path().join("org/example/a").exists());
        assert!(tmp.path().join("org/example/b").exists());
    }

    #[test]
    fn stale_directory_is_removed_whole() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("stale");
        write(&dir.join("x/1_a.shp"), 10);
        write(&dir.join("keep.txt"), 10);
        backdate(&dir, 30 * DAY);

        expire_dir(tmp.path(), 7 * DAY, SystemTime::now());
        assert!(!dir.exists());
    }

    #[test]
    fn enumerate_reports_leaves() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("a/1/x.shp"), 10);
        write(&tmp.path().join("a/1/x.dbf"), 5);
        write(&tmp.path().join("b/y.shp"), 7);
        write(&tmp.path().join("top.shp"), 1);

        let leaves = enumerate_cache(tmp.path());
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0], CacheEndpoint { path: tmp.path().join("a/1"), file_count: 2, bytes: 15 });
        assert_eq!(leaves[1], CacheEndpoint { path: tmp.path().join("b"), file_count: 1, bytes: 7 });
    }

    #[test]
    fn flush_keeps_structure() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("a/b/x.shp"), 10);
        write(&tmp.path().join("a/b/x.txt"), 10);

        let stats = flush_files(tmp.path());
        assert_eq!(stats.files_deleted, 1);
        assert!(tmp.path().join("a/b").is_dir());
        assert!(tmp.path().join("a/b/x.txt").exists());
    }

    #[test]
    fn delete_removes_subtree() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("a/b/x.shp"), 10);
        delete(&tmp.path().join("a")).unwrap();
        assert!(!tmp.path().join("a").exists());
        assert!(delete(&tmp.path().join("missing")).is_err());
    }
}
