use std::fs::{self, File, FileTimes};
use std::path::Path;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use vectile::{CacheState, DiskCacheManager};

const DAY: Duration = Duration::from_secs(24 * 3600);

fn write_old(path: &Path, len: usize, age: Duration) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, vec![1u8; len]).unwrap();
    let t = SystemTime::now() - age;
    File::open(path).unwrap().set_times(FileTimes::new().set_accessed(t).set_modified(t)).unwrap();
}

fn set_readonly(path: &Path, readonly: bool) {
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_readonly(readonly);
    fs::set_permissions(path, perms).unwrap();
}

#[test]
fn full_pass_spares_only_read_only_subtrees() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    for file in [
        "org/maptube/www/shapefiles/MSOA_WGS84/shp/00000000/MSOA_WGS84_reprojected.shp",
        "org/maptube/www/shapefiles/MSOA_WGS84/shp/00000000/MSOA_WGS84_reprojected.dbf",
        "localhost/shapefiles/world/shp/00000000/12_world.shp",
        "pinned/shapefiles/base/shp/00000000/base_reprojected.shp",
    ] {
        write_old(&root.join(file), 4096, 30 * DAY);
    }
    set_readonly(&root.join("pinned"), true);

    let manager = DiskCacheManager::new(Some(root.to_path_buf()), 1024, SystemTime::now(), DAY, 7 * DAY).unwrap();
    assert!(manager.cache_size_bytes() > manager.max_cache_size_bytes());

    let stats = manager.run_expiry_now();
    assert_eq!(manager.state(), CacheState::Idle);
    assert!(manager.last_run().is_some());
    assert!(stats.bytes_freed >= 3 * 4096);

    assert!(!root.join("org").exists());
    assert!(!root.join("localhost").exists());
    assert!(root.join("pinned/shapefiles/base/shp/00000000/base_reprojected.shp").is_file());

    let leaves = manager.enumerate_cache();
    assert_eq!(leaves.len(), 1);
    assert_eq!(leaves[0].file_count, 1);

    set_readonly(&root.join("pinned"), false);
    manager.shutdown();
}

#[test]
fn young_files_survive_a_pass() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let young = root.join("com/example/a/shp/00000000/a_reprojected.shp");
    let old = root.join("com/example/b/shp/00000000/b_reprojected.shp");
    write_old(&young, 100, Duration::ZERO);
    write_old(&old, 100, 10 * DAY);

    let manager = DiskCacheManager::with_defaults(Some(root.to_path_buf())).unwrap();
    manager.run_expiry_now();

    assert!(young.is_file());
    assert!(!old.exists());
    assert!(!root.join("com/example/b").exists());
}
