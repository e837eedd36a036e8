use anyhow::{bail, Result};
use vectile::cache::ExpiryStats;
use vectile::format_size;

use crate::cli::CacheAction;

fn report(verb: &str, stats: &ExpiryStats) {
    println!(
        "{verb} {} files, {} directories, {} freed",
        stats.files_deleted, stats.dirs_deleted, format_size(stats.bytes_freed)
    );
}

pub fn run(cli: &crate::cli::Cli, args: &crate::cli::CacheArgs) -> Result<()> {
    let config = super::load_config(cli)?;
    if config.cache_dir.is_none() {
        bail!("no cache_dir configured; pass --config with a cache_dir");
    }
    let manager = config.disk_cache_manager()?;

    match &args.action {
        CacheAction::List => {
            let endpoints = manager.enumerate_cache();
            for e in &endpoints {
                println!("{:>8} files {:>10}  {}", e.file_count, format_size(e.bytes), e.path.display());
            }
            println!(
                "{} endpoints, {} total (limit {})",
                endpoints.len(),
                format_size(manager.cache_size_bytes()),
                format_size(manager.max_cache_size_bytes())
            );
        }
        CacheAction::Flush => report("flushed", &manager.flush_files()),
        CacheAction::Delete { path } => {
            manager.delete(path)?;
            println!("deleted {}", path.display());
        }
        CacheAction::Expire => report("expired", &manager.run_expiry_now()),
    }
    manager.shutdown();
    Ok(())
}
