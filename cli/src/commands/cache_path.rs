use anyhow::Result;
use vectile::cache_key_dir;

pub fn run(cli: &crate::cli::Cli, args: &crate::cli::CachePathArgs) -> Result<()> {
    let config = super::load_config(cli)?;
    let dir = cache_key_dir(&args.descriptor, args.time_tag.as_deref())?;
    match &config.cache_dir {
        Some(root) => println!("{}", root.join(dir).display()),
        None => println!("{}", dir.display()),
    }
    Ok(())
}
