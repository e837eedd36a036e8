use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tempfile::NamedTempFile;
use tracing::debug;
use url::Url;

/// Write-then-rename sink so a half-fetched component never lands in the
/// geometry cache under its final name.
struct PendingWrite {
    target: PathBuf,
    tmp: Option<NamedTempFile>,
}

impl PendingWrite {
    fn open(target: &Path) -> Result<Self> {
        let parent = target.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
        let tmp = NamedTempFile::new_in(parent).context("create temp file")?;
        Ok(Self { target: target.to_path_buf(), tmp: Some(tmp) })
    }

    fn file(&mut self) -> std::io::Result<&mut NamedTempFile> {
        self.tmp.as_mut().ok_or_else(|| std::io::Error::other("write already finalized"))
    }

    fn finalize(mut self) -> Result<()> {
        let Some(tmp) = self.tmp.take() else { bail!("write already finalized") };
        tmp.as_file().sync_all().ok();
        tmp.persist(&self.target).with_context(|| format!("rename to {}", self.target.display()))?;
        if let Some(dir) = self.target.parent() {
            let _ = File::open(dir).and_then(|f| f.sync_all());
        }
        Ok(())
    }
}

impl Write for PendingWrite {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> { self.file()?.write(buf) }
    fn flush(&mut self) -> std::io::Result<()> { self.file()?.flush() }
}

/// Fetch `url` into `out_path`. Returns `Ok(false)` when the resource does
/// not exist (missing local file, HTTP 404/410).
pub(crate) fn fetch_component(url: &Url, out_path: &Path) -> Result<bool> {
    debug!(%url, path = %out_path.display(), "fetching dataset component");
    match url.scheme() {
        "file" => {
            let Ok(src) = url.to_file_path() else { bail!("not a local path: {url}") };
            if !src.is_file() {
                return Ok(false);
            }
            let mut sink = PendingWrite::open(out_path)?;
            let mut input = File::open(&src).with_context(|| format!("open {}", src.display()))?;
            std::io::copy(&mut input, &mut sink).with_context(|| format!("write {}", out_path.display()))?;
            sink.finalize()?;
            Ok(true)
        }
        "http" | "https" => fetch_remote(url, out_path),
        other => bail!("unsupported descriptor scheme '{other}'"),
    }
}

#[cfg(feature = "download")]
fn fetch_remote(url: &Url, out_path: &Path) -> Result<bool> {
    use reqwest::{blocking::Client, redirect::Policy, StatusCode};
    use std::time::Duration;

    let client = Client::builder()
        .user_agent(concat!("vectile/", env!("CARGO_PKG_VERSION")))
        .redirect(Policy::limited(10))
        .timeout(Duration::from_secs(120))
        .build()?;

    let mut resp = client.get(url.as_str()).send().with_context(|| format!("GET {url}"))?;
    if matches!(resp.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
        return Ok(false);
    }
    if let Err(e) = resp.error_for_status_ref() {
        bail!("GET {url} returned error status: {e}");
    }

    let mut sink = PendingWrite::open(out_path)?;
    std::io::copy(&mut resp, &mut sink).with_context(|| format!("write {}", out_path.display()))?;
    sink.finalize()?;
    Ok(true)
}

#[cfg(not(feature = "download"))]
fn fetch_remote(url: &Url, _out_path: &Path) -> Result<bool> {
    bail!("cannot fetch {url}: built without the `download` feature")
}
