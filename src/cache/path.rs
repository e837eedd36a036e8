use std::path::PathBuf;

use url::{form_urlencoded, Host, Url};

use crate::error::{Result, TileError};

/// Time-tag directory used when a request carries no tag.
pub const DEFAULT_TIME_TAG: &str = "00000000";

/// Lowercase a time tag and replace anything that is not a hex digit with `0`.
pub fn normalize_time_tag(time_tag: Option<&str>) -> String {
    match time_tag.filter(|t| !t.is_empty()) {
        None => DEFAULT_TIME_TAG.to_string(),
        Some(tag) => tag
            .chars()
            .map(|c| c.to_ascii_lowercase())
            .map(|c| if c.is_ascii_hexdigit() { c } else { '0' })
            .collect(),
    }
}

/// Relative cache directory for a descriptor:
/// `<host labels, reversed unless IPv4>/<explicit port>/<path parts>/<query parts>/<time tag>`.
///
/// Path parts are split on `/`, `\` and `.`; query parts on `&`.
pub fn cache_key_dir(descriptor: &str, time_tag: Option<&str>) -> Result<PathBuf> {
    let url = Url::parse(descriptor).map_err(|_| TileError::InvalidDescriptor(descriptor.to_string()))?;
    let mut dir = PathBuf::new();

    match url.host() {
        Some(Host::Domain(domain)) => {
            for label in domain.split('.').rev().filter(|l| !l.is_empty()) {
                dir.push(escape(label));
            }
        }
        Some(Host::Ipv4(ip)) => dir.push(ip.to_string()),
        Some(Host::Ipv6(ip)) => dir.push(escape(&ip.to_string())),
        None => {}
    }
    if let Some(port) = url.port() {
        dir.push(port.to_string());
    }

    for part in url.path().split(['/', '\\', '.']).filter(|p| !p.is_empty()) {
        dir.push(escape(part));
    }

    if let Some(query) = url.query() {
        for param in query.split('&').filter(|p| !p.is_empty()) {
            let encoded: String = form_urlencoded::byte_serialize(param.as_bytes()).collect();
            dir.push(escape(&encoded));
        }
    }

    dir.push(normalize_time_tag(time_tag));
    Ok(dir)
}

/// Keep characters safe in a directory name and `%XX`-escape every other byte.
fn escape(part: &str) -> String {
    #[inline]
    fn allowed(b: u8) -> bool {
        matches!(b,
            b' ' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'(' | b')' | b'+' | b',' | b'-' | b'.'
            | b'0'..=b'9' | b';' | b'=' | b'@' | b'A'..=b'Z' | b'[' | b']' | b'^' | b'_' | b'`' | b'a'..=b'z')
    }

    let mut out = String::with_capacity(part.len());
    for b in part.bytes() {
        if allowed(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
