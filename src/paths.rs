use std::path::{Path, PathBuf};

/// Workflow archive cache directory: `~/.cache/herd/workflows/`
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("herd")
        .join("workflows")
}

/// Default config file: `~/.config/herd/herd.toml`
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("herd")
        .join("herd.toml")
}

/// File name of the cached archive for a source URL:
/// `workflows-<FNV-1a/32 of the URL, 8 hex>.zip`.
///
/// Derived from the URL alone so two catalogs pointed at different bundles
/// never share a cache file.
pub fn archive_file_name(url: &str) -> String {
    let mut hash: u32 = 0x811c9dc5; // FNV-1a 32-bit offset basis
    for b in url.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    format!("workflows-{hash:08x}.zip")
}

/// Path of the cached archive for `url` inside `cache_dir`.
pub fn archive_path(cache_dir: &Path, url: &str) -> PathBuf {
    cache_dir.join(archive_file_name(url))
}
