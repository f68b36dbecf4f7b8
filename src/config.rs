use std::path::{Path, PathBuf};
use std::time::Duration;

use facet::Facet;

use crate::catalog::CatalogSettings;
use crate::error::HerdError;
use crate::paths;

pub const DEFAULT_WORKFLOWS_URL: &str =
    "https://github.com/herd-vm/workflows/archive/refs/heads/main.zip";

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Config {
    #[facet(default)]
    pub workflows: WorkflowsConfig,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct WorkflowsConfig {
    #[facet(default = "https://github.com/herd-vm/workflows/archive/refs/heads/main.zip")]
    pub url: String,
    /// Seconds a downloaded archive stays fresh; 0 refreshes on every call.
    #[facet(default = 86400)]
    pub ttl_s: u64,
    /// Empty means the per-user cache directory.
    #[facet(default)]
    pub cache_dir: String,
    /// Empty means the architecture this binary was built for.
    #[facet(default)]
    pub arch: String,
    #[facet(default = 30)]
    pub download_timeout_s: u64,
}

impl Default for WorkflowsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WORKFLOWS_URL.into(),
            ttl_s: 86400,
            cache_dir: String::new(),
            arch: String::new(),
            download_timeout_s: 30,
        }
    }
}

impl WorkflowsConfig {
    pub fn cache_dir(&self) -> PathBuf {
        if self.cache_dir.is_empty() {
            paths::cache_dir()
        } else {
            PathBuf::from(&self.cache_dir)
        }
    }

    pub fn arch(&self) -> &str {
        if self.arch.is_empty() {
            std::env::consts::ARCH
        } else {
            &self.arch
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_s)
    }

    pub fn catalog_settings(&self) -> CatalogSettings {
        CatalogSettings {
            archive_url: self.url.clone(),
            cache_dir: self.cache_dir(),
            ttl: Duration::from_secs(self.ttl_s),
            compatibility_tag: Some(self.arch().to_string()),
        }
    }
}

fn validate_config(config: &Config) -> Result<(), HerdError> {
    let w = &config.workflows;

    if w.url.is_empty() {
        return Err(HerdError::Validation {
            message: "workflows.url cannot be empty".into(),
        });
    }
    let scheme = w.url.split_once("://").map(|(s, _)| s);
    if !matches!(scheme, Some("http" | "https" | "file")) {
        return Err(HerdError::Validation {
            message: format!(
                "workflows.url must be an http, https or file URL (got '{}')",
                w.url
            ),
        });
    }
    if w.download_timeout_s == 0 {
        return Err(HerdError::Validation {
            message: "workflows.download_timeout_s must be at least 1".into(),
        });
    }

    Ok(())
}

pub fn parse_config(contents: &str, path: &Path) -> Result<Config, HerdError> {
    let config: Config = facet_toml::from_str(contents).map_err(|e| HerdError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Load the config at `path`, or the default location when `path` is `None`.
///
/// A missing file at the default location yields the default config; an
/// explicitly given path must exist.
pub fn load_config(path: Option<&Path>) -> Result<Config, HerdError> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (paths::config_path(), false),
    };

    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        Err(source) => {
            return Err(HerdError::ConfigLoad {
                path: path.display().to_string(),
                source,
            });
        }
    };

    parse_config(&contents, &path)
}
