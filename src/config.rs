//! Configuration file handling.
//!
//! Settings are resolved with this precedence (highest first):
//! 1. Command-line flags
//! 2. The TOML config file
//! 3. Built-in defaults

use crate::model::{
    ExportConfig, DEFAULT_MAX_POLL_FAILURES, DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_SYNC_THRESHOLD,
};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub service: ServiceSection,
    pub export: ExportSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceSection {
    pub base_url: Option<String>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportSection {
    pub output_dir: Option<PathBuf>,
    pub sync_threshold: Option<u64>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    pub max_poll_failures: Option<u32>,
    pub auto_save: Option<bool>,
}

/// Values given on the command line; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub sync_threshold: Option<u64>,
    pub poll_interval: Option<Duration>,
    pub max_poll_failures: Option<u32>,
    pub request_timeout: Option<Duration>,
    pub auto_save: Option<bool>,
}

/// `~/.config/bulk-export/config.toml` (platform config dir).
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bulk-export").join("config.toml"))
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Load an explicitly named file, or the default one if it exists.
    /// An explicit path that cannot be read is an error; a missing default
    /// file is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }
}

/// Merge flags over the file over the defaults, then validate.
pub fn resolve(file: FileConfig, cli: Overrides) -> Result<ExportConfig> {
    let FileConfig { service, export } = file;
    let cfg = ExportConfig {
        base_url: cli
            .base_url
            .or(service.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        output_dir: cli
            .output_dir
            .or(export.output_dir)
            .unwrap_or_else(|| PathBuf::from(".")),
        sync_threshold: cli
            .sync_threshold
            .or(export.sync_threshold)
            .unwrap_or(DEFAULT_SYNC_THRESHOLD),
        poll_interval: cli
            .poll_interval
            .or(export.poll_interval)
            .unwrap_or(DEFAULT_POLL_INTERVAL),
        max_poll_failures: cli
            .max_poll_failures
            .or(export.max_poll_failures)
            .unwrap_or(DEFAULT_MAX_POLL_FAILURES),
        request_timeout: cli
            .request_timeout
            .or(service.request_timeout)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        user_agent: format!("bulk-export/{}", env!("CARGO_PKG_VERSION")),
        auto_save: cli.auto_save.or(export.auto_save).unwrap_or(true),
    };
    validate(&cfg)?;
    Ok(cfg)
}

pub fn validate(cfg: &ExportConfig) -> Result<()> {
    if cfg.max_poll_failures == 0 {
        bail!("max_poll_failures must be at least 1");
    }
    if cfg.poll_interval.is_zero() {
        bail!("poll_interval must be greater than zero");
    }
    if cfg.request_timeout.is_zero() {
        bail!("request_timeout must be greater than zero");
    }
    let url = reqwest::Url::parse(&cfg.base_url)
        .with_context(|| format!("invalid base URL {:?}", cfg.base_url))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("base URL must use http or https, got {:?}", url.scheme());
    }
    Ok(())
}
