//! Configuration loading for sciharvest.
//! Reads sciharvest.toml from the current directory or the path in the
//! SCIHARVEST_CONFIG env var.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sciharvest_common::HttpConfig;
use sciharvest_ingestion::models::{SourceContext, SourceSpec};
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "sciharvest.toml";
pub const CONFIG_ENV_VAR: &str = "SCIHARVEST_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: f64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_databases")]
    pub databases: Vec<String>,
    #[serde(default = "default_true")]
    pub overwrite: bool,
}

fn default_output_dir()  -> PathBuf     { PathBuf::from("studies") }
fn default_delay_secs()  -> f64         { 1.0 }
fn default_max_results() -> usize       { 100 }
fn default_databases()   -> Vec<String> { vec!["all".to_string()] }
fn default_true()        -> bool        { true }

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            delay_secs: default_delay_secs(),
            max_results: default_max_results(),
            databases: default_databases(),
            overwrite: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSection {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_true")]
    pub downgrade_head: bool,
}

fn default_timeout_secs() -> u64 { 30 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_ms()   -> u64 { 500 }

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            downgrade_head: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub pubmed_api_key: Option<String>,
    pub semantic_scholar_api_key: Option<String>,
    #[serde(default = "default_biorxiv_window_days")]
    pub biorxiv_window_days: i64,
    #[serde(default = "default_biorxiv_max_pages")]
    pub biorxiv_max_pages: usize,
    #[serde(default = "default_scholar_page_delay_secs")]
    pub scholar_page_delay_secs: f64,
}

fn default_biorxiv_window_days()     -> i64   { 730 }
fn default_biorxiv_max_pages()       -> usize { 10 }
fn default_scholar_page_delay_secs() -> f64   { 2.0 }

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            pubmed_api_key: None,
            semantic_scholar_api_key: None,
            biorxiv_window_days: default_biorxiv_window_days(),
            biorxiv_max_pages: default_biorxiv_max_pages(),
            scholar_page_delay_secs: default_scholar_page_delay_secs(),
        }
    }
}

impl Config {
    /// Load configuration from sciharvest.toml.
    /// Checks SCIHARVEST_CONFIG first, then the current directory. A missing
    /// file at the default path means defaults; a missing file named by the
    /// env var is an error.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::load_from(Path::new(&path)),
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "Config file not found: {}\n\
                 Copy sciharvest.example.toml to sciharvest.toml and edit it.",
                path.display()
            );
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout: Duration::from_secs(self.http.timeout_secs),
            max_attempts: self.http.max_attempts.max(1),
            backoff_base: Duration::from_millis(self.http.backoff_ms),
            downgrade_head: self.http.downgrade_head,
            ..HttpConfig::default()
        }
    }

    pub fn source_context(&self) -> SourceContext {
        SourceContext {
            http: self.http_config(),
            pubmed_api_key: self.sources.pubmed_api_key.clone().filter(|k| !k.is_empty()),
            semantic_scholar_api_key: self
                .sources
                .semantic_scholar_api_key
                .clone()
                .filter(|k| !k.is_empty()),
            biorxiv_window_days: self.sources.biorxiv_window_days,
            biorxiv_max_pages: self.sources.biorxiv_max_pages,
            scholar_page_delay: secs(self.sources.scholar_page_delay_secs),
            ..SourceContext::default()
        }
    }
}

/// Seconds as a `Duration`: negative or NaN is zero, overflow saturates.
pub fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

/// Database keys to adapters. `all` anywhere selects every adapter;
/// unknown keys are skipped with a warning. Order is kept, repeats dropped.
pub fn parse_databases(keys: &[String]) -> Vec<SourceSpec> {
    if keys.iter().any(|k| k.trim().eq_ignore_ascii_case("all")) {
        return SourceSpec::ALL.to_vec();
    }
    let mut specs = Vec::new();
    for key in keys {
        match SourceSpec::from_key(key) {
            Some(spec) if !specs.contains(&spec) => specs.push(spec),
            Some(_) => {}
            None => warn!(database = %key, "Unknown database, skipping"),
        }
    }
    specs
}

#[cfg(test)]
mod tests;
