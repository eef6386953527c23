use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::sigv4::MAX_PRESIGN_SECS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub bucket: String,
    pub region: String,
    /// Key prefix above all owners (`users` → `users/<owner>/<folder>/`).
    #[serde(default = "default_root")]
    pub root: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_root() -> String {
    "users".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Textract region; falls back to `store.region`.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint_url: None,
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_extraction_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl ExtractionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}
fn default_extraction_timeout_secs() -> u64 {
    600
}
fn default_max_retries() -> u32 {
    3
}

/// How matches are referenced in a query outcome.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// Presigned read URL, falling back to the key when the store has none.
    #[default]
    Signed,
    Key,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_document_globs")]
    pub document_globs: Vec<String>,
    #[serde(default)]
    pub link_mode: LinkMode,
    #[serde(default = "default_url_ttl_secs")]
    pub url_ttl_secs: u64,
    #[serde(default = "default_max_retries")]
    pub store_retries: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            document_globs: default_document_globs(),
            link_mode: LinkMode::default(),
            url_ttl_secs: default_url_ttl_secs(),
            store_retries: default_max_retries(),
        }
    }
}

impl QueryConfig {
    /// Case-insensitive matcher for document keys.
    pub fn document_matcher(&self) -> Result<GlobSet> {
        build_globset(&self.document_globs)
    }
}

fn default_document_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string()]
}
fn default_url_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_color")]
    pub color: [f32; 3],
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            color: default_color(),
            opacity: default_opacity(),
        }
    }
}

fn default_color() -> [f32; 3] {
    [1.0, 1.0, 0.0]
}
fn default_opacity() -> f32 {
    0.4
}

/// Build a case-insensitive [`GlobSet`] from pattern strings.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("invalid glob '{}'", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate store
    if config.store.bucket.trim().is_empty() {
        anyhow::bail!("store.bucket must not be empty");
    }
    if config.store.region.trim().is_empty() {
        anyhow::bail!("store.region must not be empty");
    }
    if config.store.request_timeout_secs == 0 {
        anyhow::bail!("store.request_timeout_secs must be > 0");
    }

    // Validate extraction
    if config.extraction.poll_interval_secs == 0 {
        anyhow::bail!("extraction.poll_interval_secs must be > 0");
    }
    if config.extraction.timeout_secs < config.extraction.poll_interval_secs {
        anyhow::bail!("extraction.timeout_secs must be >= extraction.poll_interval_secs");
    }

    // Validate query
    if config.query.document_globs.is_empty() {
        anyhow::bail!("query.document_globs must list at least one pattern");
    }
    config.query.document_matcher()?;
    if !(1..=MAX_PRESIGN_SECS).contains(&config.query.url_ttl_secs) {
        anyhow::bail!(
            "query.url_ttl_secs must be in [1, {}]",
            MAX_PRESIGN_SECS
        );
    }

    // Validate render
    if !(0.0..=1.0).contains(&config.render.opacity) {
        anyhow::bail!("render.opacity must be in [0.0, 1.0]");
    }
    if config.render.color.iter().any(|c| !(0.0..=1.0).contains(c)) {
        anyhow::bail!("render.color components must be in [0.0, 1.0]");
    }

    Ok(())
}
