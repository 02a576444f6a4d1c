use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_commons_url")]
    pub commons_url: String,
    #[serde(default = "default_wikidata_url")]
    pub wikidata_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            commons_url: default_commons_url(),
            wikidata_url: default_wikidata_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_commons_url() -> String {
    "https://commons.wikimedia.org/w/api.php".to_string()
}
fn default_wikidata_url() -> String {
    "https://www.wikidata.org/w/api.php".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("commons-uploader/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,
    #[serde(default = "default_category_limit")]
    pub category_limit: u32,
    #[serde(default = "default_entity_limit")]
    pub entity_limit: u32,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_query_chars: default_min_query_chars(),
            category_limit: default_category_limit(),
            entity_limit: default_entity_limit(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_min_query_chars() -> usize {
    3
}
fn default_category_limit() -> u32 {
    10
}
fn default_entity_limit() -> u32 {
    15
}
fn default_debounce_ms() -> u64 {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_comment")]
    pub comment: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            comment: default_comment(),
        }
    }
}

/// Default upload chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_comment() -> String {
    "Uploaded with commons-uploader".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: Option<String>,
}

impl ApiConfig {
    pub fn commons(&self) -> Result<Url> {
        Url::parse(&self.commons_url)
            .with_context(|| format!("api.commons_url is not a valid URL: {}", self.commons_url))
    }

    pub fn wikidata(&self) -> Result<Url> {
        Url::parse(&self.wikidata_url)
            .with_context(|| format!("api.wikidata_url is not a valid URL: {}", self.wikidata_url))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

pub fn validate(config: &Config) -> Result<()> {
    config.api.commons()?;
    config.api.wikidata()?;

    if config.api.timeout_secs == 0 {
        bail!("api.timeout_secs must be > 0");
    }

    if config.search.min_query_chars == 0 {
        bail!("search.min_query_chars must be >= 1");
    }
    if config.search.category_limit == 0 || config.search.entity_limit == 0 {
        bail!("search.category_limit and search.entity_limit must be >= 1");
    }

    if config.upload.chunk_size == 0 {
        bail!("upload.chunk_size must be > 0");
    }

    Ok(())
}
