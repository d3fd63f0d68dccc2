//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/dunorth.sqlite"
//!
//! [canvas]
//! auth_variants = ["cookie:canvas_session", "cookie:_normandy_session", "bearer"]
//! max_pages = 50
//! timeout_secs = 30
//!
//! [extract]
//! max_file_bytes = 20971520
//! file_extensions = ["pdf", "docx"]
//!
//! [index]
//! enabled = true
//! max_tokens = 700
//! ```
//!
//! Every section except `[db]` may be omitted; defaults apply.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CanvasConfig {
    /// Ordered credential variants, tried until one is not rejected.
    #[serde(default = "default_auth_variants")]
    pub auth_variants: Vec<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Fail with an auth error instead of treating 401/403 as "no data".
    #[serde(default)]
    pub strict_auth: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            auth_variants: default_auth_variants(),
            max_pages: default_max_pages(),
            per_page: default_per_page(),
            timeout_secs: default_timeout_secs(),
            strict_auth: false,
            user_agent: default_user_agent(),
        }
    }
}

fn default_auth_variants() -> Vec<String> {
    vec![
        "cookie:canvas_session".to_string(),
        "cookie:_normandy_session".to_string(),
        "cookie:_legacy_normandy_session".to_string(),
    ]
}
fn default_max_pages() -> usize {
    50
}
fn default_per_page() -> u32 {
    100
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("dunorth-sync/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Lowercase extensions of course files worth downloading for text.
    #[serde(default = "default_file_extensions")]
    pub file_extensions: Vec<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            file_extensions: default_file_extensions(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    20 * 1024 * 1024
}
fn default_file_extensions() -> Vec<String> {
    vec!["pdf".to_string()]
}

impl ExtractConfig {
    /// Whether a file with this name should be downloaded and extracted.
    pub fn wants(&self, filename: &str) -> bool {
        let ext = match filename.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return false,
        };
        self.file_extensions
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_index_enabled() -> bool {
    true
}
fn default_max_tokens() -> usize {
    700
}

impl Config {
    /// Configuration with every default and the given database path.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            canvas: CanvasConfig::default(),
            extract: ExtractConfig::default(),
            index: IndexConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.canvas.max_pages == 0 {
            anyhow::bail!("canvas.max_pages must be >= 1");
        }
        if self.canvas.per_page == 0 {
            anyhow::bail!("canvas.per_page must be >= 1");
        }
        if self.canvas.timeout_secs == 0 {
            anyhow::bail!("canvas.timeout_secs must be > 0");
        }
        if self.canvas.auth_variants.is_empty() {
            anyhow::bail!("canvas.auth_variants must list at least one variant");
        }
        for variant in &self.canvas.auth_variants {
            crate::canvas::AuthVariant::parse(variant).map_err(|e| {
                anyhow::anyhow!("Invalid canvas.auth_variants entry '{}': {}", variant, e)
            })?;
        }
        if self.index.max_tokens == 0 {
            anyhow::bail!("index.max_tokens must be > 0");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
