//! TOML configuration.
//!
//! ```toml
//! [export]
//! max_records_per_chunk = 100
//! max_media_per_chunk = 40
//! scroll_step_delay_ms = 300
//! media_acquire_timeout_ms = 5000
//! quality = "full"            # or "reduced"
//!
//! [scroll]
//! seek_boundary = true
//! boundary_attempts = 200
//! stability_window = 3
//! max_collect_iterations = 400
//! step_fraction = 0.8
//! settle_delay_ms = 500
//!
//! [media]
//! disabled_strategies = ["full-view"]
//! credentials_env = "SCROLLBACK_COOKIE"
//! full_view_settle_ms = 700
//!
//! [output]
//! dir = "./exports"
//! format = "markdown"         # or "json"
//! ```
//!
//! Every field has a default; an empty file is a valid configuration.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::media::{QualityHint, STRATEGY_NAMES};
use crate::render::OutputFormat;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub scroll: ScrollConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_max_records")]
    pub max_records_per_chunk: usize,
    #[serde(default = "default_max_media")]
    pub max_media_per_chunk: usize,
    #[serde(default = "default_scroll_step_delay_ms")]
    pub scroll_step_delay_ms: u64,
    #[serde(default = "default_media_timeout_ms")]
    pub media_acquire_timeout_ms: u64,
    #[serde(default)]
    pub quality: QualityHint,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_records_per_chunk: default_max_records(),
            max_media_per_chunk: default_max_media(),
            scroll_step_delay_ms: default_scroll_step_delay_ms(),
            media_acquire_timeout_ms: default_media_timeout_ms(),
            quality: QualityHint::default(),
        }
    }
}

fn default_max_records() -> usize {
    100
}
fn default_max_media() -> usize {
    40
}
fn default_scroll_step_delay_ms() -> u64 {
    300
}
fn default_media_timeout_ms() -> u64 {
    5000
}

impl ExportConfig {
    pub fn scroll_step_delay(&self) -> Duration {
        Duration::from_millis(self.scroll_step_delay_ms)
    }

    pub fn media_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.media_acquire_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScrollConfig {
    #[serde(default = "default_true")]
    pub seek_boundary: bool,
    #[serde(default = "default_boundary_attempts")]
    pub boundary_attempts: u32,
    /// Consecutive no-movement observations that mean the boundary is reached.
    #[serde(default = "default_stability_window")]
    pub stability_window: u32,
    #[serde(default = "default_max_collect_iterations")]
    pub max_collect_iterations: u32,
    /// Fraction of the visible extent to advance per collecting step.
    #[serde(default = "default_step_fraction")]
    pub step_fraction: f64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            seek_boundary: true,
            boundary_attempts: default_boundary_attempts(),
            stability_window: default_stability_window(),
            max_collect_iterations: default_max_collect_iterations(),
            step_fraction: default_step_fraction(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_boundary_attempts() -> u32 {
    200
}
fn default_stability_window() -> u32 {
    3
}
fn default_max_collect_iterations() -> u32 {
    400
}
fn default_step_fraction() -> f64 {
    0.8
}
fn default_settle_delay_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    /// Strategy names to skip, e.g. `"full-view"`.
    #[serde(default)]
    pub disabled_strategies: Vec<String>,
    /// Environment variable holding a `Cookie` header for credentialed fetches.
    #[serde(default = "default_credentials_env")]
    pub credentials_env: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Wait after opening a full-view presentation before snapshotting it.
    #[serde(default = "default_full_view_settle_ms")]
    pub full_view_settle_ms: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            disabled_strategies: Vec::new(),
            credentials_env: default_credentials_env(),
            user_agent: default_user_agent(),
            full_view_settle_ms: default_full_view_settle_ms(),
        }
    }
}

fn default_credentials_env() -> String {
    "SCROLLBACK_COOKIE".to_string()
}
fn default_full_view_settle_ms() -> u64 {
    700
}
fn default_user_agent() -> String {
    format!("scrollback/{}", env!("CARGO_PKG_VERSION"))
}

impl MediaConfig {
    pub fn is_enabled(&self, strategy: &str) -> bool {
        !self.disabled_strategies.iter().any(|s| s == strategy)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            format: OutputFormat::default(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./exports")
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.export.max_records_per_chunk == 0 {
            bail!("export.max_records_per_chunk must be > 0");
        }
        if self.export.max_media_per_chunk == 0 {
            bail!("export.max_media_per_chunk must be > 0");
        }
        if self.export.media_acquire_timeout_ms == 0 {
            bail!("export.media_acquire_timeout_ms must be > 0");
        }
        if self.scroll.stability_window == 0 {
            bail!("scroll.stability_window must be >= 1");
        }
        if self.scroll.max_collect_iterations == 0 {
            bail!("scroll.max_collect_iterations must be >= 1");
        }
        if !(self.scroll.step_fraction > 0.0 && self.scroll.step_fraction <= 1.0) {
            bail!("scroll.step_fraction must be in (0.0, 1.0]");
        }
        for name in &self.media.disabled_strategies {
            if !STRATEGY_NAMES.contains(&name.as_str()) {
                bail!(
                    "Unknown media strategy: '{}'. Must be one of: {}",
                    name,
                    STRATEGY_NAMES.join(", ")
                );
            }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.export.max_records_per_chunk, 100);
        assert_eq!(config.export.max_media_per_chunk, 40);
        assert_eq!(config.export.quality, QualityHint::Full);
        assert_eq!(config.scroll.stability_window, 3);
        assert_eq!(config.scroll.boundary_attempts, 200);
        assert!(config.scroll.seek_boundary);
        assert_eq!(config.output.format, OutputFormat::Markdown);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [export]
            max_media_per_chunk = 4
            quality = "reduced"

            [media]
            disabled_strategies = ["full-view"]
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.export.max_media_per_chunk, 4);
        assert_eq!(config.export.max_records_per_chunk, 100);
        assert_eq!(config.export.quality, QualityHint::Reduced);
        assert!(!config.media.is_enabled("full-view"));
        assert!(config.media.is_enabled("network-fetch"));
    }

    #[test]
    fn rejects_zero_bounds() {
        let config: Config = toml::from_str("[export]\nmax_records_per_chunk = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_strategy() {
        let config: Config =
            toml::from_str("[media]\ndisabled_strategies = [\"telepathy\"]\n").unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("telepathy"));
    }

    #[test]
    fn rejects_bad_step_fraction() {
        let config: Config = toml::from_str("[scroll]\nstep_fraction = 1.5\n").unwrap();
        assert!(config.validate().is_err());
    }
}
