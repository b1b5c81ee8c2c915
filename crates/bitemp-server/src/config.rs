//! Runtime configuration, layered from an optional TOML file and `BITEMP_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  #[serde(default = "default_host")]
  pub host:        String,
  #[serde(default = "default_port")]
  pub port:        u16,
  /// CSV export of the measurement table.
  #[serde(default = "default_data_path")]
  pub data_path:   PathBuf,
  /// Headerless `code,name` CSV.
  #[serde(default = "default_lookup_path")]
  pub lookup_path: PathBuf,
}

fn default_host() -> String { "127.0.0.1".to_string() }

fn default_port() -> u16 { 5240 }

fn default_data_path() -> PathBuf { PathBuf::from("data.csv") }

fn default_lookup_path() -> PathBuf { PathBuf::from("codes.csv") }

impl AppConfig {
  /// Read `path` if it exists, then apply environment overrides.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("BITEMP"))
      .build()
      .context("failed to read config file")?;

    let mut cfg: AppConfig = settings
      .try_deserialize()
      .context("failed to deserialise AppConfig")?;
    cfg.data_path = expand_tilde(&cfg.data_path);
    cfg.lookup_path = expand_tilde(&cfg.lookup_path);
    Ok(cfg)
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
