use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::manifest::{Manifest, VERSION};
use crate::worker::StoreMode;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Cache version identifier (defaults to the compiled-in one)
  #[serde(default = "default_version")]
  pub version: String,
  /// Origin the app is served from; relative assets resolve against it
  pub origin: Option<Url>,
  /// Asset manifest (defaults to the compiled-in one)
  #[serde(default = "default_assets")]
  pub assets: Vec<String>,
  /// Database path (defaults to $XDG_DATA_HOME/swcache/cache.db)
  pub database: Option<PathBuf>,
  /// Whether fetches wait for the cache write before returning
  #[serde(default)]
  pub store_mode: StoreMode,
}

fn default_version() -> String {
  VERSION.to_string()
}

const DEFAULT_ORIGIN: &str = "http://localhost:8080/";

fn default_assets() -> Vec<String> {
  Manifest::builtin().assets().to_vec()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      version: default_version(),
      origin: None,
      assets: default_assets(),
      database: None,
      store_mode: StoreMode::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
  ///
  /// Without a file the compiled-in defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.manifest()?;
    Ok(config)
  }

  /// Configured origin, or the local development server.
  pub fn origin(&self) -> Result<Url> {
    match &self.origin {
      Some(origin) => Ok(origin.clone()),
      None => Url::parse(DEFAULT_ORIGIN)
        .map_err(|e| eyre!("Invalid default origin {}: {}", DEFAULT_ORIGIN, e)),
    }
  }

  /// The validated manifest this configuration describes.
  pub fn manifest(&self) -> Result<Manifest> {
    Manifest::new(self.version.clone(), self.assets.clone())
  }
}
