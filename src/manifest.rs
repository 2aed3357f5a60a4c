//! Compiled-in cache version and asset manifest.

use color_eyre::{eyre::eyre, Result};
use url::Url;

/// Cache version identifier. Bump to force every client to drop old assets.
pub const VERSION: &str = "ambidex-v2";

/// Assets required for offline play, resolved against the app origin.
pub const ASSETS: &[&str] = &[
  "./",
  "./index.html",
  "./manifest.json",
  "./assets/icon-192.png",
  "./assets/icon-512.png",
  // UI icons
  "./assets/ui/icons/gun_rapid.png",
  "./assets/ui/icons/gun_shotgun.png",
  "./assets/ui/icons/gun_single.png",
  "./assets/ui/icons/magic_blink.png",
  "./assets/ui/icons/magic_bolt.png",
  "./assets/ui/icons/magic_global.png",
  "./assets/ui/icons/magic_laser.png",
  "./assets/ui/icons/magic_nova.png",
  "./assets/ui/icons/shuriken.png",
  "./assets/ui/icons/sword_normal.png",
  "./assets/ui/icons/sword_shattered.png",
];

/// A validated version identifier plus the ordered list of assets to pre-cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
  version: String,
  assets: Vec<String>,
}

impl Manifest {
  /// Build a manifest, rejecting an empty version, an empty asset list or blank entries.
  pub fn new(version: impl Into<String>, assets: Vec<String>) -> Result<Self> {
    let version = version.into();
    if version.trim().is_empty() {
      return Err(eyre!("Cache version identifier must not be empty"));
    }
    if assets.is_empty() {
      return Err(eyre!("Asset manifest for {} must list at least one asset", version));
    }
    if let Some(pos) = assets.iter().position(|a| a.trim().is_empty()) {
      return Err(eyre!("Asset manifest entry {} is empty", pos));
    }

    Ok(Self { version, assets })
  }

  /// The manifest compiled into this binary.
  pub fn builtin() -> Self {
    Self {
      version: VERSION.to_string(),
      assets: ASSETS.iter().map(|a| a.to_string()).collect(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  /// Resolve every asset against `origin`, keeping manifest order.
  pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>> {
    self
      .assets
      .iter()
      .map(|asset| {
        origin
          .join(asset)
          .map_err(|e| eyre!("Failed to resolve asset {} against {}: {}", asset, origin, e))
      })
      .collect()
  }
}
