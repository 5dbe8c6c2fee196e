use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use url::Url;

/// Name of the current cache generation
pub const CACHE_NAME: &str = "ecolook-cache-v1";

/// Files pre-cached on install
pub const URLS_TO_CACHE: &[&str] = &[
  "/",
  "/index.html",
  "/styles.css",
  "/script.js",
  "https://cdnjs.cloudflare.com/ajax/libs/tailwindcss/2.2.19/tailwind.min.css",
];

/// Origin the page is served from; relative manifest entries resolve against it
pub const DEFAULT_ORIGIN: &str = "http://localhost:8000";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default = "default_origin")]
  pub origin: String,
  #[serde(default = "default_cache_name")]
  pub cache_name: String,
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  /// Cache database path (defaults to the user data directory)
  pub database: Option<PathBuf>,
  /// Directory for rolling log files; stderr only when unset
  pub log_dir: Option<PathBuf>,
}

fn default_origin() -> String {
  DEFAULT_ORIGIN.to_string()
}

fn default_cache_name() -> String {
  CACHE_NAME.to_string()
}

fn default_manifest() -> Vec<String> {
  URLS_TO_CACHE.iter().map(|u| u.to_string()).collect()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      cache_name: default_cache_name(),
      manifest: default_manifest(),
      database: None,
      log_dir: None,
    }
  }
}

impl Config {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ecolook-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ecolook-sw/config.yaml
  ///
  /// Falls back to the compiled-in defaults when no file is found.
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
    let local = PathBuf::from("ecolook-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("ecolook-sw").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Build the immutable controller configuration.
  pub fn cache_config(&self) -> Result<CacheConfig> {
    CacheConfig::new(&self.cache_name, &self.origin, &self.manifest)
  }
}

/// Everything the cache controller is configured with: the current
/// generation tag and the resolved asset manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
  cache_name: String,
  manifest: Vec<Url>,
}

impl CacheConfig {
  /// Resolve `manifest` against `origin`.
  ///
  /// Every entry must resolve to an http(s) URL and appear only once.
  pub fn new<S: AsRef<str>>(cache_name: &str, origin: &str, manifest: &[S]) -> Result<Self> {
    if cache_name.trim().is_empty() {
      return Err(eyre!("Cache name must not be empty"));
    }

    let base = Url::parse(origin).map_err(|e| eyre!("Invalid origin '{}': {}", origin, e))?;

    let mut seen = BTreeSet::new();
    let mut resolved = Vec::with_capacity(manifest.len());
    for entry in manifest {
      let entry = entry.as_ref();
      let mut url = base
        .join(entry)
        .map_err(|e| eyre!("Invalid manifest entry '{}': {}", entry, e))?;
      url.set_fragment(None);

      if !matches!(url.scheme(), "http" | "https") {
        return Err(eyre!("Manifest entry '{}' is not an http(s) URL", entry));
      }
      if !seen.insert(url.to_string()) {
        return Err(eyre!("Duplicate manifest entry '{}'", entry));
      }
      resolved.push(url);
    }

    Ok(Self {
      cache_name: cache_name.to_string(),
      manifest: resolved,
    })
  }

  /// Tag of the current cache generation.
  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  /// Resolved manifest URLs, in declaration order.
  pub fn manifest(&self) -> &[Url] {
    &self.manifest
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_resolve() {
    let config = Config::default().cache_config().unwrap();
    assert_eq!(config.cache_name(), "ecolook-cache-v1");
    assert_eq!(config.manifest().len(), URLS_TO_CACHE.len());
    assert_eq!(config.manifest()[0].as_str(), "http://localhost:8000/");
    assert_eq!(
      config.manifest()[1].as_str(),
      "http://localhost:8000/index.html"
    );
    assert_eq!(config.manifest()[4].host_str(), Some("cdnjs.cloudflare.com"));
  }

  #[test]
  fn test_yaml_overrides_and_defaults() {
    let config = Config::from_yaml(
      "origin: https://ecolook.example\nmanifest:\n  - /\n  - /app.js\n",
    )
    .unwrap();
    assert_eq!(config.cache_name, CACHE_NAME);
    assert!(config.database.is_none());

    let cache = config.cache_config().unwrap();
    let urls: Vec<&str> = cache.manifest().iter().map(|u| u.as_str()).collect();
    assert_eq!(
      urls,
      vec!["https://ecolook.example/", "https://ecolook.example/app.js"]
    );
  }

  #[test]
  fn test_duplicate_entries_rejected() {
    let result = CacheConfig::new(
      "v1",
      "http://localhost:8000",
      &["/index.html", "http://localhost:8000/index.html"],
    );
    assert!(result.is_err());
  }

  #[test]
  fn test_non_http_entry_rejected() {
    assert!(CacheConfig::new("v1", "http://localhost", &["ftp://files/x"]).is_err());
  }

  #[test]
  fn test_empty_cache_name_rejected() {
    assert!(CacheConfig::new("  ", "http://localhost", &["/"]).is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/ecolook-sw.yaml"))).is_err());
  }
}
