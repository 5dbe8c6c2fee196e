//! Core types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use url::Url;

/// An intercepted outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
}

impl Request {
  /// A plain GET for `url`, as issued for manifest entries.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      headers: Vec::new(),
    }
  }

  /// Parse a request from a method and an absolute URL string.
  #[cfg(test)]
  pub fn parse(method: &str, url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid request URL '{}': {}", url, e))?;
    Ok(Self {
      method: method.to_ascii_uppercase(),
      url,
      headers: Vec::new(),
    })
  }

  /// Add a header, keeping any existing ones.
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Whether this request is eligible for a cache match. Only GET is.
  pub fn is_cacheable(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// The URL used as the storage key: fragments never take part in matching.
  pub fn cache_url(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.to_string()
  }
}

/// A response snapshot, either live from the network or replayed from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  /// Final URL the response was served from
  pub url: String,
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  /// True for 2xx statuses.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value with the given name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A stored response as returned by a storage match.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  /// Tag of the generation the entry was found in
  pub generation: String,
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Result from a fetch, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from live network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a stored entry.
  pub fn from_cache(data: T, generation: String, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache { generation },
      cached_at: Some(cached_at),
    }
  }

  #[cfg(test)]
  pub fn is_cached(&self) -> bool {
    matches!(self.source, CacheSource::Cache { .. })
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheSource {
  /// Live network response, returned as-is
  Network,
  /// Stored snapshot from the named generation
  Cache { generation: String },
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Network => write!(f, "network"),
      Self::Cache { generation } => write!(f, "cache:{}", generation),
    }
  }
}

/// Outcome of an activate event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  /// The generation tag that stays current
  pub current: String,
  /// Stale generations that were deleted
  pub removed: Vec<String>,
  /// Stale generations whose deletion failed and were left behind
  pub retained: Vec<String>,
}
