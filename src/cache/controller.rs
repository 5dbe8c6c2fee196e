//! Cache controller: the install / fetch / activate policy.

use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, try_join_all};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::event::Lifecycle;
use crate::network::Network;

use super::storage::CacheStorage;
use super::traits::{ActivationReport, CacheResult, Request, Response};

/// Cache controller that sits between the page and the network.
///
/// Install pre-caches the asset manifest into the current generation,
/// fetch serves cache-first with network fallback, and activate drops
/// every generation except the current one. The controller keeps no
/// state of its own; everything lives in the storage backend.
pub struct CacheController<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  config: Arc<CacheConfig>,
}

impl<S: CacheStorage, N: Network> CacheController<S, N> {
  pub fn new(config: CacheConfig, storage: S, network: N) -> Self {
    Self {
      storage: Arc::new(storage),
      network: Arc::new(network),
      config: Arc::new(config),
    }
  }

  pub fn config(&self) -> &CacheConfig {
    &self.config
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  #[cfg(test)]
  pub fn network(&self) -> &N {
    &self.network
  }

  /// Pre-cache every manifest URL into the current generation.
  ///
  /// All fetches run concurrently. Any transport failure or non-2xx
  /// response fails the whole install and nothing is written.
  pub async fn install(&self) -> Result<()> {
    let tag = self.config.cache_name();
    let manifest = self.config.manifest();

    self.storage.open(tag).await?;
    info!(cache = tag, files = manifest.len(), "Caching files");

    let fetches = manifest.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to pre-cache {}: {}", url, e))?;

      if !response.is_ok() {
        return Err(eyre!(
          "Failed to pre-cache {}: server responded {} {}",
          url,
          response.status,
          response.status_text
        ));
      }

      Ok::<_, color_eyre::Report>((request, response))
    });

    let entries = try_join_all(fetches).await?;
    self.storage.put_all(tag, &entries).await?;

    debug!(cache = tag, "Install complete");
    Ok(())
  }

  /// Answer a request from any generation, or from the network on a miss.
  ///
  /// Misses are not written back; only install populates the cache.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    if let Some(cached) = self.storage.match_request(&request).await? {
      debug!(url = %request.url, cache = %cached.generation, "Cache hit");
      return Ok(CacheResult::from_cache(
        cached.response,
        cached.generation,
        cached.cached_at,
      ));
    }

    debug!(url = %request.url, "Cache miss, fetching from network");
    let response = self.network.fetch(&request).await?;
    Ok(CacheResult::from_network(response))
  }

  /// Delete every generation whose tag is not the current one.
  ///
  /// Deletions run concurrently; a failed deletion is logged and the
  /// generation is left behind without failing the activation.
  pub async fn activate(&self) -> Result<ActivationReport> {
    let current = self.config.cache_name();
    let stale: Vec<String> = self
      .storage
      .keys()
      .await?
      .into_iter()
      .filter(|tag| tag != current)
      .collect();

    let deletions = stale.iter().map(|tag| async move {
      info!(cache = %tag, "Removing old cache");
      match self.storage.delete(tag).await {
        Ok(true) => Removal::Deleted,
        Ok(false) => {
          debug!(cache = %tag, "Old cache already gone");
          Removal::Missing
        }
        Err(e) => {
          warn!(cache = %tag, error = %e, "Failed to remove old cache");
          Removal::Failed
        }
      }
    });
    let outcomes = join_all(deletions).await;

    let mut report = ActivationReport {
      current: current.to_string(),
      ..Default::default()
    };
    for (tag, outcome) in stale.into_iter().zip(outcomes) {
      match outcome {
        Removal::Deleted => report.removed.push(tag),
        Removal::Failed => report.retained.push(tag),
        Removal::Missing => {}
      }
    }

    Ok(report)
  }
}

/// What happened to one stale generation during activation
enum Removal {
  Deleted,
  /// Someone else deleted it between listing and deleting
  Missing,
  Failed,
}

impl<S: CacheStorage, N: Network> Lifecycle for CacheController<S, N> {
  async fn on_install(&self) -> Result<()> {
    self.install().await
  }

  async fn on_fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    self.fetch(request).await
  }

  async fn on_activate(&self) -> Result<ActivationReport> {
    self.activate().await
  }
}
