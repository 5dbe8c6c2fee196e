//! Test doubles for the network and storage seams.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;

use crate::network::Network;

use super::storage::{CacheStorage, SqliteStorage};
use super::traits::{CachedResponse, Request, Response};

/// Network that answers every request with a 200 whose body is the URL,
/// counting calls. Paths listed as offline fail, paths listed as missing 404.
/// With a barrier, every fetch waits until the barrier's count is in flight.
#[derive(Default)]
pub struct MockNetwork {
  calls: AtomicUsize,
  requested: Mutex<Vec<String>>,
  offline: BTreeSet<String>,
  missing: BTreeSet<String>,
  barrier: Option<Arc<Barrier>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn offline_for(mut self, path: &str) -> Self {
    self.offline.insert(path.to_string());
    self
  }

  pub fn missing(mut self, path: &str) -> Self {
    self.missing.insert(path.to_string());
    self
  }

  pub fn gated_by(mut self, barrier: Arc<Barrier>) -> Self {
    self.barrier = Some(barrier);
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn requested(&self) -> Vec<String> {
    self.requested.lock().unwrap().clone()
  }

  pub fn response_for(url: &str) -> Response {
    Response {
      url: url.to_string(),
      status: 200,
      status_text: "OK".to_string(),
      headers: vec![("x-served-by".to_string(), "mock".to_string())],
      body: url.as_bytes().to_vec(),
    }
  }
}

impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self
      .requested
      .lock()
      .unwrap()
      .push(request.url.to_string());

    if let Some(barrier) = &self.barrier {
      barrier.wait().await;
    }

    // Yield so concurrent fetches interleave
    tokio::task::yield_now().await;

    let path = request.url.path();
    if self.offline.contains(path) {
      return Err(eyre!("Failed to fetch {}: network unreachable", request.url));
    }
    if self.missing.contains(path) {
      return Ok(Response {
        status: 404,
        status_text: "Not Found".to_string(),
        body: Vec::new(),
        ..Self::response_for(request.url.as_str())
      });
    }

    Ok(Self::response_for(request.url.as_str()))
  }
}

/// SQLite storage with scripted delete behaviour: listed tags fail,
/// vanished tags are deleted underneath the caller and reported as absent,
/// and an optional barrier holds every delete until all are in flight.
pub struct FlakyDeleteStorage {
  inner: SqliteStorage,
  failing: BTreeSet<String>,
  vanished: BTreeSet<String>,
  barrier: Option<Arc<Barrier>>,
}

impl FlakyDeleteStorage {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
      failing: BTreeSet::new(),
      vanished: BTreeSet::new(),
      barrier: None,
    }
  }

  pub fn failing(mut self, tag: &str) -> Self {
    self.failing.insert(tag.to_string());
    self
  }

  pub fn vanished(mut self, tag: &str) -> Self {
    self.vanished.insert(tag.to_string());
    self
  }

  pub fn gated_by(mut self, barrier: Arc<Barrier>) -> Self {
    self.barrier = Some(barrier);
    self
  }
}

impl CacheStorage for FlakyDeleteStorage {
  async fn open(&self, tag: &str) -> Result<()> {
    self.inner.open(tag).await
  }

  async fn put_all(&self, tag: &str, entries: &[(Request, Response)]) -> Result<()> {
    self.inner.put_all(tag, entries).await
  }

  async fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
    self.inner.match_request(request).await
  }

  async fn keys(&self) -> Result<Vec<String>> {
    self.inner.keys().await
  }

  async fn delete(&self, tag: &str) -> Result<bool> {
    if let Some(barrier) = &self.barrier {
      barrier.wait().await;
    }
    if self.failing.contains(tag) {
      return Err(eyre!("Disk I/O error deleting {}", tag));
    }
    if self.vanished.contains(tag) {
      self.inner.delete(tag).await?;
      return Ok(false);
    }
    self.inner.delete(tag).await
  }

  async fn entry_count(&self, tag: &str) -> Result<usize> {
    self.inner.entry_count(tag).await
  }
}
