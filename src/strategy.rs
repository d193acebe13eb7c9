//! Per-route resolution strategies.
//!
//! Every strategy resolves to *some* response: network failures are absorbed
//! into cache fallbacks or synthesized degraded payloads, never surfaced as
//! raw transport errors to the caller.

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheEntry, CacheStore};
use crate::config::Config;
use crate::net::NetworkClient;
use crate::replay::ReplayQueue;
use crate::request::{HttpResponse, Method, RequestKey, RequestMode, RequestSnapshot};

/// Body fields of the synthesized degraded API response. Callers branch on
/// these rather than handling a transport-level failure.
pub const DEGRADED_MESSAGE: &str = "Offline mode active";
pub const DEGRADED_SOURCE: &str = "service-worker-fallback";

/// Where a resolved response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh network response
  Network,
  /// Served from the cache store
  Cache,
  /// Cached shell entry point served for a failed navigation
  ShellFallback,
  /// Synthesized degraded API payload
  DegradedApi,
  /// Fixed "service unavailable" terminal fallback
  Synthesized,
}

/// A response plus its provenance, so the dispatcher can log and react
/// (e.g. the scroll-reset broadcast after a shell fallback).
#[derive(Debug, Clone)]
pub struct Resolved {
  pub response: HttpResponse,
  pub source: ResponseSource,
}

impl Resolved {
  fn new(response: HttpResponse, source: ResponseSource) -> Self {
    Self { response, source }
  }
}

/// The strategy set, sharing the process-wide cache store, network client,
/// and replay queue.
pub struct Strategies<S, N> {
  store: Arc<S>,
  net: Arc<N>,
  queue: Arc<ReplayQueue>,
  config: Arc<Config>,
}

impl<S: CacheStore, N: NetworkClient> Strategies<S, N> {
  pub fn new(store: Arc<S>, net: Arc<N>, queue: Arc<ReplayQueue>, config: Arc<Config>) -> Self {
    Self {
      store,
      net,
      queue,
      config,
    }
  }

  /// Cache-first: static assets, navigations, and the catch-all class.
  ///
  /// A hit returns immediately without touching the network. A miss fetches,
  /// stores a same-origin 200 copy under the active static generation, and
  /// returns. A failed navigation fetch degrades to the cached shell.
  pub async fn cache_first(&self, req: &RequestSnapshot) -> Result<Resolved> {
    let key = req.key()?;
    let generation = self.config.static_generation();

    if let Some(entry) = self.store.get(&generation, &key)? {
      debug!(url = %req.url, "Cache hit");
      return Ok(Resolved::new(entry.into_response(), ResponseSource::Cache));
    }

    match self.net.fetch(req).await {
      Ok(response) => {
        self.maybe_cache(&generation, req, &response)?;
        Ok(Resolved::new(response, ResponseSource::Network))
      }
      Err(e) => {
        debug!(url = %req.url, "Network fetch failed: {}", e);

        if req.mode == RequestMode::Navigate {
          if let Some(shell) = self.shell_entry()? {
            return Ok(Resolved::new(
              shell.into_response(),
              ResponseSource::ShellFallback,
            ));
          }
        }

        Ok(Self::offline_synthesis())
      }
    }
  }

  /// Network-first with fallback: API calls.
  ///
  /// Successful responses are stored to serve as the fallback on the next
  /// failure. On failure, the last stored copy is returned if present;
  /// otherwise a structured degraded payload. A state-changing request that
  /// fails at the transport level is queued for replay instead.
  pub async fn network_first(&self, req: &RequestSnapshot) -> Result<Resolved> {
    let key = req.key()?;
    let generation = self.config.api_generation();

    let negotiated = if req.header("accept").is_some() {
      req.clone()
    } else {
      req.clone().with_header("accept", "application/json")
    };

    match self.net.fetch(&negotiated).await {
      Ok(response) if response.is_ok() => {
        self.maybe_cache(&generation, req, &response)?;
        Ok(Resolved::new(response, ResponseSource::Network))
      }
      Ok(response) => {
        // A reachable server rejecting a mutation is a real answer
        if req.method.is_mutation() {
          return Ok(Resolved::new(response, ResponseSource::Network));
        }
        debug!(url = %req.url, status = response.status, "API answered non-OK, falling back");
        self.api_fallback(&generation, &key)
      }
      Err(e) => {
        debug!(url = %req.url, "API fetch failed: {}", e);

        if req.method.is_mutation() {
          self.queue.enqueue(req, &self.config.replay.tag)?;
          return Ok(Self::degraded_api_response());
        }

        self.api_fallback(&generation, &key)
      }
    }
  }

  /// Unconditional network fetch for local-development origins. Nothing is
  /// ever written to the cache, so caching cannot mask local changes; a dead
  /// dev server still degrades to a read-only cache match.
  pub async fn dev_passthrough(&self, req: &RequestSnapshot) -> Result<Resolved> {
    match self.net.fetch(req).await {
      Ok(response) => Ok(Resolved::new(response, ResponseSource::Network)),
      Err(e) => {
        debug!(url = %req.url, "Dev fetch failed: {}", e);

        let key = req.key()?;
        if let Some(entry) = self.store.get(&self.config.static_generation(), &key)? {
          return Ok(Resolved::new(entry.into_response(), ResponseSource::Cache));
        }

        Ok(Self::offline_synthesis())
      }
    }
  }

  /// Terminal fallback when neither network nor cache can satisfy a non-API
  /// request: a fixed response with an explicit status, never a silent
  /// failure.
  pub fn offline_synthesis() -> Resolved {
    Resolved::new(
      HttpResponse::text(503, "Service unavailable"),
      ResponseSource::Synthesized,
    )
  }

  /// Structured degraded payload for API calls with no network and no cache.
  /// HTTP 200 so callers branch on the body, not on a transport error.
  pub fn degraded_api_response() -> Resolved {
    let body = serde_json::json!({
      "success": false,
      "message": DEGRADED_MESSAGE,
      "source": DEGRADED_SOURCE,
    });

    Resolved::new(HttpResponse::json(200, &body), ResponseSource::DegradedApi)
  }

  fn api_fallback(&self, generation: &str, key: &RequestKey) -> Result<Resolved> {
    if let Some(entry) = self.store.get(generation, key)? {
      return Ok(Resolved::new(entry.into_response(), ResponseSource::Cache));
    }

    Ok(Self::degraded_api_response())
  }

  /// Cached shell entry point, if precached.
  fn shell_entry(&self) -> Result<Option<CacheEntry>> {
    let shell_url = self.config.origin_url(&self.config.precache.shell);
    let key = RequestKey::new(Method::Get, &shell_url)?;

    self.store.get(&self.config.static_generation(), &key)
  }

  /// Persist a response copy when policy allows: GET, status 200, and
  /// same-origin only. Anything else is dropped silently.
  fn maybe_cache(&self, generation: &str, req: &RequestSnapshot, response: &HttpResponse) -> Result<()> {
    let allowed =
      req.method == Method::Get && response.status == 200 && self.config.is_same_origin(&req.url);

    if !allowed {
      debug!(url = %req.url, status = response.status, "Skipping cache write");
      return Ok(());
    }

    let entry = CacheEntry::from_response(req.key()?, response);
    self.store.put(generation, &entry)
  }
}

impl<S, N> Clone for Strategies<S, N> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      net: Arc::clone(&self.net),
      queue: Arc::clone(&self.queue),
      config: Arc::clone(&self.config),
    }
  }
}
