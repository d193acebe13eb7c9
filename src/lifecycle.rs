//! Install/activate lifecycle of the background agent.
//!
//! The implicit event-callback chain of a service worker is an explicit
//! finite-state machine here: `Installing → Waiting → Active → Redundant`,
//! with each transition a pure function from (state, event) to
//! (next state, side effects). The controller runs the side effects against
//! the cache store.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::config::Config;
use crate::net::NetworkClient;
use crate::request::RequestSnapshot;

/// Lifecycle states of one agent version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Precaching the shell manifest
  Installing,
  /// Installed, waiting for old foreground contexts to close
  Waiting,
  /// Serving intercepted requests
  Active,
  /// Superseded or failed; never serves again
  Redundant,
}

/// Events driving lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
  InstallSucceeded,
  InstallFailed,
  /// Force immediate activation instead of waiting for old contexts,
  /// trading a brief version-mixing window for faster rollout.
  SkipWaiting,
  /// All old foreground contexts have closed
  ClientsReleased,
  /// A newer version has taken over
  Superseded,
}

/// Side effects a transition demands, run by the controller in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
  /// Delete every generation not matching the current version tags
  PruneStaleGenerations,
  /// Take control of foreground contexts; only after this may the agent
  /// begin intercepting (claim-before-serve)
  ClaimClients,
}

/// Pure transition function. Unknown (state, event) pairs are ignored:
/// the state holds and nothing happens.
pub fn transition(
  state: LifecycleState,
  event: LifecycleEvent,
) -> (LifecycleState, Vec<SideEffect>) {
  use LifecycleEvent::*;
  use LifecycleState::*;

  match (state, event) {
    (Installing, InstallSucceeded) => (Waiting, vec![]),
    (Installing, InstallFailed) => (Redundant, vec![]),
    (Waiting, SkipWaiting) | (Waiting, ClientsReleased) => (
      Active,
      vec![SideEffect::PruneStaleGenerations, SideEffect::ClaimClients],
    ),
    (Active, Superseded) => (Redundant, vec![]),
    (state, _) => (state, vec![]),
  }
}

/// Runs the lifecycle against the cache store and network.
pub struct LifecycleController<S, N> {
  store: Arc<S>,
  net: Arc<N>,
  config: Arc<Config>,
  state: LifecycleState,
}

impl<S: CacheStore, N: NetworkClient> LifecycleController<S, N> {
  pub fn new(store: Arc<S>, net: Arc<N>, config: Arc<Config>) -> Self {
    Self {
      store,
      net,
      config,
      state: LifecycleState::Installing,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  /// Precache the shell manifest into a fresh static generation.
  ///
  /// All-or-nothing: every listed asset must fetch with status 200, and the
  /// batch is written in one transaction. Any failure fails the install and
  /// the prior generation (if any) stays active.
  pub async fn install(&mut self) -> Result<()> {
    let generation = self.config.static_generation();
    let mut entries = Vec::with_capacity(self.config.precache.assets.len());

    for path in &self.config.precache.assets {
      let url = self.config.origin_url(path);
      let req = RequestSnapshot::get(&url);

      let response = match self.net.fetch(&req).await {
        Ok(response) if response.status == 200 => response,
        Ok(response) => {
          self.apply(LifecycleEvent::InstallFailed);
          return Err(eyre!(
            "Precache asset unavailable: {} answered {}",
            url,
            response.status
          ));
        }
        Err(e) => {
          self.apply(LifecycleEvent::InstallFailed);
          return Err(eyre!("Precache asset unavailable: {}: {}", url, e));
        }
      };

      entries.push(CacheEntry::from_response(req.key()?, &response));
    }

    self.store.put_all(&generation, &entries)?;
    self.apply(LifecycleEvent::InstallSucceeded);

    info!(generation = %generation, assets = entries.len(), "Precache complete");

    Ok(())
  }

  /// Activate this version: prune stale generations, then claim clients.
  /// Once this returns, the very first intercepted request already sees the
  /// pruned, current cache.
  pub fn activate(&mut self, skip_waiting: bool) -> Result<()> {
    if self.state != LifecycleState::Waiting {
      return Err(eyre!(
        "Cannot activate from {:?}; install must succeed first",
        self.state
      ));
    }

    let event = if skip_waiting {
      LifecycleEvent::SkipWaiting
    } else {
      LifecycleEvent::ClientsReleased
    };

    for effect in self.apply(event) {
      match effect {
        SideEffect::PruneStaleGenerations => self.prune()?,
        SideEffect::ClaimClients => {
          info!("Claimed foreground contexts; interception may begin");
        }
      }
    }

    Ok(())
  }

  /// A newer version has taken over.
  pub fn supersede(&mut self) {
    self.apply(LifecycleEvent::Superseded);
  }

  fn apply(&mut self, event: LifecycleEvent) -> Vec<SideEffect> {
    let (next, effects) = transition(self.state, event);
    if next != self.state {
      info!(from = ?self.state, to = ?next, ?event, "Lifecycle transition");
    }
    self.state = next;
    effects
  }

  /// Delete every generation whose name is not one of the current version
  /// tags for each namespace.
  fn prune(&self) -> Result<()> {
    let keep = [self.config.static_generation(), self.config.api_generation()];

    for name in self.store.list_generation_names()? {
      if !keep.contains(&name) {
        warn!(generation = %name, "Deleting stale generation");
        self.store.delete_generation(&name)?;
      }
    }

    Ok(())
  }
}
