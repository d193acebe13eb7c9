//! Process-wide agent context.
//!
//! Constructed once at startup and shared by every request-handling task:
//! open store handles, the strategy set, the replay queue, and the broadcast
//! channel all live here instead of ambient globals. `handle_fetch` is the
//! interception entry point; `run` drives replay triggers and broadcasts
//! from agent events.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::broadcast::{Broadcaster, ClientMessage};
use crate::cache::CacheStore;
use crate::config::Config;
use crate::event::{AgentEvent, EventHandler};
use crate::lifecycle::{LifecycleController, LifecycleState};
use crate::net::NetworkClient;
use crate::observer::NetworkStatusObserver;
use crate::replay::ReplayQueue;
use crate::request::RequestSnapshot;
use crate::router::{self, RoutePlan};
use crate::strategy::{Resolved, ResponseSource, Strategies};

/// What interception produced for one request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// The engine resolved the request to a response.
  Response(Resolved),
  /// Non-network scheme: the caller forwards the request untouched.
  Passthrough,
}

/// The background agent. One instance per origin; intercepted requests are
/// independent tasks sharing only the store and queue underneath.
pub struct Agent<S, N> {
  config: Arc<Config>,
  net: Arc<N>,
  queue: Arc<ReplayQueue>,
  strategies: Strategies<S, N>,
  lifecycle: LifecycleController<S, N>,
  broadcaster: Broadcaster,
  observer: NetworkStatusObserver,
}

impl<S: CacheStore, N: NetworkClient> Agent<S, N> {
  /// Construct the agent and bring it to `Active`: flush every generation
  /// first when running against a development origin, then install the
  /// precache manifest and activate (pruning stale generations). Only after
  /// this returns may requests be dispatched, so the very first intercepted
  /// request already sees the pruned, current cache.
  pub async fn start(
    config: Config,
    store: S,
    net: N,
    queue: ReplayQueue,
    skip_waiting: bool,
  ) -> Result<Self> {
    let config = Arc::new(config);
    let store = Arc::new(store);
    let net = Arc::new(net);
    let queue = Arc::new(queue);

    if config.is_dev_environment() {
      // Development: never serve yesterday's build
      for name in store.list_generation_names()? {
        info!(generation = %name, "Development environment, flushing cache");
        store.delete_generation(&name)?;
      }
    }

    let mut lifecycle =
      LifecycleController::new(Arc::clone(&store), Arc::clone(&net), Arc::clone(&config));
    lifecycle.install().await?;
    lifecycle.activate(skip_waiting)?;

    let strategies = Strategies::new(
      Arc::clone(&store),
      Arc::clone(&net),
      Arc::clone(&queue),
      Arc::clone(&config),
    );

    Ok(Self {
      config,
      net,
      queue,
      strategies,
      lifecycle,
      broadcaster: Broadcaster::new(),
      observer: NetworkStatusObserver::new(),
    })
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  pub fn observer(&self) -> &NetworkStatusObserver {
    &self.observer
  }

  /// Connect a foreground context to receive control messages.
  pub fn connect_context(&self) -> mpsc::UnboundedReceiver<ClientMessage> {
    self.broadcaster.connect()
  }

  /// Interception entry point. Every network-schemed request resolves to
  /// some response; everything else passes through untouched.
  pub async fn handle_fetch(&self, req: &RequestSnapshot) -> Result<FetchOutcome> {
    let plan = router::plan(req, &self.config.routing);
    debug!(method = %req.method, url = %req.url, ?plan, "Dispatching request");

    let resolved = match plan {
      RoutePlan::Passthrough => return Ok(FetchOutcome::Passthrough),
      RoutePlan::DevPassthrough => self.strategies.dev_passthrough(req).await?,
      RoutePlan::NetworkFirst => self.strategies.network_first(req).await?,
      RoutePlan::CacheFirst => {
        let resolved = self.strategies.cache_first(req).await?;
        if resolved.source == ResponseSource::ShellFallback {
          // The degraded shell replaced mid-page content
          self.broadcaster.publish(ClientMessage::ForceScrollTop);
        }
        resolved
      }
    };

    Ok(FetchOutcome::Response(resolved))
  }

  /// React to one agent event: connectivity transitions drive the observer,
  /// broadcasts, and the default replay trigger; explicit sync triggers
  /// replay their tag; notification taps are forwarded to the foreground.
  pub async fn handle_event(&mut self, event: AgentEvent) -> Result<()> {
    match event {
      AgentEvent::Connectivity { online } => {
        let Some(toast) = self.observer.observe(online) else {
          return Ok(());
        };
        info!(online, toast = %toast.text, "Connectivity changed");

        self
          .broadcaster
          .publish(ClientMessage::ConnectivityChanged { online });

        if online {
          // Reconnection is the platform's deferred-sync signal
          let tag = self.config.replay.tag.clone();
          self.replay(&tag).await?;
        }
      }
      AgentEvent::SyncTrigger { tag } => {
        self.replay(&tag).await?;
      }
      AgentEvent::NotificationTap { action } => {
        self
          .broadcaster
          .publish(ClientMessage::NotificationTap { action });
      }
      AgentEvent::Shutdown => {}
    }

    Ok(())
  }

  async fn replay(&self, tag: &str) -> Result<()> {
    let outcome = self.queue.replay(tag, self.net.as_ref()).await?;
    if outcome.replayed + outcome.retained + outcome.abandoned > 0 {
      info!(
        tag,
        replayed = outcome.replayed,
        retained = outcome.retained,
        abandoned = outcome.abandoned,
        "Replay trigger processed"
      );
    }

    Ok(())
  }

  /// Drive the agent from an event stream until shutdown.
  pub async fn run(&mut self, events: &mut EventHandler) -> Result<()> {
    while let Some(event) = events.next().await {
      if event == AgentEvent::Shutdown {
        info!("Shutting down");
        break;
      }
      self.handle_event(event).await?;
    }

    Ok(())
  }
}
