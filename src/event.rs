//! Agent events and their producers.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::net::NetworkClient;
use crate::request::{Method, RequestMode, RequestSnapshot};

/// Events driving the agent outside the interception path.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
  /// Platform connectivity reading
  Connectivity { online: bool },
  /// Deferred-sync trigger carrying a queue tag
  SyncTrigger { tag: String },
  /// Inbound notification tap with its action string
  NotificationTap { action: String },
  Shutdown,
}

/// Event handler producing connectivity readings from a periodic origin
/// probe, plus a sender for externally injected events.
pub struct EventHandler {
  tx: mpsc::UnboundedSender<AgentEvent>,
  rx: mpsc::UnboundedReceiver<AgentEvent>,
}

impl EventHandler {
  /// Create an event handler probing `origin` every `interval`.
  pub fn new<N>(net: Arc<N>, origin: String, interval: Duration) -> Self
  where
    N: NetworkClient + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn connectivity probe
    let probe_tx = tx.clone();
    tokio::spawn(async move {
      let probe = RequestSnapshot {
        method: Method::Head,
        url: origin,
        mode: RequestMode::Standard,
        headers: Vec::new(),
        body: None,
      };
      let mut ticker = tokio::time::interval(interval);

      loop {
        ticker.tick().await;
        let online = net.fetch(&probe).await.is_ok();
        if probe_tx.send(AgentEvent::Connectivity { online }).is_err() {
          break;
        }
      }
    });

    Self { tx, rx }
  }

  /// Sender for injecting external events (sync triggers, notification
  /// taps, shutdown).
  pub fn sender(&self) -> mpsc::UnboundedSender<AgentEvent> {
    self.tx.clone()
  }

  /// Receive the next event.
  pub async fn next(&mut self) -> Option<AgentEvent> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::testing::MockNetwork;

  #[tokio::test]
  async fn probe_reports_connectivity_readings() {
    let net = Arc::new(MockNetwork::online());
    let mut events = EventHandler::new(
      Arc::clone(&net),
      "https://app.test".to_string(),
      Duration::from_millis(5),
    );

    assert_eq!(
      events.next().await,
      Some(AgentEvent::Connectivity { online: true })
    );

    net.set_online(false);
    // Drain until the probe notices the drop
    loop {
      match events.next().await {
        Some(AgentEvent::Connectivity { online: false }) => break,
        Some(AgentEvent::Connectivity { online: true }) => continue,
        other => panic!("unexpected event: {:?}", other),
      }
    }
  }

  #[tokio::test]
  async fn injected_events_interleave_with_probe_readings() {
    let net = Arc::new(MockNetwork::online());
    let mut events = EventHandler::new(
      net,
      "https://app.test".to_string(),
      Duration::from_secs(3600),
    );

    let tx = events.sender();
    tx.send(AgentEvent::SyncTrigger {
      tag: "background-sync".to_string(),
    })
    .unwrap();

    // First the immediate probe reading, then the injected trigger
    let mut saw_trigger = false;
    for _ in 0..2 {
      match events.next().await {
        Some(AgentEvent::SyncTrigger { tag }) => {
          assert_eq!(tag, "background-sync");
          saw_trigger = true;
        }
        Some(AgentEvent::Connectivity { .. }) => {}
        other => panic!("unexpected event: {:?}", other),
      }
    }
    assert!(saw_trigger);
  }
}
