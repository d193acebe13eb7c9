//! Fire-and-forget control messages from the background agent to foreground
//! contexts.
//!
//! Delivery is best-effort over the currently-connected set: a closed
//! context is pruned silently, and contexts that connect after a send do not
//! receive it. No acknowledgement, no replay-to-late-joiners.

use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Control message pushed to foreground contexts. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Reset scroll after the degraded shell replaced a navigation
  ForceScrollTop,
  ConnectivityChanged { online: bool },
  NotificationTap { action: String },
}

/// Publishes messages to every currently-connected foreground context.
#[derive(Default)]
pub struct Broadcaster {
  contexts: Mutex<Vec<mpsc::UnboundedSender<ClientMessage>>>,
}

impl Broadcaster {
  pub fn new() -> Self {
    Self::default()
  }

  /// Connect a foreground context. Messages published from now on are
  /// delivered until the receiver is dropped.
  pub fn connect(&self) -> mpsc::UnboundedReceiver<ClientMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    self.contexts.lock().unwrap().push(tx);
    rx
  }

  /// Publish to every live context, pruning closed ones. Returns the number
  /// of contexts that received the message.
  pub fn publish(&self, message: ClientMessage) -> usize {
    let mut contexts = self.contexts.lock().unwrap();
    contexts.retain(|tx| tx.send(message.clone()).is_ok());
    contexts.len()
  }

  pub fn connected(&self) -> usize {
    self.contexts.lock().unwrap().len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn every_connected_context_receives() {
    let broadcaster = Broadcaster::new();
    let mut a = broadcaster.connect();
    let mut b = broadcaster.connect();

    let delivered = broadcaster.publish(ClientMessage::ForceScrollTop);

    assert_eq!(delivered, 2);
    assert_eq!(a.recv().await, Some(ClientMessage::ForceScrollTop));
    assert_eq!(b.recv().await, Some(ClientMessage::ForceScrollTop));
  }

  #[tokio::test]
  async fn closed_contexts_are_pruned_silently() {
    let broadcaster = Broadcaster::new();
    let mut kept = broadcaster.connect();
    drop(broadcaster.connect());

    let delivered = broadcaster.publish(ClientMessage::ConnectivityChanged { online: false });

    assert_eq!(delivered, 1);
    assert_eq!(broadcaster.connected(), 1);
    assert!(kept.recv().await.is_some());
  }

  #[tokio::test]
  async fn late_joiners_do_not_see_earlier_messages() {
    let broadcaster = Broadcaster::new();
    broadcaster.publish(ClientMessage::ForceScrollTop);

    let mut late = broadcaster.connect();
    assert!(late.try_recv().is_err());
  }

  #[test]
  fn wire_format_matches_the_control_message_contract() {
    let scroll = serde_json::to_value(ClientMessage::ForceScrollTop).unwrap();
    assert_eq!(scroll, serde_json::json!({"type": "FORCE_SCROLL_TOP"}));

    let tap = serde_json::to_value(ClientMessage::NotificationTap {
      action: "explore".to_string(),
    })
    .unwrap();
    assert_eq!(
      tap,
      serde_json::json!({"type": "NOTIFICATION_TAP", "action": "explore"})
    );
  }
}
