//! Foreground network status observer.
//!
//! Tracks platform online/offline transitions: a persistent banner is shown
//! while offline, and each transition emits an auto-dismissing toast. The
//! offline toast lingers longer than the back-online one.

use std::time::Duration;

pub const OFFLINE_BANNER: &str = "You are offline. Changes will sync when connection returns.";

const OFFLINE_TOAST_DISMISS: Duration = Duration::from_secs(6);
const ONLINE_TOAST_DISMISS: Duration = Duration::from_secs(3);

/// An auto-dismissing notification for the foreground UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
  pub text: String,
  pub dismiss_after: Duration,
}

/// Connectivity state tracker for the foreground.
#[derive(Debug)]
pub struct NetworkStatusObserver {
  online: bool,
}

impl NetworkStatusObserver {
  pub fn new() -> Self {
    Self { online: true }
  }

  pub fn is_online(&self) -> bool {
    self.online
  }

  /// Persistent banner text, present only while offline.
  pub fn banner(&self) -> Option<&'static str> {
    if self.online {
      None
    } else {
      Some(OFFLINE_BANNER)
    }
  }

  /// Record a connectivity reading. A toast is produced only on an actual
  /// transition; repeated readings of the same state are silent.
  pub fn observe(&mut self, online: bool) -> Option<Toast> {
    if online == self.online {
      return None;
    }
    self.online = online;

    Some(if online {
      Toast {
        text: "Back online".to_string(),
        dismiss_after: ONLINE_TOAST_DISMISS,
      }
    } else {
      Toast {
        text: "Connection lost - working offline".to_string(),
        dismiss_after: OFFLINE_TOAST_DISMISS,
      }
    })
  }
}

impl Default for NetworkStatusObserver {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn banner_tracks_offline_state() {
    let mut observer = NetworkStatusObserver::new();
    assert!(observer.banner().is_none());

    observer.observe(false);
    assert_eq!(observer.banner(), Some(OFFLINE_BANNER));

    observer.observe(true);
    assert!(observer.banner().is_none());
  }

  #[test]
  fn toast_only_on_transition() {
    let mut observer = NetworkStatusObserver::new();

    assert!(observer.observe(true).is_none());
    assert!(observer.observe(false).is_some());
    assert!(observer.observe(false).is_none());
    assert!(observer.observe(true).is_some());
  }

  #[test]
  fn offline_toast_lingers_longer_than_online() {
    let mut observer = NetworkStatusObserver::new();

    let offline = observer.observe(false).unwrap();
    let online = observer.observe(true).unwrap();

    assert!(offline.dismiss_after > online.dismiss_after);
  }
}
