use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::request::origin_of;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Same-origin base URL of the application, e.g. "https://app.example.com".
  /// Only responses from this origin are ever persisted.
  pub origin: String,
  #[serde(default)]
  pub routing: RoutingConfig,
  pub precache: PrecacheConfig,
  #[serde(default)]
  pub versions: VersionConfig,
  #[serde(default)]
  pub replay: ReplayConfig,
  #[serde(default)]
  pub probe: ProbeConfig,
  /// Directory for rotating log files. Logs go to stderr only when unset.
  pub log_dir: Option<PathBuf>,
}

/// Patterns identifying API calls and local-development hosts.
/// These differ between deployment environments, so they live in config.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
  /// Hosts whose requests are always API calls (e.g. a hosted backend).
  #[serde(default)]
  pub api_hosts: Vec<String>,
  /// Same-origin path prefixes identifying API calls.
  #[serde(default = "default_api_prefixes")]
  pub api_prefixes: Vec<String>,
  /// Hosts treated as local development: always fetched from the network,
  /// never cached, so caching can't mask local changes.
  #[serde(default = "default_dev_hosts")]
  pub dev_hosts: Vec<String>,
}

impl Default for RoutingConfig {
  fn default() -> Self {
    Self {
      api_hosts: Vec::new(),
      api_prefixes: default_api_prefixes(),
      dev_hosts: default_dev_hosts(),
    }
  }
}

fn default_api_prefixes() -> Vec<String> {
  vec!["/api/".to_string()]
}

fn default_dev_hosts() -> Vec<String> {
  vec!["localhost".to_string(), "127.0.0.1".to_string()]
}

/// Fixed manifest of shell assets cached at install time.
#[derive(Debug, Clone, Deserialize)]
pub struct PrecacheConfig {
  /// Ordered list of must-have asset paths. Install fails atomically if any
  /// listed path is unreachable.
  pub assets: Vec<String>,
  /// Entry-point document served as the degraded page for failed navigations.
  #[serde(default = "default_shell")]
  pub shell: String,
}

fn default_shell() -> String {
  "/index.html".to_string()
}

/// Version tags for the two cache namespaces. Changing a tag creates a new
/// generation; activation deletes everything not matching the current tags.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionConfig {
  #[serde(default = "default_tag")]
  pub static_tag: String,
  #[serde(default = "default_tag")]
  pub api_tag: String,
}

impl Default for VersionConfig {
  fn default() -> Self {
    Self {
      static_tag: default_tag(),
      api_tag: default_tag(),
    }
  }
}

fn default_tag() -> String {
  "v1".to_string()
}

/// Mutation replay policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
  /// Queue tag matched against deferred-sync triggers.
  #[serde(default = "default_replay_tag")]
  pub tag: String,
  /// A record failing this many replays is abandoned rather than retried
  /// forever.
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
}

impl Default for ReplayConfig {
  fn default() -> Self {
    Self {
      tag: default_replay_tag(),
      max_attempts: default_max_attempts(),
    }
  }
}

fn default_replay_tag() -> String {
  "background-sync".to_string()
}

fn default_max_attempts() -> u32 {
  5
}

/// Connectivity probe cadence for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
  #[serde(default = "default_probe_interval")]
  pub interval_secs: u64,
}

impl Default for ProbeConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_probe_interval(),
    }
  }
}

fn default_probe_interval() -> u64 {
  30
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offsync/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Active generation name for the static-assets namespace.
  pub fn static_generation(&self) -> String {
    format!("static-{}", self.versions.static_tag)
  }

  /// Active generation name for the API namespace.
  pub fn api_generation(&self) -> String {
    format!("api-{}", self.versions.api_tag)
  }

  /// Absolute URL of a same-origin path.
  pub fn origin_url(&self, path: &str) -> String {
    format!("{}{}", self.origin.trim_end_matches('/'), path)
  }

  /// Whether a URL belongs to the application origin.
  pub fn is_same_origin(&self, url: &str) -> bool {
    match (origin_of(url), origin_of(&self.origin)) {
      (Some(a), Some(b)) => a == b,
      _ => false,
    }
  }

  /// Whether the configured origin itself is a development host, in which
  /// case startup flushes every cache generation.
  pub fn is_dev_environment(&self) -> bool {
    self.routing.host_is_dev(&self.origin)
  }
}

impl RoutingConfig {
  /// Whether a URL targets a recognized local-development host.
  pub fn host_is_dev(&self, url: &str) -> bool {
    match url::Url::parse(url)
      .ok()
      .and_then(|u| u.host_str().map(String::from))
    {
      Some(host) => self.dev_hosts.iter().any(|d| d == &host),
      None => false,
    }
  }

  /// Whether a URL matches the configured API host or prefix patterns.
  pub fn is_api_url(&self, url: &str) -> bool {
    let parsed = match url::Url::parse(url) {
      Ok(u) => u,
      Err(_) => return false,
    };

    if let Some(host) = parsed.host_str() {
      if self.api_hosts.iter().any(|h| h == host) {
        return true;
      }
    }

    self
      .api_prefixes
      .iter()
      .any(|prefix| parsed.path().starts_with(prefix.as_str()))
  }
}
