//! Request/response model and the cache identity derived from it.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// HTTP methods the engine intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }

  /// State-changing methods are eligible for the replay queue.
  pub fn is_mutation(&self) -> bool {
    matches!(
      self,
      Method::Post | Method::Put | Method::Patch | Method::Delete
    )
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// How the foreground issued the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
  /// Top-level document navigation
  Navigate,
  /// Everything else (subresource, fetch call, ...)
  #[default]
  Standard,
}

/// A request captured at the interception surface.
///
/// Holds everything needed to forward the request to the network unchanged:
/// method, absolute URL, headers, and body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
  pub method: Method,
  pub url: String,
  #[serde(default)]
  pub mode: RequestMode,
  #[serde(default)]
  pub headers: Vec<(String, String)>,
  #[serde(default)]
  pub body: Option<Vec<u8>>,
}

impl RequestSnapshot {
  /// A plain GET request.
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      url: url.into(),
      mode: RequestMode::Standard,
      headers: Vec::new(),
      body: None,
    }
  }

  /// A top-level navigation request.
  pub fn navigation(url: impl Into<String>) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  /// A state-changing request with a body.
  pub fn mutation(method: Method, url: impl Into<String>, body: Vec<u8>) -> Self {
    Self {
      method,
      url: url.into(),
      mode: RequestMode::Standard,
      headers: Vec::new(),
      body: Some(body),
    }
  }

  /// Cache identity for this request.
  pub fn key(&self) -> Result<RequestKey> {
    RequestKey::new(self.method, &self.url)
  }

  /// Whether the request targets a network scheme the engine handles.
  /// Anything else (extension schemes, data URLs) is passed through untouched.
  pub fn is_network_scheme(&self) -> bool {
    Url::parse(&self.url)
      .map(|u| matches!(u.scheme(), "http" | "https"))
      .unwrap_or(false)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Add a header, replacing any existing value for the same name.
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    let name = name.into();
    self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
    self.headers.push((name, value.into()));
    self
  }
}

/// Canonical identity used to correlate a request with its cached response.
///
/// Derived from method + canonical URL only — headers never participate, so
/// volatile values (auth tokens, timestamps) cannot split the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey(String);

impl RequestKey {
  pub fn new(method: Method, url: &str) -> Result<Self> {
    let canonical = canonicalize_url(url)?;
    let input = format!("{} {}", method.as_str(), canonical);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    Ok(RequestKey(hex::encode(hasher.finalize())))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Query parameters that only exist to defeat caches.
const CACHE_BUST_PARAMS: &[&str] = &["_", "t", "ts", "cb", "nocache"];

/// Canonical form of a URL: no fragment, cache-busting params stripped,
/// remaining query pairs sorted.
fn canonicalize_url(raw: &str) -> Result<String> {
  let mut url = Url::parse(raw).map_err(|e| eyre!("Invalid request URL {}: {}", raw, e))?;
  url.set_fragment(None);

  let mut pairs: Vec<(String, String)> = url
    .query_pairs()
    .filter(|(k, _)| !CACHE_BUST_PARAMS.contains(&k.as_ref()))
    .map(|(k, v)| (k.into_owned(), v.into_owned()))
    .collect();
  pairs.sort();

  if pairs.is_empty() {
    url.set_query(None);
  } else {
    url.query_pairs_mut().clear().extend_pairs(pairs);
  }

  Ok(url.into())
}

/// Origin (scheme://host:port) of an absolute URL.
pub fn origin_of(raw: &str) -> Option<String> {
  Url::parse(raw)
    .ok()
    .map(|u| u.origin().ascii_serialization())
}

/// A response as forwarded, stored, or synthesized by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// A JSON response with the given status.
  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: value.to_string().into_bytes(),
    }
  }

  /// A plain-text response with the given status.
  pub fn text(status: u16, body: &str) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn key_ignores_query_order() {
    let a = RequestKey::new(Method::Get, "https://app.test/api/items?b=2&a=1").unwrap();
    let b = RequestKey::new(Method::Get, "https://app.test/api/items?a=1&b=2").unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn key_strips_cache_busting_noise() {
    let a = RequestKey::new(Method::Get, "https://app.test/main.js?_=1699999999").unwrap();
    let b = RequestKey::new(Method::Get, "https://app.test/main.js").unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn key_drops_fragment() {
    let a = RequestKey::new(Method::Get, "https://app.test/page#section-2").unwrap();
    let b = RequestKey::new(Method::Get, "https://app.test/page").unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn key_distinguishes_methods() {
    let get = RequestKey::new(Method::Get, "https://app.test/api/predict").unwrap();
    let post = RequestKey::new(Method::Post, "https://app.test/api/predict").unwrap();
    assert_ne!(get, post);
  }

  #[test]
  fn key_ignores_headers_entirely() {
    let bare = RequestSnapshot::get("https://app.test/api/items");
    let with_auth = RequestSnapshot::get("https://app.test/api/items")
      .with_header("Authorization", "Bearer abc123")
      .with_header("X-Request-Time", "1699999999");
    assert_eq!(bare.key().unwrap(), with_auth.key().unwrap());
  }

  #[test]
  fn key_preserves_meaningful_params() {
    let a = RequestKey::new(Method::Get, "https://app.test/api/items?page=1").unwrap();
    let b = RequestKey::new(Method::Get, "https://app.test/api/items?page=2").unwrap();
    assert_ne!(a, b);
  }

  #[test]
  fn invalid_url_is_an_error() {
    assert!(RequestKey::new(Method::Get, "not a url").is_err());
  }

  #[test]
  fn network_scheme_detection() {
    assert!(RequestSnapshot::get("https://app.test/").is_network_scheme());
    assert!(RequestSnapshot::get("http://app.test/").is_network_scheme());
    assert!(!RequestSnapshot::get("chrome-extension://abcdef/page.html").is_network_scheme());
    assert!(!RequestSnapshot::get("data:text/plain,hello").is_network_scheme());
  }

  #[test]
  fn header_lookup_is_case_insensitive() {
    let req = RequestSnapshot::get("https://app.test/").with_header("Content-Type", "text/html");
    assert_eq!(req.header("content-type"), Some("text/html"));
  }

  #[test]
  fn with_header_replaces_existing() {
    let req = RequestSnapshot::get("https://app.test/")
      .with_header("Accept", "text/html")
      .with_header("accept", "application/json");
    assert_eq!(req.header("Accept"), Some("application/json"));
    assert_eq!(req.headers.len(), 1);
  }

  #[test]
  fn origin_extraction() {
    assert_eq!(
      origin_of("https://app.test/deep/path?q=1").as_deref(),
      Some("https://app.test")
    );
    assert_eq!(origin_of("not a url"), None);
  }

  #[test]
  fn mutation_methods() {
    assert!(Method::Post.is_mutation());
    assert!(Method::Delete.is_mutation());
    assert!(!Method::Get.is_mutation());
    assert!(!Method::Head.is_mutation());
  }
}
