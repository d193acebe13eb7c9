//! Network boundary: the trait strategies fetch through, and its reqwest
//! implementation. Requests are forwarded with method, URL, headers, and
//! body intact.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;

use crate::request::{HttpResponse, RequestSnapshot};

/// Abstraction over the actual network.
///
/// Strategies, the lifecycle controller, and the replay queue all fetch
/// through this trait, so tests can substitute a scripted implementation.
pub trait NetworkClient: Send + Sync {
  /// Issue the request. `Err` means the transport failed (unreachable,
  /// connection reset); a reachable server answering any status is `Ok`.
  fn fetch(&self, req: &RequestSnapshot) -> impl Future<Output = Result<HttpResponse>> + Send;
}

/// Real network client backed by reqwest.
#[derive(Clone)]
pub struct ReqwestClient {
  client: reqwest::Client,
}

impl ReqwestClient {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl NetworkClient for ReqwestClient {
  fn fetch(&self, req: &RequestSnapshot) -> impl Future<Output = Result<HttpResponse>> + Send {
    let client = self.client.clone();
    let req = req.clone();

    async move {
      let method = reqwest::Method::from_bytes(req.method.as_str().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", req.method, e))?;

      let mut builder = client.request(method, &req.url);
      for (name, value) in &req.headers {
        builder = builder.header(name, value);
      }
      if let Some(body) = &req.body {
        builder = builder.body(body.clone());
      }

      let response = builder
        .send()
        .await
        .map_err(|e| eyre!("Network fetch failed for {}: {}", req.url, e))?;

      let status = response.status().as_u16();
      let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read response body from {}: {}", req.url, e))?
        .to_vec();

      Ok(HttpResponse {
        status,
        headers,
        body,
      })
    }
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Mutex;

  /// Scripted network for tests: canned responses per URL, an
  /// online/offline switch, and a log of attempted fetches.
  pub struct MockNetwork {
    online: AtomicBool,
    routes: Mutex<HashMap<String, HttpResponse>>,
    log: Mutex<Vec<RequestSnapshot>>,
  }

  impl MockNetwork {
    pub fn online() -> Self {
      Self {
        online: AtomicBool::new(true),
        routes: Mutex::new(HashMap::new()),
        log: Mutex::new(Vec::new()),
      }
    }

    pub fn offline() -> Self {
      let net = Self::online();
      net.set_online(false);
      net
    }

    pub fn set_online(&self, online: bool) {
      self.online.store(online, Ordering::SeqCst);
    }

    /// Serve a canned response for a URL.
    pub fn route(&self, url: &str, response: HttpResponse) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), response);
    }

    pub fn route_text(&self, url: &str, status: u16, body: &str) {
      self.route(url, HttpResponse::text(status, body));
    }

    pub fn route_json(&self, url: &str, value: &serde_json::Value) {
      self.route(url, HttpResponse::json(200, value));
    }

    /// URLs fetched so far, in order.
    pub fn fetched(&self) -> Vec<String> {
      self
        .log
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.url.clone())
        .collect()
    }

    /// Full snapshot of the most recent fetch.
    pub fn last_request(&self) -> Option<RequestSnapshot> {
      self.log.lock().unwrap().last().cloned()
    }

    pub fn fetch_count(&self) -> usize {
      self.log.lock().unwrap().len()
    }
  }

  impl NetworkClient for MockNetwork {
    fn fetch(&self, req: &RequestSnapshot) -> impl Future<Output = Result<HttpResponse>> + Send {
      self.log.lock().unwrap().push(req.clone());

      let result = if !self.online.load(Ordering::SeqCst) {
        Err(eyre!("Network unreachable: {}", req.url))
      } else {
        match self.routes.lock().unwrap().get(&req.url) {
          Some(response) => Ok(response.clone()),
          None => Ok(HttpResponse::text(404, "not found")),
        }
      };

      std::future::ready(result)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::testing::MockNetwork;
  use super::*;
  use crate::request::RequestSnapshot;

  #[tokio::test]
  async fn mock_serves_canned_routes() {
    let net = MockNetwork::online();
    net.route_text("https://app.test/index.html", 200, "<html></html>");

    let resp = net
      .fetch(&RequestSnapshot::get("https://app.test/index.html"))
      .await
      .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, b"<html></html>");
  }

  #[tokio::test]
  async fn mock_offline_is_a_transport_error() {
    let net = MockNetwork::offline();
    let result = net.fetch(&RequestSnapshot::get("https://app.test/")).await;
    assert!(result.is_err());
    assert_eq!(net.fetch_count(), 1);
  }

  #[tokio::test]
  async fn mock_unrouted_url_is_404() {
    let net = MockNetwork::online();
    let resp = net
      .fetch(&RequestSnapshot::get("https://app.test/missing"))
      .await
      .unwrap();
    assert_eq!(resp.status, 404);
  }
}
