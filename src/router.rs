//! Request classification and dispatch planning.
//!
//! Every intercepted request maps to exactly one [`RouteClass`] and one
//! [`RoutePlan`]. Non-network schemes are never intercepted, and requests to
//! recognized local-development hosts bypass caching entirely.

use crate::config::RoutingConfig;
use crate::request::{Method, RequestMode, RequestSnapshot};

/// Stateless classification of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
  /// Top-level document navigation
  Navigation,
  /// Read of a static resource (scripts, styles, icons)
  StaticAsset,
  /// Call matching the configured API host or prefix patterns
  ApiCall,
  /// Catch-all for everything else
  Other,
}

/// What the dispatcher does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePlan {
  /// Non-network scheme: forwarded untouched, never intercepted.
  Passthrough,
  /// Local-development host: network unconditionally, no caching.
  DevPassthrough,
  /// Static assets, navigations, and the catch-all class.
  CacheFirst,
  /// API calls.
  NetworkFirst,
}

/// Classify a request from URL, method, and mode alone.
///
/// Total: every request maps to exactly one class, with `Other` as catch-all.
pub fn classify(req: &RequestSnapshot, routing: &RoutingConfig) -> RouteClass {
  if routing.is_api_url(&req.url) {
    return RouteClass::ApiCall;
  }

  if req.mode == RequestMode::Navigate {
    return RouteClass::Navigation;
  }

  match req.method {
    Method::Get | Method::Head => RouteClass::StaticAsset,
    _ => RouteClass::Other,
  }
}

/// Pick the strategy for a request. Scheme and dev-host checks run before
/// classification so neither can be shadowed by an API pattern.
pub fn plan(req: &RequestSnapshot, routing: &RoutingConfig) -> RoutePlan {
  if !req.is_network_scheme() {
    return RoutePlan::Passthrough;
  }

  if routing.host_is_dev(&req.url) {
    return RoutePlan::DevPassthrough;
  }

  match classify(req, routing) {
    RouteClass::ApiCall => RoutePlan::NetworkFirst,
    RouteClass::Navigation | RouteClass::StaticAsset | RouteClass::Other => RoutePlan::CacheFirst,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::testing::test_config;
  use crate::request::{Method, RequestSnapshot};

  #[test]
  fn api_prefix_wins_over_navigation_mode() {
    let config = test_config();
    let req = RequestSnapshot::navigation("https://app.test/api/predict");
    assert_eq!(classify(&req, &config.routing), RouteClass::ApiCall);
  }

  #[test]
  fn api_host_is_api_regardless_of_path() {
    let config = test_config();
    let req = RequestSnapshot::get("https://backend.test/predict");
    assert_eq!(classify(&req, &config.routing), RouteClass::ApiCall);
  }

  #[test]
  fn navigation_mode_classifies_as_navigation() {
    let config = test_config();
    let req = RequestSnapshot::navigation("https://app.test/dashboard");
    assert_eq!(classify(&req, &config.routing), RouteClass::Navigation);
  }

  #[test]
  fn plain_get_is_a_static_asset() {
    let config = test_config();
    let req = RequestSnapshot::get("https://app.test/main.js");
    assert_eq!(classify(&req, &config.routing), RouteClass::StaticAsset);
  }

  #[test]
  fn non_api_mutation_falls_to_other() {
    let config = test_config();
    let req = RequestSnapshot::mutation(Method::Post, "https://app.test/form", vec![]);
    assert_eq!(classify(&req, &config.routing), RouteClass::Other);
  }

  #[test]
  fn non_network_scheme_is_passed_through() {
    let config = test_config();
    let req = RequestSnapshot::get("chrome-extension://abcdef/page.html");
    assert_eq!(plan(&req, &config.routing), RoutePlan::Passthrough);
  }

  #[test]
  fn dev_host_bypasses_even_api_patterns() {
    let config = test_config();
    let req = RequestSnapshot::get("http://localhost:3000/api/predict");
    assert_eq!(plan(&req, &config.routing), RoutePlan::DevPassthrough);
  }

  #[test]
  fn api_calls_plan_network_first() {
    let config = test_config();
    let req = RequestSnapshot::get("https://app.test/api/predict");
    assert_eq!(plan(&req, &config.routing), RoutePlan::NetworkFirst);
  }

  #[test]
  fn everything_else_plans_cache_first() {
    let config = test_config();
    assert_eq!(
      plan(&RequestSnapshot::get("https://app.test/main.js"), &config.routing),
      RoutePlan::CacheFirst
    );
    assert_eq!(
      plan(&RequestSnapshot::navigation("https://app.test/"), &config.routing),
      RoutePlan::CacheFirst
    );
  }
}
