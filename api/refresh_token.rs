use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use meta_report::api_support::{
  bearer_token, header_str, json_response, load_config, query_flag, require_pool, require_session, respond,
  session_id, HandlerResult,
};
use meta_report::auth::{constant_time_eq, Role};
use meta_report::config::AppConfig;
use meta_report::db::MySqlStore;
use meta_report::error::AppError;
use meta_report::logging::init_tracing;
use meta_report::providers::meta_graph::MetaGraphClient;
use meta_report::token::{refresh, resolve_token, status_report, TokenError, TokenSource};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn is_cron_request(headers: &HeaderMap, config: &AppConfig) -> bool {
  let Some(expected) = config.cron_secret.as_deref() else {
    return false;
  };
  bearer_token(header_str(headers, "authorization"))
    .is_some_and(|provided| constant_time_eq(provided.as_bytes(), expected.as_bytes()))
}

async fn run_refresh(config: &AppConfig, store: &MySqlStore, trigger: &'static str) -> HandlerResult {
  let outcome = match refresh(store, config, Utc::now()).await {
    Ok(outcome) => outcome,
    Err(TokenError::NotFound) => return Err(AppError::bad_request("No token found")),
    Err(err) => return Err(err.into()),
  };
  tracing::info!(trigger, expires_in_days = ?outcome.expires_in_days, "token refresh completed");

  Ok(json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "message": "Token refreshed successfully",
      "expires_at": outcome.expires_at,
      "expires_in_days": outcome.expires_in_days,
    }),
  )?)
}

/// Probe outcome is informational; a failing probe never fails the status call.
async fn probe(config: &AppConfig, store: &MySqlStore) -> serde_json::Value {
  let mut sources = vec![TokenSource::GlobalSetting];
  if let Some(token) = config.static_access_token.as_deref() {
    sources.push(TokenSource::StaticFallback(token.to_string()));
  }

  let token = match resolve_token(store, &sources, Utc::now()).await {
    Ok(token) => token,
    Err(err) => return serde_json::json!({"ok": false, "error": err.to_string()}),
  };
  let graph = MetaGraphClient::new(&config.graph_base_url, &token.value);
  match graph.probe_token(PROBE_TIMEOUT).await {
    Ok(me) => serde_json::json!({"ok": true, "origin": token.origin, "id": me.id, "name": me.name}),
    Err(err) => {
      tracing::warn!(error = %err, "token probe failed");
      serde_json::json!({"ok": false, "origin": token.origin, "error": err.to_string()})
    }
  }
}

async fn refresh_token(method: &Method, headers: &HeaderMap, uri: &hyper::Uri) -> HandlerResult {
  if !matches!(*method, Method::GET | Method::POST) {
    return Err(AppError::MethodNotAllowed);
  }

  let config = load_config()?;
  let query = uri.query();

  // Scheduled invocations authenticate with CRON_SECRET and always refresh.
  if is_cron_request(headers, &config) {
    let pool = require_pool(&config).await?;
    return run_refresh(&config, &MySqlStore::new(pool), "cron").await;
  }

  if session_id(headers).is_none() {
    return Err(AppError::Unauthorized);
  }
  if *method == Method::POST && !query_flag(query, "manual") {
    return Err(AppError::Unauthorized);
  }

  let pool = require_pool(&config).await?;
  require_session(pool, headers, Utc::now(), Some(Role::Admin)).await?;
  let store = MySqlStore::new(pool);

  if *method == Method::POST {
    return run_refresh(&config, &store, "manual").await;
  }

  let report = status_report(&store, Utc::now()).await?;
  let mut body = serde_json::json!({"ok": true, "token": report});
  if query_flag(query, "probe") {
    body["probe"] = probe(&config, &store).await;
  }
  Ok(json_response(StatusCode::OK, body)?)
}

async fn handle_refresh_token(
  method: &Method,
  headers: &HeaderMap,
  uri: &hyper::Uri,
  _body: Bytes,
) -> Result<Response<ResponseBody>, Error> {
  respond(refresh_token(method, headers, uri).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let uri = req.uri().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_refresh_token(&method, &headers, &uri, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn config(pairs: &[(&str, &str)]) -> AppConfig {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    AppConfig::from_lookup(|key| map.get(key).cloned()).unwrap()
  }

  #[test]
  fn cron_bearer_must_match_configured_secret() {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer s3cret".parse().unwrap());

    assert!(is_cron_request(&headers, &config(&[("CRON_SECRET", "s3cret")])));
    assert!(!is_cron_request(&headers, &config(&[("CRON_SECRET", "other")])));
    assert!(!is_cron_request(&headers, &config(&[("CRON_SECRET", "s3cret-longer")])));
    assert!(!is_cron_request(&HeaderMap::new(), &config(&[("CRON_SECRET", "s3cret")])));
    // No secret configured means no cron access at all.
    assert!(!is_cron_request(&headers, &config(&[])));
  }

  #[tokio::test]
  async fn post_without_credentials_is_unauthorized() {
    let uri: hyper::Uri = "/api/refresh-token".parse().unwrap();
    let response = handle_refresh_token(&Method::POST, &HeaderMap::new(), &uri, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn manual_post_still_needs_a_session() {
    let uri: hyper::Uri = "/api/refresh-token?manual=true".parse().unwrap();
    let response = handle_refresh_token(&Method::POST, &HeaderMap::new(), &uri, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn rejects_put() {
    let uri: hyper::Uri = "/api/refresh-token".parse().unwrap();
    let response = handle_refresh_token(&Method::PUT, &HeaderMap::new(), &uri, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
  }
}
