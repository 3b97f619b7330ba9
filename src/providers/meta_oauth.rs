use serde::Serialize;

use crate::http_client::http_client_for_url;
use crate::normalizer::lenient_i64;
use crate::providers::meta_graph::{request_json, MetaGraphError};

#[derive(Debug, Clone, Serialize)]
pub struct ExchangedToken {
  pub access_token: String,
  pub token_type: Option<String>,
  /// Seconds until expiry as reported by the platform. Absent for non-expiring tokens.
  pub expires_in_seconds: Option<i64>,
}

/// Swaps a token for a long-lived one via `grant_type=fb_exchange_token`.
pub async fn exchange_long_lived_token(
  graph_base_url: &str,
  app_id: &str,
  app_secret: &str,
  current_token: &str,
) -> Result<ExchangedToken, MetaGraphError> {
  let url = format!("{}/oauth/access_token", graph_base_url.trim_end_matches('/'));
  let client = http_client_for_url(&url).map_err(|e| MetaGraphError::Transport(e.to_string()))?;

  let params = [
    ("grant_type", "fb_exchange_token".to_string()),
    ("client_id", app_id.to_string()),
    ("client_secret", app_secret.to_string()),
    ("fb_exchange_token", current_token.to_string()),
  ];
  let json = request_json(client, &url, &params).await?;

  let access_token = json
    .get("access_token")
    .and_then(|v| v.as_str())
    .filter(|s| !s.is_empty())
    .ok_or_else(|| MetaGraphError::InvalidResponse("missing access_token".to_string()))?
    .to_string();

  let expires_in_seconds = json
    .get("expires_in")
    .map(|v| lenient_i64(Some(v)))
    .filter(|secs| *secs > 0);

  Ok(ExchangedToken {
    access_token,
    token_type: json.get("token_type").and_then(|v| v.as_str()).map(str::to_string),
    expires_in_seconds,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::providers::meta_graph::test_server;
  use hyper::StatusCode;

  fn responder(path: &str, query: &str) -> (StatusCode, String) {
    if path != "/v18.0/oauth/access_token" || !query.contains("grant_type=fb_exchange_token") {
      return (StatusCode::NOT_FOUND, r#"{"error":{"message":"unknown path"}}"#.to_string());
    }
    if query.contains("fb_exchange_token=old") && query.contains("client_secret=shh") {
      return (
        StatusCode::OK,
        r#"{"access_token":"fresh","token_type":"bearer","expires_in":5183944}"#.to_string(),
      );
    }
    (
      StatusCode::BAD_REQUEST,
      r#"{"error":{"message":"Error validating application.","code":101}}"#.to_string(),
    )
  }

  #[tokio::test]
  async fn exchanges_token_and_reads_expiry() {
    let (base_url, seen, task) = test_server::spawn(responder, 1).await;
    let token = exchange_long_lived_token(&base_url, "app", "shh", "old").await.unwrap();
    assert_eq!(token.access_token, "fresh");
    assert_eq!(token.expires_in_seconds, Some(5_183_944));
    assert!(seen.lock().unwrap()[0].contains("client_id=app"));
    task.await.unwrap();
  }

  #[tokio::test]
  async fn surfaces_platform_rejection() {
    let (base_url, _seen, task) = test_server::spawn(responder, 1).await;
    let err = exchange_long_lived_token(&base_url, "app", "wrong", "old").await.unwrap_err();
    assert!(matches!(err, MetaGraphError::Api { ref message, .. } if message == "Error validating application."));
    task.await.unwrap();
  }
}
