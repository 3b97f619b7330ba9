use bytes::Bytes;
use chrono::Utc;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use sqlx::MySqlPool;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use meta_report::api_support::{
  json_response_with_cookie, load_config, parse_json_body, require_pool, respond, HandlerResult,
};
use meta_report::auth::{hash_password, needs_rehash, session_cookie, verify_password, Role, Session};
use meta_report::db::{fetch_user_credentials, insert_session, update_password_hash};
use meta_report::error::AppError;
use meta_report::logging::init_tracing;

#[derive(Deserialize)]
struct LoginRequest {
  #[serde(default)]
  username: String,
  #[serde(default)]
  password: String,
}

/// Rewrites a legacy hash as bcrypt. Failure leaves the old hash in place.
async fn upgrade_password_hash(pool: &MySqlPool, user_id: i64, password: &str) {
  let rehashed = match hash_password(password) {
    Ok(hash) => hash,
    Err(err) => {
      tracing::warn!(user_id, error = %err, "password rehash failed");
      return;
    }
  };
  match update_password_hash(pool, user_id, &rehashed).await {
    Ok(()) => tracing::info!(user_id, "password hash upgraded to bcrypt"),
    Err(err) => tracing::warn!(user_id, error = %err, "failed to store upgraded password hash"),
  }
}

async fn login(method: &Method, body: Bytes) -> HandlerResult {
  if *method != Method::POST {
    return Err(AppError::MethodNotAllowed);
  }

  let parsed: LoginRequest = parse_json_body(&body)?;
  let username = parsed.username.trim();
  let password = parsed.password.trim();
  if username.is_empty() || password.is_empty() {
    return Err(AppError::bad_request("username and password are required"));
  }

  let config = load_config()?;
  let pool = require_pool(&config).await?;

  // Unknown user, wrong password and disabled roles all look the same to the caller.
  let Some((user, hash)) = fetch_user_credentials(pool, username).await? else {
    tracing::info!("login rejected: unknown username");
    return Err(AppError::Unauthorized);
  };
  if !verify_password(password, &hash) {
    tracing::info!(user_id = user.id, "login rejected: bad password");
    return Err(AppError::Unauthorized);
  }
  let Some(role) = Role::parse(&user.role) else {
    tracing::warn!(user_id = user.id, role = %user.role, "login rejected: unknown role");
    return Err(AppError::Unauthorized);
  };

  if needs_rehash(&hash) {
    upgrade_password_hash(pool, user.id, password).await;
  }

  let session = Session::new(user.id, role, Utc::now());
  insert_session(pool, &session).await?;
  tracing::info!(user_id = user.id, role = role.as_str(), "login");

  Ok(json_response_with_cookie(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "user": {"id": user.id, "username": user.username, "role": role, "name": user.name}
    }),
    &session_cookie(&session.id, config.secure_cookies),
  )?)
}

async fn handle_login(
  method: &Method,
  _headers: &HeaderMap,
  _uri: &hyper::Uri,
  body: Bytes,
) -> Result<Response<ResponseBody>, Error> {
  respond(login(method, body).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let uri = req.uri().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_login(&method, &headers, &uri, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;

  fn uri() -> hyper::Uri {
    "/api/login".parse().unwrap()
  }

  #[tokio::test]
  async fn rejects_get() {
    let response = handle_login(&Method::GET, &HeaderMap::new(), &uri(), Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
  }

  #[tokio::test]
  async fn requires_both_credentials() {
    let body = Bytes::from_static(br#"{"username": "client1", "password": "  "}"#);
    let response = handle_login(&Method::POST, &HeaderMap::new(), &uri(), body)
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn reports_not_configured_without_database() {
    std::env::remove_var("TIDB_DATABASE_URL");
    std::env::remove_var("DATABASE_URL");

    let body = Bytes::from_static(br#"{"username": "client1", "password": "pw1234"}"#);
    let response = handle_login(&Method::POST, &HeaderMap::new(), &uri(), body)
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
  }
}
