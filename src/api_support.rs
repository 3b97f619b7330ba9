use bytes::Bytes;
use chrono::{DateTime, Local, NaiveDate, Utc};
use hyper::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use sqlx::MySqlPool;
use vercel_runtime::{Error, Response, ResponseBody};

use crate::auth::{cookie_value, Role, Session, SESSION_COOKIE};
use crate::config::AppConfig;
use crate::db::{fetch_session, get_pool};
use crate::error::AppError;

pub type HandlerResult = Result<Response<ResponseBody>, AppError>;

pub fn json_response(status: StatusCode, value: serde_json::Value) -> Result<Response<ResponseBody>, Error> {
  Ok(
    Response::builder()
      .status(status)
      .header("content-type", "application/json; charset=utf-8")
      .body(ResponseBody::from(value))?,
  )
}

pub fn json_response_with_cookie(
  status: StatusCode,
  value: serde_json::Value,
  set_cookie: &str,
) -> Result<Response<ResponseBody>, Error> {
  Ok(
    Response::builder()
      .status(status)
      .header("content-type", "application/json; charset=utf-8")
      .header("set-cookie", set_cookie)
      .body(ResponseBody::from(value))?,
  )
}

pub fn attachment_response(content_type: &str, filename: &str, body: String) -> Result<Response<ResponseBody>, Error> {
  Ok(
    Response::builder()
      .status(StatusCode::OK)
      .header("content-type", content_type)
      .header("content-disposition", format!("attachment; filename=\"{filename}\""))
      .body(ResponseBody::from(body))?,
  )
}

/// Renders an `AppError`, logging what the body leaves out.
pub fn error_response(err: AppError) -> Result<Response<ResponseBody>, Error> {
  match &err {
    AppError::Server(detail) => tracing::error!(error = %detail, "request failed"),
    AppError::Upstream(detail) => tracing::warn!(error = %detail, "Meta API unreachable"),
    AppError::MetaApi(message) => tracing::warn!(error = %message, "Meta API rejected request"),
    _ => {}
  }
  json_response(err.status(), err.body())
}

pub fn respond(result: HandlerResult) -> Result<Response<ResponseBody>, Error> {
  match result {
    Ok(response) => Ok(response),
    Err(err) => error_response(err),
  }
}

fn percent_decode(raw: &str) -> String {
  let bytes = raw.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    match bytes[i] {
      b'+' => out.push(b' '),
      b'%' if i + 2 < bytes.len() => {
        let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
        match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
          Some(b) => {
            out.push(b);
            i += 3;
            continue;
          }
          None => out.push(b'%'),
        }
      }
      b => out.push(b),
    }
    i += 1;
  }
  String::from_utf8_lossy(&out).into_owned()
}

pub fn query_param(query: Option<&str>, key: &str) -> Option<String> {
  let q = query?;
  for pair in q.split('&') {
    let mut it = pair.splitn(2, '=');
    let k = it.next().unwrap_or("");
    let v = it.next().unwrap_or("");
    if k == key {
      return Some(percent_decode(v));
    }
  }
  None
}

/// Trimmed, non-empty query value.
pub fn query_value(query: Option<&str>, key: &str) -> Option<String> {
  query_param(query, key)
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}

pub fn query_flag(query: Option<&str>, key: &str) -> bool {
  matches!(query_value(query, key).as_deref(), Some("1") | Some("true") | Some("yes"))
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
  headers.get(name).and_then(|v| v.to_str().ok())
}

pub fn bearer_token(header_value: Option<&str>) -> Option<&str> {
  let value = header_value?;
  value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))
}

/// An empty body reads as `{}`.
pub fn parse_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
  let raw: &[u8] = if body.iter().all(|b| b.is_ascii_whitespace()) {
    b"{}"
  } else {
    body
  };
  serde_json::from_slice(raw).map_err(|e| AppError::bad_request(format!("invalid json body: {e}")))
}

pub fn load_config() -> Result<AppConfig, AppError> {
  Ok(AppConfig::from_env()?)
}

pub async fn require_pool(config: &AppConfig) -> Result<&'static MySqlPool, AppError> {
  let url = config.require_database_url()?;
  Ok(get_pool(url).await?)
}

/// Server's local calendar date; default report windows are anchored on it.
pub fn today() -> NaiveDate {
  Local::now().date_naive()
}

pub fn session_id(headers: &HeaderMap) -> Option<String> {
  cookie_value(header_str(headers, "cookie"), SESSION_COOKIE)
}

pub async fn current_session(
  pool: &MySqlPool,
  headers: &HeaderMap,
  now: DateTime<Utc>,
) -> Result<Option<Session>, AppError> {
  let Some(id) = session_id(headers) else {
    return Ok(None);
  };
  Ok(fetch_session(pool, &id, now).await?)
}

pub fn check_role(session: &Session, required: Option<Role>) -> Result<(), AppError> {
  match required {
    Some(role) if session.role != role => Err(AppError::Forbidden),
    _ => Ok(()),
  }
}

/// Live session with the required role; `None` accepts any role.
pub async fn require_session(
  pool: &MySqlPool,
  headers: &HeaderMap,
  now: DateTime<Utc>,
  required: Option<Role>,
) -> Result<Session, AppError> {
  let session = current_session(pool, headers, now).await?.ok_or(AppError::Unauthorized)?;
  check_role(&session, required)?;
  Ok(session)
}

/// Config, pool and session for an authenticated request.
pub struct Authorized {
  pub config: AppConfig,
  pub pool: &'static MySqlPool,
  pub session: Session,
}

/// Rejects requests without a session cookie before touching config or the database.
pub async fn authorize(headers: &HeaderMap, required: Option<Role>) -> Result<Authorized, AppError> {
  if session_id(headers).is_none() {
    return Err(AppError::Unauthorized);
  }
  let config = load_config()?;
  let pool = require_pool(&config).await?;
  let session = require_session(pool, headers, Utc::now(), required).await?;
  Ok(Authorized { config, pool, session })
}
