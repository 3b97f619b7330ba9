use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Deserializer};
use sqlx::MySqlPool;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use meta_report::api_support::{
  attachment_response, authorize, json_response, parse_json_body, query_flag, query_value, respond, today,
  HandlerResult,
};
use meta_report::auth::{hash_password, Role, MIN_PASSWORD_LEN};
use meta_report::db::{
  delete_user, fetch_user, insert_user, list_users, list_users_for_export, update_user, user_stats, username_taken,
  NewUser, UserFilter, UserUpdate,
};
use meta_report::error::AppError;
use meta_report::logging::init_tracing;
use meta_report::users_csv::{export_filename, export_users_csv};

const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;
const STATUSES: &[&str] = &["active", "pending", "inactive"];

/// Absent stays `None`; explicit `null` or `""` clears the column.
fn nullable_field<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Option::<String>::deserialize(deserializer)?;
  Ok(Some(value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())))
}

fn clean(value: Option<String>) -> Option<String> {
  value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn validate_status(status: Option<&str>) -> Result<(), AppError> {
  match status {
    Some(s) if !STATUSES.contains(&s) => Err(AppError::bad_request("status must be active, pending or inactive")),
    _ => Ok(()),
  }
}

#[derive(Deserialize)]
struct CreateUserRequest {
  #[serde(default)]
  name: String,
  #[serde(default)]
  username: String,
  #[serde(default)]
  password: String,
  #[serde(default)]
  phone: Option<String>,
  #[serde(default)]
  plan: Option<String>,
  #[serde(default)]
  status: Option<String>,
  #[serde(default)]
  meta_account_id: Option<String>,
  #[serde(default)]
  campaign_id: Option<String>,
}

impl CreateUserRequest {
  fn into_new_user(self) -> Result<NewUser, AppError> {
    let name = self.name.trim().to_string();
    let username = self.username.trim().to_string();
    if name.is_empty() || username.is_empty() || self.password.is_empty() {
      return Err(AppError::bad_request("name, username and password are required"));
    }
    if self.password.chars().count() < MIN_PASSWORD_LEN {
      return Err(AppError::bad_request(format!(
        "password must be at least {MIN_PASSWORD_LEN} characters"
      )));
    }
    let status = clean(self.status).unwrap_or_else(|| "active".to_string());
    validate_status(Some(&status))?;

    Ok(NewUser {
      username,
      password_hash: hash_password(&self.password)?,
      name,
      phone: clean(self.phone),
      plan: clean(self.plan).unwrap_or_else(|| "basic".to_string()),
      status,
      role: Role::Client,
      meta_account_id: clean(self.meta_account_id),
      campaign_id: clean(self.campaign_id),
    })
  }
}

#[derive(Deserialize)]
struct UpdateUserRequest {
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  username: Option<String>,
  #[serde(default, deserialize_with = "nullable_field")]
  phone: Option<Option<String>>,
  #[serde(default, deserialize_with = "nullable_field")]
  company: Option<Option<String>>,
  #[serde(default)]
  plan: Option<String>,
  #[serde(default)]
  status: Option<String>,
  #[serde(default, deserialize_with = "nullable_field")]
  meta_account_id: Option<Option<String>>,
  #[serde(default, deserialize_with = "nullable_field")]
  campaign_id: Option<Option<String>>,
}

impl UpdateUserRequest {
  fn into_update(self) -> Result<UserUpdate, AppError> {
    let update = UserUpdate {
      name: clean(self.name),
      username: clean(self.username),
      phone: self.phone,
      company: self.company,
      plan: clean(self.plan),
      status: clean(self.status),
      meta_account_id: self.meta_account_id,
      campaign_id: self.campaign_id,
    };
    validate_status(update.status.as_deref())?;
    Ok(update)
  }
}

fn parse_id(query: Option<&str>) -> Result<Option<i64>, AppError> {
  match query_value(query, "id") {
    None => Ok(None),
    Some(raw) => raw
      .parse::<i64>()
      .map(Some)
      .map_err(|_| AppError::bad_request("id must be an integer")),
  }
}

fn require_id(query: Option<&str>) -> Result<i64, AppError> {
  parse_id(query)?.ok_or_else(|| AppError::bad_request("id is required"))
}

fn positive(query: Option<&str>, key: &str, default: u32) -> u32 {
  query_value(query, key)
    .and_then(|v| v.parse::<u32>().ok())
    .filter(|v| *v > 0)
    .unwrap_or(default)
}

async fn get_users(pool: &MySqlPool, query: Option<&str>) -> HandlerResult {
  if let Some(id) = parse_id(query)? {
    let user = fetch_user(pool, id)
      .await?
      .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
    return Ok(json_response(StatusCode::OK, serde_json::json!({"ok": true, "user": user}))?);
  }

  if query_flag(query, "stats") {
    let stats = user_stats(pool).await?;
    return Ok(json_response(StatusCode::OK, serde_json::json!({"ok": true, "stats": stats}))?);
  }

  if query_flag(query, "export") {
    let users = list_users_for_export(pool).await?;
    let csv = export_users_csv(&users)?;
    return Ok(attachment_response(
      "text/csv; charset=utf-8",
      &export_filename(today()),
      csv,
    )?);
  }

  let filter = UserFilter {
    search: query_value(query, "search"),
    status: query_value(query, "status"),
    plan: query_value(query, "plan"),
    page: positive(query, "page", 1),
    limit: positive(query, "limit", DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE),
  };
  let (users, total) = list_users(pool, &filter).await?;
  let total_pages = (total + i64::from(filter.limit) - 1) / i64::from(filter.limit);

  Ok(json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "users": users,
      "pagination": {
        "page": filter.page,
        "limit": filter.limit,
        "total": total,
        "totalPages": total_pages,
      }
    }),
  )?)
}

async fn create_user(pool: &MySqlPool, body: &Bytes) -> HandlerResult {
  let new_user = parse_json_body::<CreateUserRequest>(body)?.into_new_user()?;
  if username_taken(pool, &new_user.username, None).await? {
    return Err(AppError::bad_request("username is already taken"));
  }

  let user = insert_user(pool, &new_user).await?;
  tracing::info!(user_id = user.id, "user created");
  Ok(json_response(StatusCode::CREATED, serde_json::json!({"ok": true, "user": user}))?)
}

async fn modify_user(pool: &MySqlPool, query: Option<&str>, body: &Bytes) -> HandlerResult {
  let id = require_id(query)?;
  let update = parse_json_body::<UpdateUserRequest>(body)?.into_update()?;

  if let Some(username) = update.username.as_deref() {
    if username_taken(pool, username, Some(id)).await? {
      return Err(AppError::bad_request("username is already taken"));
    }
  }

  let user = update_user(pool, id, &update)
    .await?
    .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
  tracing::info!(user_id = id, "user updated");
  Ok(json_response(StatusCode::OK, serde_json::json!({"ok": true, "user": user}))?)
}

async fn remove_user(pool: &MySqlPool, query: Option<&str>) -> HandlerResult {
  let id = require_id(query)?;
  if !delete_user(pool, id).await? {
    return Err(AppError::NotFound("user not found".to_string()));
  }
  tracing::info!(user_id = id, "user deleted");
  Ok(json_response(StatusCode::OK, serde_json::json!({"ok": true, "message": "User deleted"}))?)
}

async fn users(method: &Method, headers: &HeaderMap, uri: &hyper::Uri, body: Bytes) -> HandlerResult {
  if !matches!(*method, Method::GET | Method::POST | Method::PUT | Method::DELETE) {
    return Err(AppError::MethodNotAllowed);
  }

  let auth = authorize(headers, Some(Role::Admin)).await?;
  let query = uri.query();

  match *method {
    Method::GET => get_users(auth.pool, query).await,
    Method::POST => create_user(auth.pool, &body).await,
    Method::PUT => modify_user(auth.pool, query, &body).await,
    _ => remove_user(auth.pool, query).await,
  }
}

async fn handle_users(
  method: &Method,
  headers: &HeaderMap,
  uri: &hyper::Uri,
  body: Bytes,
) -> Result<Response<ResponseBody>, Error> {
  respond(users(method, headers, uri, body).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let uri = req.uri().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_users(&method, &headers, &uri, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use meta_report::auth::verify_password;

  #[tokio::test]
  async fn requires_a_session() {
    let uri: hyper::Uri = "/api/users?page=1".parse().unwrap();
    let response = handle_users(&Method::GET, &HeaderMap::new(), &uri, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn rejects_unsupported_methods() {
    let uri: hyper::Uri = "/api/users".parse().unwrap();
    let response = handle_users(&Method::PATCH, &HeaderMap::new(), &uri, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
  }

  #[test]
  fn create_requires_name_username_and_password() {
    let req: CreateUserRequest = serde_json::from_str(r#"{"name": "Kim", "username": "", "password": "1234"}"#).unwrap();
    assert!(matches!(req.into_new_user(), Err(AppError::BadRequest(_))));
  }

  #[test]
  fn create_enforces_minimum_password_length() {
    let req: CreateUserRequest =
      serde_json::from_str(r#"{"name": "Kim", "username": "kim", "password": "123"}"#).unwrap();
    assert!(matches!(req.into_new_user(), Err(AppError::BadRequest(_))));
  }

  #[test]
  fn create_applies_defaults_and_hashes_password() {
    let req: CreateUserRequest = serde_json::from_str(
      r#"{"name": " Kim ", "username": "kim", "password": "1234", "phone": "", "meta_account_id": "act_9"}"#,
    )
    .unwrap();
    let user = req.into_new_user().unwrap();
    assert_eq!(user.name, "Kim");
    assert_eq!(user.plan, "basic");
    assert_eq!(user.status, "active");
    assert_eq!(user.role, Role::Client);
    assert_eq!(user.phone, None);
    assert_eq!(user.meta_account_id.as_deref(), Some("act_9"));
    assert!(user.password_hash.starts_with("$2b$"));
    assert!(verify_password("1234", &user.password_hash));
  }

  #[test]
  fn update_distinguishes_absent_from_cleared() {
    let req: UpdateUserRequest = serde_json::from_str(r#"{"phone": null, "company": "", "plan": "pro"}"#).unwrap();
    let update = req.into_update().unwrap();
    assert_eq!(update.phone, Some(None));
    assert_eq!(update.company, Some(None));
    assert_eq!(update.meta_account_id, None);
    assert_eq!(update.plan.as_deref(), Some("pro"));
  }

  #[test]
  fn update_rejects_unknown_status() {
    let req: UpdateUserRequest = serde_json::from_str(r#"{"status": "banned"}"#).unwrap();
    assert!(req.into_update().is_err());
  }

  #[test]
  fn ids_must_be_numeric() {
    assert_eq!(parse_id(Some("id=42")).unwrap(), Some(42));
    assert_eq!(parse_id(Some("page=2")).unwrap(), None);
    assert!(parse_id(Some("id=abc")).is_err());
    assert!(require_id(None).is_err());
  }
}
