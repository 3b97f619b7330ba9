use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use meta_report::api_support::{authorize, json_response, parse_json_body, query_value, respond, HandlerResult};
use meta_report::auth::Role;
use meta_report::db::{fetch_user, insert_composed_report, list_composed_reports};
use meta_report::error::AppError;
use meta_report::logging::init_tracing;
use meta_report::report::DEFAULT_CLIENT_NAME;

const DEFAULT_LIST_LIMIT: u32 = 20;
const MAX_LIST_LIMIT: u32 = 100;
const DEFAULT_PERIOD: &str = "Last 7 days";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComposeRequest {
  #[serde(default, alias = "user_id")]
  user_id: Option<i64>,
  #[serde(default)]
  period: Option<String>,
  #[serde(default)]
  client_name: Option<String>,
  #[serde(default)]
  kpis: Vec<Value>,
  #[serde(default)]
  highlights: Vec<String>,
  #[serde(default)]
  actions: Vec<String>,
}

impl ComposeRequest {
  fn validate(&self) -> Result<i64, AppError> {
    let user_id = self
      .user_id
      .filter(|id| *id > 0)
      .ok_or_else(|| AppError::bad_request("userId is required"))?;
    if self.kpis.iter().any(|k| !k.is_object()) {
      return Err(AppError::bad_request("kpis must be objects"));
    }
    Ok(user_id)
  }

  fn period(&self) -> String {
    self
      .period
      .as_deref()
      .map(str::trim)
      .filter(|p| !p.is_empty())
      .unwrap_or(DEFAULT_PERIOD)
      .to_string()
  }

  fn payload(&self, fallback_name: &str) -> Value {
    let client_name = self
      .client_name
      .as_deref()
      .map(str::trim)
      .filter(|n| !n.is_empty())
      .unwrap_or(fallback_name);
    serde_json::json!({
      "clientName": client_name,
      "kpis": self.kpis,
      "highlights": self.highlights,
      "actions": self.actions,
    })
  }
}

async fn admin_report(method: &Method, headers: &HeaderMap, uri: &hyper::Uri, body: Bytes) -> HandlerResult {
  if !matches!(*method, Method::GET | Method::POST) {
    return Err(AppError::MethodNotAllowed);
  }

  let auth = authorize(headers, Some(Role::Admin)).await?;

  if *method == Method::GET {
    let query = uri.query();
    let user_id = match query_value(query, "user_id") {
      None => None,
      Some(raw) => Some(
        raw
          .parse::<i64>()
          .map_err(|_| AppError::bad_request("user_id must be an integer"))?,
      ),
    };
    let limit = query_value(query, "limit")
      .and_then(|v| v.parse::<u32>().ok())
      .filter(|v| *v > 0)
      .unwrap_or(DEFAULT_LIST_LIMIT)
      .min(MAX_LIST_LIMIT);

    let reports = list_composed_reports(auth.pool, user_id, limit).await?;
    return Ok(json_response(StatusCode::OK, serde_json::json!({"ok": true, "reports": reports}))?);
  }

  let request: ComposeRequest = parse_json_body(&body)?;
  let user_id = request.validate()?;

  let client = fetch_user(auth.pool, user_id)
    .await?
    .filter(|u| u.role == Role::Client.as_str())
    .ok_or_else(|| AppError::NotFound("client not found".to_string()))?;
  let author = fetch_user(auth.pool, auth.session.user_id).await?.map(|u| u.username);

  let fallback_name = if client.name.trim().is_empty() {
    DEFAULT_CLIENT_NAME
  } else {
    client.name.as_str()
  };
  let row = insert_composed_report(
    auth.pool,
    user_id,
    &request.period(),
    &request.payload(fallback_name),
    author.as_deref(),
  )
  .await?;
  tracing::info!(report_id = row.id, user_id, "composed report saved");

  Ok(json_response(StatusCode::CREATED, serde_json::json!({"ok": true, "report": row}))?)
}

async fn handle_admin_report(
  method: &Method,
  headers: &HeaderMap,
  uri: &hyper::Uri,
  body: Bytes,
) -> Result<Response<ResponseBody>, Error> {
  respond(admin_report(method, headers, uri, body).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let uri = req.uri().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_admin_report(&method, &headers, &uri, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn requires_a_session() {
    let uri: hyper::Uri = "/api/admin/report".parse().unwrap();
    let response = handle_admin_report(&Method::POST, &HeaderMap::new(), &uri, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[test]
  fn compose_request_needs_a_client() {
    let req: ComposeRequest = serde_json::from_str(r#"{"period": "March"}"#).unwrap();
    assert!(req.validate().is_err());

    let req: ComposeRequest = serde_json::from_str(r#"{"user_id": 3, "kpis": ["oops"]}"#).unwrap();
    assert!(req.validate().is_err());
  }

  #[test]
  fn payload_falls_back_to_account_name_and_default_period() {
    let req: ComposeRequest =
      serde_json::from_str(r#"{"userId": 3, "kpis": [{"label": "Reach", "value": "1,200"}], "highlights": ["Up"]}"#)
        .unwrap();
    assert_eq!(req.validate().unwrap(), 3);
    assert_eq!(req.period(), DEFAULT_PERIOD);

    let payload = req.payload("Sunrise Bakery");
    assert_eq!(payload["clientName"], "Sunrise Bakery");
    assert_eq!(payload["kpis"][0]["label"], "Reach");
    assert_eq!(payload["actions"], serde_json::json!([]));
  }
}
