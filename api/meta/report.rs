use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use meta_report::aggregator::{by_date, summarize};
use meta_report::api_support::{
  authorize, header_str, json_response, parse_json_body, query_value, respond, today, Authorized, HandlerResult,
};
use meta_report::auth::Role;
use meta_report::dates::{parse_dt, resolve_range, DateRange, DAILY_TREND_DEFAULT_DAYS, INSIGHTS_DEFAULT_DAYS};
use meta_report::db::{fetch_user, MySqlStore};
use meta_report::demographics::fetch_demographics;
use meta_report::error::AppError;
use meta_report::logging::init_tracing;
use meta_report::normalizer::{normalize_all, NormalizeOptions};
use meta_report::providers::meta_graph::{InsightsQuery, InsightsTarget, MetaGraphClient, DAILY_FIELDS, INSIGHT_FIELDS};
use meta_report::report::{generate_report, stored_report_view};
use meta_report::sync::{sync, SyncRequest};
use meta_report::token::{request_sources, resolve_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GetAction {
  Accounts,
  Campaigns,
  Insights,
  Daily,
  Demographics,
  Creative,
  Report,
}

impl GetAction {
  fn parse(raw: Option<&str>) -> Result<Self, AppError> {
    match raw.unwrap_or("") {
      "accounts" => Ok(GetAction::Accounts),
      "campaigns" => Ok(GetAction::Campaigns),
      "insights" => Ok(GetAction::Insights),
      "daily" => Ok(GetAction::Daily),
      "demographics" => Ok(GetAction::Demographics),
      "creative" => Ok(GetAction::Creative),
      "report" => Ok(GetAction::Report),
      _ => Err(AppError::bad_request("Invalid action")),
    }
  }
}

#[derive(Deserialize)]
struct PostBody {
  #[serde(default)]
  action: String,
  #[serde(default)]
  client_id: Option<String>,
  #[serde(default)]
  account_id: Option<String>,
  #[serde(default)]
  start_date: Option<String>,
  #[serde(default)]
  end_date: Option<String>,
  #[serde(default)]
  access_token: Option<String>,
}

fn trimmed(value: Option<&str>) -> Option<&str> {
  value.map(str::trim).filter(|v| !v.is_empty())
}

/// Per-request token: `x-meta-token` header, then `access_token` query, then body.
fn override_token(headers: &HeaderMap, query: Option<&str>, body_token: Option<&str>) -> Option<String> {
  trimmed(header_str(headers, "x-meta-token"))
    .map(str::to_string)
    .or_else(|| query_value(query, "access_token"))
    .or_else(|| trimmed(body_token).map(str::to_string))
}

/// Campaign wins over account when both are given.
fn insights_target(account_id: Option<&str>, campaign_id: Option<&str>) -> Result<InsightsTarget, AppError> {
  match (trimmed(campaign_id), trimmed(account_id)) {
    (Some(campaign), _) => Ok(InsightsTarget::Campaign(campaign.to_string())),
    (None, Some(account)) => Ok(InsightsTarget::Account(account.to_string())),
    (None, None) => Err(AppError::bad_request("account_id or campaign_id is required")),
  }
}

fn range_from(start: Option<&str>, end: Option<&str>, today: NaiveDate, default_days: i64) -> Result<DateRange, AppError> {
  resolve_range(start, end, today, default_days).map_err(AppError::BadRequest)
}

/// Stored rows are filtered by date only when both bounds are present.
fn optional_range(start: Option<&str>, end: Option<&str>) -> Result<Option<DateRange>, AppError> {
  match (trimmed(start), trimmed(end)) {
    (Some(s), Some(e)) => {
      let since = parse_dt(s).ok_or_else(|| AppError::bad_request("start_date must be YYYY-MM-DD"))?;
      let until = parse_dt(e).ok_or_else(|| AppError::bad_request("end_date must be YYYY-MM-DD"))?;
      DateRange::new(since, until)
        .map(Some)
        .ok_or_else(|| AppError::bad_request("start_date must not be after end_date"))
    }
    _ => Ok(None),
  }
}

async fn graph_client(
  auth: &Authorized,
  store: &MySqlStore,
  override_token: Option<&str>,
  client_id: Option<&str>,
) -> Result<MetaGraphClient, AppError> {
  let sources = request_sources(override_token, client_id, &auth.config);
  let token = resolve_token(store, &sources, Utc::now()).await?;
  tracing::debug!(origin = ?token.origin, "Meta token resolved");
  Ok(MetaGraphClient::new(&auth.config.graph_base_url, &token.value))
}

fn ok(value: Value) -> HandlerResult {
  Ok(json_response(StatusCode::OK, value)?)
}

async fn handle_get(auth: &Authorized, headers: &HeaderMap, query: Option<&str>) -> HandlerResult {
  let action = GetAction::parse(query_value(query, "action").as_deref())?;
  let store = MySqlStore::new(auth.pool);
  let param = |key: &str| query_value(query, key);
  let client_id = param("client_id");
  let start = param("start_date");
  let end = param("end_date");

  let token = override_token(headers, query, None);
  // Only the platform-backed actions need a token.
  let graph = || graph_client(auth, &store, token.as_deref(), client_id.as_deref());

  match action {
    GetAction::Report => {
      let range = optional_range(start.as_deref(), end.as_deref())?;
      let view = stored_report_view(&store, client_id.as_deref(), range, auth.config.value_per_conversion).await?;
      ok(serde_json::json!({"ok": true, "reports": view.reports, "summary": view.summary}))
    }
    GetAction::Accounts => {
      let accounts = graph().await?.fetch_ad_accounts().await?;
      ok(serde_json::json!({"ok": true, "accounts": accounts}))
    }
    GetAction::Campaigns => {
      let account_id = param("account_id").ok_or_else(|| AppError::bad_request("account_id is required"))?;
      let campaigns = graph().await?.fetch_campaigns(&account_id).await?;
      ok(serde_json::json!({"ok": true, "campaigns": campaigns}))
    }
    GetAction::Insights => {
      let target = insights_target(param("account_id").as_deref(), param("campaign_id").as_deref())?;
      let range = range_from(start.as_deref(), end.as_deref(), today(), INSIGHTS_DEFAULT_DAYS)?;
      let page = graph()
        .await?
        .fetch_insights(&InsightsQuery::campaign_level(target, INSIGHT_FIELDS, range))
        .await?;
      let insights = normalize_all(&page.rows, &NormalizeOptions::default());
      ok(serde_json::json!({
        "ok": true,
        "dateRange": range,
        "insights": insights,
        "hasMore": page.has_more,
      }))
    }
    GetAction::Daily => {
      let target = insights_target(param("account_id").as_deref(), param("campaign_id").as_deref())?;
      let range = range_from(start.as_deref(), end.as_deref(), today(), DAILY_TREND_DEFAULT_DAYS)?;
      let mut daily_query = InsightsQuery::campaign_level(target, DAILY_FIELDS, range);
      daily_query.time_increment = Some(1);
      let page = graph().await?.fetch_insights(&daily_query).await?;
      let rows = normalize_all(&page.rows, &NormalizeOptions::default());
      ok(serde_json::json!({
        "ok": true,
        "dateRange": range,
        "summary": summarize(&rows, auth.config.value_per_conversion),
        "daily": by_date(&rows),
        "hasMore": page.has_more,
      }))
    }
    GetAction::Demographics => {
      let target = insights_target(param("account_id").as_deref(), param("campaign_id").as_deref())?;
      let range = range_from(start.as_deref(), end.as_deref(), today(), INSIGHTS_DEFAULT_DAYS)?;
      let demographics = fetch_demographics(&graph().await?, target, range).await?;
      ok(serde_json::json!({"ok": true, "dateRange": range, "demographics": demographics}))
    }
    GetAction::Creative => {
      let campaign_id = param("campaign_id").ok_or_else(|| AppError::bad_request("campaign_id is required"))?;
      let creatives = graph().await?.fetch_ad_creatives(&campaign_id).await?;
      ok(serde_json::json!({"ok": true, "creatives": creatives}))
    }
  }
}

/// Account details when `client_id` names a user, a bare id object otherwise.
async fn client_profile(auth: &Authorized, client_id: &str) -> Result<Value, AppError> {
  let Ok(user_id) = client_id.parse::<i64>() else {
    return Ok(serde_json::json!({"id": client_id}));
  };
  Ok(match fetch_user(auth.pool, user_id).await? {
    Some(user) => serde_json::json!({
      "id": client_id,
      "name": user.name,
      "username": user.username,
      "company": user.company,
      "meta_account_id": user.meta_account_id,
    }),
    None => serde_json::json!({"id": client_id}),
  })
}

async fn handle_post(auth: &Authorized, headers: &HeaderMap, query: Option<&str>, body: &Bytes) -> HandlerResult {
  let parsed: PostBody = parse_json_body(body)?;
  let store = MySqlStore::new(auth.pool);
  let client_id = trimmed(parsed.client_id.as_deref()).map(str::to_string);

  match parsed.action.trim() {
    "sync" => {
      let (Some(client_id), Some(account_id)) = (client_id, trimmed(parsed.account_id.as_deref())) else {
        return Err(AppError::bad_request("client_id and account_id are required"));
      };
      let range = range_from(
        parsed.start_date.as_deref(),
        parsed.end_date.as_deref(),
        today(),
        INSIGHTS_DEFAULT_DAYS,
      )?;
      let token = override_token(headers, query, parsed.access_token.as_deref());
      let graph = graph_client(auth, &store, token.as_deref(), Some(&client_id)).await?;

      let request = SyncRequest {
        client_id,
        account_id: account_id.to_string(),
        range,
      };
      let summary = sync(&graph, &store, &request, Utc::now()).await?;
      ok(serde_json::json!({
        "ok": true,
        "message": format!("{} rows synced", summary.synced_count),
        "synced": summary.synced_count,
        "skipped": summary.skipped_count,
        "hasMore": summary.has_more,
      }))
    }
    "generate" => {
      let client_id = client_id.ok_or_else(|| AppError::bad_request("client_id is required"))?;
      let range = range_from(
        parsed.start_date.as_deref(),
        parsed.end_date.as_deref(),
        today(),
        INSIGHTS_DEFAULT_DAYS,
      )?;
      let client = client_profile(auth, &client_id).await?;
      let report = generate_report(
        &store,
        &client_id,
        client,
        range,
        auth.config.value_per_conversion,
        Utc::now(),
      )
      .await?;
      ok(serde_json::json!({"ok": true, "report": report}))
    }
    _ => Err(AppError::bad_request("Invalid action")),
  }
}

async fn meta_metrics(method: &Method, headers: &HeaderMap, uri: &hyper::Uri, body: Bytes) -> HandlerResult {
  if !matches!(*method, Method::GET | Method::POST) {
    return Err(AppError::MethodNotAllowed);
  }

  let auth = authorize(headers, Some(Role::Admin)).await?;
  if *method == Method::GET {
    handle_get(&auth, headers, uri.query()).await
  } else {
    handle_post(&auth, headers, uri.query(), &body).await
  }
}

async fn handle_meta_metrics(
  method: &Method,
  headers: &HeaderMap,
  uri: &hyper::Uri,
  body: Bytes,
) -> Result<Response<ResponseBody>, Error> {
  respond(meta_metrics(method, headers, uri, body).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let uri = req.uri().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_meta_metrics(&method, &headers, &uri, bytes).await
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
  async fn requires_admin_session() {
    let uri: hyper::Uri = "/api/meta/report?action=accounts".parse().unwrap();
    let mut headers = HeaderMap::new();
    headers.insert("x-meta-token", "EAAB".parse().unwrap());

    let response = handle_meta_metrics(&Method::GET, &headers, &uri, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn rejects_delete() {
    let uri: hyper::Uri = "/api/meta/report".parse().unwrap();
    let response = handle_meta_metrics(&Method::DELETE, &HeaderMap::new(), &uri, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
  }

  #[test]
  fn parses_known_actions_only() {
    assert_eq!(GetAction::parse(Some("demographics")).unwrap(), GetAction::Demographics);
    assert_eq!(GetAction::parse(Some("creative")).unwrap(), GetAction::Creative);
    assert!(GetAction::parse(Some("export")).is_err());
    assert!(GetAction::parse(None).is_err());
  }

  #[test]
  fn override_token_prefers_header_then_query_then_body() {
    let mut headers = HeaderMap::new();
    assert_eq!(override_token(&headers, Some("access_token=q"), Some("b")).as_deref(), Some("q"));
    assert_eq!(override_token(&headers, None, Some(" b ")).as_deref(), Some("b"));
    assert_eq!(override_token(&headers, None, Some("  ")), None);

    headers.insert("x-meta-token", "h".parse().unwrap());
    assert_eq!(override_token(&headers, Some("access_token=q"), Some("b")).as_deref(), Some("h"));
  }

  #[test]
  fn campaign_target_wins_over_account() {
    assert_eq!(
      insights_target(Some("123"), Some("c1")).unwrap(),
      InsightsTarget::Campaign("c1".to_string())
    );
    assert_eq!(
      insights_target(Some("123"), None).unwrap(),
      InsightsTarget::Account("123".to_string())
    );
    assert!(insights_target(Some(" "), None).is_err());
  }

  #[test]
  fn stored_report_range_needs_both_bounds() {
    assert_eq!(optional_range(Some("2026-01-01"), None).unwrap(), None);
    let range = optional_range(Some("2026-01-01"), Some("2026-01-31")).unwrap().unwrap();
    assert_eq!(range.day_count(), 31);
    assert!(optional_range(Some("2026-02-01"), Some("2026-01-01")).is_err());
    assert!(optional_range(Some("01/02/2026"), Some("2026-01-31")).is_err());
  }

  #[test]
  fn default_windows_follow_the_action() {
    let today = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
    let insights = range_from(None, None, today, INSIGHTS_DEFAULT_DAYS).unwrap();
    assert_eq!(insights.since, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
    let daily = range_from(None, None, today, DAILY_TREND_DEFAULT_DAYS).unwrap();
    assert_eq!(daily.since, NaiveDate::from_ymd_opt(2026, 3, 24).unwrap());
    assert!(range_from(Some("nope"), None, today, INSIGHTS_DEFAULT_DAYS).is_err());
  }
}
