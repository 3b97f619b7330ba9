use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::dates::DateRange;
use crate::http_client::{http_client_for_url, probe_client_for_url};
use crate::normalizer::{lenient_f64, lenient_i64};

pub const ACCOUNT_ID_PREFIX: &str = "act_";

pub const INSIGHT_FIELDS: &[&str] = &[
  "campaign_id",
  "campaign_name",
  "impressions",
  "clicks",
  "ctr",
  "cpc",
  "cpm",
  "spend",
  "reach",
  "frequency",
  "actions",
  "cost_per_action_type",
  "video_p25_watched_actions",
  "video_p50_watched_actions",
  "video_p75_watched_actions",
  "video_p100_watched_actions",
];

pub const DAILY_FIELDS: &[&str] = &[
  "campaign_id",
  "campaign_name",
  "impressions",
  "clicks",
  "ctr",
  "cpc",
  "cpm",
  "spend",
  "reach",
  "frequency",
  "actions",
  "cost_per_action_type",
];

pub const DEMOGRAPHIC_FIELDS: &[&str] = &["impressions", "reach", "clicks", "spend"];

pub const SNAPSHOT_FIELDS: &[&str] = &["impressions", "reach", "spend", "actions"];

#[derive(Debug, Error)]
pub enum MetaGraphError {
  /// The platform answered with an `{error: {message}}` envelope.
  #[error("Meta API error: {message}")]
  Api {
    status: Option<u16>,
    code: Option<i64>,
    message: String,
  },
  #[error("Meta API transport error: {0}")]
  Transport(String),
  #[error("Meta API invalid response: {0}")]
  InvalidResponse(String),
}

/// Prepends `act_` when the caller passed a bare numeric account id.
pub fn normalize_account_id(account_id: &str) -> String {
  let trimmed = account_id.trim();
  if trimmed.starts_with(ACCOUNT_ID_PREFIX) {
    trimmed.to_string()
  } else {
    format!("{ACCOUNT_ID_PREFIX}{trimmed}")
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsightsTarget {
  Account(String),
  Campaign(String),
}

impl InsightsTarget {
  fn path_segment(&self) -> String {
    match self {
      InsightsTarget::Account(id) => normalize_account_id(id),
      InsightsTarget::Campaign(id) => id.trim().to_string(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct InsightsQuery<'a> {
  pub target: InsightsTarget,
  pub fields: &'a [&'a str],
  pub time_range: Option<DateRange>,
  pub breakdowns: &'a [&'a str],
  pub time_increment: Option<u32>,
  pub level: Option<&'a str>,
}

impl<'a> InsightsQuery<'a> {
  pub fn campaign_level(target: InsightsTarget, fields: &'a [&'a str], time_range: DateRange) -> Self {
    Self {
      target,
      fields,
      time_range: Some(time_range),
      breakdowns: &[],
      time_increment: None,
      level: Some("campaign"),
    }
  }

  fn params(&self) -> Vec<(&'static str, String)> {
    let mut out = vec![("fields", self.fields.join(","))];
    if let Some(range) = self.time_range {
      out.push(("time_range", range.to_time_range_param()));
    }
    if !self.breakdowns.is_empty() {
      out.push(("breakdowns", self.breakdowns.join(",")));
    }
    if let Some(step) = self.time_increment {
      out.push(("time_increment", step.to_string()));
    }
    if let Some(level) = self.level {
      out.push(("level", level.to_string()));
    }
    out
  }
}

/// One page of raw insight objects. Cursors are not followed; `has_more`
/// reports whether the platform signalled another page.
#[derive(Debug, Clone, Default)]
pub struct InsightsPage {
  pub rows: Vec<Value>,
  pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AdAccount {
  pub id: String,
  pub name: String,
  pub status: &'static str,
  pub currency: Option<String>,
  pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSummary {
  pub id: String,
  pub name: String,
  pub status: Option<String>,
  pub objective: Option<String>,
  pub daily_budget: Option<f64>,
  pub lifetime_budget: Option<f64>,
  pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdCreative {
  pub ad_id: String,
  pub ad_name: String,
  pub status: Option<String>,
  pub creative_id: Option<String>,
  pub title: Option<String>,
  pub body: Option<String>,
  pub thumbnail_url: Option<String>,
  pub image_url: Option<String>,
  pub object_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TokenProbe {
  pub id: String,
  pub name: Option<String>,
}

fn opt_string(value: &Value, key: &str) -> Option<String> {
  value
    .get(key)
    .and_then(|v| v.as_str())
    .map(str::to_string)
    .filter(|s| !s.is_empty())
}

fn data_array(json: &Value) -> Vec<Value> {
  json
    .get("data")
    .and_then(|v| v.as_array())
    .cloned()
    .unwrap_or_default()
}

/// Budgets come back in the currency's minor unit.
fn budget_major_units(value: Option<&Value>) -> Option<f64> {
  match value {
    None | Some(Value::Null) => None,
    Some(v) => {
      let minor = lenient_f64(Some(v));
      (minor > 0.0).then_some(minor / 100.0)
    }
  }
}

fn error_from_envelope(status: Option<u16>, json: &Value) -> Option<MetaGraphError> {
  let err = json.get("error")?;
  let message = err
    .get("message")
    .and_then(|v| v.as_str())
    .unwrap_or("Unknown Meta API error")
    .to_string();
  Some(MetaGraphError::Api {
    status,
    code: err.get("code").and_then(|v| v.as_i64()),
    message,
  })
}

pub(crate) async fn request_json(
  client: &reqwest::Client,
  url: &str,
  params: &[(&str, String)],
) -> Result<Value, MetaGraphError> {
  let resp = client
    .get(url)
    .query(params)
    .header(reqwest::header::ACCEPT, "application/json")
    .send()
    .await
    .map_err(|e| MetaGraphError::Transport(e.without_url().to_string()))?;

  let status = resp.status();
  let bytes = resp
    .bytes()
    .await
    .map_err(|e| MetaGraphError::Transport(e.without_url().to_string()))?;

  let json = match serde_json::from_slice::<Value>(&bytes) {
    Ok(json) => json,
    Err(e) => {
      let snippet = String::from_utf8_lossy(&bytes).chars().take(300).collect::<String>();
      return Err(MetaGraphError::InvalidResponse(format!(
        "HTTP {}: {e}: {snippet}",
        status.as_u16()
      )));
    }
  };

  if let Some(err) = error_from_envelope(Some(status.as_u16()), &json) {
    return Err(err);
  }

  if !status.is_success() {
    return Err(MetaGraphError::InvalidResponse(format!(
      "HTTP {} without error envelope",
      status.as_u16()
    )));
  }

  Ok(json)
}

#[derive(Debug, Clone)]
pub struct MetaGraphClient {
  base_url: String,
  access_token: String,
}

impl MetaGraphClient {
  pub fn new(base_url: &str, access_token: &str) -> Self {
    Self {
      base_url: base_url.trim_end_matches('/').to_string(),
      access_token: access_token.to_string(),
    }
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  fn url(&self, path: &str) -> String {
    format!("{}/{}", self.base_url, path.trim_start_matches('/'))
  }

  async fn get(&self, path: &str, mut params: Vec<(&'static str, String)>) -> Result<Value, MetaGraphError> {
    let url = self.url(path);
    let client = http_client_for_url(&url).map_err(|e| MetaGraphError::Transport(e.to_string()))?;
    params.push(("access_token", self.access_token.clone()));
    request_json(client, &url, &params).await
  }

  pub async fn fetch_insights(&self, query: &InsightsQuery<'_>) -> Result<InsightsPage, MetaGraphError> {
    let path = format!("{}/insights", query.target.path_segment());
    let json = self.get(&path, query.params()).await?;

    let has_more = json
      .get("paging")
      .and_then(|p| p.get("next"))
      .and_then(|v| v.as_str())
      .is_some_and(|s| !s.is_empty());

    let rows = data_array(&json);
    if has_more {
      tracing::warn!(
        target_path = %path,
        rows = rows.len(),
        "insights response has more pages; only the first page is used"
      );
    }

    Ok(InsightsPage { rows, has_more })
  }

  pub async fn fetch_ad_accounts(&self) -> Result<Vec<AdAccount>, MetaGraphError> {
    let json = self
      .get(
        "me/adaccounts",
        vec![("fields", "id,name,account_status,currency,timezone_name".to_string())],
      )
      .await?;

    Ok(
      data_array(&json)
        .iter()
        .filter_map(|acc| {
          let id = opt_string(acc, "id")?;
          Some(AdAccount {
            name: opt_string(acc, "name").unwrap_or_default(),
            status: if lenient_i64(acc.get("account_status")) == 1 {
              "active"
            } else {
              "inactive"
            },
            currency: opt_string(acc, "currency"),
            timezone: opt_string(acc, "timezone_name"),
            id,
          })
        })
        .collect(),
    )
  }

  pub async fn fetch_campaigns(&self, account_id: &str) -> Result<Vec<CampaignSummary>, MetaGraphError> {
    let path = format!("{}/campaigns", normalize_account_id(account_id));
    let json = self
      .get(
        &path,
        vec![
          (
            "fields",
            "id,name,status,objective,daily_budget,lifetime_budget,created_time".to_string(),
          ),
          ("limit", "100".to_string()),
        ],
      )
      .await?;

    Ok(
      data_array(&json)
        .iter()
        .filter_map(|c| {
          Some(CampaignSummary {
            id: opt_string(c, "id")?,
            name: opt_string(c, "name").unwrap_or_default(),
            status: opt_string(c, "status"),
            objective: opt_string(c, "objective"),
            daily_budget: budget_major_units(c.get("daily_budget")),
            lifetime_budget: budget_major_units(c.get("lifetime_budget")),
            created_at: opt_string(c, "created_time"),
          })
        })
        .collect(),
    )
  }

  pub async fn fetch_campaign_name(&self, campaign_id: &str) -> Result<Option<String>, MetaGraphError> {
    let json = self.get(campaign_id.trim(), vec![("fields", "name".to_string())]).await?;
    Ok(opt_string(&json, "name"))
  }

  pub async fn fetch_ad_creatives(&self, campaign_id: &str) -> Result<Vec<AdCreative>, MetaGraphError> {
    let path = format!("{}/ads", campaign_id.trim());
    let json = self
      .get(
        &path,
        vec![
          (
            "fields",
            "id,name,status,creative{id,title,body,thumbnail_url,image_url,object_type}".to_string(),
          ),
          ("limit", "50".to_string()),
        ],
      )
      .await?;

    Ok(
      data_array(&json)
        .iter()
        .filter_map(|ad| {
          let creative = ad.get("creative").cloned().unwrap_or(Value::Null);
          Some(AdCreative {
            ad_id: opt_string(ad, "id")?,
            ad_name: opt_string(ad, "name").unwrap_or_default(),
            status: opt_string(ad, "status"),
            creative_id: opt_string(&creative, "id"),
            title: opt_string(&creative, "title"),
            body: opt_string(&creative, "body"),
            thumbnail_url: opt_string(&creative, "thumbnail_url"),
            image_url: opt_string(&creative, "image_url"),
            object_type: opt_string(&creative, "object_type"),
          })
        })
        .collect(),
    )
  }

  /// Diagnostic `/me` lookup bounded by `timeout`.
  pub async fn probe_token(&self, timeout: Duration) -> Result<TokenProbe, MetaGraphError> {
    let url = self.url("me");
    let client = probe_client_for_url(&url, timeout).map_err(|e| MetaGraphError::Transport(e.to_string()))?;
    let params = [
      ("fields", "id,name".to_string()),
      ("access_token", self.access_token.clone()),
    ];
    let json = request_json(&client, &url, &params).await?;
    let id = opt_string(&json, "id").ok_or_else(|| MetaGraphError::InvalidResponse("missing id".to_string()))?;
    Ok(TokenProbe {
      id,
      name: opt_string(&json, "name"),
    })
  }
}

#[cfg(test)]
pub(crate) mod test_server {
  use bytes::Bytes;
  use http_body_util::Full;
  use hyper::body::Incoming;
  use hyper::server::conn::http1;
  use hyper::service::service_fn;
  use hyper::{Request, Response, StatusCode};
  use hyper_util::rt::TokioIo;
  use std::sync::{Arc, Mutex};
  use tokio::net::TcpListener;

  /// Canned reply chosen from the request path and query.
  pub type Responder = fn(&str, &str) -> (StatusCode, String);

  /// Serves `max_connections` requests, then stops. Returns the base url and the
  /// recorded `path?query` strings.
  pub async fn spawn(
    responder: Responder,
    max_connections: usize,
  ) -> (String, Arc<Mutex<Vec<String>>>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_task = seen.clone();

    let task = tokio::spawn(async move {
      for _ in 0..max_connections {
        let (stream, _) = listener.accept().await.unwrap();
        let io = TokioIo::new(stream);
        let seen = seen_task.clone();
        let _ = http1::Builder::new()
          .keep_alive(false)
          .serve_connection(
            io,
            service_fn(move |req: Request<Incoming>| {
              let seen = seen.clone();
              async move {
                let path = req.uri().path().to_string();
                let query = req.uri().query().unwrap_or("").to_string();
                seen.lock().unwrap().push(format!("{path}?{query}"));
                let (status, body) = responder(&path, &query);
                Ok::<_, hyper::Error>(
                  Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .header("connection", "close")
                    .body(Full::new(Bytes::from(body)))
                    .unwrap(),
                )
              }
            }),
          )
          .await;
      }
    });

    (format!("http://{}/v18.0", addr), seen, task)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;
  use hyper::StatusCode;

  fn range() -> DateRange {
    DateRange::new(
      NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
      NaiveDate::from_ymd_opt(2026, 1, 7).unwrap(),
    )
    .unwrap()
  }

  #[test]
  fn account_ids_gain_prefix_once() {
    assert_eq!(normalize_account_id("123456"), "act_123456");
    assert_eq!(normalize_account_id(" act_123456 "), "act_123456");
  }

  #[test]
  fn insights_params_include_range_breakdowns_and_increment() {
    let mut query = InsightsQuery::campaign_level(
      InsightsTarget::Account("999".to_string()),
      DEMOGRAPHIC_FIELDS,
      range(),
    );
    query.breakdowns = &["age"];
    query.time_increment = Some(1);

    let params = query.params();
    let get = |k: &str| params.iter().find(|(key, _)| *key == k).map(|(_, v)| v.clone());
    assert_eq!(get("fields").unwrap(), "impressions,reach,clicks,spend");
    assert_eq!(get("time_range").unwrap(), r#"{"since":"2026-01-01","until":"2026-01-07"}"#);
    assert_eq!(get("breakdowns").unwrap(), "age");
    assert_eq!(get("time_increment").unwrap(), "1");
    assert_eq!(get("level").unwrap(), "campaign");
    assert_eq!(query.target.path_segment(), "act_999");
  }

  #[test]
  fn budgets_convert_from_minor_units() {
    assert_eq!(budget_major_units(Some(&serde_json::json!("500000"))), Some(5000.0));
    assert_eq!(budget_major_units(Some(&serde_json::json!(null))), None);
    assert_eq!(budget_major_units(None), None);
  }

  fn insights_responder(path: &str, query: &str) -> (StatusCode, String) {
    if path == "/v18.0/act_42/insights" && query.contains("access_token=tok") {
      let body = r#"{
        "data": [
          {"campaign_id": "c1", "campaign_name": "One", "impressions": "1000", "clicks": "50", "spend": "10000", "date_start": "2026-01-02"}
        ],
        "paging": {"cursors": {"after": "x"}, "next": "https://graph.facebook.com/next"}
      }"#;
      return (StatusCode::OK, body.to_string());
    }
    (
      StatusCode::BAD_REQUEST,
      r#"{"error":{"message":"Invalid OAuth access token.","type":"OAuthException","code":190}}"#.to_string(),
    )
  }

  #[tokio::test]
  async fn fetch_insights_returns_first_page_and_flags_more() {
    let (base_url, seen, task) = test_server::spawn(insights_responder, 1).await;
    let client = MetaGraphClient::new(&base_url, "tok");
    let query = InsightsQuery::campaign_level(InsightsTarget::Account("42".to_string()), INSIGHT_FIELDS, range());

    let page = client.fetch_insights(&query).await.unwrap();
    assert_eq!(page.rows.len(), 1);
    assert!(page.has_more);
    assert_eq!(page.rows[0]["campaign_id"], "c1");

    let recorded = seen.lock().unwrap().clone();
    assert!(recorded[0].contains("level=campaign"));
    assert!(recorded[0].contains("time_range="));
    task.await.unwrap();
  }

  #[tokio::test]
  async fn error_envelope_surfaces_platform_message() {
    let (base_url, _seen, task) = test_server::spawn(insights_responder, 1).await;
    let client = MetaGraphClient::new(&base_url, "expired");
    let query = InsightsQuery::campaign_level(InsightsTarget::Account("42".to_string()), INSIGHT_FIELDS, range());

    let err = client.fetch_insights(&query).await.unwrap_err();
    match err {
      MetaGraphError::Api { status, code, message } => {
        assert_eq!(status, Some(400));
        assert_eq!(code, Some(190));
        assert_eq!(message, "Invalid OAuth access token.");
      }
      other => panic!("unexpected error: {other:?}"),
    }
    task.await.unwrap();
  }

  #[tokio::test]
  async fn transport_failure_is_distinct_from_api_error() {
    // Nothing listens on the discard port.
    let client = MetaGraphClient::new("http://127.0.0.1:9/v18.0", "tok");
    let err = client.fetch_ad_accounts().await.unwrap_err();
    assert!(matches!(err, MetaGraphError::Transport(_)));
  }

  fn catalog_responder(path: &str, _query: &str) -> (StatusCode, String) {
    let body = match path {
      "/v18.0/me/adaccounts" => {
        r#"{"data":[{"id":"act_1","name":"Shop","account_status":1,"currency":"KRW","timezone_name":"Asia/Seoul"},{"id":"act_2","name":"Old","account_status":2}]}"#
      }
      "/v18.0/act_1/campaigns" => {
        r#"{"data":[{"id":"c1","name":"Spring","status":"ACTIVE","objective":"OUTCOME_LEADS","daily_budget":"500000","created_time":"2026-01-01T00:00:00+0900"}]}"#
      }
      "/v18.0/c1/ads" => {
        r#"{"data":[{"id":"ad1","name":"Video A","status":"ACTIVE","creative":{"id":"cr1","title":"Hello","thumbnail_url":"https://cdn/x.jpg","object_type":"VIDEO"}}]}"#
      }
      _ => r#"{"error":{"message":"Unsupported get request."}}"#,
    };
    (StatusCode::OK, body.to_string())
  }

  #[tokio::test]
  async fn parses_accounts_campaigns_and_creatives() {
    let (base_url, _seen, task) = test_server::spawn(catalog_responder, 3).await;
    let client = MetaGraphClient::new(&base_url, "tok");

    let accounts = client.fetch_ad_accounts().await.unwrap();
    assert_eq!(accounts.len(), 2);
    assert_eq!(accounts[0].status, "active");
    assert_eq!(accounts[1].status, "inactive");

    let campaigns = client.fetch_campaigns("1").await.unwrap();
    assert_eq!(campaigns[0].daily_budget, Some(5000.0));
    assert_eq!(campaigns[0].lifetime_budget, None);

    let creatives = client.fetch_ad_creatives("c1").await.unwrap();
    assert_eq!(creatives[0].creative_id.as_deref(), Some("cr1"));
    assert_eq!(creatives[0].object_type.as_deref(), Some("VIDEO"));
    task.await.unwrap();
  }
}
