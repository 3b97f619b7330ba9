use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::dates::DateRange;
use crate::normalizer::{normalize, InsightRow, NormalizeOptions};
use crate::providers::meta_graph::{
  normalize_account_id, InsightsQuery, InsightsTarget, MetaGraphClient, MetaGraphError, DAILY_FIELDS,
};
use crate::store::{MetricsStore, StoreError, SyncedReportRecord};

#[derive(Debug, Error)]
pub enum SyncError {
  #[error("invalid sync request: {0}")]
  InvalidRequest(&'static str),
  #[error(transparent)]
  Graph(#[from] MetaGraphError),
  #[error(transparent)]
  Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct SyncRequest {
  pub client_id: String,
  pub account_id: String,
  pub range: DateRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
  pub synced_count: usize,
  pub skipped_count: usize,
  /// The platform reported more pages than the one ingested.
  pub has_more: bool,
}

fn to_record(row: InsightRow, client_id: &str, account_id: &str, synced_at: DateTime<Utc>) -> Option<SyncedReportRecord> {
  if row.campaign_id.is_empty() {
    return None;
  }
  let date = row.date?;
  Some(SyncedReportRecord {
    client_id: client_id.to_string(),
    account_id: account_id.to_string(),
    campaign_id: row.campaign_id,
    campaign_name: row.campaign_name,
    date,
    impressions: row.impressions,
    clicks: row.clicks,
    ctr: row.ctr,
    cpc: row.cpc,
    cpm: row.cpm,
    spend: row.spend,
    reach: row.reach,
    frequency: row.frequency,
    conversions: row.conversions,
    cost_per_conversion: row.cost_per_conversion,
    synced_at,
  })
}

/// Pulls daily campaign rows for one account and upserts them in a single batch.
pub async fn sync(
  graph: &MetaGraphClient,
  store: &dyn MetricsStore,
  request: &SyncRequest,
  now: DateTime<Utc>,
) -> Result<SyncSummary, SyncError> {
  let client_id = request.client_id.trim();
  let account_id = request.account_id.trim();
  if client_id.is_empty() || account_id.is_empty() {
    return Err(SyncError::InvalidRequest("client_id and account_id are required"));
  }
  let account_id = normalize_account_id(account_id);

  let mut query = InsightsQuery::campaign_level(
    InsightsTarget::Account(account_id.clone()),
    DAILY_FIELDS,
    request.range,
  );
  query.time_increment = Some(1);

  let page = graph.fetch_insights(&query).await?;
  let options = NormalizeOptions::default();

  let total = page.rows.len();
  let records: Vec<SyncedReportRecord> = page
    .rows
    .iter()
    .filter_map(|raw| to_record(normalize(raw, &options), client_id, &account_id, now))
    .collect();
  let skipped_count = total - records.len();

  if skipped_count > 0 {
    tracing::warn!(client_id, account_id = %account_id, skipped_count, "skipped insight rows without campaign_id or date");
  }

  if records.is_empty() {
    return Ok(SyncSummary {
      synced_count: 0,
      skipped_count,
      has_more: page.has_more,
    });
  }

  store.upsert_reports(&records).await?;

  tracing::info!(
    client_id,
    account_id = %account_id,
    synced_count = records.len(),
    since = %request.range.since,
    until = %request.range.until,
    "meta insights synced"
  );

  Ok(SyncSummary {
    synced_count: records.len(),
    skipped_count,
    has_more: page.has_more,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::providers::meta_graph::test_server;
  use crate::store::MemoryStore;
  use chrono::NaiveDate;
  use hyper::StatusCode;

  fn range() -> DateRange {
    DateRange::new(
      NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
      NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
    )
    .unwrap()
  }

  fn request() -> SyncRequest {
    SyncRequest {
      client_id: "client-1".to_string(),
      account_id: "777".to_string(),
      range: range(),
    }
  }

  fn daily_responder(path: &str, query: &str) -> (StatusCode, String) {
    if path != "/v18.0/act_777/insights" || !query.contains("time_increment=1") {
      return (StatusCode::BAD_REQUEST, r#"{"error":{"message":"bad target"}}"#.to_string());
    }
    let body = r#"{"data":[
      {"campaign_id":"c1","campaign_name":"One","date_start":"2026-01-01","impressions":"100","clicks":"10","spend":"1000",
       "actions":[{"action_type":"purchase","value":"1"},{"action_type":"lead","value":"2"}]},
      {"campaign_id":"c1","campaign_name":"One","date_start":"2026-01-02","impressions":"200","clicks":"20","spend":"2000"},
      {"campaign_name":"orphan","date_start":"2026-01-02","impressions":"5"},
      {"campaign_id":"c2","impressions":"7"}
    ]}"#;
    (StatusCode::OK, body.to_string())
  }

  fn empty_responder(_path: &str, _query: &str) -> (StatusCode, String) {
    (StatusCode::OK, r#"{"data":[]}"#.to_string())
  }

  fn error_responder(_path: &str, _query: &str) -> (StatusCode, String) {
    (
      StatusCode::BAD_REQUEST,
      r#"{"error":{"message":"Unsupported get request."}}"#.to_string(),
    )
  }

  #[tokio::test]
  async fn sync_upserts_complete_rows_only() {
    let (base_url, _seen, task) = test_server::spawn(daily_responder, 1).await;
    let graph = MetaGraphClient::new(&base_url, "tok");
    let store = MemoryStore::new();

    let summary = sync(&graph, &store, &request(), Utc::now()).await.unwrap();
    assert_eq!(summary.synced_count, 2);
    assert_eq!(summary.skipped_count, 2);
    assert_eq!(store.report_count(), 2);

    let rows = store.reports_in_range("client-1", range()).await.unwrap();
    assert_eq!(rows[0].conversions, 3);
    assert_eq!(rows[0].account_id, "act_777");
    task.await.unwrap();
  }

  #[tokio::test]
  async fn repeated_sync_is_idempotent() {
    let (base_url, _seen, task) = test_server::spawn(daily_responder, 2).await;
    let graph = MetaGraphClient::new(&base_url, "tok");
    let store = MemoryStore::new();

    sync(&graph, &store, &request(), Utc::now()).await.unwrap();
    sync(&graph, &store, &request(), Utc::now()).await.unwrap();
    assert_eq!(store.report_count(), 2);
    task.await.unwrap();
  }

  #[tokio::test]
  async fn upstream_error_skips_persistence() {
    let (base_url, _seen, task) = test_server::spawn(error_responder, 1).await;
    let graph = MetaGraphClient::new(&base_url, "tok");
    let store = MemoryStore::new();

    let err = sync(&graph, &store, &request(), Utc::now()).await.unwrap_err();
    assert!(matches!(err, SyncError::Graph(MetaGraphError::Api { .. })));
    assert_eq!(store.upsert_calls(), 0);
    task.await.unwrap();
  }

  #[tokio::test]
  async fn empty_page_does_not_touch_store() {
    let (base_url, _seen, task) = test_server::spawn(empty_responder, 1).await;
    let graph = MetaGraphClient::new(&base_url, "tok");
    let store = MemoryStore::new();

    let summary = sync(&graph, &store, &request(), Utc::now()).await.unwrap();
    assert_eq!(summary.synced_count, 0);
    assert_eq!(store.upsert_calls(), 0);
    task.await.unwrap();
  }

  #[tokio::test]
  async fn store_failure_aborts_sync() {
    let (base_url, _seen, task) = test_server::spawn(daily_responder, 1).await;
    let graph = MetaGraphClient::new(&base_url, "tok");
    let store = MemoryStore::new();
    store.fail_writes(true);

    let err = sync(&graph, &store, &request(), Utc::now()).await.unwrap_err();
    assert!(matches!(err, SyncError::Store(_)));
    assert_eq!(store.report_count(), 0);
    task.await.unwrap();
  }

  #[tokio::test]
  async fn missing_ids_rejected_before_any_call() {
    let graph = MetaGraphClient::new("http://127.0.0.1:9/v18.0", "tok");
    let store = MemoryStore::new();
    let mut req = request();
    req.client_id = " ".to_string();
    let err = sync(&graph, &store, &req, Utc::now()).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidRequest(_)));
  }
}
