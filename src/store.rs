use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::aggregator::MetricRow;
use crate::dates::DateRange;
use crate::token::StoredToken;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store backend error: {0}")]
  Backend(String),
  #[error("store unavailable: {0}")]
  Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
  fn from(err: sqlx::Error) -> Self {
    StoreError::Backend(err.to_string())
  }
}

/// Daily campaign metrics as persisted, unique on (client_id, campaign_id, date).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncedReportRecord {
  pub client_id: String,
  pub account_id: String,
  pub campaign_id: String,
  pub campaign_name: String,
  pub date: NaiveDate,
  pub impressions: i64,
  pub clicks: i64,
  pub ctr: f64,
  pub cpc: f64,
  pub cpm: f64,
  pub spend: f64,
  pub reach: i64,
  pub frequency: f64,
  pub conversions: i64,
  pub cost_per_conversion: f64,
  pub synced_at: DateTime<Utc>,
}

impl MetricRow for SyncedReportRecord {
  fn campaign_id(&self) -> &str {
    &self.campaign_id
  }
  fn campaign_name(&self) -> &str {
    &self.campaign_name
  }
  fn date(&self) -> Option<NaiveDate> {
    Some(self.date)
  }
  fn impressions(&self) -> i64 {
    self.impressions
  }
  fn clicks(&self) -> i64 {
    self.clicks
  }
  fn spend(&self) -> f64 {
    self.spend
  }
  fn reach(&self) -> i64 {
    self.reach
  }
  fn conversions(&self) -> i64 {
    self.conversions
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenLogEntry {
  pub action: String,
  pub status: String,
  pub expires_at: Option<DateTime<Utc>>,
  pub error_message: Option<String>,
  pub created_at: DateTime<Utc>,
}

/// Key/value settings plus the token audit trail.
#[async_trait]
pub trait SettingsStore: Send + Sync {
  async fn get_setting(&self, key: &str) -> Result<Option<StoredToken>, StoreError>;

  async fn put_setting(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<(), StoreError>;

  /// Per-client token from `meta_connections`.
  async fn tenant_token(&self, client_id: &str) -> Result<Option<String>, StoreError>;

  async fn append_token_log(&self, entry: &TokenLogEntry) -> Result<(), StoreError>;

  async fn recent_token_logs(&self, limit: u32) -> Result<Vec<TokenLogEntry>, StoreError>;
}

#[async_trait]
pub trait MetricsStore: Send + Sync {
  /// Writes all records or none. Existing keys are overwritten.
  async fn upsert_reports(&self, records: &[SyncedReportRecord]) -> Result<u64, StoreError>;

  /// One client's rows inside `range`, date ascending.
  async fn reports_in_range(&self, client_id: &str, range: DateRange) -> Result<Vec<SyncedReportRecord>, StoreError>;

  /// Newest rows first, optionally filtered.
  async fn recent_reports(
    &self,
    client_id: Option<&str>,
    range: Option<DateRange>,
    limit: u32,
  ) -> Result<Vec<SyncedReportRecord>, StoreError>;

  async fn append_report_history(&self, client_id: &str, range: DateRange, report: &Value) -> Result<(), StoreError>;
}

type ReportKey = (String, String, NaiveDate);

#[derive(Default)]
struct MemoryState {
  settings: HashMap<String, StoredToken>,
  tenant_tokens: HashMap<String, String>,
  token_logs: Vec<TokenLogEntry>,
  reports: BTreeMap<ReportKey, SyncedReportRecord>,
  history: Vec<(String, DateRange, Value)>,
  upsert_calls: usize,
}

/// Process-local store used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
  state: Mutex<MemoryState>,
  fail_writes: AtomicBool,
  fail_log_writes: AtomicBool,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Makes every subsequent write return `StoreError::Unavailable`.
  pub fn fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  /// Makes only `append_token_log` fail, leaving settings and reports writable.
  pub fn fail_log_writes(&self, fail: bool) {
    self.fail_log_writes.store(fail, Ordering::SeqCst);
  }

  pub fn set_tenant_token(&self, client_id: &str, token: &str) {
    if let Ok(mut state) = self.state.lock() {
      state.tenant_tokens.insert(client_id.to_string(), token.to_string());
    }
  }

  pub fn insert_setting(&self, key: &str, token: StoredToken) {
    if let Ok(mut state) = self.state.lock() {
      state.settings.insert(key.to_string(), token);
    }
  }

  pub fn token_logs(&self) -> Vec<TokenLogEntry> {
    self.state.lock().map(|s| s.token_logs.clone()).unwrap_or_default()
  }

  pub fn report_count(&self) -> usize {
    self.state.lock().map(|s| s.reports.len()).unwrap_or(0)
  }

  pub fn upsert_calls(&self) -> usize {
    self.state.lock().map(|s| s.upsert_calls).unwrap_or(0)
  }

  pub fn history(&self) -> Vec<(String, DateRange, Value)> {
    self.state.lock().map(|s| s.history.clone()).unwrap_or_default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
    self
      .state
      .lock()
      .map_err(|_| StoreError::Backend("memory store poisoned".to_string()))
  }

  fn check_writable(&self) -> Result<(), StoreError> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(StoreError::Unavailable("writes disabled".to_string()));
    }
    Ok(())
  }
}

#[async_trait]
impl SettingsStore for MemoryStore {
  async fn get_setting(&self, key: &str) -> Result<Option<StoredToken>, StoreError> {
    Ok(self.lock()?.settings.get(key).cloned())
  }

  async fn put_setting(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<(), StoreError> {
    self.check_writable()?;
    self.lock()?.settings.insert(
      key.to_string(),
      StoredToken {
        value: value.to_string(),
        expires_at,
        updated_at: Some(Utc::now()),
      },
    );
    Ok(())
  }

  async fn tenant_token(&self, client_id: &str) -> Result<Option<String>, StoreError> {
    Ok(self.lock()?.tenant_tokens.get(client_id).cloned())
  }

  async fn append_token_log(&self, entry: &TokenLogEntry) -> Result<(), StoreError> {
    self.check_writable()?;
    if self.fail_log_writes.load(Ordering::SeqCst) {
      return Err(StoreError::Unavailable("token log writes disabled".to_string()));
    }
    self.lock()?.token_logs.push(entry.clone());
    Ok(())
  }

  async fn recent_token_logs(&self, limit: u32) -> Result<Vec<TokenLogEntry>, StoreError> {
    let state = self.lock()?;
    Ok(state.token_logs.iter().rev().take(limit as usize).cloned().collect())
  }
}

#[async_trait]
impl MetricsStore for MemoryStore {
  async fn upsert_reports(&self, records: &[SyncedReportRecord]) -> Result<u64, StoreError> {
    let mut state = self.lock()?;
    state.upsert_calls += 1;
    self.check_writable()?;
    for record in records {
      let key = (record.client_id.clone(), record.campaign_id.clone(), record.date);
      state.reports.insert(key, record.clone());
    }
    Ok(records.len() as u64)
  }

  async fn reports_in_range(&self, client_id: &str, range: DateRange) -> Result<Vec<SyncedReportRecord>, StoreError> {
    let state = self.lock()?;
    let mut rows: Vec<SyncedReportRecord> = state
      .reports
      .values()
      .filter(|r| r.client_id == client_id && r.date >= range.since && r.date <= range.until)
      .cloned()
      .collect();
    rows.sort_by_key(|r| r.date);
    Ok(rows)
  }

  async fn recent_reports(
    &self,
    client_id: Option<&str>,
    range: Option<DateRange>,
    limit: u32,
  ) -> Result<Vec<SyncedReportRecord>, StoreError> {
    let state = self.lock()?;
    let mut rows: Vec<SyncedReportRecord> = state
      .reports
      .values()
      .filter(|r| client_id.map_or(true, |id| r.client_id == id))
      .filter(|r| range.map_or(true, |rg| r.date >= rg.since && r.date <= rg.until))
      .cloned()
      .collect();
    rows.sort_by(|a, b| b.date.cmp(&a.date));
    rows.truncate(limit as usize);
    Ok(rows)
  }

  async fn append_report_history(&self, client_id: &str, range: DateRange, report: &Value) -> Result<(), StoreError> {
    self.check_writable()?;
    self.lock()?.history.push((client_id.to_string(), range, report.clone()));
    Ok(())
  }
}

#[cfg(test)]
pub(crate) fn sample_record(client_id: &str, campaign_id: &str, date: NaiveDate, impressions: i64) -> SyncedReportRecord {
  SyncedReportRecord {
    client_id: client_id.to_string(),
    account_id: "act_1".to_string(),
    campaign_id: campaign_id.to_string(),
    campaign_name: format!("Campaign {campaign_id}"),
    date,
    impressions,
    clicks: impressions / 10,
    ctr: 10.0,
    cpc: 0.0,
    cpm: 0.0,
    spend: impressions as f64 * 10.0,
    reach: impressions / 2,
    frequency: 2.0,
    conversions: 1,
    cost_per_conversion: 0.0,
    synced_at: Utc::now(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, day).unwrap()
  }

  #[tokio::test]
  async fn upsert_overwrites_same_key() {
    let store = MemoryStore::new();
    store.upsert_reports(&[sample_record("c", "k", d(1), 100)]).await.unwrap();
    store.upsert_reports(&[sample_record("c", "k", d(1), 250)]).await.unwrap();

    assert_eq!(store.report_count(), 1);
    let rows = store.reports_in_range("c", DateRange::new(d(1), d(1)).unwrap()).await.unwrap();
    assert_eq!(rows[0].impressions, 250);
  }

  #[tokio::test]
  async fn failed_upsert_writes_nothing() {
    let store = MemoryStore::new();
    store.fail_writes(true);
    let err = store
      .upsert_reports(&[sample_record("c", "k", d(1), 1), sample_record("c", "k", d(2), 1)])
      .await
      .unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
    assert_eq!(store.report_count(), 0);
  }

  #[tokio::test]
  async fn recent_reports_newest_first_with_filters() {
    let store = MemoryStore::new();
    store
      .upsert_reports(&[
        sample_record("a", "k", d(1), 1),
        sample_record("a", "k", d(3), 1),
        sample_record("b", "k", d(2), 1),
      ])
      .await
      .unwrap();

    let all = store.recent_reports(None, None, 100).await.unwrap();
    assert_eq!(all.iter().map(|r| r.date).collect::<Vec<_>>(), vec![d(3), d(2), d(1)]);

    let only_a = store.recent_reports(Some("a"), None, 1).await.unwrap();
    assert_eq!(only_a.len(), 1);
    assert_eq!(only_a[0].date, d(3));
  }
}
