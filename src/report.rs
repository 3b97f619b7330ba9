use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::aggregator::{by_campaign, by_date, summarize, CampaignTotals, DailyTotals, Summary};
use crate::comparator::{compare, Changes};
use crate::dates::DateRange;
use crate::db::ComposedReportRow;
use crate::normalizer::{action_records, action_value, extract_action_value, lenient_f64, ActionRecord, PRIMARY_TRAFFIC_RESULT};
use crate::providers::meta_graph::{InsightsQuery, InsightsTarget, MetaGraphClient, MetaGraphError, SNAPSHOT_FIELDS};
use crate::store::{MetricsStore, StoreError, SyncedReportRecord};

pub const STORED_VIEW_LIMIT: u32 = 100;
pub const DEFAULT_CLIENT_NAME: &str = "Client";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
  pub client: Value,
  pub date_range: DateRange,
  pub summary: Summary,
  pub changes: Changes,
  pub campaigns: Vec<CampaignTotals>,
  pub daily_trend: Vec<DailyTotals>,
  pub generated_at: DateTime<Utc>,
}

/// Builds a client report for `range` against the preceding equal-length period and
/// appends it to the report history.
pub async fn generate_report(
  store: &dyn MetricsStore,
  client_id: &str,
  client: Value,
  range: DateRange,
  value_per_conversion: f64,
  now: DateTime<Utc>,
) -> Result<Report, StoreError> {
  let rows = store.reports_in_range(client_id, range).await?;
  let previous_rows = store.reports_in_range(client_id, range.previous_period()).await?;

  let summary = summarize(&rows, value_per_conversion);
  let previous = summarize(&previous_rows, value_per_conversion);

  let report = Report {
    client,
    date_range: range,
    summary,
    changes: compare(&summary, &previous),
    campaigns: by_campaign(&rows),
    daily_trend: by_date(&rows),
    generated_at: now,
  };

  let payload = serde_json::to_value(&report).map_err(|e| StoreError::Backend(e.to_string()))?;
  store.append_report_history(client_id, range, &payload).await?;

  tracing::info!(client_id, rows = rows.len(), "report generated");
  Ok(report)
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredReportView {
  pub reports: Vec<SyncedReportRecord>,
  pub summary: Summary,
}

pub async fn stored_report_view(
  store: &dyn MetricsStore,
  client_id: Option<&str>,
  range: Option<DateRange>,
  value_per_conversion: f64,
) -> Result<StoredReportView, StoreError> {
  let reports = store.recent_reports(client_id, range, STORED_VIEW_LIMIT).await?;
  let summary = summarize(&reports, value_per_conversion);
  Ok(StoredReportView { reports, summary })
}

/// Latest admin-composed report for the dashboard, or an empty placeholder.
pub fn composed_view(row: Option<&ComposedReportRow>) -> Value {
  let Some(row) = row else {
    return serde_json::json!({
      "clientName": "No report yet",
      "period": "Last 7 days",
      "kpis": [],
      "highlights": [],
      "actions": [],
    });
  };

  let field = |key: &str| row.payload.get(key).cloned().filter(|v| v.is_array()).unwrap_or_else(|| Value::Array(vec![]));
  let client_name = row
    .payload
    .get("clientName")
    .and_then(|v| v.as_str())
    .filter(|s| !s.trim().is_empty())
    .unwrap_or(DEFAULT_CLIENT_NAME);

  serde_json::json!({
    "clientName": client_name,
    "period": row.period,
    "kpis": field("kpis"),
    "highlights": field("highlights"),
    "actions": field("actions"),
    "_meta": {"created_at": row.created_at},
  })
}

/// First word of the campaign name, skipping a leading `YYYYMMDD` token.
pub fn extract_business_name(campaign_name: Option<&str>) -> String {
  let Some(name) = campaign_name.map(str::trim).filter(|n| !n.is_empty()) else {
    return DEFAULT_CLIENT_NAME.to_string();
  };

  let mut words = name.split_whitespace();
  let first = words.next().unwrap_or_default();
  let leading_date = first.len() >= 8 && first.chars().take(8).all(|c| c.is_ascii_digit());
  if leading_date {
    return words.next().unwrap_or(DEFAULT_CLIENT_NAME).to_string();
  }
  first.to_string()
}

/// Thousands-grouped number with at most three fraction digits.
pub fn format_number(value: f64) -> String {
  let value = if value.is_finite() { value } else { 0.0 };
  let negative = value < 0.0;
  let rounded = (value.abs() * 1000.0).round() / 1000.0;
  let int_part = rounded.trunc() as u64;
  let frac = ((rounded - rounded.trunc()) * 1000.0).round() as u64;

  let digits = int_part.to_string();
  let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
  for (i, ch) in digits.chars().enumerate() {
    if i > 0 && (digits.len() - i) % 3 == 0 {
      grouped.push(',');
    }
    grouped.push(ch);
  }

  let mut out = if negative { format!("-{grouped}") } else { grouped };
  if frac > 0 {
    let frac_str = format!("{frac:03}");
    out.push('.');
    out.push_str(frac_str.trim_end_matches('0'));
  }
  out
}

pub fn format_currency(value: f64) -> String {
  format!("₩{}", format_number(value))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSnapshot {
  pub client_name: String,
  pub period: String,
  pub reach: String,
  pub impressions: String,
  pub spend: String,
  pub engagement: String,
  pub video_views: String,
  pub link_clicks: String,
  pub landing_page_views: String,
  pub primary_result: String,
  pub highlights: Vec<String>,
  pub actions: Vec<String>,
}

fn highlights(reach: f64, actions: &[ActionRecord]) -> Vec<String> {
  let video_views = action_value(actions, "video_view");
  let link_clicks = action_value(actions, "link_click");

  let mut out = Vec::new();
  if reach > 1000.0 {
    out.push(format!("Your ads reached {} people.", format_number(reach)));
  }
  if video_views > 100.0 {
    out.push(format!("Your video was viewed {} times.", format_number(video_views)));
  }
  if link_clicks > 50.0 {
    out.push(format!("{} people clicked your link.", format_number(link_clicks)));
  }
  if out.is_empty() {
    out.push("Your ads are running normally.".to_string());
  }
  out
}

fn suggested_actions(impressions: f64, actions: &[ActionRecord]) -> Vec<String> {
  let link_clicks = action_value(actions, "link_click");
  let landing_views = action_value(actions, "landing_page_view");

  let mut out = Vec::new();
  if impressions > 0.0 && link_clicks / impressions * 100.0 < 1.0 {
    out.push("Click-through rate is low; consider refreshing the ad creative.".to_string());
  }
  if landing_views < link_clicks * 0.5 {
    out.push("Many clicks never reach the landing page; check its load speed.".to_string());
  }
  if out.is_empty() {
    out.push("Performance looks healthy. Keep it up!".to_string());
  }
  out
}

/// Client dashboard view of a single campaign-level insight object.
pub fn live_snapshot(insight: Option<&Value>, client_name: &str) -> LiveSnapshot {
  let Some(insight) = insight else {
    return LiveSnapshot {
      client_name: client_name.to_string(),
      period: "Last 30 days".to_string(),
      reach: "0".to_string(),
      impressions: "0".to_string(),
      spend: format_currency(0.0),
      engagement: "0".to_string(),
      video_views: "0".to_string(),
      link_clicks: "0".to_string(),
      landing_page_views: "0".to_string(),
      primary_result: "0".to_string(),
      highlights: vec!["Loading your data.".to_string()],
      actions: vec!["No campaign is connected yet.".to_string()],
    };
  };

  let actions = action_records(insight.get("actions"));
  let reach = lenient_f64(insight.get("reach"));
  let impressions = lenient_f64(insight.get("impressions"));
  let date = |key: &str| insight.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string();

  LiveSnapshot {
    client_name: client_name.to_string(),
    period: format!("{} ~ {}", date("date_start"), date("date_stop")),
    reach: format_number(reach),
    impressions: format_number(impressions),
    spend: format_currency(lenient_f64(insight.get("spend"))),
    engagement: format_number(action_value(&actions, "post_engagement")),
    video_views: format_number(action_value(&actions, "video_view")),
    link_clicks: format_number(action_value(&actions, "link_click")),
    landing_page_views: format_number(action_value(&actions, "landing_page_view")),
    primary_result: format_number(extract_action_value(&actions, &PRIMARY_TRAFFIC_RESULT)),
    highlights: highlights(reach, &actions),
    actions: suggested_actions(impressions, &actions),
  }
}

/// First insight object for a campaign over the platform's default window.
pub async fn fetch_live_insight(graph: &MetaGraphClient, campaign_id: &str) -> Result<Option<Value>, MetaGraphError> {
  let query = InsightsQuery {
    target: InsightsTarget::Campaign(campaign_id.to_string()),
    fields: SNAPSHOT_FIELDS,
    time_range: None,
    breakdowns: &[],
    time_increment: None,
    level: None,
  };
  let page = graph.fetch_insights(&query).await?;
  Ok(page.rows.into_iter().next())
}
