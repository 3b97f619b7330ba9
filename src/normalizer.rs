use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

/// One `{action_type, value}` entry from an `actions`-shaped Graph field.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
  pub action_type: String,
  pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMode {
  /// Walk the allow-list in priority order and take the first type present.
  FirstMatch,
  /// Add up every entry whose type is allowed.
  SumAll,
}

#[derive(Debug, Clone, Copy)]
pub struct ConversionPolicy {
  pub allow_list: &'static [&'static str],
  pub mode: ConversionMode,
}

/// Row-level `conversions` for insights and synced records.
pub const TOTAL_CONVERSIONS: ConversionPolicy = ConversionPolicy {
  allow_list: &["purchase", "lead", "complete_registration", "add_to_cart", "initiate_checkout"],
  mode: ConversionMode::SumAll,
};

/// Applied to `cost_per_action_type`.
pub const PRIMARY_CONVERSION_COST: ConversionPolicy = ConversionPolicy {
  allow_list: &["purchase", "lead", "complete_registration"],
  mode: ConversionMode::FirstMatch,
};

/// Headline result on the client dashboard for traffic campaigns.
pub const PRIMARY_TRAFFIC_RESULT: ConversionPolicy = ConversionPolicy {
  allow_list: &["landing_page_view", "link_click"],
  mode: ConversionMode::FirstMatch,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VideoMilestones {
  pub p25: i64,
  pub p50: i64,
  pub p75: i64,
  pub p100: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightRow {
  pub campaign_id: String,
  pub campaign_name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub date: Option<NaiveDate>,
  pub impressions: i64,
  pub clicks: i64,
  pub reach: i64,
  pub frequency: f64,
  pub spend: f64,
  pub ctr: f64,
  pub cpc: f64,
  pub cpm: f64,
  pub conversions: i64,
  pub cost_per_conversion: f64,
  pub video_views: VideoMilestones,
}

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
  pub conversions: ConversionPolicy,
  pub cost_per_conversion: ConversionPolicy,
}

impl Default for NormalizeOptions {
  fn default() -> Self {
    Self {
      conversions: TOTAL_CONVERSIONS,
      cost_per_conversion: PRIMARY_CONVERSION_COST,
    }
  }
}

fn finite_or_zero(value: f64) -> f64 {
  if value.is_finite() && value > 0.0 {
    value
  } else {
    0.0
  }
}

/// Graph numbers arrive as strings ("123.45"), occasionally as JSON numbers.
pub fn lenient_f64(value: Option<&Value>) -> f64 {
  let parsed = match value {
    Some(Value::Number(n)) => n.as_f64(),
    Some(Value::String(s)) => s.trim().replace(',', "").parse::<f64>().ok(),
    _ => None,
  };
  finite_or_zero(parsed.unwrap_or(0.0))
}

/// Integer counterpart of [`lenient_f64`]; fractional input truncates.
pub fn lenient_i64(value: Option<&Value>) -> i64 {
  let raw = lenient_f64(value);
  if raw >= i64::MAX as f64 {
    i64::MAX
  } else {
    raw.trunc() as i64
  }
}

pub fn action_records(value: Option<&Value>) -> Vec<ActionRecord> {
  let Some(items) = value.and_then(|v| v.as_array()) else {
    return vec![];
  };

  items
    .iter()
    .filter_map(|item| {
      let action_type = item.get("action_type")?.as_str()?.to_string();
      Some(ActionRecord {
        action_type,
        value: lenient_f64(item.get("value")),
      })
    })
    .collect()
}

pub fn extract_action_value(actions: &[ActionRecord], policy: &ConversionPolicy) -> f64 {
  match policy.mode {
    ConversionMode::FirstMatch => policy
      .allow_list
      .iter()
      .find_map(|wanted| actions.iter().find(|a| a.action_type == *wanted))
      .map(|a| a.value)
      .unwrap_or(0.0),
    ConversionMode::SumAll => actions
      .iter()
      .filter(|a| policy.allow_list.contains(&a.action_type.as_str()))
      .map(|a| a.value)
      .sum(),
  }
}

/// Value for one exact action type, 0 when absent.
pub fn action_value(actions: &[ActionRecord], action_type: &str) -> f64 {
  actions
    .iter()
    .find(|a| a.action_type == action_type)
    .map(|a| a.value)
    .unwrap_or(0.0)
}

fn first_action_count(row: &Value, field: &str) -> i64 {
  row
    .get(field)
    .and_then(|v| v.as_array())
    .and_then(|items| items.first())
    .map(|item| lenient_i64(item.get("value")))
    .unwrap_or(0)
}

pub fn video_milestones(row: &Value) -> VideoMilestones {
  VideoMilestones {
    p25: first_action_count(row, "video_p25_watched_actions"),
    p50: first_action_count(row, "video_p50_watched_actions"),
    p75: first_action_count(row, "video_p75_watched_actions"),
    p100: first_action_count(row, "video_p100_watched_actions"),
  }
}

fn string_field(row: &Value, field: &str) -> String {
  match row.get(field) {
    Some(Value::String(s)) => s.trim().to_string(),
    Some(Value::Number(n)) => n.to_string(),
    _ => String::new(),
  }
}

pub fn normalize(row: &Value, options: &NormalizeOptions) -> InsightRow {
  let actions = action_records(row.get("actions"));
  let costs = action_records(row.get("cost_per_action_type"));

  let date = row
    .get("date_start")
    .and_then(|v| v.as_str())
    .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());

  InsightRow {
    campaign_id: string_field(row, "campaign_id"),
    campaign_name: string_field(row, "campaign_name"),
    date,
    impressions: lenient_i64(row.get("impressions")),
    clicks: lenient_i64(row.get("clicks")),
    reach: lenient_i64(row.get("reach")),
    frequency: lenient_f64(row.get("frequency")),
    spend: lenient_f64(row.get("spend")),
    ctr: lenient_f64(row.get("ctr")),
    cpc: lenient_f64(row.get("cpc")),
    cpm: lenient_f64(row.get("cpm")),
    conversions: extract_action_value(&actions, &options.conversions).trunc() as i64,
    cost_per_conversion: extract_action_value(&costs, &options.cost_per_conversion),
    video_views: video_milestones(row),
  }
}

pub fn normalize_all(rows: &[Value], options: &NormalizeOptions) -> Vec<InsightRow> {
  rows.iter().map(|row| normalize(row, options)).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn actions(pairs: &[(&str, f64)]) -> Vec<ActionRecord> {
    pairs
      .iter()
      .map(|(t, v)| ActionRecord {
        action_type: t.to_string(),
        value: *v,
      })
      .collect()
  }

  #[test]
  fn lenient_numbers_never_produce_nan() {
    assert_eq!(lenient_f64(Some(&json!("12.5"))), 12.5);
    assert_eq!(lenient_f64(Some(&json!(3))), 3.0);
    assert_eq!(lenient_f64(Some(&json!("NaN"))), 0.0);
    assert_eq!(lenient_f64(Some(&json!("abc"))), 0.0);
    assert_eq!(lenient_f64(Some(&json!(null))), 0.0);
    assert_eq!(lenient_f64(None), 0.0);
    assert_eq!(lenient_i64(Some(&json!("41.9"))), 41);
    assert_eq!(lenient_i64(Some(&json!("-7"))), 0);
  }

  #[test]
  fn sum_all_adds_every_allowed_type() {
    let list = actions(&[("purchase", 2.0), ("lead", 3.0), ("link_click", 50.0), ("purchase", 1.0)]);
    assert_eq!(extract_action_value(&list, &TOTAL_CONVERSIONS), 6.0);
  }

  #[test]
  fn first_match_follows_priority_not_array_order() {
    let list = actions(&[("link_click", 80.0), ("landing_page_view", 30.0)]);
    assert_eq!(extract_action_value(&list, &PRIMARY_TRAFFIC_RESULT), 30.0);

    let list = actions(&[("complete_registration", 9.0), ("lead", 4.0)]);
    assert_eq!(extract_action_value(&list, &PRIMARY_CONVERSION_COST), 4.0);

    assert_eq!(extract_action_value(&[], &PRIMARY_CONVERSION_COST), 0.0);
  }

  #[test]
  fn normalize_reads_metrics_conversions_and_video() {
    let row = json!({
      "campaign_id": "120200",
      "campaign_name": "Spring Sale",
      "date_start": "2026-01-02",
      "impressions": "1000",
      "clicks": "50",
      "reach": "800",
      "frequency": "1.25",
      "spend": "10000",
      "ctr": "5.0",
      "actions": [
        {"action_type": "link_click", "value": "50"},
        {"action_type": "lead", "value": "3"},
        {"action_type": "add_to_cart", "value": "2"}
      ],
      "cost_per_action_type": [
        {"action_type": "add_to_cart", "value": "5000"},
        {"action_type": "lead", "value": "3333.33"}
      ],
      "video_p25_watched_actions": [{"action_type": "video_view", "value": "40"}],
      "video_p100_watched_actions": [{"action_type": "video_view", "value": "7"}]
    });

    let out = normalize(&row, &NormalizeOptions::default());
    assert_eq!(out.campaign_id, "120200");
    assert_eq!(out.date, NaiveDate::from_ymd_opt(2026, 1, 2));
    assert_eq!(out.impressions, 1000);
    assert_eq!(out.clicks, 50);
    assert_eq!(out.reach, 800);
    assert_eq!(out.spend, 10000.0);
    assert_eq!(out.conversions, 5);
    assert!((out.cost_per_conversion - 3333.33).abs() < 1e-9);
    assert_eq!(out.video_views, VideoMilestones { p25: 40, p50: 0, p75: 0, p100: 7 });
    assert_eq!(out.cpc, 0.0);
  }

  #[test]
  fn normalize_tolerates_malformed_rows() {
    let row = json!({
      "impressions": "10",
      "clicks": "25",
      "actions": "not-an-array",
      "cost_per_action_type": [{"value": "1"}, 42],
      "video_p50_watched_actions": []
    });
    let out = normalize(&row, &NormalizeOptions::default());
    assert_eq!(out.impressions, 10);
    assert_eq!(out.clicks, 25);
    assert_eq!(out.conversions, 0);
    assert_eq!(out.cost_per_conversion, 0.0);
    assert_eq!(out.date, None);
    assert_eq!(out.campaign_id, "");
  }
}
