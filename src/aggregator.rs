use chrono::NaiveDate;
use serde::Serialize;

use crate::normalizer::InsightRow;

/// Anything carrying the base metrics: live insight rows and persisted records alike.
pub trait MetricRow {
  fn campaign_id(&self) -> &str;
  fn campaign_name(&self) -> &str;
  fn date(&self) -> Option<NaiveDate>;
  fn impressions(&self) -> i64;
  fn clicks(&self) -> i64;
  fn spend(&self) -> f64;
  fn reach(&self) -> i64;
  fn conversions(&self) -> i64;
}

impl MetricRow for InsightRow {
  fn campaign_id(&self) -> &str {
    &self.campaign_id
  }
  fn campaign_name(&self) -> &str {
    &self.campaign_name
  }
  fn date(&self) -> Option<NaiveDate> {
    self.date
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

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Summary {
  pub impressions: i64,
  pub clicks: i64,
  pub spend: f64,
  pub reach: i64,
  pub conversions: i64,
  pub ctr: f64,
  pub cpc: f64,
  pub cpm: f64,
  pub roas: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignTotals {
  pub id: String,
  pub name: String,
  pub impressions: i64,
  pub clicks: i64,
  pub spend: f64,
  pub conversions: i64,
  pub ctr: f64,
  pub cpc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTotals {
  pub date: NaiveDate,
  pub impressions: i64,
  pub clicks: i64,
  pub spend: f64,
  pub conversions: i64,
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
  let factor = 10f64.powi(decimals);
  (value * factor).round() / factor
}

/// `numerator / denominator * scale`, or 0 when the denominator is not positive.
fn ratio(numerator: f64, denominator: f64, scale: f64) -> f64 {
  if denominator > 0.0 {
    numerator / denominator * scale
  } else {
    0.0
  }
}

pub fn summarize<R: MetricRow>(rows: &[R], value_per_conversion: f64) -> Summary {
  let mut out = Summary::default();
  for row in rows {
    out.impressions = out.impressions.saturating_add(row.impressions());
    out.clicks = out.clicks.saturating_add(row.clicks());
    out.spend += row.spend();
    out.reach = out.reach.saturating_add(row.reach());
    out.conversions = out.conversions.saturating_add(row.conversions());
  }

  let impressions = out.impressions as f64;
  out.ctr = round_to(ratio(out.clicks as f64, impressions, 100.0), 2);
  out.cpc = round_to(ratio(out.spend, out.clicks as f64, 1.0), 0);
  out.cpm = round_to(ratio(out.spend, impressions, 1000.0), 0);
  out.roas = round_to(ratio(out.conversions as f64 * value_per_conversion, out.spend, 1.0), 2);
  out
}

/// Groups by campaign id in first-seen order.
pub fn by_campaign<R: MetricRow>(rows: &[R]) -> Vec<CampaignTotals> {
  let mut out: Vec<CampaignTotals> = Vec::new();
  for row in rows {
    let idx = match out.iter().position(|c| c.id == row.campaign_id()) {
      Some(idx) => idx,
      None => {
        out.push(CampaignTotals {
          id: row.campaign_id().to_string(),
          name: row.campaign_name().to_string(),
          impressions: 0,
          clicks: 0,
          spend: 0.0,
          conversions: 0,
          ctr: 0.0,
          cpc: 0.0,
        });
        out.len() - 1
      }
    };
    let entry = &mut out[idx];
    entry.impressions = entry.impressions.saturating_add(row.impressions());
    entry.clicks = entry.clicks.saturating_add(row.clicks());
    entry.spend += row.spend();
    entry.conversions = entry.conversions.saturating_add(row.conversions());
  }

  for c in out.iter_mut() {
    c.ctr = round_to(ratio(c.clicks as f64, c.impressions as f64, 100.0), 2);
    c.cpc = round_to(ratio(c.spend, c.clicks as f64, 1.0), 0);
  }
  out
}

/// Groups by day, ascending. Rows without a date are skipped.
pub fn by_date<R: MetricRow>(rows: &[R]) -> Vec<DailyTotals> {
  let mut out: Vec<DailyTotals> = Vec::new();
  for row in rows {
    let Some(date) = row.date() else { continue };
    let idx = match out.binary_search_by(|d| d.date.cmp(&date)) {
      Ok(idx) => idx,
      Err(idx) => {
        out.insert(
          idx,
          DailyTotals {
            date,
            impressions: 0,
            clicks: 0,
            spend: 0.0,
            conversions: 0,
          },
        );
        idx
      }
    };
    let entry = &mut out[idx];
    entry.impressions = entry.impressions.saturating_add(row.impressions());
    entry.clicks = entry.clicks.saturating_add(row.clicks());
    entry.spend += row.spend();
    entry.conversions = entry.conversions.saturating_add(row.conversions());
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::DEFAULT_VALUE_PER_CONVERSION;

  fn row(campaign: &str, day: u32, impressions: i64, clicks: i64, spend: f64, conversions: i64) -> InsightRow {
    InsightRow {
      campaign_id: campaign.to_string(),
      campaign_name: format!("{campaign} name"),
      date: NaiveDate::from_ymd_opt(2026, 1, day),
      impressions,
      clicks,
      reach: impressions / 2,
      spend,
      conversions,
      ..Default::default()
    }
  }

  #[test]
  fn empty_input_yields_zeroed_summary() {
    let summary = summarize::<InsightRow>(&[], DEFAULT_VALUE_PER_CONVERSION);
    assert_eq!(summary, Summary::default());
  }

  #[test]
  fn summary_derives_rounded_ratios() {
    let rows = vec![row("c1", 1, 1000, 50, 10000.0, 3), row("c2", 1, 1000, 20, 5000.0, 0)];
    let s = summarize(&rows, DEFAULT_VALUE_PER_CONVERSION);
    assert_eq!(s.impressions, 2000);
    assert_eq!(s.clicks, 70);
    assert_eq!(s.reach, 1000);
    assert_eq!(s.ctr, 3.5);
    assert_eq!(s.cpc, 214.0);
    assert_eq!(s.cpm, 7500.0);
    assert_eq!(s.roas, 10.0);
  }

  #[test]
  fn single_row_ratios() {
    let rows = vec![row("c1", 1, 1000, 50, 10000.0, 0)];
    let s = summarize(&rows, DEFAULT_VALUE_PER_CONVERSION);
    assert_eq!(s.ctr, 5.0);
    assert_eq!(s.cpc, 200.0);
    assert_eq!(s.cpm, 10000.0);
    assert_eq!(s.roas, 0.0);
  }

  #[test]
  fn zero_denominators_give_zero_ratios() {
    let rows = vec![row("c1", 1, 0, 0, 0.0, 4)];
    let s = summarize(&rows, DEFAULT_VALUE_PER_CONVERSION);
    assert_eq!((s.ctr, s.cpc, s.cpm, s.roas), (0.0, 0.0, 0.0, 0.0));
    assert_eq!(s.conversions, 4);
  }

  #[test]
  fn campaign_groups_keep_first_seen_order() {
    let rows = vec![
      row("b", 1, 100, 10, 1000.0, 1),
      row("a", 1, 100, 5, 500.0, 0),
      row("b", 2, 300, 30, 2000.0, 2),
    ];
    let groups = by_campaign(&rows);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].id, "b");
    assert_eq!(groups[0].impressions, 400);
    assert_eq!(groups[0].ctr, 10.0);
    assert_eq!(groups[0].cpc, 75.0);
    assert_eq!(groups[1].name, "a name");
  }

  #[test]
  fn daily_trend_sorted_ascending() {
    let rows = vec![row("a", 3, 10, 1, 1.0, 0), row("a", 1, 20, 2, 2.0, 0), row("b", 3, 5, 1, 1.0, 1)];
    let days = by_date(&rows);
    assert_eq!(days.len(), 2);
    assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    assert_eq!(days[1].impressions, 15);
    assert_eq!(days[1].conversions, 1);
  }
}
