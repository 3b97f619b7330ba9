use chrono::{Duration, NaiveDate};
use serde::Serialize;

pub const INSIGHTS_DEFAULT_DAYS: i64 = 30;
pub const DAILY_TREND_DEFAULT_DAYS: i64 = 7;

/// Inclusive calendar window, serialized as `{"start": .., "end": ..}` for the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
  #[serde(rename = "start")]
  pub since: NaiveDate,
  #[serde(rename = "end")]
  pub until: NaiveDate,
}

impl DateRange {
  pub fn new(since: NaiveDate, until: NaiveDate) -> Option<Self> {
    (since <= until).then_some(Self { since, until })
  }

  /// Window ending `today` that starts `days` days earlier.
  pub fn trailing(today: NaiveDate, days: i64) -> Self {
    let days = days.clamp(0, 3650);
    Self {
      since: today - Duration::days(days),
      until: today,
    }
  }

  pub fn day_count(&self) -> i64 {
    (self.until - self.since).num_days() + 1
  }

  /// Equal-length window that ends the day before this one starts.
  pub fn previous_period(&self) -> Self {
    let until = self.since - Duration::days(1);
    Self {
      since: until - Duration::days(self.day_count() - 1),
      until,
    }
  }

  /// `time_range` query value understood by the Graph API.
  pub fn to_time_range_param(&self) -> String {
    serde_json::json!({
      "since": self.since.format("%Y-%m-%d").to_string(),
      "until": self.until.format("%Y-%m-%d").to_string(),
    })
    .to_string()
  }
}

pub fn parse_dt(input: &str) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").ok()
}

/// Resolves optional `start_date`/`end_date` request values against a default trailing window.
/// A missing end defaults to `today`; a missing start to `end - default_days`.
pub fn resolve_range(
  start: Option<&str>,
  end: Option<&str>,
  today: NaiveDate,
  default_days: i64,
) -> Result<DateRange, String> {
  let parse = |label: &str, raw: Option<&str>| -> Result<Option<NaiveDate>, String> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
      None => Ok(None),
      Some(v) => parse_dt(v)
        .map(Some)
        .ok_or_else(|| format!("{label} must be YYYY-MM-DD")),
    }
  };

  let end_dt = parse("end_date", end)?.unwrap_or(today);
  let start_dt = parse("start_date", start)?.unwrap_or_else(|| DateRange::trailing(end_dt, default_days).since);

  DateRange::new(start_dt, end_dt).ok_or_else(|| format!("start_date ({start_dt}) must be <= end_date ({end_dt})"))
}
