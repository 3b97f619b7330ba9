use serde::Serialize;

use crate::aggregator::{round_to, Summary};

/// Percent delta rounded to one decimal. Without a positive baseline the change is
/// 100 when anything happened and 0 otherwise.
pub fn percent_change(current: f64, previous: Option<f64>) -> f64 {
  match previous {
    Some(prev) if prev > 0.0 => round_to((current - prev) / prev * 100.0, 1),
    _ => {
      if current > 0.0 {
        100.0
      } else {
        0.0
      }
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Changes {
  pub impressions: f64,
  pub clicks: f64,
  pub spend: f64,
  pub conversions: f64,
  pub ctr: f64,
  pub cpc: f64,
}

pub fn compare(current: &Summary, previous: &Summary) -> Changes {
  Changes {
    impressions: percent_change(current.impressions as f64, Some(previous.impressions as f64)),
    clicks: percent_change(current.clicks as f64, Some(previous.clicks as f64)),
    spend: percent_change(current.spend, Some(previous.spend)),
    conversions: percent_change(current.conversions as f64, Some(previous.conversions as f64)),
    ctr: percent_change(current.ctr, Some(previous.ctr)),
    cpc: percent_change(current.cpc, Some(previous.cpc)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_or_missing_baseline() {
    assert_eq!(percent_change(5.0, Some(0.0)), 100.0);
    assert_eq!(percent_change(0.0, Some(0.0)), 0.0);
    assert_eq!(percent_change(3.0, None), 100.0);
    assert_eq!(percent_change(0.0, None), 0.0);
  }

  #[test]
  fn regular_delta_rounds_to_one_decimal() {
    assert_eq!(percent_change(150.0, Some(100.0)), 50.0);
    assert_eq!(percent_change(50.0, Some(100.0)), -50.0);
    assert_eq!(percent_change(1.0, Some(3.0)), -66.7);
  }

  #[test]
  fn compare_covers_each_metric() {
    let current = Summary {
      impressions: 2000,
      clicks: 100,
      spend: 30000.0,
      conversions: 4,
      ctr: 5.0,
      cpc: 300.0,
      ..Default::default()
    };
    let previous = Summary {
      impressions: 1000,
      clicks: 100,
      spend: 0.0,
      conversions: 5,
      ctr: 10.0,
      cpc: 200.0,
      ..Default::default()
    };
    let changes = compare(&current, &previous);
    assert_eq!(changes.impressions, 100.0);
    assert_eq!(changes.clicks, 0.0);
    assert_eq!(changes.spend, 100.0);
    assert_eq!(changes.conversions, -20.0);
    assert_eq!(changes.ctr, -50.0);
    assert_eq!(changes.cpc, 50.0);
  }
}
