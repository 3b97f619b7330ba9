use serde::Serialize;
use serde_json::Value;

use crate::dates::DateRange;
use crate::normalizer::lenient_i64;
use crate::providers::meta_graph::{
  InsightsQuery, InsightsTarget, MetaGraphClient, MetaGraphError, DEMOGRAPHIC_FIELDS,
};

pub const AGE_BUCKETS: &[&str] = &["13-17", "18-24", "25-34", "35-44", "45-54", "55-64", "65+"];
pub const GENDER_BUCKETS: &[&str] = &["male", "female"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketShare {
  pub key: &'static str,
  pub impressions: i64,
  pub reach: i64,
  /// Share of impressions within the dimension, one decimal.
  pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Demographics {
  pub gender: Vec<BucketShare>,
  pub age: Vec<BucketShare>,
}

fn round1(value: f64) -> f64 {
  (value * 10.0).round() / 10.0
}

/// Sums rows into the fixed bucket set. Keys outside the set ("unknown") are dropped.
fn breakdown(rows: &[Value], dimension: &str, buckets: &'static [&'static str], empty_percent: f64) -> Vec<BucketShare> {
  let mut shares: Vec<BucketShare> = buckets
    .iter()
    .copied()
    .map(|key| BucketShare {
      key,
      impressions: 0,
      reach: 0,
      percent: empty_percent,
    })
    .collect();

  for row in rows {
    let Some(key) = row.get(dimension).and_then(|v| v.as_str()) else {
      continue;
    };
    if let Some(share) = shares.iter_mut().find(|s| s.key == key.trim()) {
      share.impressions = share.impressions.saturating_add(lenient_i64(row.get("impressions")));
      share.reach = share.reach.saturating_add(lenient_i64(row.get("reach")));
    }
  }

  let total: i64 = shares.iter().map(|s| s.impressions).sum();
  if total > 0 {
    for share in shares.iter_mut() {
      share.percent = round1(share.impressions as f64 / total as f64 * 100.0);
    }
  }

  shares
}

/// Zero impressions yields an even 50/50 split.
pub fn breakdown_by_gender(rows: &[Value]) -> Vec<BucketShare> {
  breakdown(rows, "gender", GENDER_BUCKETS, 50.0)
}

/// Zero impressions yields 0% for every bucket.
pub fn breakdown_by_age(rows: &[Value]) -> Vec<BucketShare> {
  breakdown(rows, "age", AGE_BUCKETS, 0.0)
}

/// Issues the gender and age breakdown requests together. Either failure fails the whole call.
pub async fn fetch_demographics(
  graph: &MetaGraphClient,
  target: InsightsTarget,
  range: DateRange,
) -> Result<Demographics, MetaGraphError> {
  let mut gender_query = InsightsQuery::campaign_level(target.clone(), DEMOGRAPHIC_FIELDS, range);
  gender_query.breakdowns = &["gender"];
  gender_query.level = None;

  let mut age_query = InsightsQuery::campaign_level(target, DEMOGRAPHIC_FIELDS, range);
  age_query.breakdowns = &["age"];
  age_query.level = None;

  let (gender_page, age_page) = tokio::try_join!(
    graph.fetch_insights(&gender_query),
    graph.fetch_insights(&age_query)
  )?;

  Ok(Demographics {
    gender: breakdown_by_gender(&gender_page.rows),
    age: breakdown_by_age(&age_page.rows),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::providers::meta_graph::test_server;
  use chrono::NaiveDate;
  use hyper::StatusCode;
  use serde_json::json;

  #[test]
  fn gender_split_uses_impressions_and_ignores_unknown() {
    let rows = vec![
      json!({"gender": "male", "impressions": "300", "reach": "200"}),
      json!({"gender": "female", "impressions": "700", "reach": "650"}),
      json!({"gender": "unknown", "impressions": "5000"}),
    ];
    let out = breakdown_by_gender(&rows);
    assert_eq!(out[0].key, "male");
    assert_eq!(out[0].percent, 30.0);
    assert_eq!(out[1].percent, 70.0);
    assert_eq!(out[1].reach, 650);
  }

  #[test]
  fn empty_breakdowns_fall_back_to_neutral_split() {
    let gender = breakdown_by_gender(&[]);
    assert!(gender.iter().all(|s| s.percent == 50.0));

    let age = breakdown_by_age(&[json!({"age": "25-34", "impressions": "0"})]);
    assert_eq!(age.len(), AGE_BUCKETS.len());
    assert!(age.iter().all(|s| s.percent == 0.0));
  }

  #[test]
  fn age_percentages_sum_to_hundred_within_rounding() {
    let rows = vec![
      json!({"age": "18-24", "impressions": "333"}),
      json!({"age": "25-34", "impressions": "333"}),
      json!({"age": "35-44", "impressions": "334"}),
      json!({"age": "65+", "impressions": "7"}),
    ];
    let sum: f64 = breakdown_by_age(&rows).iter().map(|s| s.percent).sum();
    assert!((sum - 100.0).abs() <= 1.0, "sum was {sum}");
  }

  fn responder(_path: &str, query: &str) -> (StatusCode, String) {
    if query.contains("breakdowns=gender") {
      return (
        StatusCode::OK,
        r#"{"data":[{"gender":"male","impressions":"10"},{"gender":"female","impressions":"30"}]}"#.to_string(),
      );
    }
    (
      StatusCode::BAD_REQUEST,
      r#"{"error":{"message":"(#100) breakdowns unavailable"}}"#.to_string(),
    )
  }

  #[tokio::test]
  async fn one_failing_breakdown_fails_the_composite() {
    let (base_url, _seen, task) = test_server::spawn(responder, 2).await;
    let graph = MetaGraphClient::new(&base_url, "tok");
    let range = DateRange::new(
      NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
      NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
    )
    .unwrap();

    let err = fetch_demographics(&graph, InsightsTarget::Account("1".to_string()), range)
      .await
      .unwrap_err();
    assert!(matches!(err, MetaGraphError::Api { .. }));
    // try_join may drop the second future early; make sure the server still exits.
    drop(graph);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), task).await;
  }
}
