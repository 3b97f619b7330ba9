use chrono::{Local, Utc};
use vercel_runtime::Error;

use meta_report::config::AppConfig;
use meta_report::dates::{parse_dt, resolve_range, INSIGHTS_DEFAULT_DAYS};
use meta_report::db::{get_pool, MySqlStore};
use meta_report::logging::init_tracing;
use meta_report::providers::meta_graph::MetaGraphClient;
use meta_report::sync::{sync, SyncRequest};
use meta_report::token::{request_sources, resolve_token};

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
  args
    .iter()
    .position(|a| a == flag)
    .and_then(|idx| args.get(idx + 1))
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}

fn boxed(message: impl Into<String>) -> Error {
  Box::new(std::io::Error::other(message.into()))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  let _ = dotenvy::dotenv();
  init_tracing();

  let args: Vec<String> = std::env::args().collect();
  let (Some(client_id), Some(account_id)) = (
    parse_flag_value(&args, "--client-id"),
    parse_flag_value(&args, "--account-id"),
  ) else {
    eprintln!("Missing required --client-id and --account-id");
    eprintln!("Example: cargo run --bin local_sync_once -- --client-id 12 --account-id act_123 --days 14");
    return Ok(());
  };

  let days = parse_flag_value(&args, "--days")
    .and_then(|v| v.parse::<i64>().ok())
    .unwrap_or(INSIGHTS_DEFAULT_DAYS)
    .clamp(1, 365);
  let start = parse_flag_value(&args, "--start");
  let end = parse_flag_value(&args, "--end");
  if let Some(bad) = [&start, &end].into_iter().flatten().find(|v| parse_dt(v).is_none()) {
    eprintln!("Invalid date {bad}; expected YYYY-MM-DD");
    return Ok(());
  }
  let range = resolve_range(start.as_deref(), end.as_deref(), Local::now().date_naive(), days).map_err(boxed)?;

  let config = AppConfig::from_env()?;
  let pool = get_pool(config.require_database_url()?).await?;
  let store = MySqlStore::new(pool);

  let override_token = parse_flag_value(&args, "--access-token");
  let sources = request_sources(override_token.as_deref(), Some(&client_id), &config);
  let token = resolve_token(&store, &sources, Utc::now()).await?;
  println!("token_origin={:?}", token.origin);

  let graph = MetaGraphClient::new(&config.graph_base_url, &token.value);
  let request = SyncRequest {
    client_id,
    account_id,
    range,
  };
  let summary = sync(&graph, &store, &request, Utc::now()).await?;

  println!(
    "client_id={} range={}..{} synced={} skipped={} has_more={}",
    request.client_id, range.since, range.until, summary.synced_count, summary.skipped_count, summary.has_more
  );
  Ok(())
}
