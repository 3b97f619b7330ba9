use bytes::Bytes;
use chrono::Utc;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use meta_report::api_support::{authorize, json_response, query_value, respond, HandlerResult};
use meta_report::config::AppConfig;
use meta_report::db::{fetch_user, latest_composed_report, MySqlStore, UserRow};
use meta_report::error::AppError;
use meta_report::logging::init_tracing;
use meta_report::providers::meta_graph::MetaGraphClient;
use meta_report::report::{
  composed_view, extract_business_name, fetch_live_insight, live_snapshot, LiveSnapshot, DEFAULT_CLIENT_NAME,
};
use meta_report::token::{request_sources, resolve_token, TokenError};

/// Live dashboard for a client's connected campaign. Platform failures degrade to the
/// empty snapshot so the dashboard always renders.
async fn live_view(config: &AppConfig, store: &MySqlStore, user: &UserRow) -> Result<LiveSnapshot, AppError> {
  let own_name = Some(user.name.trim()).filter(|n| !n.is_empty());
  let Some(campaign_id) = user.campaign_id.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
    return Ok(live_snapshot(None, own_name.unwrap_or(DEFAULT_CLIENT_NAME)));
  };

  let client_id = user.id.to_string();
  let sources = request_sources(None, Some(&client_id), config);
  let token = match resolve_token(store, &sources, Utc::now()).await {
    Ok(token) => token,
    Err(TokenError::NotFound) => {
      tracing::warn!(user_id = user.id, "no Meta token for live dashboard");
      return Ok(live_snapshot(None, own_name.unwrap_or(DEFAULT_CLIENT_NAME)));
    }
    Err(err) => return Err(err.into()),
  };
  let graph = MetaGraphClient::new(&config.graph_base_url, &token.value);

  let client_name = match own_name {
    Some(name) => name.to_string(),
    None => {
      let campaign_name = graph.fetch_campaign_name(campaign_id).await.unwrap_or_else(|err| {
        tracing::warn!(error = %err, campaign_id, "campaign name lookup failed");
        None
      });
      extract_business_name(campaign_name.as_deref())
    }
  };

  let insight = fetch_live_insight(&graph, campaign_id).await.unwrap_or_else(|err| {
    tracing::warn!(error = %err, campaign_id, "live insight fetch failed");
    None
  });
  Ok(live_snapshot(insight.as_ref(), &client_name))
}

async fn report(method: &Method, headers: &HeaderMap, uri: &hyper::Uri) -> HandlerResult {
  if *method != Method::GET {
    return Err(AppError::MethodNotAllowed);
  }

  let auth = authorize(headers, None).await?;
  let user_id = auth.session.user_id;

  if query_value(uri.query(), "view").as_deref() == Some("live") {
    let user = fetch_user(auth.pool, user_id)
      .await?
      .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
    let store = MySqlStore::new(auth.pool);
    let snapshot = live_view(&auth.config, &store, &user).await?;
    return Ok(json_response(StatusCode::OK, serde_json::json!({"ok": true, "report": snapshot}))?);
  }

  let latest = latest_composed_report(auth.pool, user_id).await?;
  Ok(json_response(
    StatusCode::OK,
    serde_json::json!({"ok": true, "report": composed_view(latest.as_ref())}),
  )?)
}

async fn handle_report(
  method: &Method,
  headers: &HeaderMap,
  uri: &hyper::Uri,
  _body: Bytes,
) -> Result<Response<ResponseBody>, Error> {
  respond(report(method, headers, uri).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let uri = req.uri().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_report(&method, &headers, &uri, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn returns_unauthorized_without_session() {
    let uri: hyper::Uri = "/api/report?view=live".parse().unwrap();
    let response = handle_report(&Method::GET, &HeaderMap::new(), &uri, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn rejects_post() {
    let uri: hyper::Uri = "/api/report".parse().unwrap();
    let response = handle_report(&Method::POST, &HeaderMap::new(), &uri, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
  }
}
