use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use meta_report::api_support::{json_response_with_cookie, load_config, require_pool, respond, session_id, HandlerResult};
use meta_report::auth::clear_session_cookie;
use meta_report::db::delete_session;
use meta_report::error::AppError;
use meta_report::logging::init_tracing;

async fn logout(method: &Method, headers: &HeaderMap) -> HandlerResult {
  if *method != Method::POST {
    return Err(AppError::MethodNotAllowed);
  }

  let config = load_config()?;
  if let Some(id) = session_id(headers) {
    let pool = require_pool(&config).await?;
    delete_session(pool, &id).await?;
    tracing::info!("session ended");
  }

  Ok(json_response_with_cookie(
    StatusCode::OK,
    serde_json::json!({"ok": true}),
    &clear_session_cookie(config.secure_cookies),
  )?)
}

async fn handle_logout(
  method: &Method,
  headers: &HeaderMap,
  _uri: &hyper::Uri,
  _body: Bytes,
) -> Result<Response<ResponseBody>, Error> {
  respond(logout(method, headers).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let uri = req.uri().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_logout(&method, &headers, &uri, bytes).await
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
  async fn clears_cookie_without_a_session() {
    let uri: hyper::Uri = "/api/logout".parse().unwrap();
    let response = handle_logout(&Method::POST, &HeaderMap::new(), &uri, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response.headers().get("set-cookie").unwrap().to_str().unwrap();
    assert!(cookie.starts_with("session=;"));
    assert!(cookie.contains("Max-Age=0"));
  }

  #[tokio::test]
  async fn rejects_get() {
    let uri: hyper::Uri = "/api/logout".parse().unwrap();
    let response = handle_logout(&Method::GET, &HeaderMap::new(), &uri, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
  }
}
