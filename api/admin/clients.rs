use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use meta_report::api_support::{authorize, json_response, respond, HandlerResult};
use meta_report::auth::Role;
use meta_report::db::list_clients;
use meta_report::error::AppError;
use meta_report::logging::init_tracing;

async fn clients(method: &Method, headers: &HeaderMap) -> HandlerResult {
  if *method != Method::GET {
    return Err(AppError::MethodNotAllowed);
  }

  let auth = authorize(headers, Some(Role::Admin)).await?;
  let clients = list_clients(auth.pool).await?;

  Ok(json_response(
    StatusCode::OK,
    serde_json::json!({"ok": true, "clients": clients}),
  )?)
}

async fn handle_clients(
  method: &Method,
  headers: &HeaderMap,
  _uri: &hyper::Uri,
  _body: Bytes,
) -> Result<Response<ResponseBody>, Error> {
  respond(clients(method, headers).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let uri = req.uri().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_clients(&method, &headers, &uri, bytes).await
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
  async fn role_cookie_alone_is_not_enough() {
    let uri: hyper::Uri = "/api/admin/clients".parse().unwrap();
    let mut headers = HeaderMap::new();
    headers.insert("cookie", "user_role=admin".parse().unwrap());

    let response = handle_clients(&Method::GET, &headers, &uri, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }
}
