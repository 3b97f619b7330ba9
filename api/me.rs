use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use meta_report::api_support::{authorize, json_response, respond, HandlerResult};
use meta_report::db::fetch_user;
use meta_report::error::AppError;
use meta_report::logging::init_tracing;

async fn me(method: &Method, headers: &HeaderMap) -> HandlerResult {
  if *method != Method::GET {
    return Err(AppError::MethodNotAllowed);
  }
  let auth = authorize(headers, None).await?;
  let session = auth.session;

  // A deleted account invalidates any session still pointing at it.
  let user = fetch_user(auth.pool, session.user_id).await?.ok_or(AppError::Unauthorized)?;

  Ok(json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "user": {
        "user_id": user.id,
        "username": user.username,
        "name": user.name,
        "role": session.role,
        "meta_account_id": user.meta_account_id,
        "company": user.company,
        "plan": user.plan,
        "status": user.status,
      }
    }),
  )?)
}

async fn handle_me(
  method: &Method,
  headers: &HeaderMap,
  _uri: &hyper::Uri,
  _body: Bytes,
) -> Result<Response<ResponseBody>, Error> {
  respond(me(method, headers).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let uri = req.uri().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_me(&method, &headers, &uri, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  run(service_fn(handler)).await
}
