use hyper::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::ConfigError;
use crate::providers::meta_graph::MetaGraphError;
use crate::store::StoreError;
use crate::sync::SyncError;
use crate::token::TokenError;

/// Handler-facing error. Each variant maps to one status and one stable `error` code.
#[derive(Debug, Error)]
pub enum AppError {
  #[error("{0}")]
  MetaApi(String),
  #[error("upstream unavailable: {0}")]
  Upstream(String),
  #[error("unauthorized")]
  Unauthorized,
  #[error("forbidden")]
  Forbidden,
  #[error("{0}")]
  BadRequest(String),
  #[error("{0}")]
  NotFound(String),
  #[error("method not allowed")]
  MethodNotAllowed,
  #[error("{0}")]
  NotConfigured(String),
  #[error("server error: {0}")]
  Server(String),
}

impl AppError {
  pub fn bad_request(message: impl Into<String>) -> Self {
    AppError::BadRequest(message.into())
  }

  pub fn status(&self) -> StatusCode {
    match self {
      AppError::MetaApi(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
      AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
      AppError::Unauthorized => StatusCode::UNAUTHORIZED,
      AppError::Forbidden => StatusCode::FORBIDDEN,
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
      AppError::NotConfigured(_) => StatusCode::NOT_IMPLEMENTED,
      AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  pub fn code(&self) -> &'static str {
    match self {
      AppError::MetaApi(_) => "meta_api_error",
      AppError::Upstream(_) => "upstream_unavailable",
      AppError::Unauthorized => "unauthorized",
      AppError::Forbidden => "forbidden",
      AppError::BadRequest(_) => "bad_request",
      AppError::NotFound(_) => "not_found",
      AppError::MethodNotAllowed => "method_not_allowed",
      AppError::NotConfigured(_) => "not_configured",
      AppError::Server(_) => "server_error",
    }
  }

  /// Upstream and server details stay in the logs.
  pub fn body(&self) -> Value {
    match self {
      AppError::MetaApi(message)
      | AppError::BadRequest(message)
      | AppError::NotFound(message)
      | AppError::NotConfigured(message) => {
        json!({"ok": false, "error": self.code(), "message": message})
      }
      _ => json!({"ok": false, "error": self.code()}),
    }
  }
}

impl From<MetaGraphError> for AppError {
  fn from(err: MetaGraphError) -> Self {
    match err {
      MetaGraphError::Api { message, .. } => AppError::MetaApi(message),
      MetaGraphError::Transport(detail) | MetaGraphError::InvalidResponse(detail) => AppError::Upstream(detail),
    }
  }
}

impl From<StoreError> for AppError {
  fn from(err: StoreError) -> Self {
    AppError::Server(err.to_string())
  }
}

impl From<sqlx::Error> for AppError {
  fn from(err: sqlx::Error) -> Self {
    AppError::Server(err.to_string())
  }
}

impl From<ConfigError> for AppError {
  fn from(err: ConfigError) -> Self {
    AppError::NotConfigured(err.to_string())
  }
}

impl From<TokenError> for AppError {
  fn from(err: TokenError) -> Self {
    match err {
      TokenError::NotFound => AppError::NotConfigured("No Meta access token available".to_string()),
      TokenError::Config(e) => e.into(),
      TokenError::Graph(e) => e.into(),
      TokenError::Store(e) => e.into(),
    }
  }
}

impl From<SyncError> for AppError {
  fn from(err: SyncError) -> Self {
    match err {
      SyncError::InvalidRequest(message) => AppError::BadRequest(message.to_string()),
      SyncError::Graph(e) => e.into(),
      SyncError::Store(e) => e.into(),
    }
  }
}

impl From<bcrypt::BcryptError> for AppError {
  fn from(err: bcrypt::BcryptError) -> Self {
    AppError::Server(err.to_string())
  }
}

impl From<csv::Error> for AppError {
  fn from(err: csv::Error) -> Self {
    AppError::Server(err.to_string())
  }
}

impl From<vercel_runtime::Error> for AppError {
  fn from(err: vercel_runtime::Error) -> Self {
    AppError::Server(err.to_string())
  }
}
