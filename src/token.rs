use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::{AppConfig, ConfigError};
use crate::providers::meta_graph::MetaGraphError;
use crate::providers::meta_oauth::exchange_long_lived_token;
use crate::store::{SettingsStore, StoreError, TokenLogEntry};

pub const META_TOKEN_SETTING_KEY: &str = "meta_access_token";
pub const EXPIRY_WARNING_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredToken {
  pub value: String,
  pub expires_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
  Valid,
  ExpiringSoon,
  ExpiredOrUnknown,
}

#[derive(Debug, Error)]
pub enum TokenError {
  #[error("No Meta access token found")]
  NotFound,
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error(transparent)]
  Graph(#[from] MetaGraphError),
  #[error(transparent)]
  Store(#[from] StoreError),
}

pub fn classify(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> TokenStatus {
  match expires_at {
    None => TokenStatus::Valid,
    Some(exp) if now >= exp => TokenStatus::ExpiredOrUnknown,
    Some(exp) if now > exp - Duration::days(EXPIRY_WARNING_DAYS) => TokenStatus::ExpiringSoon,
    Some(_) => TokenStatus::Valid,
  }
}

fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
  expires_at.is_some_and(|exp| now >= exp)
}

/// Places a token may come from, tried in the order given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
  /// Supplied with the request (`x-meta-token`, `access_token` query or body).
  Override(String),
  /// Per-client connection row.
  Tenant(String),
  /// Shared `meta_access_token` setting, skipped once expired.
  GlobalSetting,
  /// `META_ACCESS_TOKEN` from the environment.
  StaticFallback(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenOrigin {
  Override,
  Tenant,
  GlobalSetting,
  StaticFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedToken {
  pub value: String,
  pub origin: TokenOrigin,
}

/// Standard resolution order for request handlers.
pub fn request_sources(override_token: Option<&str>, client_id: Option<&str>, config: &AppConfig) -> Vec<TokenSource> {
  let mut sources = Vec::with_capacity(4);
  if let Some(token) = override_token.map(str::trim).filter(|t| !t.is_empty()) {
    sources.push(TokenSource::Override(token.to_string()));
  }
  if let Some(client_id) = client_id.map(str::trim).filter(|c| !c.is_empty()) {
    sources.push(TokenSource::Tenant(client_id.to_string()));
  }
  sources.push(TokenSource::GlobalSetting);
  if let Some(token) = config.static_access_token.as_deref() {
    sources.push(TokenSource::StaticFallback(token.to_string()));
  }
  sources
}

fn non_empty(value: &str) -> Option<String> {
  let trimmed = value.trim();
  (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub async fn resolve_token(
  store: &dyn SettingsStore,
  sources: &[TokenSource],
  now: DateTime<Utc>,
) -> Result<ResolvedToken, TokenError> {
  for source in sources {
    let found = match source {
      TokenSource::Override(token) => non_empty(token).map(|v| (v, TokenOrigin::Override)),
      TokenSource::Tenant(client_id) => store
        .tenant_token(client_id)
        .await?
        .and_then(|t| non_empty(&t))
        .map(|v| (v, TokenOrigin::Tenant)),
      TokenSource::GlobalSetting => match store.get_setting(META_TOKEN_SETTING_KEY).await? {
        Some(stored) if is_expired(stored.expires_at, now) => {
          tracing::warn!(expires_at = ?stored.expires_at, "stored Meta token expired; skipping");
          None
        }
        Some(stored) => {
          if classify(stored.expires_at, now) == TokenStatus::ExpiringSoon {
            tracing::warn!(expires_at = ?stored.expires_at, "stored Meta token expires within {EXPIRY_WARNING_DAYS} days");
          }
          non_empty(&stored.value).map(|v| (v, TokenOrigin::GlobalSetting))
        }
        None => None,
      },
      TokenSource::StaticFallback(token) => non_empty(token).map(|v| (v, TokenOrigin::StaticFallback)),
    };

    if let Some((value, origin)) = found {
      return Ok(ResolvedToken { value, origin });
    }
  }

  Err(TokenError::NotFound)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshOutcome {
  pub expires_at: Option<DateTime<Utc>>,
  pub expires_in_days: Option<i64>,
}

/// Exchanges the current token for a long-lived one and stores it.
/// The stored setting wins over `META_ACCESS_TOKEN` as the token to exchange, expired or not.
pub async fn refresh(
  store: &dyn SettingsStore,
  config: &AppConfig,
  now: DateTime<Utc>,
) -> Result<RefreshOutcome, TokenError> {
  let stored = store
    .get_setting(META_TOKEN_SETTING_KEY)
    .await?
    .and_then(|t| non_empty(&t.value));
  let current = stored
    .or_else(|| config.static_access_token.as_deref().and_then(non_empty))
    .ok_or(TokenError::NotFound)?;

  match exchange_and_store(store, config, &current, now).await {
    Ok(outcome) => {
      let entry = TokenLogEntry {
        action: "refresh".to_string(),
        status: "success".to_string(),
        expires_at: outcome.expires_at,
        error_message: None,
        created_at: now,
      };
      // The new token is already stored; a lost log row must not fail the refresh.
      if let Err(log_err) = store.append_token_log(&entry).await {
        tracing::warn!(error = %log_err, "failed to record token refresh success");
      }
      tracing::info!(expires_at = ?outcome.expires_at, "Meta token refreshed");
      Ok(outcome)
    }
    Err(err) => {
      tracing::error!(error = %err, "Meta token refresh failed");
      let entry = TokenLogEntry {
        action: "refresh".to_string(),
        status: "failed".to_string(),
        expires_at: None,
        error_message: Some(err.to_string()),
        created_at: now,
      };
      if let Err(log_err) = store.append_token_log(&entry).await {
        tracing::warn!(error = %log_err, "failed to record token refresh failure");
      }
      Err(err)
    }
  }
}

async fn exchange_and_store(
  store: &dyn SettingsStore,
  config: &AppConfig,
  current: &str,
  now: DateTime<Utc>,
) -> Result<RefreshOutcome, TokenError> {
  let (app_id, app_secret) = config.require_app_credentials()?;
  let exchanged = exchange_long_lived_token(&config.graph_base_url, app_id, app_secret, current).await?;

  let expires_at = exchanged.expires_in_seconds.map(|secs| now + Duration::seconds(secs));
  store
    .put_setting(META_TOKEN_SETTING_KEY, &exchanged.access_token, expires_at)
    .await?;

  Ok(RefreshOutcome {
    expires_at,
    expires_in_days: exchanged.expires_in_seconds.map(|secs| secs / 86_400),
  })
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenStatusReport {
  pub status: TokenStatus,
  pub has_token: bool,
  pub expires_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
  pub days_remaining: Option<i64>,
  pub recent_logs: Vec<TokenLogEntry>,
}

pub async fn status_report(store: &dyn SettingsStore, now: DateTime<Utc>) -> Result<TokenStatusReport, TokenError> {
  let stored = store.get_setting(META_TOKEN_SETTING_KEY).await?;
  let recent_logs = store.recent_token_logs(5).await?;

  let (has_token, expires_at, updated_at) = match stored {
    Some(t) => (!t.value.trim().is_empty(), t.expires_at, t.updated_at),
    None => (false, None, None),
  };

  // A missing expiry means a non-expiring token; a missing token is never valid.
  let status = if has_token {
    classify(expires_at, now)
  } else {
    TokenStatus::ExpiredOrUnknown
  };

  Ok(TokenStatusReport {
    status,
    has_token,
    expires_at,
    updated_at,
    days_remaining: expires_at.map(|exp| (exp - now).num_days()),
    recent_logs,
  })
}
