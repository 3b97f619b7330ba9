use thiserror::Error;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com/v18.0";
pub const DEFAULT_VALUE_PER_CONVERSION: f64 = 50_000.0;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("Missing {0}")]
  Missing(&'static str),
  #[error("Invalid {name}: {reason}")]
  Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub database_url: Option<String>,
  pub graph_base_url: String,
  pub meta_app_id: Option<String>,
  pub meta_app_secret: Option<String>,
  /// `META_ACCESS_TOKEN`, the last resort when nothing is stored.
  pub static_access_token: Option<String>,
  pub cron_secret: Option<String>,
  pub value_per_conversion: f64,
  pub secure_cookies: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl AppConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let database_url = non_empty(lookup("TIDB_DATABASE_URL")).or_else(|| non_empty(lookup("DATABASE_URL")));
    if let Some(url) = database_url.as_deref() {
      if !url.contains("://") {
        return Err(ConfigError::Invalid {
          name: "DATABASE_URL",
          reason: "expected URL scheme like mysql://...".to_string(),
        });
      }
    }

    let graph_base_url = non_empty(lookup("META_GRAPH_BASE_URL"))
      .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string())
      .trim_end_matches('/')
      .to_string();

    let value_per_conversion = match non_empty(lookup("ASSUMED_VALUE_PER_CONVERSION")) {
      None => DEFAULT_VALUE_PER_CONVERSION,
      Some(raw) => match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => v,
        _ => {
          return Err(ConfigError::Invalid {
            name: "ASSUMED_VALUE_PER_CONVERSION",
            reason: format!("not a non-negative number: {raw}"),
          })
        }
      },
    };

    let secure_cookies = !matches!(
      non_empty(lookup("SESSION_COOKIE_INSECURE")).as_deref(),
      Some("1") | Some("true") | Some("yes")
    );

    Ok(Self {
      database_url,
      graph_base_url,
      meta_app_id: non_empty(lookup("META_APP_ID")),
      meta_app_secret: non_empty(lookup("META_APP_SECRET")),
      static_access_token: non_empty(lookup("META_ACCESS_TOKEN")),
      cron_secret: non_empty(lookup("CRON_SECRET")),
      value_per_conversion,
      secure_cookies,
    })
  }

  pub fn require_database_url(&self) -> Result<&str, ConfigError> {
    self
      .database_url
      .as_deref()
      .ok_or(ConfigError::Missing("TIDB_DATABASE_URL (or DATABASE_URL)"))
  }

  pub fn require_app_credentials(&self) -> Result<(&str, &str), ConfigError> {
    let app_id = self.meta_app_id.as_deref().ok_or(ConfigError::Missing("META_APP_ID"))?;
    let app_secret = self
      .meta_app_secret
      .as_deref()
      .ok_or(ConfigError::Missing("META_APP_SECRET"))?;
    Ok((app_id, app_secret))
  }
}
