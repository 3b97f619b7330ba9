use std::sync::OnceLock;
use std::time::Duration;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
static NO_PROXY_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

const USER_AGENT: &str = "meta-report";

fn build_http_client(no_proxy: bool) -> Result<reqwest::Client, reqwest::Error> {
  let mut builder = reqwest::Client::builder()
    // Keep requests bounded in serverless and avoid hanging local dev sessions.
    .connect_timeout(Duration::from_secs(10))
    .timeout(Duration::from_secs(45))
    // reqwest respects HTTP_PROXY / HTTPS_PROXY / NO_PROXY unless told otherwise.
    .user_agent(USER_AGENT);

  if no_proxy {
    builder = builder.no_proxy();
  }

  builder.build()
}

fn is_loopback_url(url: &str) -> bool {
  let host = reqwest::Url::parse(url)
    .ok()
    .and_then(|u| u.host_str().map(|h| h.to_string()))
    .unwrap_or_default();

  matches!(host.as_str(), "127.0.0.1" | "localhost" | "::1" | "[::1]")
}

pub fn http_client_for_url(url: &str) -> Result<&'static reqwest::Client, reqwest::Error> {
  let is_loopback = is_loopback_url(url);

  let lock = if is_loopback {
    &NO_PROXY_CLIENT
  } else {
    &SHARED_CLIENT
  };

  if let Some(client) = lock.get() {
    return Ok(client);
  }

  let client = build_http_client(is_loopback)?;
  // A concurrent initializer may have won the race; either client is equivalent.
  Ok(lock.get_or_init(|| client))
}

/// One-off client for diagnostic calls that must give up quickly.
pub fn probe_client_for_url(url: &str, timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
  let mut builder = reqwest::Client::builder()
    .connect_timeout(timeout)
    .timeout(timeout)
    .user_agent(USER_AGENT);

  if is_loopback_url(url) {
    builder = builder.no_proxy();
  }

  builder.build()
}
