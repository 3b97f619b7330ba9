use tracing_subscriber::EnvFilter;

/// Installs the global subscriber once per cold start. JSON lines on Vercel,
/// human-readable output everywhere else. `RUST_LOG` overrides the default level.
pub fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let deployed = std::env::var("VERCEL_ENV").map(|v| !v.is_empty()).unwrap_or(false);

  let result = if deployed {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .json()
      .with_current_span(false)
      .with_target(true)
      .try_init()
  } else {
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init()
  };

  // Tests and warm invocations may already have a subscriber installed.
  let _ = result;
}
