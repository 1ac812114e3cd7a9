use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Initialize tracing
///
/// `LOG_FORMAT=json` switches to structured output for log collectors.
pub async fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Decide on layers
    let reg = Registry::default().with(env_filter);
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => reg.with(tracing_subscriber::fmt::layer().json()).init(),
        _ => reg.with(tracing_subscriber::fmt::layer().compact()).init(),
    }
}
