use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `LOG_FORMAT=pretty` switches from JSON lines to human-readable output.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match std::env::var(LOG_FORMAT_ENV).as_deref() {
        Ok("pretty") => registry.with(fmt::layer().pretty()).init(),
        _ => registry.with(fmt::layer().json()).init(),
    }
}
