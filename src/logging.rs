use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber. `log_level` (CLI flag or
/// `LOG_LEVEL` env var) seeds the filter when set; otherwise the standard
/// `RUST_LOG`-style default from the environment is used. `log_format`
/// selects between human-readable and newline-delimited JSON output, the
/// latter useful when the exporter runs under something that scrapes logs.
pub fn init(log_level: Option<&str>, log_format: &str) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match log_format {
        "json" => subscriber.json().init(),
        _ => subscriber.init(),
    }
}
