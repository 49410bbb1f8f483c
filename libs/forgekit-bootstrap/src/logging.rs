use crate::config::LoggingConfig;
use std::path::Path;
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

// Keep guards for non-blocking writers alive for the process lifetime.
static FILE_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

fn level_filter(level: &str) -> Option<EnvFilter> {
    match level.to_ascii_lowercase().as_str() {
        "off" | "none" => None,
        l @ ("trace" | "debug" | "info" | "warn" | "error") => Some(EnvFilter::new(l)),
        _ => Some(EnvFilter::new("info")),
    }
}

/// Initialize console + optional rolling file logging.
///
/// `RUST_LOG` takes precedence over the configured console level so ad-hoc
/// debugging does not require a config edit. Safe to call once per process;
/// later calls are ignored (important for test binaries).
pub fn init_logging(cfg: &LoggingConfig, home_dir: &Path) {
    let console_filter = std::env::var("RUST_LOG")
        .ok()
        .map(EnvFilter::new)
        .or_else(|| level_filter(&cfg.console_level));

    let console_layer = console_filter.map(|filter| {
        fmt::layer()
            .with_target(true)
            .with_filter(filter)
    });

    let file_layer = cfg.file.as_deref().and_then(|file_name| {
        let filter = level_filter(&cfg.file_level)?;
        let appender = tracing_appender::rolling::daily(home_dir.join("logs"), file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter),
        )
    });

    let result = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if result.is_err() {
        tracing::debug!("logging already initialized; keeping existing subscriber");
    }
}
