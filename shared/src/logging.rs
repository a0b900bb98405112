//! Shared logging utilities for consistent tracing across all processes

use chrono::{DateTime, Utc};
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize tracing subscriber with optional log level override
///
/// Priority: explicit argument > `RUST_LOG` > "info".
pub fn init_tracing_with_level(log_level: Option<&str>) {
    let level_filter = if let Some(level) = log_level {
        level.to_string()
    } else {
        EnvFilter::try_from_default_env()
            .map(|f| f.to_string())
            .unwrap_or_else(|_| "info".to_string())
    };

    fmt()
        .with_env_filter(EnvFilter::new(&level_filter))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Initialize tracing subscriber with defaults
pub fn init_tracing() {
    init_tracing_with_level(None);
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%H:%M:%S%.3f").to_string()
}
