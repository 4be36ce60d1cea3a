//! Logging setup and span constructors shared by every saga component.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem. Logs go to stderr so stdout stays free
/// for command output.
///
/// Safe to call multiple times; subsequent calls are no-ops. `RUST_LOG`
/// controls levels (default `info`).
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stderr))
                    .init();
            }
        }
    });
}

/// Span for one saga operation on one collection.
#[must_use]
pub fn collection_span(operation: &str, collection_id: &str) -> Span {
    tracing::info_span!("collection", op = operation, collection_id = collection_id)
}

/// Span for one message handled by a queue worker.
#[must_use]
pub fn delivery_span(queue: &str, message_id: &str, attempt: u32) -> Span {
    tracing::info_span!("delivery", queue = queue, message_id = message_id, attempt = attempt)
}
