//! Observability infrastructure for Riata.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors used across all
//! coordinator components.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

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

/// Initializes the logging subsystem.
///
/// Call once at process startup. Safe to call multiple times; subsequent
/// calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `riata_saga=debug`)
///
/// # Example
///
/// ```rust
/// use riata_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for saga operations with standard fields.
///
/// # Example
///
/// ```rust
/// use riata_core::observability::saga_span;
///
/// let span = saga_span("handle_event", "global-1", "order-service");
/// let _guard = span.enter();
/// // ... admit or reject the event
/// ```
#[must_use]
pub fn saga_span(operation: &str, global_tx_id: &str, service_name: &str) -> Span {
    tracing::info_span!(
        "saga",
        op = operation,
        global_tx_id = global_tx_id,
        service_name = service_name,
    )
}

/// Creates a span for one reconciliation step.
#[must_use]
pub fn scanner_span(step: &str) -> Span {
    tracing::info_span!("scanner", step = step)
}
