//! Shared tracing/logging initialization.
//!
//! The server binary installs this subscriber:
//! an env-filter plus either human-readable or JSON output.

use tracing_subscriber::fmt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

/// Install the global tracing subscriber.
///
/// * `default_filter` -- filter used when `RUST_LOG` is unset or unparsable
///   (e.g. `"brokerdesk_server=info"`).
/// * `log_json` -- emit one JSON object per event, carrying the current span,
///   instead of the human-readable format.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(default_filter: &str, log_json: bool) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if log_json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    installed.map_err(|e| Error::Config(format!("tracing subscriber: {e}")))
}
