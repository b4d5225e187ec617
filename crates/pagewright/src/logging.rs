//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::result::{ProbeError, ProbeResult};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "pagewright=info";

/// Install a global `tracing` subscriber.
///
/// Honors `RUST_LOG`; falls back to [`DEFAULT_FILTER`]. With `json` set,
/// every step event is written as one JSON object per line. Fails if a
/// subscriber is already installed.
pub fn init_tracing(json: bool) -> ProbeResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ProbeError::Config {
        message: format!("tracing subscriber: {e}"),
    })
}
