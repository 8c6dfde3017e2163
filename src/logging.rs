//! Logging initialization
//!
//! One-call tracing setup for hosts that do not install their own
//! subscriber. `RUST_LOG` always wins over the configured filter.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global tracing subscriber.
///
/// `filter` is a tracing directive string (e.g. `"info"` or
/// `"btclite=debug"`) used when `RUST_LOG` is unset. Calling this more
/// than once is harmless; later calls are no-ops.
pub fn init(filter: Option<&str>) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter.unwrap_or("info"))
    };

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(env_filter)
        .try_init();
}
