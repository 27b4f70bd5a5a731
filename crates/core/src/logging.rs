//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default directives used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str =
    "info,raytracer=debug,raytracer_renderer=debug,raytracer_rhi=info,raytracer_scene=info";

/// Initialize the logging system with tracing.
///
/// Filtering follows `RUST_LOG` when it is set, otherwise [`DEFAULT_FILTER`].
///
/// # Example
/// ```
/// raytracer_core::init_logging();
/// tracing::info!("Raytracer starting");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
