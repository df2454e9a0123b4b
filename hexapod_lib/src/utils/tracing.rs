//! Centralized tracing initialization for the platform binaries.

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;

/// Initialize tracing with a thread-local subscriber.
///
/// Respects the `RUST_LOG` environment variable (defaults to "info") and
/// outputs compact logs without file/line metadata.
///
/// # Returns
/// A `DefaultGuard` that keeps the subscriber active. The guard must be kept
/// in scope for the duration of the program.
pub fn init_tracing() -> DefaultGuard {
    use tracing_subscriber::layer::SubscriberExt;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    let subscriber = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(fmt_layer);

    tracing::subscriber::set_default(subscriber)
}
