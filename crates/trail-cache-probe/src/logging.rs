//! Logging setup for the probe binary

use tracing_subscriber::prelude::*;

/// Initialize logging, defaulting `RUST_LOG` when it is unset.
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;

    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            std::env::set_var("RUST_LOG", "info,trail_cache_lib=info");
        }
    }

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(fmt_layer).init();

    #[cfg(feature = "profiling")]
    tracing::info!("Logging initialized (profiling scopes emitted as tracing spans)");
    #[cfg(not(feature = "profiling"))]
    tracing::debug!("Logging initialized");
}
