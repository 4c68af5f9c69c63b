//! Logging and optional chrome-trace profiling setup

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Keeps the profiling trace file open; dropping it flushes the trace
pub struct LoggingGuard {
    #[cfg(feature = "profiling")]
    _chrome: tracing_chrome::FlushGuard,
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `default_filter`. With the `profiling` feature a
/// chrome trace (`trace-<timestamp>.json`) is recorded for the whole run as well.
pub fn setup_logging(default_filter: &str) -> LoggingGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);

    #[cfg(feature = "profiling")]
    {
        let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
            .include_args(true)
            .build();
        tracing_subscriber::registry()
            .with(chrome_layer)
            .with(fmt_layer)
            .init();
        tracing::info!("Tracing initialized with chrome profiling layer");
        LoggingGuard { _chrome: guard }
    }

    #[cfg(not(feature = "profiling"))]
    {
        tracing_subscriber::registry().with(fmt_layer).init();
        LoggingGuard {}
    }
}
