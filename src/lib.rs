use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt, prelude::*};

pub mod config;
pub mod errors;
pub mod setlist;
pub mod util;

pub use config::LauncherConfig;
pub use errors::{ErrorCategory, ErrorInfo, Result};

/// Installs the global subscriber. `RUST_LOG` wins over `default_level`.
///
/// Calling it twice is harmless; the second subscriber is ignored.
pub fn init_tracing(default_level: tracing::Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(default_level).into())
        .from_env_lossy();

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_level(true),
        )
        .try_init();

    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}
