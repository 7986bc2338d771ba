use tracing_subscriber::{EnvFilter, fmt};

use crate::app::AppError;

// Server and HTTP client internals are noisy at info.
const DEFAULT_DIRECTIVES: &str = "info,actix_server=warn,reqwest=warn";

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init() -> Result<(), AppError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .map_err(AppError::logging_init)
}
