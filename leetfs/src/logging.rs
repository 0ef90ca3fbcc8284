//! tracing subscriber setup.

use tracing_subscriber::EnvFilter;

pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// `RUST_LOG` when set, `level` otherwise.
pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the global fmt subscriber. Fails if one is already installed.
pub fn init(level: &str) -> Result<(), InitError> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .try_init()
}
