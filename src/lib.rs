pub mod config;
pub mod db;
pub mod engine;
pub mod models;

use tracing_subscriber::EnvFilter;

pub use config::EngineConfig;
pub use engine::{CareEngine, EngineError};

/// Install the global fmt subscriber. `RUST_LOG` wins over the built-in
/// filter. Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
}
