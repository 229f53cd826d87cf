//! Logging initialisation

use crate::config::{LogEncoder, LogsConfig};
use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber from the logging configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_logging(conf: &LogsConfig) -> anyhow::Result<()> {
    let default_level = match conf.level {
        i32::MIN..=0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = match conf.encoder {
        LogEncoder::Console => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init(),
        LogEncoder::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
    };

    result.map_err(|err| anyhow!("failed to initialise logging: {err}"))
}
