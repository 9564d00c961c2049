//! Logging setup.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber: JSON lines, filtered by `RUST_LOG` when
/// set and by `log_level` otherwise.
///
/// Fails if a global subscriber is already installed.
pub fn init(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("invalid log level '{log_level}'"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .context("tracing subscriber already installed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_installs_once() {
        init("debug").unwrap();
        tracing::info!(target: "dirsam", "subscriber installed");
        assert!(init("debug").is_err());
    }
}
