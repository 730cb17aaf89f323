//! Tracing subscriber setup for binaries embedding ragstore.

use tracing_subscriber::EnvFilter;

use crate::error::StoreError;

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(level: &str) -> Result<(), StoreError> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| StoreError::Config(format!("failed to set tracing subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        assert!(init_tracing("debug").is_ok());
        tracing::info!(component = "telemetry", "subscriber installed");

        let err = init_tracing("info").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
