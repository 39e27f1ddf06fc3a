//! Error handling for the discovery engine
//!
//! Probes never surface errors to the scan caller; a failed probe is simply
//! "no signal". The error type below covers the operations that can legitimately
//! fail: configuration loading, target parsing and persisted-store access.

use thiserror::Error;

/// Main error type for discovery operations
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Command error: {0}")]
    CommandError(String),

    #[error("Timeout error")]
    TimeoutError,

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl DiscoveryError {
    /// Whether a retry of the same operation could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DiscoveryError::TimeoutError | DiscoveryError::CommandError(_) | DiscoveryError::IoError(_)
        )
    }
}

impl From<std::net::AddrParseError> for DiscoveryError {
    fn from(e: std::net::AddrParseError) -> Self {
        DiscoveryError::InvalidTarget(e.to_string())
    }
}

impl From<ipnetwork::IpNetworkError> for DiscoveryError {
    fn from(e: ipnetwork::IpNetworkError) -> Self {
        DiscoveryError::InvalidTarget(e.to_string())
    }
}

impl From<toml::de::Error> for DiscoveryError {
    fn from(e: toml::de::Error) -> Self {
        DiscoveryError::ConfigError(format!("Failed to parse TOML: {}", e))
    }
}

impl From<tokio::time::error::Elapsed> for DiscoveryError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DiscoveryError::TimeoutError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_parse_maps_to_invalid_target() {
        let err: DiscoveryError = "10.0.0.300".parse::<std::net::Ipv4Addr>().unwrap_err().into();
        assert!(matches!(err, DiscoveryError::InvalidTarget(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_elapsed_maps_to_timeout() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            tokio::time::sleep(std::time::Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

        let err: DiscoveryError = elapsed.into();
        assert!(matches!(err, DiscoveryError::TimeoutError));
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Timeout error");
    }

    #[test]
    fn test_toml_error_is_config_error() {
        let err: DiscoveryError = toml::from_str::<toml::Value>("chunk_size = = 3").unwrap_err().into();
        assert!(matches!(err, DiscoveryError::ConfigError(_)));
    }
}
