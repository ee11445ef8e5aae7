//! Bus error types.

use thiserror::Error;

/// Errors from connecting to, publishing on, or subscribing to the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Socket-level failure.
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server sent something the client could not understand, or an
    /// error reply.
    #[error("bus protocol error: {0}")]
    Protocol(String),

    /// Authentication was rejected or required.
    #[error("bus authentication failed: {0}")]
    Auth(String),

    /// The configured bus URL could not be parsed.
    #[error("invalid bus url '{url}': {reason}")]
    InvalidUrl {
        /// The rejected URL (password redacted).
        url: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The connection closed.
    #[error("bus connection closed")]
    Closed,
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(BusError::Closed.to_string(), "bus connection closed");
        let err = BusError::InvalidUrl {
            url: "ftp://x".into(),
            reason: "unsupported scheme",
        };
        assert_eq!(err.to_string(), "invalid bus url 'ftp://x': unsupported scheme");
    }

    #[test]
    fn io_converts() {
        let err: BusError = std::io::Error::other("boom").into();
        assert!(err.to_string().contains("boom"));
    }
}
