//! Error types for the gateway client.

use thiserror::Error;

/// Errors that can occur while bootstrapping or running a gateway session.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The credential exchange returned no token (invalid credentials).
    #[error("token not found in login response, login information wrong?")]
    Auth,

    /// The endpoint lookup returned no gateway URL.
    #[error("gateway url not found in discovery response")]
    Discovery,

    /// `connect` was called before a token was obtained.
    ///
    /// This is a programming error: bootstrap must succeed before connecting.
    #[error("not logged in: connect requires a session token")]
    NotAuthenticated,

    /// `run` was called before a successful `connect`.
    #[error("not connected to the gateway")]
    NotConnected,

    /// Dialing the gateway or sending the handshake failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was already closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The HTTP client failed before a response was received.
    #[cfg(feature = "rest-http")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// An outbound REST action was answered with a non-success status.
    #[error("api error {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for gateway client operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            GatewayError::Connection("dial wss://x: refused".into()).to_string(),
            "connection error: dial wss://x: refused"
        );
        assert_eq!(
            GatewayError::Api {
                status: 403,
                body: "Missing Permissions".into()
            }
            .to_string(),
            "api error 403: Missing Permissions"
        );
        assert_eq!(
            GatewayError::NotAuthenticated.to_string(),
            "not logged in: connect requires a session token"
        );
    }

    #[test]
    fn serde_errors_convert() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: GatewayError = err.into();
        assert!(matches!(err, GatewayError::Serialization(_)));
    }

    #[test]
    fn io_errors_convert() {
        let err: GatewayError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(matches!(err, GatewayError::Io(ref e) if e.kind() == std::io::ErrorKind::ConnectionRefused));
    }
}
