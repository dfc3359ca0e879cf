//! Crate-level error types.
//!
//! [`EftlError`] unifies every error source (transport, protocol, server)
//! behind a single enum so callers can match on the variant they care
//! about while still using the `?` operator for easy propagation.
//!
//! The enum is `Clone`: when a connection is lost, the same error is
//! fanned out to every pending completion sink. Wrapped source errors are
//! therefore held in an [`Arc`].

use std::sync::Arc;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EftlError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EftlError {
    /// A synchronous operation did not complete within the configured
    /// timeout. The in-flight request is not cancelled; the server may
    /// still complete it.
    #[error("operation timed out")]
    Timeout,

    /// The operation requires an attached session.
    #[error("not connected")]
    NotConnected,

    /// The server did not answer a login with a welcome.
    #[error("received invalid response from server")]
    InvalidResponse,

    /// Server closed the connection with "going away" (1001).
    #[error("server going away")]
    GoingAway,

    /// Server closed the connection with "message too big" (1009).
    #[error("message too big")]
    MessageTooBig,

    /// Server closed the connection for a restart (1012). The only
    /// close-initiated error that permits reconnection.
    #[error("server restart")]
    Restart,

    /// Server forcibly closed the connection (4000).
    #[error("server has forcibly closed the connection")]
    ForceClose,

    /// Server rejected the client's credentials (4002).
    #[error("not authenticated")]
    NotAuthenticated,

    /// The server disallowed the operation.
    #[error("not authorized for the operation")]
    NotAuthorized,

    /// The WebSocket upgrade was refused.
    #[error("bad handshake")]
    BadHandshake,

    /// The server returned HTTP 404 during the WebSocket upgrade.
    #[error("not found")]
    NotFound,

    /// A reply was attempted on a message that is not a request.
    #[error("not a request message")]
    NotRequest,

    /// The operation requires a protocol version the server did not
    /// negotiate.
    #[error("not supported with this server")]
    NotSupported,

    /// An unclassified server-signalled error.
    #[error("{code}: {reason}")]
    Server { code: i64, reason: String },

    /// A WebSocket operation (connect, send, receive) failed.
    #[error("websocket error: {0}")]
    WebSocket(Arc<tungstenite::Error>),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(Arc<serde_json::Error>),

    /// A connection URL could not be parsed.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// TLS configuration material could not be parsed.
    #[error("tls error: {0}")]
    Tls(String),
}

impl From<tungstenite::Error> for EftlError {
    fn from(err: tungstenite::Error) -> Self {
        EftlError::WebSocket(Arc::new(err))
    }
}

impl From<serde_json::Error> for EftlError {
    fn from(err: serde_json::Error) -> Self {
        EftlError::Json(Arc::new(err))
    }
}

impl EftlError {
    /// Whether a dispatch-loop failure with this error may be followed by
    /// an automatic reconnect. Of the close-initiated errors only a server
    /// restart qualifies; transport-level failures always do.
    pub(crate) fn allows_reconnect(&self) -> bool {
        !matches!(
            self,
            EftlError::GoingAway
                | EftlError::MessageTooBig
                | EftlError::ForceClose
                | EftlError::NotAuthenticated
        )
    }
}
