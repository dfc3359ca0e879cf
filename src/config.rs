//! Connection and subscription configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::EftlError;

/// Default bound for synchronous operations, including the login reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default upper bound on the WebSocket upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of automatic reconnect attempts.
pub const DEFAULT_RECONNECT_ATTEMPTS: i64 = 256;

/// Default clamp on the reconnect backoff delay.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// State of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial and terminal state.
    Disconnected,
    /// First-time login in progress.
    Connecting,
    /// Login succeeded.
    Connected,
    /// Orderly shutdown requested.
    Disconnecting,
    /// Transport lost, backoff in progress.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Observer invoked synchronously on every connection state transition.
pub type StateChangeHandler = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// Options available to configure a connection.
///
/// `ConnectOptions::default()` fills in the documented default values;
/// override the fields you need:
///
/// ```
/// use eftl::ConnectOptions;
///
/// let opts = ConnectOptions {
///     username: Some("user".into()),
///     password: Some("secret".into()),
///     ..ConnectOptions::default()
/// };
/// ```
pub struct ConnectOptions {
    /// Username for authenticating with the server, if not specified in
    /// the URL.
    pub username: Option<String>,

    /// Password for authenticating with the server, if not specified in
    /// the URL.
    pub password: Option<String>,

    /// Optional client identifier, if not specified in the URL's
    /// `clientId` query parameter. The server generates one otherwise.
    pub client_id: Option<String>,

    /// TLS configuration used for `wss://` URLs. When absent the
    /// platform root store bundled with the WebSocket stack is used.
    pub tls_config: Option<Arc<rustls::ClientConfig>>,

    /// Bound for synchronous operations with the server, including the
    /// wait for the login reply.
    pub timeout: Duration,

    /// Bound for the WebSocket handshake with the server.
    pub handshake_timeout: Duration,

    /// Number of times the client attempts to automatically reconnect
    /// following a loss of connection.
    pub auto_reconnect_attempts: i64,

    /// Maximum delay between reconnect attempts. Attempts back off
    /// exponentially up to this value.
    pub auto_reconnect_max_delay: Duration,

    /// Maximum number of unacknowledged messages allowed for the client.
    /// Zero leaves the server's configured value in effect.
    pub max_pending_acks: i32,

    /// Observer invoked synchronously on every state transition.
    pub on_state_change: Option<StateChangeHandler>,

    /// Sink for asynchronous connection-wide errors once the connection
    /// has been established.
    pub error_sink: Option<mpsc::UnboundedSender<EftlError>>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            client_id: None,
            tls_config: None,
            timeout: DEFAULT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            auto_reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            auto_reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            max_pending_acks: 0,
            on_state_change: None,
            error_sink: None,
        }
    }
}

/// Message acknowledgement mode of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcknowledgeMode {
    /// The library acknowledges each message after it has been accepted
    /// by the delivery sink. The default.
    Auto,
    /// The caller acknowledges explicitly via
    /// [`Connection::acknowledge`](crate::Connection::acknowledge) or
    /// [`Connection::acknowledge_all`](crate::Connection::acknowledge_all).
    /// The server stops delivering once its unacknowledged quota fills.
    Client,
    /// No acknowledgements.
    None,
}

impl AcknowledgeMode {
    /// Wire name of the mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AcknowledgeMode::Auto => "auto",
            AcknowledgeMode::Client => "client",
            AcknowledgeMode::None => "none",
        }
    }
}

/// Durable subscription type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurableType {
    /// Load-balanced across clients subscribing with the same name.
    Shared,
    /// Retains only the latest message per key field.
    LastValue,
}

impl DurableType {
    /// Wire name of the durable type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DurableType::Shared => "shared",
            DurableType::LastValue => "last-value",
        }
    }
}

/// Options available to configure a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// Acknowledgement mode; unset is treated as auto.
    pub acknowledge_mode: Option<AcknowledgeMode>,

    /// Optional durable subscription type.
    pub durable_type: Option<DurableType>,

    /// Key field for last-value durable subscriptions.
    pub durable_key: Option<String>,
}

impl SubscriptionOptions {
    pub(crate) fn auto_ack(&self) -> bool {
        matches!(self.acknowledge_mode, None | Some(AcknowledgeMode::Auto))
    }
}
