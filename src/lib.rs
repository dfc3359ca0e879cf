//! Client library for eFTL publish/subscribe messaging.
//!
//! A [`Connection`] multiplexes publishes, content-matched (optionally
//! durable) subscriptions, request/reply exchanges, and server-hosted
//! key/value maps over one long-lived WebSocket, with at-least-once
//! delivery, per-subscription deduplication, and automatic reconnection
//! with subscription and publish replay.
//!
//! ```no_run
//! use eftl::{ConnectOptions, Connection, Message};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> eftl::Result<()> {
//! let conn = Connection::connect("ws://localhost:9191/channel", ConnectOptions::default()).await?;
//!
//! let (tx, mut rx) = mpsc::channel(64);
//! let sub = conn.subscribe("{\"type\":\"hello\"}", "", tx).await?;
//!
//! conn.publish(Message::new().with("type", "hello").with("text", "hello")).await?;
//! if let Some(msg) = rx.recv().await {
//!     println!("received {msg}");
//! }
//!
//! conn.unsubscribe(&sub).await?;
//! conn.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod kvmap;
pub mod message;
pub mod protocol;
pub mod tls;

pub use config::{
    AcknowledgeMode, ConnectOptions, ConnectionState, DEFAULT_HANDSHAKE_TIMEOUT,
    DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_MAX_DELAY, DEFAULT_TIMEOUT, DurableType,
    StateChangeHandler, SubscriptionOptions,
};
pub use connection::{Completion, CompletionSink, Connection, Subscription, SubscriptionSink};
pub use error::{EftlError, Result};
pub use kvmap::KvMap;
pub use message::{FIELD_NAME_DESTINATION, Field, Message};
