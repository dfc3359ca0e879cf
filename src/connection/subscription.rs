//! Subscription operations and the subscription registry.
//!
//! Subscriptions are assigned client-local identifiers from a counter
//! independent of the request sequence. Registry entries survive
//! reconnects and are replayed after each welcome; the subscribe outcome
//! arrives asynchronously on the subscription's notice sink.

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::SubscriptionOptions;
use crate::connection::{Connection, is_connected, send_frame};
use crate::error::{EftlError, Result};
use crate::message::Message;
use crate::protocol::op;

/// Sink receiving subscription outcome notices.
pub type SubscriptionSink = mpsc::Sender<Subscription>;

/// Registry entry for one subscription.
pub(crate) struct SubscriptionEntry {
    pub(crate) matcher: String,
    pub(crate) durable: String,
    pub(crate) options: SubscriptionOptions,
    pub(crate) message_sink: mpsc::Sender<Message>,
    /// Highest server sequence delivered to the sink; used for
    /// deduplication of at-least-once redeliveries.
    pub(crate) last_seq_num: i64,
    /// True until the server confirms the (re-)subscribe.
    pub(crate) pending: bool,
    pub(crate) notice_sink: Option<SubscriptionSink>,
    pub(crate) error: Option<EftlError>,
}

/// A registered interest in application messages.
///
/// Returned from subscribe operations and delivered on the notice sink
/// once the subscribe outcome is known; a non-`None`
/// [`error`](Self::error) indicates a subscription failure.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: String,
    matcher: String,
    durable: String,
    options: SubscriptionOptions,
    /// The subscription failure, if any.
    pub error: Option<EftlError>,
}

impl Subscription {
    /// Client-local subscription identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Content matcher expression, empty when unfiltered.
    #[must_use]
    pub fn matcher(&self) -> &str {
        &self.matcher
    }

    /// Durable name, empty for non-durable subscriptions.
    #[must_use]
    pub fn durable(&self) -> &str {
        &self.durable
    }

    #[must_use]
    pub fn options(&self) -> &SubscriptionOptions {
        &self.options
    }
}

/// Snapshot of a registry entry for delivery to the caller.
pub(crate) fn snapshot(id: &str, entry: &SubscriptionEntry) -> Subscription {
    Subscription {
        id: id.to_string(),
        matcher: entry.matcher.clone(),
        durable: entry.durable.clone(),
        options: entry.options.clone(),
        error: entry.error.clone(),
    }
}

/// Builds the subscribe frame for a registry entry.
pub(crate) fn subscribe_frame(id: &str, entry: &SubscriptionEntry) -> Value {
    let mut frame = json!({ "op": op::SUBSCRIBE, "id": id });
    if !entry.matcher.is_empty() {
        frame["matcher"] = json!(entry.matcher);
    }
    if !entry.durable.is_empty() {
        frame["durable"] = json!(entry.durable);
    }
    if let Some(mode) = entry.options.acknowledge_mode {
        frame["ack"] = json!(mode.as_str());
    }
    if let Some(durable_type) = entry.options.durable_type {
        frame["type"] = json!(durable_type.as_str());
    }
    if let Some(key) = &entry.options.durable_key {
        frame["key"] = json!(key);
    }
    frame
}

impl Connection {
    /// Registers interest in application messages and waits for the
    /// server to confirm the subscription.
    ///
    /// A content matcher can be used to register interest in certain
    /// messages, and a durable name to create a durable subscription.
    /// Messages are delivered to `message_sink`; the send blocks, so
    /// backpressure from a slow consumer propagates to the server via
    /// the unacknowledged-message quota.
    ///
    /// # Errors
    ///
    /// [`EftlError::NotConnected`] without an attached session,
    /// [`EftlError::Timeout`] if no confirmation arrived in time, or the
    /// server-signalled subscription error.
    pub async fn subscribe(
        &self,
        matcher: &str,
        durable: &str,
        message_sink: mpsc::Sender<Message>,
    ) -> Result<Subscription> {
        self.subscribe_with_options(matcher, durable, SubscriptionOptions::default(), message_sink)
            .await
    }

    /// As [`subscribe`](Self::subscribe), with explicit subscription
    /// options.
    pub async fn subscribe_with_options(
        &self,
        matcher: &str,
        durable: &str,
        options: SubscriptionOptions,
        message_sink: mpsc::Sender<Message>,
    ) -> Result<Subscription> {
        let (tx, mut rx) = mpsc::channel(1);
        self.subscribe_async(matcher, durable, options, message_sink, Some(tx))
            .await?;
        match tokio::time::timeout(self.inner.opts.timeout, rx.recv()).await {
            Ok(Some(sub)) => match &sub.error {
                Some(err) => Err(err.clone()),
                None => Ok(sub),
            },
            _ => Err(EftlError::Timeout),
        }
    }

    /// Registers interest in application messages asynchronously. The
    /// optional `notice_sink` receives the [`Subscription`] once the
    /// subscribe outcome is known, and again after failures and
    /// re-subscribes following a reconnect.
    pub async fn subscribe_async(
        &self,
        matcher: &str,
        durable: &str,
        options: SubscriptionOptions,
        message_sink: mpsc::Sender<Message>,
        notice_sink: Option<SubscriptionSink>,
    ) -> Result<Subscription> {
        let mut core = self.inner.core.lock().await;
        if !is_connected(&core) {
            return Err(EftlError::NotConnected);
        }
        core.sub_seq_num += 1;
        let id = core.sub_seq_num.to_string();
        let entry = SubscriptionEntry {
            matcher: matcher.to_string(),
            durable: durable.to_string(),
            options,
            message_sink,
            last_seq_num: 0,
            pending: true,
            notice_sink,
            error: None,
        };
        let frame = subscribe_frame(&id, &entry);
        let sub = snapshot(&id, &entry);
        core.subs.insert(id.clone(), entry);
        info!(id = %id, matcher, durable, "subscribe");
        let _ = send_frame(&mut core, &frame).await;
        Ok(sub)
    }

    /// Unregisters a subscription. For durable subscriptions the
    /// persistence service removes the durable along with any persisted
    /// messages.
    pub async fn unsubscribe(&self, sub: &Subscription) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        if !is_connected(&core) {
            return Err(EftlError::NotConnected);
        }
        let _ = send_frame(&mut core, &json!({ "op": op::UNSUBSCRIBE, "id": sub.id() })).await;
        core.subs.remove(sub.id());
        info!(id = sub.id(), "unsubscribe");
        Ok(())
    }

    /// Unregisters all subscriptions, removing durables and their
    /// persisted messages.
    pub async fn unsubscribe_all(&self) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        if !is_connected(&core) {
            return Err(EftlError::NotConnected);
        }
        let ids: Vec<String> = core.subs.keys().cloned().collect();
        for id in ids {
            let _ = send_frame(&mut core, &json!({ "op": op::UNSUBSCRIBE, "id": id })).await;
            core.subs.remove(&id);
        }
        Ok(())
    }

    /// Closes a subscription without destroying it. A durable
    /// subscription keeps accumulating persisted messages, and any
    /// unacknowledged messages become available for redelivery.
    ///
    /// # Errors
    ///
    /// [`EftlError::NotSupported`] when the negotiated protocol does not
    /// carry non-destructive close.
    pub async fn close_subscription(&self, sub: &Subscription) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        if !is_connected(&core) {
            return Err(EftlError::NotConnected);
        }
        if core.protocol < 1 {
            return Err(EftlError::NotSupported);
        }
        let _ = send_frame(
            &mut core,
            &json!({ "op": op::UNSUBSCRIBE, "id": sub.id(), "del": "false" }),
        )
        .await;
        core.subs.remove(sub.id());
        info!(id = sub.id(), "close subscription");
        Ok(())
    }

    /// Closes all subscriptions without destroying durables.
    ///
    /// # Errors
    ///
    /// [`EftlError::NotSupported`] when the negotiated protocol does not
    /// carry non-destructive close.
    pub async fn close_all_subscriptions(&self) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        if !is_connected(&core) {
            return Err(EftlError::NotConnected);
        }
        if core.protocol < 1 {
            return Err(EftlError::NotSupported);
        }
        let ids: Vec<String> = core.subs.keys().cloned().collect();
        for id in ids {
            let _ = send_frame(
                &mut core,
                &json!({ "op": op::UNSUBSCRIBE, "id": id, "del": "false" }),
            )
            .await;
            core.subs.remove(&id);
        }
        Ok(())
    }
}
