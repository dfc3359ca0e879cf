//! Server-hosted key/value maps.
//!
//! A [`KvMap`] is a lightweight handle binding a map name to a
//! [`Connection`]. Set, get, and remove are each a single sequenced
//! frame multiplexed over the connection; their completions are routed
//! through the same pending-request registry as publishes.

use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::{CompletionSink, Connection, PendingRequest, is_connected, send_frame};
use crate::error::{EftlError, Result};
use crate::message::Message;
use crate::protocol::op;

/// A key/value map hosted by the server.
///
/// Maps are created implicitly on first use; [`Connection::remove_kv_map`]
/// destroys one.
#[derive(Clone)]
pub struct KvMap {
    name: String,
    conn: Connection,
}

impl Connection {
    /// Returns a handle to the named key/value map.
    #[must_use]
    pub fn kv_map(&self, name: impl Into<String>) -> KvMap {
        KvMap {
            name: name.into(),
            conn: self.clone(),
        }
    }

    /// Removes the named key/value map and all of its entries.
    pub async fn remove_kv_map(&self, name: &str) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        if !is_connected(&core) {
            return Err(EftlError::NotConnected);
        }
        let _ = send_frame(&mut core, &json!({ "op": op::MAP_DESTROY, "map": name })).await;
        Ok(())
    }
}

impl KvMap {
    /// The map's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets a key-value pair in the map, overwriting any existing value,
    /// and waits for the server's acknowledgement.
    pub async fn set(&self, key: &str, msg: Message) -> Result<()> {
        let (tx, rx) = mpsc::channel(1);
        self.set_async(key, msg, Some(tx)).await?;
        crate::connection::await_completion(rx, self.conn.inner.opts.timeout)
            .await
            .map(|_| ())
    }

    /// Sets a key-value pair asynchronously. The optional sink receives
    /// a [`Completion`] once the operation has been acknowledged.
    pub async fn set_async(
        &self,
        key: &str,
        msg: Message,
        sink: Option<CompletionSink>,
    ) -> Result<()> {
        let mut core = self.conn.inner.core.lock().await;
        if !is_connected(&core) {
            return Err(EftlError::NotConnected);
        }
        core.req_seq_num += 1;
        let seq = core.req_seq_num;
        let frame = json!({
            "op": op::MAP_SET,
            "seq": seq,
            "map": self.name,
            "key": key,
            "value": &msg,
        });
        core.reqs.insert(
            seq,
            PendingRequest {
                frame: frame.clone(),
                message: Some(msg),
                sink,
            },
        );
        debug!(seq, map = %self.name, key, "map set");
        send_frame(&mut core, &frame).await
    }

    /// Gets the value stored under `key`, or `None` when the key is
    /// absent (a miss is not an error).
    pub async fn get(&self, key: &str) -> Result<Option<Message>> {
        let (tx, rx) = mpsc::channel(1);
        self.get_async(key, Some(tx)).await?;
        crate::connection::await_completion(rx, self.conn.inner.opts.timeout).await
    }

    /// Gets a value asynchronously. The sink's [`Completion`] carries
    /// the value, when present.
    pub async fn get_async(&self, key: &str, sink: Option<CompletionSink>) -> Result<()> {
        let mut core = self.conn.inner.core.lock().await;
        if !is_connected(&core) {
            return Err(EftlError::NotConnected);
        }
        core.req_seq_num += 1;
        let seq = core.req_seq_num;
        let frame = json!({ "op": op::MAP_GET, "seq": seq, "map": self.name, "key": key });
        core.reqs.insert(
            seq,
            PendingRequest {
                frame: frame.clone(),
                message: None,
                sink,
            },
        );
        debug!(seq, map = %self.name, key, "map get");
        send_frame(&mut core, &frame).await
    }

    /// Removes the key-value pair stored under `key` and waits for the
    /// server's acknowledgement.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let (tx, rx) = mpsc::channel(1);
        self.remove_async(key, Some(tx)).await?;
        crate::connection::await_completion(rx, self.conn.inner.opts.timeout)
            .await
            .map(|_| ())
    }

    /// Removes a key-value pair asynchronously.
    pub async fn remove_async(&self, key: &str, sink: Option<CompletionSink>) -> Result<()> {
        let mut core = self.conn.inner.core.lock().await;
        if !is_connected(&core) {
            return Err(EftlError::NotConnected);
        }
        core.req_seq_num += 1;
        let seq = core.req_seq_num;
        let frame = json!({ "op": op::MAP_REMOVE, "seq": seq, "map": self.name, "key": key });
        core.reqs.insert(
            seq,
            PendingRequest {
                frame: frame.clone(),
                message: None,
                sink,
            },
        );
        debug!(seq, map = %self.name, key, "map remove");
        send_frame(&mut core, &frame).await
    }
}
