//! Publish, request/reply, and acknowledgement operations.
//!
//! Every tracked operation allocates the next request sequence number
//! under the core lock and inserts its outbound frame into the pending
//! registry before the frame is written, so that the operation
//! participates in reconnect replay even when the write itself fails.

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::{
    Completion, CompletionSink, Connection, PendingRequest, is_connected, send_frame,
};
use crate::error::{EftlError, Result};
use crate::message::{
    Message, REPLY_TO_HEADER, REQUEST_ID_HEADER, SEQUENCE_NUMBER_HEADER, SUBSCRIPTION_ID_HEADER,
};
use crate::protocol::op;

/// Waits for a completion with a deadline. The in-flight operation is
/// not cancelled on timeout; the stale registry entry is fanned out as
/// an error on eventual disconnect.
pub(crate) async fn await_completion(
    mut rx: mpsc::Receiver<Completion>,
    timeout: Duration,
) -> Result<Option<Message>> {
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(completion)) => match completion.error {
            Some(err) => Err(err),
            None => Ok(completion.message),
        },
        _ => Err(EftlError::Timeout),
    }
}

impl Connection {
    /// Publishes an application message and waits for the server's
    /// acknowledgement.
    ///
    /// # Errors
    ///
    /// [`EftlError::NotConnected`] without an attached session,
    /// [`EftlError::Timeout`] if no acknowledgement arrived in time, or
    /// the server-signalled error.
    pub async fn publish(&self, msg: Message) -> Result<()> {
        let (tx, rx) = mpsc::channel(1);
        self.publish_async(msg, Some(tx)).await?;
        await_completion(rx, self.inner.opts.timeout).await.map(|_| ())
    }

    /// Publishes an application message asynchronously. The optional
    /// sink receives a [`Completion`] once the publish has been
    /// acknowledged.
    pub async fn publish_async(&self, msg: Message, sink: Option<CompletionSink>) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        if !is_connected(&core) {
            return Err(EftlError::NotConnected);
        }
        core.req_seq_num += 1;
        let seq = core.req_seq_num;
        let frame = json!({ "op": op::PUBLISH, "seq": seq, "body": &msg });
        core.reqs.insert(
            seq,
            PendingRequest {
                frame: frame.clone(),
                message: Some(msg),
                sink,
            },
        );
        debug!(seq, "publish");
        let _ = send_frame(&mut core, &frame).await;
        Ok(())
    }

    /// Publishes a request message and waits for a reply.
    ///
    /// The reply payload is `None` when the responder sent an empty
    /// reply.
    ///
    /// # Errors
    ///
    /// [`EftlError::NotSupported`] when the negotiated protocol does not
    /// carry request/reply, plus the errors of [`publish`](Self::publish).
    pub async fn send_request(
        &self,
        request: Message,
        timeout: Duration,
    ) -> Result<Option<Message>> {
        let (tx, rx) = mpsc::channel(1);
        self.send_request_async(request, Some(tx)).await?;
        await_completion(rx, timeout).await
    }

    /// Publishes a request message asynchronously. The sink receives the
    /// reply as a [`Completion`].
    pub async fn send_request_async(
        &self,
        request: Message,
        sink: Option<CompletionSink>,
    ) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        if !is_connected(&core) {
            return Err(EftlError::NotConnected);
        }
        if core.protocol < 1 {
            return Err(EftlError::NotSupported);
        }
        core.req_seq_num += 1;
        let seq = core.req_seq_num;
        let frame = json!({ "op": op::REQUEST, "seq": seq, "body": &request });
        core.reqs.insert(
            seq,
            PendingRequest {
                frame: frame.clone(),
                message: None,
                sink,
            },
        );
        debug!(seq, "request");
        let _ = send_frame(&mut core, &frame).await;
        Ok(())
    }

    /// Sends a reply in response to a received request message and waits
    /// for the server's acknowledgement.
    ///
    /// # Errors
    ///
    /// [`EftlError::NotRequest`] when `request` does not carry a reply
    /// address, plus the errors of [`send_request`](Self::send_request).
    pub async fn send_reply(&self, reply: Message, request: &Message) -> Result<()> {
        let (tx, rx) = mpsc::channel(1);
        self.send_reply_async(reply, request, Some(tx)).await?;
        await_completion(rx, self.inner.opts.timeout).await.map(|_| ())
    }

    /// Sends a reply asynchronously in response to a received request
    /// message.
    pub async fn send_reply_async(
        &self,
        reply: Message,
        request: &Message,
        sink: Option<CompletionSink>,
    ) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        if !is_connected(&core) {
            return Err(EftlError::NotConnected);
        }
        if core.protocol < 1 {
            return Err(EftlError::NotSupported);
        }
        let Some(reply_to) = request.string(REPLY_TO_HEADER) else {
            return Err(EftlError::NotRequest);
        };
        let reply_to = reply_to.to_string();
        let request_id = request.long(REQUEST_ID_HEADER).unwrap_or(0);
        core.req_seq_num += 1;
        let seq = core.req_seq_num;
        let frame = json!({
            "op": op::REPLY,
            "seq": seq,
            "to": reply_to,
            "req": request_id,
            "body": &reply,
        });
        core.reqs.insert(
            seq,
            PendingRequest {
                frame: frame.clone(),
                message: Some(reply),
                sink,
            },
        );
        debug!(seq, "reply");
        let _ = send_frame(&mut core, &frame).await;
        Ok(())
    }

    /// Acknowledges a single message received on a client-acknowledged
    /// subscription. Messages without delivery metadata are ignored.
    pub async fn acknowledge(&self, msg: &Message) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        if !is_connected(&core) {
            return Err(EftlError::NotConnected);
        }
        let Some(seq) = msg.long(SEQUENCE_NUMBER_HEADER) else {
            return Ok(());
        };
        let _ = send_frame(&mut core, &json!({ "op": op::ACK, "seq": seq })).await;
        Ok(())
    }

    /// Acknowledges all messages up to and including this message on its
    /// subscription. Messages without delivery metadata are ignored.
    pub async fn acknowledge_all(&self, msg: &Message) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        if !is_connected(&core) {
            return Err(EftlError::NotConnected);
        }
        let Some(seq) = msg.long(SEQUENCE_NUMBER_HEADER) else {
            return Ok(());
        };
        let Some(sub_id) = msg.string(SUBSCRIPTION_ID_HEADER) else {
            return Ok(());
        };
        let sub_id = sub_id.to_string();
        let _ = send_frame(&mut core, &json!({ "op": op::ACK, "seq": seq, "id": sub_id })).await;
        Ok(())
    }
}
