//! Incoming frame processing and reconnect scheduling.
//!
//! One dispatch task per connection reads frames with a deadline equal
//! to the server-advertised idle timeout and routes them by opcode.
//! Heartbeats are echoed back unchanged under the core lock so that no
//! outbound write races the read. On read failure the task either
//! schedules an exponential-backoff reconnect or fans the error out to
//! every pending completion sink.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::ConnectionState;
use crate::connection::{
    Completion, Core, Inner, WsReader, dial_any, is_connected, next_frame, send_frame, set_state,
    subscription,
};
use crate::error::EftlError;
use crate::message::{
    DELIVERY_COUNT_HEADER, Message, REPLY_TO_HEADER, REQUEST_ID_HEADER, SEQUENCE_NUMBER_HEADER,
    STORE_MESSAGE_ID_HEADER, SUBSCRIPTION_ID_HEADER,
};
use crate::protocol::{completion_error, errcode, get_i64, get_str, op};

/// Reads and routes frames until the stream fails or the connection is
/// shut down. `generation` identifies this task; a stale task that lost
/// a race to a newer dial exits without touching connection state.
pub(crate) async fn run(inner: Arc<Inner>, mut reader: WsReader, idle: Duration, generation: u64) {
    loop {
        match next_frame(&mut reader, idle).await {
            Ok(frame) => route(&inner, frame).await,
            Err(err) => {
                handle_read_failure(&inner, err, generation).await;
                return;
            }
        }
    }
}

async fn route(inner: &Arc<Inner>, frame: Value) {
    let Some(opcode) = get_i64(&frame, "op") else {
        return;
    };
    match opcode {
        op::HEARTBEAT => handle_heartbeat(inner, &frame).await,
        op::EVENT => handle_event(inner, &frame).await,
        op::SUBSCRIBED => handle_subscribed(inner, &frame).await,
        op::UNSUBSCRIBED => handle_unsubscribed(inner, &frame).await,
        op::ACK => handle_completion(inner, &frame, errcode::PUBLISH_DISALLOWED, None).await,
        op::REQUEST_REPLY => {
            handle_completion(inner, &frame, errcode::REQUEST_DISALLOWED, Some("body")).await;
        }
        op::MAP_RESPONSE => {
            handle_completion(inner, &frame, errcode::MAP_REQUEST_DISALLOWED, Some("value")).await;
        }
        op::ERROR => handle_error(inner, &frame),
        _ => debug!(op = opcode, "ignoring frame"),
    }
}

/// Server pings are echoed back unchanged.
async fn handle_heartbeat(inner: &Arc<Inner>, frame: &Value) {
    let mut core = inner.core.lock().await;
    let _ = send_frame(&mut core, frame).await;
}

/// Delivers an application message to its subscription's sink.
///
/// Redeliveries are dropped by comparing the server sequence against the
/// subscription's high-water mark. Under auto-acknowledge the mark is
/// advanced only after the sink accepted the message, and the ack frame
/// is written afterwards.
async fn handle_event(inner: &Arc<Inner>, frame: &Value) {
    let mut core = inner.core.lock().await;
    let seq = get_i64(frame, "seq").unwrap_or(0);
    let sub_id = get_str(frame, "to").unwrap_or_default().to_string();
    let reply_to = get_str(frame, "reply_to").map(str::to_string);
    let request_id = get_i64(frame, "req").unwrap_or(0);
    let store_id = get_i64(frame, "sid").unwrap_or(0);
    let delivery_count = get_i64(frame, "cnt").unwrap_or(0);

    let Some(entry) = core.subs.get(&sub_id) else {
        debug!(id = %sub_id, "event for unknown subscription");
        return;
    };
    let auto_ack = entry.options.auto_ack();
    let last_seq_num = entry.last_seq_num;
    let sink = entry.message_sink.clone();

    // seq 0 marks an unsequenced, best-effort delivery.
    if seq == 0 || seq > last_seq_num {
        let mut body = frame.get("body").map(Message::from_json).unwrap_or_default();
        if store_id != 0 {
            body.set(STORE_MESSAGE_ID_HEADER, store_id);
        }
        if delivery_count != 0 {
            body.set(DELIVERY_COUNT_HEADER, delivery_count);
        }
        if !auto_ack && seq != 0 {
            body.set(SEQUENCE_NUMBER_HEADER, seq);
            body.set(SUBSCRIPTION_ID_HEADER, sub_id.as_str());
        }
        if let Some(reply_to) = reply_to {
            body.set(REPLY_TO_HEADER, reply_to);
            body.set(REQUEST_ID_HEADER, request_id);
        }
        // Blocking send, intentionally under the lock: backpressure from
        // a slow consumer propagates to the server via the unacked quota.
        let _ = sink.send(body).await;
        if auto_ack
            && seq != 0
            && let Some(entry) = core.subs.get_mut(&sub_id)
        {
            entry.last_seq_num = seq;
        }
    }
    if auto_ack && seq != 0 {
        let _ = send_frame(&mut core, &json!({ "op": op::ACK, "seq": seq, "id": sub_id })).await;
    }
}

async fn handle_subscribed(inner: &Arc<Inner>, frame: &Value) {
    let mut core = inner.core.lock().await;
    let Some(sub_id) = get_str(frame, "id") else {
        return;
    };
    let sub_id = sub_id.to_string();
    if let Some(entry) = core.subs.get_mut(&sub_id)
        && entry.pending
    {
        entry.pending = false;
        entry.error = None;
        debug!(id = %sub_id, "subscribed");
        if let Some(sink) = &entry.notice_sink {
            // Completion notices must not block the dispatcher.
            let _ = sink.try_send(subscription::snapshot(&sub_id, entry));
        }
    }
}

/// The subscription is kept for retry on reconnect unless the server
/// declared it invalid, in which case it is removed and never replayed.
async fn handle_unsubscribed(inner: &Arc<Inner>, frame: &Value) {
    let mut core = inner.core.lock().await;
    let Some(sub_id) = get_str(frame, "id") else {
        return;
    };
    let sub_id = sub_id.to_string();
    let code = get_i64(frame, "err").unwrap_or(0);
    let reason = get_str(frame, "reason").unwrap_or_default();
    let Some(entry) = core.subs.get_mut(&sub_id) else {
        return;
    };
    entry.error = Some(completion_error(
        code,
        reason,
        errcode::SUBSCRIPTION_DISALLOWED,
    ));
    entry.pending = true;
    let notice = subscription::snapshot(&sub_id, entry);
    let sink = entry.notice_sink.clone();
    warn!(id = %sub_id, code, reason, "subscription terminated");
    if code == errcode::SUBSCRIPTION_INVALID {
        core.subs.remove(&sub_id);
    }
    if let Some(sink) = sink {
        let _ = sink.try_send(notice);
    }
}

/// Routes an ack, request-reply, or map-response to the pending request
/// registered under its sequence number.
async fn handle_completion(
    inner: &Arc<Inner>,
    frame: &Value,
    disallowed_code: i64,
    payload_field: Option<&str>,
) {
    let mut core = inner.core.lock().await;
    let Some(seq) = get_i64(frame, "seq") else {
        return;
    };
    let error = get_i64(frame, "err").map(|code| {
        completion_error(code, get_str(frame, "reason").unwrap_or_default(), disallowed_code)
    });
    let Some(mut pending) = core.reqs.remove(&seq) else {
        return;
    };
    if let Some(field) = payload_field
        && let Some(payload) = frame.get(field)
        && payload.is_object()
    {
        pending.message = Some(Message::from_json(payload));
    }
    if let Some(sink) = pending.sink {
        let _ = sink.try_send(Completion {
            message: pending.message,
            error,
        });
    }
}

/// An asynchronous connection error reported by the server.
fn handle_error(inner: &Arc<Inner>, frame: &Value) {
    let code = get_i64(frame, "err").unwrap_or(0);
    let reason = get_str(frame, "reason").unwrap_or_default().to_string();
    warn!(code, reason, "server error");
    if let Some(sink) = &inner.opts.error_sink {
        let _ = sink.send(EftlError::Server { code, reason });
    }
}

async fn handle_read_failure(inner: &Arc<Inner>, err: EftlError, generation: u64) {
    let mut core = inner.core.lock().await;
    if core.dispatch_gen != generation {
        return; // a newer dispatch task owns the connection
    }
    if !is_connected(&core) {
        return; // caller-initiated shutdown
    }
    core.writer = None;
    set_state(&mut core, &inner.opts, ConnectionState::Disconnected);
    if err.allows_reconnect() {
        warn!(error = %err, "connection lost");
        schedule_reconnect(inner, &mut core, err);
    } else {
        warn!(error = %err, "connection terminated");
        fan_out_disconnect(inner, &mut core, err);
    }
}

/// Delivers the fatal error once to the caller's error sink and to every
/// pending completion, in ascending sequence order; the request registry
/// is then empty.
fn fan_out_disconnect(inner: &Inner, core: &mut Core, err: EftlError) {
    if let Some(sink) = &inner.opts.error_sink {
        let _ = sink.send(err.clone());
    }
    for (_, pending) in std::mem::take(&mut core.reqs) {
        if let Some(sink) = pending.sink {
            let _ = sink.try_send(Completion {
                message: pending.message,
                error: Some(err.clone()),
            });
        }
    }
}

/// Schedules the next reconnect round as a cancellable one-shot timer.
/// Each round dials the whole URL list; rescheduling happens from within
/// the timer's task so the retry chain stays a state machine rather than
/// a recursion.
fn schedule_reconnect(inner: &Arc<Inner>, core: &mut Core, err: EftlError) {
    if core.reconnect_attempts >= inner.opts.auto_reconnect_attempts {
        fan_out_disconnect(inner, core, err);
        return;
    }
    set_state(core, &inner.opts, ConnectionState::Reconnecting);
    let delay = backoff_delay(core.reconnect_attempts, inner.opts.auto_reconnect_max_delay);
    core.reconnect_attempts += 1;
    info!(
        attempt = core.reconnect_attempts,
        delay_ms = delay.as_millis() as u64,
        "scheduling reconnect"
    );
    let inner = inner.clone();
    let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let mut core = inner.core.lock().await;
        if core.state != ConnectionState::Reconnecting {
            return; // disconnected while the timer was pending
        }
        match dial_any(&inner, &mut core).await {
            Ok(()) => {}
            Err(dial_err) => {
                set_state(&mut core, &inner.opts, ConnectionState::Disconnected);
                warn!(error = %dial_err, "reconnect attempt failed");
                schedule_reconnect(&inner, &mut core, err);
            }
        }
    });
    core.reconnect_task = Some(task.abort_handle());
}

/// Exponential backoff with jitter: `2^attempt` seconds scaled by a
/// uniform factor in `[0.5, 1.5)`, clamped to the configured maximum.
fn backoff_delay(attempt: i64, max_delay: Duration) -> Duration {
    let jitter: f64 = rand::thread_rng().gen_range(0.5..1.5);
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX).min(1023);
    let secs = 2f64.powi(exponent) * jitter;
    if !secs.is_finite() || secs <= 0.0 || secs > max_delay.as_secs_f64() {
        return max_delay;
    }
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_max_delay() {
        let max = Duration::from_secs(30);
        for attempt in 0..300 {
            let delay = backoff_delay(attempt, max);
            assert!(delay <= max, "attempt {attempt} produced {delay:?}");
        }
    }

    #[test]
    fn backoff_first_attempt_carries_jitter() {
        let max = Duration::from_secs(30);
        for _ in 0..100 {
            let delay = backoff_delay(0, max);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay < Duration::from_millis(1500));
        }
    }
}
