//! Wire protocol definitions.
//!
//! Each WebSocket text frame carries one JSON object with an integer `op`
//! field. Helpers here read frame fields with integer widening (servers
//! may emit sequence numbers and codes as JSON floats) and classify
//! WebSocket close codes into typed errors.

use serde_json::Value;

use crate::error::EftlError;
use crate::message::number_as_i64;

/// WebSocket subprotocol offered in the upgrade request.
pub const SUBPROTOCOL: &str = "v1.eftl.tibco.com";

/// Protocol version requested at login.
pub(crate) const PROTOCOL_VERSION: i64 = 1;

/// Frame operation codes.
pub(crate) mod op {
    pub const HEARTBEAT: i64 = 0;
    pub const LOGIN: i64 = 1;
    pub const WELCOME: i64 = 2;
    pub const SUBSCRIBE: i64 = 3;
    pub const SUBSCRIBED: i64 = 4;
    pub const UNSUBSCRIBE: i64 = 5;
    pub const UNSUBSCRIBED: i64 = 6;
    pub const EVENT: i64 = 7;
    pub const PUBLISH: i64 = 8;
    pub const ACK: i64 = 9;
    pub const ERROR: i64 = 10;
    pub const DISCONNECT: i64 = 11;
    pub const REQUEST: i64 = 13;
    pub const REQUEST_REPLY: i64 = 14;
    pub const REPLY: i64 = 15;
    /// Administrative; never sent by this client, maps are created
    /// implicitly on first use.
    #[allow(dead_code)]
    pub const MAP_CREATE: i64 = 16;
    pub const MAP_DESTROY: i64 = 18;
    pub const MAP_SET: i64 = 20;
    pub const MAP_GET: i64 = 22;
    pub const MAP_REMOVE: i64 = 24;
    pub const MAP_RESPONSE: i64 = 26;
}

/// Server error codes carried in `err` fields of acks, unsubscribes,
/// and map responses.
pub mod errcode {
    pub const PUBLISH_FAILED: i64 = 11;
    pub const PUBLISH_DISALLOWED: i64 = 12;
    pub const SUBSCRIPTION_DISALLOWED: i64 = 13;
    pub const MAP_REQUEST_DISALLOWED: i64 = 14;
    pub const SUBSCRIPTION_FAILED: i64 = 21;
    pub const SUBSCRIPTION_INVALID: i64 = 22;
    pub const MAP_REQUEST_FAILED: i64 = 30;
    pub const REQUEST_DISALLOWED: i64 = 40;
    pub const REQUEST_FAILED: i64 = 41;
}

/// Reads an integer frame field, widening floats.
pub(crate) fn get_i64(frame: &Value, name: &str) -> Option<i64> {
    frame.get(name).and_then(number_as_i64)
}

/// Reads a string frame field.
pub(crate) fn get_str<'a>(frame: &'a Value, name: &str) -> Option<&'a str> {
    frame.get(name).and_then(Value::as_str)
}

/// Translates a close code received from the server into a typed error.
///
/// Only [`EftlError::Restart`] permits reconnection; the other typed
/// close errors terminate the session.
pub(crate) fn close_code_error(code: u16) -> EftlError {
    match code {
        1001 => EftlError::GoingAway,
        1009 => EftlError::MessageTooBig,
        1012 => EftlError::Restart,
        4000 => EftlError::ForceClose,
        4002 => EftlError::NotAuthenticated,
        _ => EftlError::WebSocket(std::sync::Arc::new(tungstenite::Error::ConnectionClosed)),
    }
}

/// Maps a server `err` code on a completion to a typed error.
pub(crate) fn completion_error(code: i64, reason: &str, disallowed: i64) -> EftlError {
    if code == disallowed {
        EftlError::NotAuthorized
    } else {
        EftlError::Server {
            code,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_fields_widen_floats() {
        let frame = json!({"op": 9.0, "seq": 3.0, "cnt": 2});
        assert_eq!(get_i64(&frame, "op"), Some(9));
        assert_eq!(get_i64(&frame, "seq"), Some(3));
        assert_eq!(get_i64(&frame, "cnt"), Some(2));
        assert_eq!(get_i64(&frame, "missing"), None);
    }

    #[test]
    fn close_codes_classify() {
        assert!(matches!(close_code_error(1001), EftlError::GoingAway));
        assert!(matches!(close_code_error(1009), EftlError::MessageTooBig));
        assert!(matches!(close_code_error(1012), EftlError::Restart));
        assert!(matches!(close_code_error(4000), EftlError::ForceClose));
        assert!(matches!(close_code_error(4002), EftlError::NotAuthenticated));
        assert!(matches!(close_code_error(1006), EftlError::WebSocket(_)));
    }

    #[test]
    fn only_restart_class_reconnects() {
        assert!(close_code_error(1012).allows_reconnect());
        assert!(close_code_error(1006).allows_reconnect());
        assert!(!close_code_error(1001).allows_reconnect());
        assert!(!close_code_error(1009).allows_reconnect());
        assert!(!close_code_error(4000).allows_reconnect());
        assert!(!close_code_error(4002).allows_reconnect());
    }
}
