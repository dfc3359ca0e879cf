//! Shared test utilities: a scripted in-process eFTL server.
//!
//! Each test spawns a [`ScriptedServer`] with a closure that plays the
//! server's side of the conversation for every accepted connection.
//! Connections are served sequentially, so reconnect tests observe the
//! redial as the next invocation of the script.

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tungstenite::Message as WsMessage;

use eftl::ConnectOptions;

/// Server side of one accepted WebSocket connection.
pub type ServerWs = WebSocketStream<TcpStream>;

pub struct ScriptedServer {
    /// Connection URL for the client under test.
    pub url: String,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    /// Binds a local listener and serves each accepted connection with
    /// `script`, passing the zero-based connection index.
    pub async fn spawn<F, Fut>(script: F) -> Self
    where
        F: Fn(usize, ServerWs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = listener.accept().await {
                match accept_hdr_async(stream, echo_subprotocol).await {
                    Ok(ws) => script(index, ws).await,
                    Err(_) => continue,
                }
                index += 1;
            }
        });
        Self {
            url: format!("ws://{addr}/channel"),
            handle,
        }
    }

    /// A server that rejects every WebSocket upgrade with `status`.
    pub async fn spawn_rejecting(status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let reject =
                    move |_req: &Request, _resp: Response| -> Result<Response, ErrorResponse> {
                        Err(http::Response::builder().status(status).body(None).unwrap())
                    };
                let _ = accept_hdr_async(stream, reject).await;
            }
        });
        Self {
            url: format!("ws://{addr}/channel"),
            handle,
        }
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// The client requires the offered subprotocol to be selected.
fn echo_subprotocol(req: &Request, mut resp: Response) -> Result<Response, ErrorResponse> {
    if let Some(proto) = req.headers().get(SEC_WEBSOCKET_PROTOCOL) {
        resp.headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, proto.clone());
    }
    Ok(resp)
}

/// Options tuned for tests: short timeouts, no automatic reconnect.
pub fn test_options() -> ConnectOptions {
    ConnectOptions {
        timeout: Duration::from_secs(5),
        auto_reconnect_attempts: 0,
        ..ConnectOptions::default()
    }
}

/// Reads the next protocol frame, skipping WebSocket control frames.
pub async fn recv_frame(ws: &mut ServerWs) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("connection ended while waiting for a frame: {other:?}"),
        }
    }
}

/// Reads the next protocol frame and asserts its opcode.
pub async fn expect_op(ws: &mut ServerWs, op: i64) -> Value {
    let frame = recv_frame(ws).await;
    assert_eq!(frame["op"], json!(op), "unexpected frame: {frame}");
    frame
}

pub async fn send_frame(ws: &mut ServerWs, frame: Value) {
    ws.send(WsMessage::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Reads the client's login and replies with a welcome; returns the
/// login frame for inspection.
pub async fn welcome(ws: &mut ServerWs, resume: bool) -> Value {
    let login = expect_op(ws, 1).await;
    let resume = if resume { "true" } else { "false" };
    send_frame(
        ws,
        json!({
            "op": 2,
            "client_id": "test-client",
            "id_token": "token-1",
            "protocol": 1,
            "timeout": 600,
            "_resume": resume,
        }),
    )
    .await;
    login
}

/// Sends a close frame with the given code.
pub async fn close_with(ws: &mut ServerWs, code: u16) {
    let _ = ws
        .send(WsMessage::Close(Some(CloseFrame {
            code: code.into(),
            reason: "".into(),
        })))
        .await;
}

/// Reads frames until the client goes away.
pub async fn drain(mut ws: ServerWs) {
    while let Some(Ok(_)) = ws.next().await {}
}
