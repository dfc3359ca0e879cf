//! Key/value map operations against a scripted server.

mod common;

use serde_json::json;

use common::{ScriptedServer, drain, expect_op, send_frame, test_options, welcome};
use eftl::{Connection, EftlError, Message};

#[tokio::test]
async fn set_sends_value_and_completes() {
    let server = ScriptedServer::spawn(|_, mut ws| async move {
        welcome(&mut ws, false).await;
        let set = expect_op(&mut ws, 20).await;
        assert_eq!(set["seq"], 1);
        assert_eq!(set["map"], "scores");
        assert_eq!(set["key"], "alice");
        assert_eq!(set["value"]["points"], 10);
        send_frame(&mut ws, json!({ "op": 26, "seq": 1 })).await;
        drain(ws).await;
    })
    .await;

    let conn = Connection::connect(&server.url, test_options()).await.unwrap();
    let map = conn.kv_map("scores");
    map.set("alice", Message::new().with("points", 10i64))
        .await
        .unwrap();
    conn.disconnect().await;
}

#[tokio::test]
async fn get_returns_decoded_value() {
    let server = ScriptedServer::spawn(|_, mut ws| async move {
        welcome(&mut ws, false).await;
        let get = expect_op(&mut ws, 22).await;
        assert_eq!(get["map"], "scores");
        assert_eq!(get["key"], "alice");
        send_frame(
            &mut ws,
            json!({ "op": 26, "seq": get["seq"], "value": { "points": 10 } }),
        )
        .await;
        drain(ws).await;
    })
    .await;

    let conn = Connection::connect(&server.url, test_options()).await.unwrap();
    let value = conn.kv_map("scores").get("alice").await.unwrap();
    assert_eq!(value, Some(Message::new().with("points", 10i64)));
    conn.disconnect().await;
}

#[tokio::test]
async fn get_miss_is_not_an_error() {
    let server = ScriptedServer::spawn(|_, mut ws| async move {
        welcome(&mut ws, false).await;
        let get = expect_op(&mut ws, 22).await;
        send_frame(&mut ws, json!({ "op": 26, "seq": get["seq"] })).await;
        drain(ws).await;
    })
    .await;

    let conn = Connection::connect(&server.url, test_options()).await.unwrap();
    let value = conn.kv_map("scores").get("missing").await.unwrap();
    assert_eq!(value, None);
    conn.disconnect().await;
}

#[tokio::test]
async fn remove_completes() {
    let server = ScriptedServer::spawn(|_, mut ws| async move {
        welcome(&mut ws, false).await;
        let remove = expect_op(&mut ws, 24).await;
        assert_eq!(remove["map"], "scores");
        assert_eq!(remove["key"], "alice");
        send_frame(&mut ws, json!({ "op": 26, "seq": remove["seq"] })).await;
        drain(ws).await;
    })
    .await;

    let conn = Connection::connect(&server.url, test_options()).await.unwrap();
    conn.kv_map("scores").remove("alice").await.unwrap();
    conn.disconnect().await;
}

#[tokio::test]
async fn disallowed_map_request_is_not_authorized() {
    let server = ScriptedServer::spawn(|_, mut ws| async move {
        welcome(&mut ws, false).await;
        let set = expect_op(&mut ws, 20).await;
        send_frame(
            &mut ws,
            json!({ "op": 26, "seq": set["seq"], "err": 14, "reason": "denied" }),
        )
        .await;
        drain(ws).await;
    })
    .await;

    let conn = Connection::connect(&server.url, test_options()).await.unwrap();
    let err = conn
        .kv_map("scores")
        .set("alice", Message::new().with("points", 10i64))
        .await
        .unwrap_err();
    assert!(matches!(err, EftlError::NotAuthorized), "{err}");
    conn.disconnect().await;
}

#[tokio::test]
async fn remove_kv_map_destroys_the_map() {
    let server = ScriptedServer::spawn(|_, mut ws| async move {
        welcome(&mut ws, false).await;
        let destroy = expect_op(&mut ws, 18).await;
        assert_eq!(destroy["map"], "scores");
        drain(ws).await;
    })
    .await;

    let conn = Connection::connect(&server.url, test_options()).await.unwrap();
    conn.remove_kv_map("scores").await.unwrap();
    conn.disconnect().await;
}
