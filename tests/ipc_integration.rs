//! IPC integration tests - validates codec→router→registry→response round-trip.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tool_factory::ipc::codec::{write_frame, MSG_ERROR, MSG_REQUEST, MSG_RESPONSE};
use tool_factory::ipc::IpcServer;
use tool_factory::store::SqliteStore;
use tool_factory::{build_registry, Config, IpcConfig, ToolDeps};

/// Helper: spin up an IpcServer on a random port with the built-in tools,
/// guarded by `secret`.
async fn start_test_server(secret: Option<&str>) -> std::net::SocketAddr {
    let mut config = Config::default();
    config.auth.shared_token = secret.map(str::to_string);
    let deps = ToolDeps::quiet(SqliteStore::in_memory().unwrap(), &config).unwrap();
    let registry = Arc::new(build_registry(Arc::new(deps)).unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let server = IpcServer::new(registry, addr, IpcConfig::default());
        let _ = server.serve_listener(listener).await;
    });
    addr
}

/// Helper: send a request frame, receive and decode the response.
async fn round_trip(stream: &mut TcpStream, method: &str, body: Value) -> (u8, Value) {
    let request = json!({
        "id": "test-1",
        "service": "tools",
        "method": method,
        "body": body,
    });
    let payload = serde_json::to_vec(&request).unwrap();
    write_frame(stream, MSG_REQUEST, &payload).await.unwrap();

    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let frame_len = u32::from_be_bytes(len_buf) as usize;
    let mut frame_data = vec![0u8; frame_len];
    stream.read_exact(&mut frame_data).await.unwrap();

    let response: Value = serde_json::from_slice(&frame_data[1..]).unwrap();
    (frame_data[0], response)
}

#[tokio::test]
async fn test_list_tools() {
    let addr = start_test_server(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) = round_trip(&mut stream, "ListTools", json!({})).await;
    assert_eq!(msg_type, MSG_RESPONSE);
    assert_eq!(response["id"], "test-1");
    let tools = response["body"]["tools"].as_array().unwrap();
    assert_eq!(tools[0]["name"], "authenticate");
    assert!(tools.iter().any(|t| t["name"] == "dhl.track_shipment"));
}

#[tokio::test]
async fn test_unknown_tool_error() {
    let addr = start_test_server(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) =
        round_trip(&mut stream, "RunTool", json!({"name": "no.such_tool", "args": {}})).await;
    assert_eq!(msg_type, MSG_ERROR);
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["code"], "NOT_FOUND");
    assert!(response["error"]["message"].as_str().unwrap().contains("Unknown tool"));
}

#[tokio::test]
async fn test_session_auth_is_per_connection() {
    let addr = start_test_server(Some("s3cret")).await;
    let mut first = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) =
        round_trip(&mut first, "RunTool", json!({"name": "db.list_conversations"})).await;
    assert_eq!(msg_type, MSG_ERROR);
    assert_eq!(response["error"]["code"], "UNAUTHENTICATED");
    assert_eq!(response["error"]["message"], "unauthorized");

    let (_, response) = round_trip(
        &mut first,
        "RunTool",
        json!({"name": "authenticate", "args": {"token": "wrong"}}),
    )
    .await;
    assert_eq!(response["body"]["result"]["ok"], false);

    let (_, response) = round_trip(
        &mut first,
        "RunTool",
        json!({"name": "authenticate", "args": {"token": "s3cret"}}),
    )
    .await;
    assert_eq!(response["body"]["result"]["ok"], true);

    let (msg_type, response) =
        round_trip(&mut first, "RunTool", json!({"name": "db.list_conversations"})).await;
    assert_eq!(msg_type, MSG_RESPONSE);
    assert_eq!(response["body"]["result"]["total"], 0);

    // A fresh connection starts unauthenticated.
    let mut second = TcpStream::connect(addr).await.unwrap();
    let (msg_type, _) =
        round_trip(&mut second, "RunTool", json!({"name": "db.list_conversations"})).await;
    assert_eq!(msg_type, MSG_ERROR);
}

#[tokio::test]
async fn test_invalid_json_frame() {
    let addr = start_test_server(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut stream, MSG_REQUEST, b"{not json").await.unwrap();

    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let mut frame = vec![0u8; u32::from_be_bytes(len_buf) as usize];
    stream.read_exact(&mut frame).await.unwrap();
    assert_eq!(frame[0], MSG_ERROR);
    let response: Value = serde_json::from_slice(&frame[1..]).unwrap();
    assert_eq!(response["error"]["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_validation_error_code() {
    let addr = start_test_server(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) = round_trip(
        &mut stream,
        "RunTool",
        json!({"name": "dhl.track_shipment", "args": {}}),
    )
    .await;
    assert_eq!(msg_type, MSG_ERROR);
    assert_eq!(response["error"]["code"], "INVALID_ARGUMENT");
    assert_eq!(response["error"]["message"], "tracking_number_required");
}
