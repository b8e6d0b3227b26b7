//! TCP IPC server - accept loop and per-connection handler.
//!
//! Each connection is one session: a successful `authenticate` call unlocks
//! gated tools for later requests on the same connection only.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::ipc::codec::{encode_json, read_frame, write_frame, MSG_ERROR, MSG_REQUEST, MSG_RESPONSE};
use crate::ipc::router;
use crate::tools::ToolRegistry;
use crate::types::{IpcConfig, SessionState};

/// IPC server wrapping the tool registry.
#[derive(Debug)]
pub struct IpcServer {
    registry: Arc<ToolRegistry>,
    addr: SocketAddr,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
}

impl IpcServer {
    pub fn new(registry: Arc<ToolRegistry>, addr: SocketAddr, ipc_config: IpcConfig) -> Self {
        Self {
            registry,
            addr,
            cancel: CancellationToken::new(),
            ipc_config,
        }
    }

    /// Bind the configured address and serve until cancelled.
    pub async fn serve(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_listener(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let conn_semaphore = Arc::new(Semaphore::new(self.ipc_config.max_connections));
        tracing::info!(
            addr = %listener.local_addr()?,
            max_connections = self.ipc_config.max_connections,
            tools = self.registry.len(),
            "IPC server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("IPC server shutting down");
                    break;
                }
                accept = listener.accept() => {
                    let (stream, peer) = accept?;

                    let permit = match conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                %peer,
                                max_connections = self.ipc_config.max_connections,
                                "connection rejected: at capacity"
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    let registry = self.registry.clone();
                    let cancel = self.cancel.clone();
                    let ipc_config = self.ipc_config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, registry, cancel, ipc_config, permit).await {
                            tracing::warn!(%peer, error = %e, "connection error");
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

fn error_payload(request_id: &str, code: &str, message: String) -> serde_json::Value {
    serde_json::json!({
        "id": request_id,
        "ok": false,
        "error": {
            "code": code,
            "message": message,
        }
    })
}

/// Handle a single TCP connection: read frames → route → write responses.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    registry: Arc<ToolRegistry>,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
    _permit: OwnedSemaphorePermit, // held for connection lifetime
) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let read_timeout = Duration::from_secs(ipc_config.read_timeout_secs);
    let write_timeout = Duration::from_secs(ipc_config.write_timeout_secs);
    let session = Arc::new(SessionState::new());
    tracing::debug!(session = %session.id(), "session opened");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame_result = tokio::time::timeout(read_timeout, read_frame(&mut reader, ipc_config.max_frame_bytes)) => {
                let frame = match frame_result {
                    Err(_elapsed) => {
                        tracing::debug!(session = %session.id(), "read timeout, dropping connection");
                        break;
                    }
                    Ok(result) => match result? {
                        Some(f) => f,
                        None => break,
                    },
                };

                let (msg_type, payload_bytes) = frame;
                if msg_type != MSG_REQUEST {
                    let payload = error_payload(
                        "",
                        "INVALID_ARGUMENT",
                        format!("Unexpected message type: 0x{:02X}", msg_type),
                    );
                    timed_write(&mut writer, MSG_ERROR, &encode_json(&payload)?, write_timeout).await?;
                    continue;
                }

                let request: serde_json::Value = match serde_json::from_slice(&payload_bytes) {
                    Ok(v) => v,
                    Err(e) => {
                        let payload = error_payload("", "INVALID_ARGUMENT", format!("Invalid JSON: {}", e));
                        timed_write(&mut writer, MSG_ERROR, &encode_json(&payload)?, write_timeout).await?;
                        continue;
                    }
                };

                let request_id = request.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let service = request.get("service").and_then(|v| v.as_str()).unwrap_or("");
                let method = request.get("method").and_then(|v| v.as_str()).unwrap_or("");
                let body = request
                    .get("body")
                    .cloned()
                    .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

                let result = router::route_request(&registry, &session, service, method, body).await;
                let (msg_type, payload) = match result {
                    Ok(response_body) => (
                        MSG_RESPONSE,
                        serde_json::json!({
                            "id": request_id,
                            "ok": true,
                            "body": response_body,
                        }),
                    ),
                    Err(e) => (MSG_ERROR, error_payload(&request_id, e.to_ipc_error_code(), e.to_string())),
                };
                timed_write(&mut writer, msg_type, &encode_json(&payload)?, write_timeout).await?;
            }
        }
    }

    tracing::debug!(session = %session.id(), "session closed");
    Ok(())
}

/// Write a frame with a timeout so slow consumers cannot hold a connection.
async fn timed_write<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg_type: u8,
    payload: &[u8],
    timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(timeout, write_frame(writer, msg_type, payload))
        .await
        .map_err(|_| {
            tracing::warn!(timeout_secs = timeout.as_secs(), "write timeout, dropping connection");
            std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout")
        })?
}
