//! JSON-RPC peer over a server's stdio pipes.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{Mutex, oneshot},
};
use toolmux_core::SessionError;

use crate::types::{
    IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    METHOD_NOT_FOUND,
};

/// Protocol error.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{} (code {})", .0.message, .0.code)]
    Rpc(JsonRpcError),
    #[error("{method} timed out after {secs}s", secs = .after.as_secs())]
    Timeout { method: String, after: Duration },
    #[error("Peer disconnected")]
    Disconnected,
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => Self::Io(e),
            ProtocolError::Json(e) => Self::Protocol(e.to_string()),
            ProtocolError::Rpc(e) => Self::Remote {
                code: e.code,
                message: e.message,
            },
            ProtocolError::Timeout { method, after } => Self::Timeout {
                operation: method,
                after,
            },
            ProtocolError::Disconnected => Self::Disconnected,
        }
    }
}

type Pending = HashMap<u64, oneshot::Sender<JsonRpcResponse>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

struct PeerInner {
    server: String,
    stdin: Mutex<Writer>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// Multiplexes requests over one pipe pair.
///
/// Responses are matched to requests by id, so concurrent callers may share
/// the peer.
#[derive(Clone)]
pub struct ProtocolPeer {
    inner: Arc<PeerInner>,
}

impl ProtocolPeer {
    /// Spawn a new protocol peer.
    ///
    /// This starts a background task reading `stdout` until EOF.
    #[must_use]
    pub fn spawn<W, R>(server: impl Into<String>, stdin: W, stdout: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let peer = Self {
            inner: Arc::new(PeerInner {
                server: server.into(),
                stdin: Mutex::new(Box::new(stdin)),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        };

        let reader_peer = peer.clone();
        tokio::spawn(async move {
            if let Err(e) = reader_peer.read_loop(stdout).await {
                tracing::warn!(server = %reader_peer.server(), "Protocol reader loop error: {e}");
            }
            reader_peer.mark_closed().await;
        });

        peer
    }

    /// Identity of the server on the other end.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.inner.server
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    async fn read_loop<R>(&self, stdout: R) -> Result<(), ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(stdout);
        let mut buffer = Vec::new();

        loop {
            buffer.clear();
            if reader.read_until(b'\n', &mut buffer).await? == 0 {
                tracing::debug!(server = %self.server(), "Server closed stdout");
                return Ok(());
            }

            let text = String::from_utf8_lossy(&buffer);
            let line = text.trim();
            if line.is_empty() {
                continue;
            }

            match IncomingMessage::from_line(line) {
                Ok(IncomingMessage::Response(resp)) => self.dispatch_response(resp).await,
                Ok(IncomingMessage::Notification(notif)) => self.on_notification(&notif),
                Ok(IncomingMessage::Request(req)) => self.on_server_request(req).await,
                Err(e) => {
                    tracing::warn!(server = %self.server(), "Unparseable line ({e}): {line}");
                }
            }
        }
    }

    async fn dispatch_response(&self, resp: JsonRpcResponse) {
        let Some(id) = resp.id.as_u64() else {
            tracing::debug!(server = %self.server(), id = %resp.id, "Response with foreign id");
            return;
        };
        if let Some(tx) = self.inner.pending.lock().await.remove(&id) {
            let _ = tx.send(resp);
        } else {
            tracing::debug!(server = %self.server(), id, "Late response dropped");
        }
    }

    fn on_notification(&self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/message" => {
                let params = notif.params.as_ref();
                let level = params
                    .and_then(|p| p.get("level"))
                    .and_then(Value::as_str)
                    .unwrap_or("info");
                let data = params.and_then(|p| p.get("data")).cloned().unwrap_or_default();
                tracing::info!(server = %self.server(), log_level = level, "{data}");
            }
            method => {
                tracing::debug!(server = %self.server(), method, "Unhandled notification");
            }
        }
    }

    async fn on_server_request(&self, req: JsonRpcRequest) {
        let reply = if req.method == "ping" {
            JsonRpcResponse::success(req.id, Value::Object(serde_json::Map::new()))
        } else {
            tracing::debug!(server = %self.server(), method = %req.method, "Rejecting server request");
            JsonRpcResponse::failure(req.id, METHOD_NOT_FOUND, "Method not found")
        };
        if let Err(e) = self.send_json(&reply).await {
            tracing::warn!(server = %self.server(), "Failed to answer server request: {e}");
        }
    }

    async fn mark_closed(&self) {
        self.inner.closed.store(true, Ordering::Release);
        // Dropping the senders wakes every waiter with `Disconnected`.
        self.inner.pending.lock().await.clear();
    }

    async fn send_json<T: serde::Serialize>(&self, message: &T) -> Result<(), ProtocolError> {
        let json = serde_json::to_string(message)?;
        let mut stdin = self.inner.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    /// Returns error if the write fails, the peer disconnects, the server
    /// answers with an error object, or no answer arrives within `timeout`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::Disconnected);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            // The reader may have cleared the map between the check above and now.
            if self.is_closed() {
                return Err(ProtocolError::Disconnected);
            }
            pending.insert(id, tx);
        }

        tracing::debug!(server = %self.server(), id, method, "-> request");
        if let Err(e) = self.send_json(&JsonRpcRequest::new(id, method, params)).await {
            self.inner.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => resp.into_result().map_err(ProtocolError::Rpc),
            Ok(Err(_)) => Err(ProtocolError::Disconnected),
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                Err(ProtocolError::Timeout {
                    method: method.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Send a notification.
    ///
    /// # Errors
    /// Returns error if write fails.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::Disconnected);
        }
        self.send_json(&JsonRpcNotification::new(method, params)).await
    }

    /// Close our end of stdin, signalling EOF to the server.
    ///
    /// # Errors
    /// Returns error if the shutdown write fails.
    pub async fn close(&self) -> Result<(), ProtocolError> {
        let mut stdin = self.inner.stdin.lock().await;
        stdin.shutdown().await?;
        Ok(())
    }
}
