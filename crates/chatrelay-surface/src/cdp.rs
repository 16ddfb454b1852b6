//! CDP session — thin client over `tokio-tungstenite`.
//!
//! Attaches to an already-running browser's DevTools endpoint and implements
//! only the handful of commands the page driver needs (not the entire
//! protocol).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::SurfaceError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pending CDP command waiting for its response.
type PendingTx = oneshot::Sender<Result<Value, String>>;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A CDP session attached to one page target.
#[derive(Debug)]
pub struct CdpSession {
    cmd_tx: mpsc::Sender<CdpCommand>,
    ready_tx: broadcast::Sender<()>,
    _handler: JoinHandle<()>,
}

/// Internal CDP command message.
struct CdpCommand {
    method: String,
    params: Value,
    response_tx: PendingTx,
}

impl CdpSession {
    /// Discover the first page target on `host:port` and attach to it.
    pub async fn attach(host: &str, port: u16) -> Result<Self, SurfaceError> {
        let ws_url = discover_page_ws(host, port).await?;

        let (ws, _) = connect_async(&ws_url)
            .await
            .map_err(|e| SurfaceError::AttachFailed {
                context: format!("WebSocket connect: {e}"),
            })?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<CdpCommand>(64);
        let (ready_tx, _) = broadcast::channel(8);
        let handler = tokio::spawn(cdp_handler_loop(ws, cmd_rx, ready_tx.clone()));

        let session = Self {
            cmd_tx,
            ready_tx,
            _handler: handler,
        };

        // Page lifecycle events carry the document-load notifications.
        let _ = session.send_cdp("Page.enable", json!({})).await?;
        Ok(session)
    }

    /// Subscribe to document-load notifications.
    pub fn ready_events(&self) -> broadcast::Receiver<()> {
        self.ready_tx.subscribe()
    }

    /// Navigate the attached page.
    pub async fn navigate(&self, url: &str) -> Result<(), SurfaceError> {
        let _ = self
            .send_cdp("Page.navigate", json!({ "url": url }))
            .await
            .map_err(|e| SurfaceError::NavigationFailed {
                url: url.into(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Evaluate a script in the page and return its value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, SurfaceError> {
        let result = self
            .send_cdp(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(exception) = result.get("exceptionDetails") {
            let msg = exception["exception"]["description"]
                .as_str()
                .or_else(|| exception["text"].as_str())
                .unwrap_or("evaluation error");
            return Err(SurfaceError::Script(msg.into()));
        }
        Ok(result["result"]["value"].clone())
    }

    async fn send_cdp(&self, method: &str, params: Value) -> Result<Value, SurfaceError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(CdpCommand {
                method: method.into(),
                params,
                response_tx: tx,
            })
            .await
            .map_err(|_| SurfaceError::Cdp("handler closed".into()))?;

        let result = tokio::time::timeout(COMMAND_TIMEOUT, rx)
            .await
            .map_err(|_| SurfaceError::Timeout {
                timeout_ms: COMMAND_TIMEOUT.as_millis() as u64,
                context: format!("CDP {method}"),
            })?
            .map_err(|_| SurfaceError::Cdp("response dropped".into()))?;

        result.map_err(SurfaceError::Cdp)
    }
}

/// Query the `/json` endpoint for the first page target's WebSocket URL.
async fn discover_page_ws(host: &str, port: u16) -> Result<String, SurfaceError> {
    let url = format!("http://{host}:{port}/json");
    let resp = reqwest::get(&url)
        .await
        .map_err(|e| SurfaceError::AttachFailed {
            context: format!("debug endpoint {url}: {e}"),
        })?;
    let targets: Vec<Value> = resp.json().await.map_err(|e| SurfaceError::AttachFailed {
        context: format!("debug endpoint response: {e}"),
    })?;

    targets
        .iter()
        .find(|t| t["type"] == "page")
        .and_then(|t| t["webSocketDebuggerUrl"].as_str())
        .map(String::from)
        .ok_or_else(|| SurfaceError::AttachFailed {
            context: format!("no debuggable page target at {url}"),
        })
}

/// CDP WebSocket handler loop.
///
/// Sends queued commands, routes responses back by id, and turns
/// `Page.loadEventFired` events into ready notifications.
async fn cdp_handler_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::Receiver<CdpCommand>,
    ready_tx: broadcast::Sender<()>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<u64, PendingTx> = HashMap::new();
    let next_id = AtomicU64::new(1);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                let msg = json!({
                    "id": id,
                    "method": cmd.method,
                    "params": cmd.params,
                });
                let _ = pending.insert(id, cmd.response_tx);
                if ws_tx.send(Message::Text(msg.to_string().into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(val): Result<Value, _> = serde_json::from_str(&text) else {
                    continue;
                };
                if let Some(id) = val.get("id").and_then(Value::as_u64) {
                    if let Some(tx) = pending.remove(&id) {
                        if let Some(err) = val.get("error") {
                            let msg = err["message"].as_str().unwrap_or("CDP error");
                            let _ = tx.send(Err(msg.into()));
                        } else {
                            let _ = tx.send(Ok(val["result"].clone()));
                        }
                    }
                } else if val["method"] == "Page.loadEventFired" {
                    tracing::debug!("page load event");
                    let _ = ready_tx.send(());
                }
            }
        }
    }
    tracing::warn!("CDP handler loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_target_selected_from_listing() {
        let targets = vec![
            json!({"type": "background_page", "webSocketDebuggerUrl": "ws://x/bg"}),
            json!({"type": "page", "webSocketDebuggerUrl": "ws://x/page"}),
        ];
        let url = targets
            .iter()
            .find(|t| t["type"] == "page")
            .and_then(|t| t["webSocketDebuggerUrl"].as_str());
        assert_eq!(url, Some("ws://x/page"));
    }

    #[tokio::test]
    async fn attach_fails_without_endpoint() {
        // Port 1 is never a DevTools endpoint.
        let err = CdpSession::attach("127.0.0.1", 1).await.unwrap_err();
        assert!(matches!(err, SurfaceError::AttachFailed { .. }));
    }
}
