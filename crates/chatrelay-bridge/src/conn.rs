//! Control-channel connection manager.
//!
//! Maintains at most one live connection to the control endpoint, emits
//! heartbeat frames while connected, and re-establishes the connection after
//! any closure at a fixed interval. Reconnects forever; no backoff, no
//! jitter, no cap. Graceful closes and transport failures take the same
//! path.
//!
//! Outbound delivery is lossy by contract: messages handed over while the
//! channel is down are dropped, never queued for later. Anything still
//! queued when a connection opens is discarded before the session starts.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use chatrelay_core::protocol::ControlMessage;
use chatrelay_core::settings::ControlSettings;

/// Control-channel connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
}

enum Cmd {
    Close,
}

/// Owns the control-channel socket lifecycle.
pub struct ConnectionManager {
    url: String,
    heartbeat: Duration,
    reconnect: Duration,
    state_tx: watch::Sender<ConnState>,
    outbound_tx: mpsc::Sender<ControlMessage>,
    outbound_rx: parking_lot::Mutex<Option<mpsc::Receiver<ControlMessage>>>,
    inbound_tx: mpsc::Sender<ControlMessage>,
    cmd_tx: mpsc::Sender<Cmd>,
    cmd_rx: parking_lot::Mutex<Option<mpsc::Receiver<Cmd>>>,
    task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Build a manager. The returned receiver carries decoded inbound
    /// messages; nothing flows until [`connect`](Self::connect) is called.
    pub fn new(settings: &ControlSettings) -> (Self, mpsc::Receiver<ControlMessage>) {
        let (state_tx, _) = watch::channel(ConnState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);

        let manager = Self {
            url: settings.url.clone(),
            heartbeat: settings.heartbeat_interval(),
            reconnect: settings.reconnect_interval(),
            state_tx,
            outbound_tx,
            outbound_rx: parking_lot::Mutex::new(Some(outbound_rx)),
            inbound_tx,
            cmd_tx,
            cmd_rx: parking_lot::Mutex::new(Some(cmd_rx)),
            task: parking_lot::Mutex::new(None),
        };
        (manager, inbound_rx)
    }

    /// Observe connection state transitions.
    pub fn state(&self) -> watch::Receiver<ConnState> {
        self.state_tx.subscribe()
    }

    /// Sender for outbound control messages. Delivery is lossy while the
    /// channel is down.
    pub fn outbound(&self) -> mpsc::Sender<ControlMessage> {
        self.outbound_tx.clone()
    }

    /// Start the connection loop. No-op if already connecting or connected.
    pub fn connect(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let Some(outbound_rx) = self.outbound_rx.lock().take() else {
            return;
        };
        let Some(cmd_rx) = self.cmd_rx.lock().take() else {
            return;
        };
        *task = Some(tokio::spawn(run(
            self.url.clone(),
            self.heartbeat,
            self.reconnect,
            self.state_tx.clone(),
            outbound_rx,
            self.inbound_tx.clone(),
            cmd_rx,
        )));
    }

    /// Close the current connection if there is one; no-op otherwise. The
    /// close takes the ordinary reconnect path, like any other closure.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(Cmd::Close).await;
    }

    /// Tear down the connection loop entirely (process shutdown and tests).
    pub fn shutdown(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        let _ = self.state_tx.send_replace(ConnState::Disconnected);
    }
}

async fn run(
    url: String,
    heartbeat: Duration,
    reconnect: Duration,
    state_tx: watch::Sender<ConnState>,
    mut outbound_rx: mpsc::Receiver<ControlMessage>,
    inbound_tx: mpsc::Sender<ControlMessage>,
    mut cmd_rx: mpsc::Receiver<Cmd>,
) {
    loop {
        let _ = state_tx.send_replace(ConnState::Connecting);
        match connect_async(&url).await {
            Ok((ws, _)) => {
                // Drop anything queued during the outage, and any stale
                // close request, before the session becomes visible.
                while outbound_rx.try_recv().is_ok() {}
                while cmd_rx.try_recv().is_ok() {}

                let _ = state_tx.send_replace(ConnState::Connected);
                tracing::info!(%url, "control channel connected");

                run_connected(ws, heartbeat, &mut outbound_rx, &inbound_tx, &mut cmd_rx).await;
                tracing::warn!("control channel closed");
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, "control channel connect failed");
            }
        }

        let _ = state_tx.send_replace(ConnState::Disconnected);
        tokio::time::sleep(reconnect).await;
    }
}

async fn run_connected(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    heartbeat: Duration,
    outbound_rx: &mut mpsc::Receiver<ControlMessage>,
    inbound_tx: &mpsc::Sender<ControlMessage>,
    cmd_rx: &mut mpsc::Receiver<Cmd>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            msg = outbound_rx.recv() => {
                let Some(msg) = msg else { break };
                if ws_tx.send(msg.to_ws()).await.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                // A failed probe means the channel is gone; the ticker dies
                // with the session rather than erroring on.
                if ws_tx.send(ControlMessage::Heartbeat.to_ws()).await.is_err() {
                    break;
                }
                tracing::trace!("sent heartbeat");
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Cmd::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(frame)) => {
                        if let Some(decoded) = ControlMessage::from_ws(&frame) {
                            tracing::debug!(kind = decoded.kind(), "control message received");
                            let _ = inbound_tx.send(decoded).await;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "control channel error");
                        break;
                    }
                }
            }
        }
    }
}
