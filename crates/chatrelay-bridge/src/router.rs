//! Message router: the only component with protocol-level decision logic.
//!
//! Maps each inbound control message onto zero or one automation action and
//! each extraction event onto zero or one outbound control message. Owns the
//! single pending-action slot for dispatches that need a navigation first.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use chatrelay_core::protocol::ControlMessage;
use chatrelay_core::settings::RelaySettings;
use chatrelay_extract::{ExtractEvent, StreamExtractor};
use chatrelay_surface::{ChatSurface, SurfaceError};

/// A dispatch parked until its target finishes loading.
///
/// At most one exists; a newer navigation-requiring dispatch overwrites it
/// (last-writer-wins, no queueing).
#[derive(Clone, Debug, PartialEq, Eq)]
struct PendingAction {
    target: String,
    message: String,
}

/// Routes control messages to the surface and extraction events back out.
pub struct RelayRouter<S> {
    surface: Arc<S>,
    outbound: mpsc::Sender<ControlMessage>,
    flush_threshold: usize,
    decorative: Option<String>,
    pending: Option<PendingAction>,
    cycle: Option<JoinHandle<()>>,
}

impl<S: ChatSurface + 'static> RelayRouter<S> {
    pub fn new(
        surface: Arc<S>,
        outbound: mpsc::Sender<ControlMessage>,
        settings: &RelaySettings,
    ) -> Self {
        let decorative = match settings.surface.selectors.decorative.as_str() {
            "" => None,
            sel => Some(sel.to_string()),
        };
        Self {
            surface,
            outbound,
            flush_threshold: settings.extract.flush_threshold,
            decorative,
            pending: None,
            cycle: None,
        }
    }

    /// Run the router on its own task.
    pub fn spawn(self, inbound: mpsc::Receiver<ControlMessage>) -> JoinHandle<()> {
        tokio::spawn(self.run(inbound))
    }

    /// Consume inbound control messages and surface ready events until the
    /// inbound channel closes.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<ControlMessage>) {
        let mut ready = self.surface.ready_events();
        loop {
            tokio::select! {
                msg = inbound.recv() => {
                    let Some(msg) = msg else { break };
                    match msg {
                        ControlMessage::Dispatch { target, message } => {
                            self.handle_dispatch(target, message).await;
                        }
                        other => {
                            tracing::debug!(kind = other.kind(), "ignoring non-dispatch message");
                        }
                    }
                }
                event = ready.recv() => {
                    match event {
                        Ok(()) => self.handle_ready().await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "ready events lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        if let Some(cycle) = self.cycle.take() {
            cycle.abort();
        }
    }

    async fn handle_dispatch(&mut self, target: String, message: String) {
        // A dispatch arriving mid-cycle supersedes the cycle: observation is
        // detached and no terminal message is emitted for it.
        if let Some(old) = self.cycle.take() {
            tracing::debug!("superseding active extraction cycle");
            old.abort();
        }

        let active = match self.surface.active_target().await {
            Ok(active) => active,
            Err(e) => {
                tracing::warn!(error = %e, "active target lookup failed");
                self.send(ControlMessage::Error).await;
                return;
            }
        };

        if active.as_deref() != Some(target.as_str()) {
            tracing::info!(%target, "target not active, navigating first");
            if let Err(e) = self.surface.navigate_to_target(&target).await {
                tracing::warn!(error = %e, "navigation failed");
                self.send(ControlMessage::Error).await;
                return;
            }
            self.pending = Some(PendingAction { target, message });
            return;
        }

        self.deliver(message).await;
    }

    /// The surface finished loading a document. Deliver the parked dispatch
    /// if there is one; otherwise nothing to do.
    async fn handle_ready(&mut self) {
        let Some(PendingAction { target, message }) = self.pending.take() else {
            return;
        };
        tracing::debug!(%target, "target ready, delivering pending dispatch");
        // Re-enters as a fresh dispatch; the freshly loaded target should
        // now match.
        self.handle_dispatch(target, message).await;
    }

    async fn deliver(&mut self, message: String) {
        // Baseline before submitting: our own message appends one entry, the
        // response appears after it.
        let baseline = match self.surface.entry_count().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "entry count failed");
                self.send(ControlMessage::Error).await;
                return;
            }
        };

        match self.surface.submit(&message).await {
            Ok(()) => {}
            Err(SurfaceError::ControlsNotFound) => {
                tracing::warn!("input or submit control not found");
                self.send(ControlMessage::Error).await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "submit failed");
                self.send(ControlMessage::Error).await;
                return;
            }
        }

        self.start_cycle(baseline);
    }

    fn start_cycle(&mut self, baseline: usize) {
        let mut observations = self.surface.watch();
        let outbound = self.outbound.clone();
        let mut extractor =
            StreamExtractor::new(baseline, self.flush_threshold, self.decorative.clone());

        self.cycle = Some(tokio::spawn(async move {
            while let Some(obs) = observations.recv().await {
                for event in extractor.observe(&obs.entries, obs.marker) {
                    match event {
                        ExtractEvent::Chunk(payload) => {
                            let _ = outbound.send(ControlMessage::Result { payload }).await;
                        }
                        ExtractEvent::Finished => {
                            let _ = outbound.send(ControlMessage::End).await;
                            return;
                        }
                        ExtractEvent::Failed => {
                            let _ = outbound.send(ControlMessage::Error).await;
                            return;
                        }
                    }
                }
            }
            // The observation stream ended before a terminal state: the
            // surface is gone, and the cycle cannot proceed.
            if !extractor.is_finished() {
                tracing::warn!("observation stream ended mid-cycle");
                let _ = outbound.send(ControlMessage::Error).await;
            }
        }));
    }

    async fn send(&self, msg: ControlMessage) {
        let _ = self.outbound.send(msg).await;
    }
}
