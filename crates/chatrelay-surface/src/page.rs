//! Selector-driven page driver implementing [`ChatSurface`] over CDP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatrelay_core::observe::{MarkerState, PageObservation};
use chatrelay_core::settings::{SelectorSet, SurfaceSettings};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::cdp::CdpSession;
use crate::error::SurfaceError;
use crate::ChatSurface;

/// The driven chat page, addressed entirely through configured selectors.
pub struct CdpChatPage {
    session: Arc<CdpSession>,
    selectors: SelectorSet,
    poll_interval: Duration,
    settle_delay: Duration,
}

impl CdpChatPage {
    pub fn new(session: Arc<CdpSession>, settings: &SurfaceSettings) -> Self {
        Self {
            session,
            selectors: settings.selectors.clone(),
            poll_interval: settings.poll_interval(),
            settle_delay: settings.settle_delay(),
        }
    }
}

/// JSON-quote a string for embedding in a page script.
fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_default()
}

fn snapshot_script(sel: &SelectorSet) -> String {
    format!(
        r"(() => {{
            const entries = Array.from(document.querySelectorAll({entries}), el => el.innerHTML);
            const markerEl = document.querySelector({marker});
            const marker = markerEl && markerEl.hasAttribute({attr})
                ? markerEl.getAttribute({attr})
                : null;
            return {{ entries, marker }};
        }})()",
        entries = quote(&sel.entries),
        marker = quote(&sel.marker),
        attr = quote(&sel.marker_attr),
    )
}

/// Sets the input value and fires a bubbling `input` event so the host UI's
/// reactivity sees the injected text. Returns `false` without touching
/// anything when either control is missing.
fn inject_script(sel: &SelectorSet, message: &str) -> String {
    format!(
        r"(() => {{
            const input = document.querySelector({input});
            const button = document.querySelector({submit});
            if (!input || !button) return false;
            input.value = {msg};
            input.dispatchEvent(new Event('input', {{ bubbles: true }}));
            return true;
        }})()",
        input = quote(&sel.input),
        submit = quote(&sel.submit),
        msg = quote(message),
    )
}

fn click_script(sel: &SelectorSet) -> String {
    format!(
        r"(() => {{
            const button = document.querySelector({submit});
            if (button) button.click();
        }})()",
        submit = quote(&sel.submit),
    )
}

fn active_target_script(sel: &SelectorSet) -> String {
    format!(
        r"(() => {{
            const el = document.querySelector({label});
            return el ? el.innerText : null;
        }})()",
        label = quote(&sel.target_label),
    )
}

fn entry_count_script(sel: &SelectorSet) -> String {
    format!(
        "document.querySelectorAll({entries}).length",
        entries = quote(&sel.entries),
    )
}

/// Turn a snapshot evaluation result into an observation.
fn parse_snapshot(val: &Value) -> PageObservation {
    let entries = val["entries"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let marker = MarkerState::from_attr(val["marker"].as_str());
    PageObservation { entries, marker }
}

#[async_trait]
impl ChatSurface for CdpChatPage {
    async fn active_target(&self) -> Result<Option<String>, SurfaceError> {
        let val = self
            .session
            .evaluate(&active_target_script(&self.selectors))
            .await?;
        Ok(val.as_str().map(String::from))
    }

    async fn navigate_to_target(&self, target: &str) -> Result<(), SurfaceError> {
        let url = format!("{}{}", self.selectors.base_url, target);
        tracing::info!(%url, "navigating to target");
        self.session.navigate(&url).await
    }

    async fn submit(&self, message: &str) -> Result<(), SurfaceError> {
        let injected = self
            .session
            .evaluate(&inject_script(&self.selectors, message))
            .await?;
        if injected.as_bool() != Some(true) {
            return Err(SurfaceError::ControlsNotFound);
        }

        // Let the host UI register the injected value before clicking.
        tokio::time::sleep(self.settle_delay).await;

        let _ = self.session.evaluate(&click_script(&self.selectors)).await?;
        Ok(())
    }

    async fn entry_count(&self) -> Result<usize, SurfaceError> {
        let val = self
            .session
            .evaluate(&entry_count_script(&self.selectors))
            .await?;
        Ok(val.as_u64().unwrap_or(0) as usize)
    }

    fn watch(&self) -> mpsc::Receiver<PageObservation> {
        let (tx, rx) = mpsc::channel(64);
        let session = Arc::clone(&self.session);
        let script = snapshot_script(&self.selectors);
        let poll = self.poll_interval;

        tokio::spawn(async move {
            let mut last: Option<Value> = None;
            let mut ticker = tokio::time::interval(poll);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                let val = match session.evaluate(&script).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "observation snapshot failed");
                        break;
                    }
                };
                if last.as_ref() == Some(&val) {
                    continue;
                }
                let obs = parse_snapshot(&val);
                last = Some(val);
                if tx.send(obs).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    fn ready_events(&self) -> broadcast::Receiver<()> {
        self.session.ready_events()
    }
}
