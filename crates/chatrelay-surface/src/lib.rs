//! The automation-surface seam and its CDP-backed implementation.
//!
//! The relay core only knows [`ChatSurface`]: locate and drive the page's
//! input controls, navigate between targets, and observe the rendered output
//! region. [`page::CdpChatPage`] implements the seam against a running
//! browser's DevTools endpoint.

pub mod cdp;
pub mod error;
pub mod page;

use async_trait::async_trait;
use chatrelay_core::observe::PageObservation;
use tokio::sync::{broadcast, mpsc};

pub use error::SurfaceError;

/// The driven conversational page, behind a seam the relay core can fake.
#[async_trait]
pub trait ChatSurface: Send + Sync {
    /// Label of the currently loaded target configuration, if the page is in
    /// a recognizable state.
    async fn active_target(&self) -> Result<Option<String>, SurfaceError>;

    /// Load the named target. A ready event fires once the new document has
    /// finished loading.
    async fn navigate_to_target(&self, target: &str) -> Result<(), SurfaceError>;

    /// Inject `message` into the input control (with a synthetic input event
    /// so the host UI's reactivity fires) and trigger the submit control
    /// after the settle delay.
    ///
    /// Fails with [`SurfaceError::ControlsNotFound`] when either control is
    /// missing.
    async fn submit(&self, message: &str) -> Result<(), SurfaceError>;

    /// Number of rendered response entries currently in the document.
    async fn entry_count(&self) -> Result<usize, SurfaceError>;

    /// Begin observing the output region. Observations arrive strictly in
    /// detection order; dropping the receiver detaches the observation.
    fn watch(&self) -> mpsc::Receiver<PageObservation>;

    /// Document-load notifications.
    fn ready_events(&self) -> broadcast::Receiver<()>;
}
