//! Automation-surface error types.

use thiserror::Error;

/// Errors from driving the host page.
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// The input or submit control could not be located.
    #[error("input or submit control not found")]
    ControlsNotFound,

    /// Failed to attach to the browser's debug endpoint.
    #[error("failed to attach to browser: {context}")]
    AttachFailed { context: String },

    /// Navigation to a target failed.
    #[error("navigation failed for {url}: {reason}")]
    NavigationFailed { url: String, reason: String },

    /// Script evaluation in the page failed.
    #[error("script evaluation failed: {0}")]
    Script(String),

    /// Devtools protocol error.
    #[error("CDP error: {0}")]
    Cdp(String),

    /// Operation timed out.
    #[error("timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controls_not_found_display() {
        assert_eq!(
            SurfaceError::ControlsNotFound.to_string(),
            "input or submit control not found"
        );
    }

    #[test]
    fn attach_failed_display() {
        let err = SurfaceError::AttachFailed {
            context: "connection refused".into(),
        };
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn navigation_failed_display() {
        let err = SurfaceError::NavigationFailed {
            url: "https://example.com/a".into(),
            reason: "timeout".into(),
        };
        assert!(err.to_string().contains("https://example.com/a"));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn timeout_display() {
        let err = SurfaceError::Timeout {
            timeout_ms: 30_000,
            context: "CDP Runtime.evaluate".into(),
        };
        assert!(err.to_string().contains("30000ms"));
    }
}
