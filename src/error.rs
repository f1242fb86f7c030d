//! Fault taxonomy for the session engine.
//!
//! Fatal faults (`RuntimeLoad`, `DocumentOpen`) move the session to
//! `LoadState::Failed` until an explicit reload. Everything else is absorbed
//! where it happens: indexing failures fall back to the estimated total,
//! render failures leave the previous page on screen, progress-write failures
//! are retried by the next navigation event.

/// Errors surfaced by the engine and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("rendering runtime unavailable: {detail}")]
    RuntimeLoad { detail: String },

    #[error("could not open document: {detail}")]
    DocumentOpen { detail: String },

    #[error("location indexing failed: {detail}")]
    Indexing { detail: String },

    #[error("page render failed: {detail}")]
    Render { detail: String },

    #[error("progress store request failed: {detail}")]
    ProgressWrite { detail: String },
}

impl Fault {
    pub fn runtime_load(detail: impl Into<String>) -> Self {
        Self::RuntimeLoad {
            detail: detail.into(),
        }
    }

    pub fn document_open(detail: impl Into<String>) -> Self {
        Self::DocumentOpen {
            detail: detail.into(),
        }
    }

    pub fn indexing(detail: impl Into<String>) -> Self {
        Self::Indexing {
            detail: detail.into(),
        }
    }

    pub fn render(detail: impl Into<String>) -> Self {
        Self::Render {
            detail: detail.into(),
        }
    }

    pub fn progress_write(detail: impl Into<String>) -> Self {
        Self::ProgressWrite {
            detail: detail.into(),
        }
    }

    /// Fatal faults halt navigation until `reload()` is requested.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RuntimeLoad { .. } | Self::DocumentOpen { .. })
    }
}
