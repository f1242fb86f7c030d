//! Document backends: one capability interface over two structurally
//! incompatible formats.
//!
//! Each backend owns a worker thread that runs the load pipeline (ensure
//! runtime, open document, index locations where applicable) and then serves
//! render and text-extraction requests. Results come back as `BackendEvent`s
//! drained by the session pump; requests carry a monotonically increasing
//! `RequestId` so the session can discard superseded completions.

mod paged;
mod reflow;

pub use paged::PagedBackend;
pub use reflow::ReflowBackend;

use crate::engine::OutlineEntry;
use crate::error::Fault;

/// Unique identifier for backend requests. Later requests compare greater,
/// which is what supersession checks rely on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Events surfaced by a backend worker.
#[derive(Debug)]
pub enum BackendEvent {
    /// The rendering runtime for this format is loaded.
    RuntimeReady,
    /// Runtime fetch failed; fatal for the session.
    RuntimeFailed(Fault),
    /// Document opened. `page_count` is present iff it is a structural
    /// property of the file; reflowable documents report `None` and start
    /// from the fallback total.
    Opened { page_count: Option<u32> },
    /// Document open failed; fatal for the session.
    OpenFailed(Fault),
    /// Table of contents, resolved to pages. Synthesized entries when the
    /// file carries no outline of its own; absent for reflowable documents.
    OutlineLoaded(Vec<OutlineEntry>),
    /// Location indexing pass started (reflowable only).
    IndexingStarted,
    /// Location indexing resolved. An error here is non-fatal: the fallback
    /// total stays in effect for the rest of the session.
    IndexingFinished(Result<u32, Fault>),
    /// The engine displayed the requested page.
    Rendered { id: RequestId, page: u32 },
    /// A single render failed; the previously displayed page remains.
    RenderFailed { id: RequestId, page: u32, fault: Fault },
    /// Accessibility text for a page. Empty when unsupported.
    TextExtracted { id: RequestId, page: u32, text: String },
}

/// Capability interface shared by both backend variants. Construction is the
/// only place callers branch on the format.
pub trait DocumentBackend {
    /// Latest known page total: authoritative for paged documents, the
    /// indexed or fallback value for reflowable ones.
    fn page_count(&self) -> u32;

    /// True once `page_count` is structural or indexed rather than estimated.
    fn page_count_authoritative(&self) -> bool;

    /// Ask the engine to display `page` against the given total. Returns the
    /// request id; completion arrives via `poll`.
    fn render_at(&mut self, page: u32, total: u32) -> RequestId;

    /// Request accessibility text for a page. `None` when the backend does
    /// not support extraction.
    fn extract_text(&mut self, page: u32) -> Option<RequestId>;

    fn set_font_size(&mut self, px: u16);

    /// Drain completed worker events. Returns nothing after disposal.
    fn poll(&mut self) -> Vec<BackendEvent>;

    /// Release worker resources. Valid in any state, idempotent, and never
    /// panics; a disposal mid-load cancels the remaining pipeline.
    fn dispose(&mut self);
}
