//! Seams to the external rendering libraries.
//!
//! The engine traits mirror the capability surface the backends need, in the
//! callback-free form the workers can drive: blocking calls executed on the
//! backend worker thread. Real implementations bind the library that
//! `RuntimeCache` fetched; tests substitute fakes.

use crate::error::Fault;

/// One entry of a document outline (table of contents), already resolved to
/// the page it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    pub title: String,
    pub page: u32,
}

impl OutlineEntry {
    #[must_use]
    pub fn new(title: impl Into<String>, page: u32) -> Self {
        Self {
            title: title.into(),
            page,
        }
    }
}

/// One bounded chunk of location-index work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStep {
    /// More chunks remain.
    More,
    /// Index complete; `total` is the derived location count.
    Done { total: u32 },
}

/// Engine for fixed-layout documents with a structural page count.
pub trait PagedEngine: Send {
    /// Open the document and return its structural page count.
    fn open(&mut self, url: &str) -> Result<u32, Fault>;

    /// Rasterize and display one page. Blocking; superseded requests are
    /// discarded by the session, not here.
    fn rasterize(&mut self, page: u32) -> Result<(), Fault>;

    /// Plain-text content of one page, for accessibility.
    fn extract_text(&mut self, page: u32) -> Result<String, Fault>;

    /// Document outline with destinations resolved to pages. Empty when the
    /// file carries none; an error here is non-fatal and treated the same.
    fn outline(&mut self) -> Result<Vec<OutlineEntry>, Fault>;

    fn set_font_size(&mut self, px: u16);
}

/// Engine for reflowable documents. The location index is built in bounded
/// chunks so the worker can keep serving display requests while it runs, and
/// so tearing the worker down cancels the pass between chunks.
pub trait ReflowEngine: Send {
    fn open(&mut self, url: &str) -> Result<(), Fault>;

    /// Advance the location index by one chunk of work.
    fn index_step(&mut self) -> Result<IndexStep, Fault>;

    /// Display the given fractional location in `[0.0, 1.0]`.
    fn display_at(&mut self, fraction: f64) -> Result<(), Fault>;

    fn set_font_size(&mut self, px: u16);
}

/// Constructs engine handles once the runtime for their format is loaded.
pub trait EngineFactory: Send + Sync {
    fn paged(&self) -> Box<dyn PagedEngine>;
    fn reflow(&self) -> Box<dyn ReflowEngine>;
}
