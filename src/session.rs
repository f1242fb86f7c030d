//! Session controller: owns one document, its load state, and navigation.
//!
//! The host UI thread drives the controller with a `pump()` call per tick;
//! everything slow happens on the backend worker. Each `open`/`reload`
//! replaces the backend wholesale under a bumped generation counter, so late
//! completions from a previous backend have no channel to land on, and
//! within one backend the latest render request id decides which completion
//! counts as the displayed page.

use std::sync::Arc;

use log::{debug, error, info};

use crate::backend::{
    BackendEvent, DocumentBackend, PagedBackend, ReflowBackend, RequestId,
};
use crate::book::{Book, BookFormat, FALLBACK_TOTAL_PAGES, Position};
use crate::engine::{EngineFactory, OutlineEntry};
use crate::error::Fault;
use crate::runtime::{RuntimeCache, RuntimeFetcher};

/// Default reader font size, with the slider bounds the UI exposes.
pub const DEFAULT_FONT_PX: u16 = 16;
pub const FONT_MIN_PX: u16 = 12;
pub const FONT_MAX_PX: u16 = 24;

/// Load pipeline state. Exactly one is active per document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    LoadingRuntime,
    LoadingDocument,
    Indexing,
    Ready,
    Failed(Fault),
}

/// Events emitted toward the UI shell, progress sync, and activity gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(LoadState),
    PageChanged { current_page: u32, total_pages: u32 },
    /// Table of contents available; entries via [`SessionController::outline`].
    OutlineLoaded { chapter_count: usize },
    /// Accessibility text for a page; empty when the backend cannot extract.
    PageText { page: u32, text: String },
}

pub struct SessionController {
    engines: Arc<dyn EngineFactory>,
    fetcher: Arc<dyn RuntimeFetcher>,
    runtime: Arc<RuntimeCache>,
    book: Option<Book>,
    backend: Option<Box<dyn DocumentBackend>>,
    state: LoadState,
    position: Position,
    font_size_px: u16,
    retry_count: u32,
    generation: u64,
    latest_render: Option<RequestId>,
    displayed_page: Option<u32>,
    outline: Vec<OutlineEntry>,
    events: Vec<SessionEvent>,
}

impl SessionController {
    #[must_use]
    pub fn new(
        engines: Arc<dyn EngineFactory>,
        fetcher: Arc<dyn RuntimeFetcher>,
        runtime: Arc<RuntimeCache>,
    ) -> Self {
        Self {
            engines,
            fetcher,
            runtime,
            book: None,
            backend: None,
            state: LoadState::Idle,
            position: Position::start(1),
            font_size_px: DEFAULT_FONT_PX,
            retry_count: 0,
            generation: 0,
            latest_render: None,
            displayed_page: None,
            outline: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Controller bound to the process-wide runtime cache.
    #[must_use]
    pub fn with_shared_runtime(
        engines: Arc<dyn EngineFactory>,
        fetcher: Arc<dyn RuntimeFetcher>,
    ) -> Self {
        Self::new(engines, fetcher, RuntimeCache::shared())
    }

    /// Start a reading session for `book`, replacing any current one.
    pub fn open(&mut self, book: Book) {
        self.teardown_backend();
        info!("opening {} ({})", book.file_url, book.file_type.as_str());

        self.position = Position::start(book.pages.unwrap_or(FALLBACK_TOTAL_PAGES));
        let backend: Box<dyn DocumentBackend> = match book.file_type {
            BookFormat::Pdf => Box::new(PagedBackend::open(
                book.file_url.clone(),
                self.font_size_px,
                self.runtime.clone(),
                self.fetcher.clone(),
                self.engines.clone(),
            )),
            BookFormat::Epub => Box::new(ReflowBackend::open(
                book.file_url.clone(),
                self.font_size_px,
                self.runtime.clone(),
                self.fetcher.clone(),
                self.engines.clone(),
            )),
        };
        self.book = Some(book);
        self.backend = Some(backend);
        self.set_state(LoadState::LoadingRuntime);
    }

    /// Test seam: run the session against a caller-supplied backend.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn open_with_backend(&mut self, book: Book, backend: Box<dyn DocumentBackend>) {
        self.teardown_backend();
        self.position = Position::start(book.pages.unwrap_or(FALLBACK_TOTAL_PAGES));
        self.book = Some(book);
        self.backend = Some(backend);
        self.set_state(LoadState::LoadingRuntime);
    }

    /// Drain backend completions, advance the load pipeline, and return the
    /// session events accumulated since the previous pump.
    pub fn pump(&mut self) -> Vec<SessionEvent> {
        let backend_events = match self.backend.as_mut() {
            Some(backend) => backend.poll(),
            None => Vec::new(),
        };
        for event in backend_events {
            self.handle_backend_event(event);
        }
        std::mem::take(&mut self.events)
    }

    /// Navigate to a 1-based page. No-op outside `[1, total_pages]` and in
    /// any state where the document cannot display yet. Keyboard prev/next
    /// route through here, so bounds checks and event emission are shared.
    pub fn go_to_page(&mut self, page: u32) {
        if !matches!(self.state, LoadState::Ready | LoadState::Indexing) {
            debug!("navigation ignored in state {:?}", self.state);
            return;
        }
        let total = self.position.total_pages;
        if page < 1 || page > total {
            debug!("page {} outside 1..={}, ignoring", page, total);
            return;
        }
        self.position = Position::new(page, total);
        self.issue_render();
        self.events.push(SessionEvent::PageChanged {
            current_page: page,
            total_pages: total,
        });
    }

    pub fn next_page(&mut self) {
        self.go_to_page(self.position.current_page.saturating_add(1));
    }

    pub fn prev_page(&mut self) {
        if let Some(page) = self.position.current_page.checked_sub(1) {
            self.go_to_page(page);
        }
    }

    /// Jump to a chapter by outline index. No-op when the index is out of
    /// range or no outline has arrived yet; the page jump itself goes
    /// through [`go_to_page`](Self::go_to_page) and shares its checks.
    pub fn go_to_chapter(&mut self, index: usize) {
        match self.outline.get(index) {
            Some(entry) => {
                let page = entry.page;
                debug!("chapter jump to {:?} (page {})", entry.title, page);
                self.go_to_page(page);
            }
            None => debug!("chapter index {} out of range, ignoring", index),
        }
    }

    /// Tear the backend down and rebuild it from scratch. The runtime cache
    /// is process-wide, so a runtime already loaded by an earlier attempt is
    /// not fetched again.
    pub fn reload(&mut self) {
        self.retry_count += 1;
        info!("reload requested (attempt {})", self.retry_count);
        self.teardown_backend();
        self.set_state(LoadState::Idle);
        if let Some(book) = self.book.take() {
            self.open(book);
        }
    }

    /// Desired reader font size, clamped to the slider range. Forwarded to
    /// the backend once it is ready and re-applied automatically when a
    /// reload recreates it.
    pub fn set_font_size(&mut self, px: u16) {
        self.font_size_px = px.clamp(FONT_MIN_PX, FONT_MAX_PX);
        if self.state == LoadState::Ready {
            if let Some(backend) = self.backend.as_mut() {
                backend.set_font_size(self.font_size_px);
            }
        }
    }

    /// Request accessibility text for a page. Backends without extraction
    /// answer immediately with an empty string.
    pub fn request_text(&mut self, page: u32) {
        if self.state != LoadState::Ready {
            return;
        }
        if let Some(backend) = self.backend.as_mut() {
            if backend.extract_text(page).is_none() {
                self.events.push(SessionEvent::PageText {
                    page,
                    text: String::new(),
                });
            }
        }
    }

    /// End the session and release backend resources. Valid in any state.
    pub fn dispose(&mut self) {
        self.teardown_backend();
        self.book = None;
        self.set_state(LoadState::Idle);
    }

    #[must_use]
    pub fn state(&self) -> &LoadState {
        &self.state
    }

    #[must_use]
    pub fn position(&self) -> Position {
        self.position
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Table of contents for the current document: the file's own outline,
    /// or synthesized chapters when it has none. Empty until the backend
    /// reports it, and always empty for reflowable documents.
    #[must_use]
    pub fn outline(&self) -> &[OutlineEntry] {
        &self.outline
    }

    /// Page most recently confirmed displayed by the engine. Trails
    /// `position` while a render is in flight.
    #[must_use]
    pub fn displayed_page(&self) -> Option<u32> {
        self.displayed_page
    }

    #[must_use]
    pub fn font_size_px(&self) -> u16 {
        self.font_size_px
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn teardown_backend(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.dispose();
        }
        self.generation += 1;
        self.latest_render = None;
        self.displayed_page = None;
        self.outline.clear();
    }

    fn issue_render(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            self.latest_render =
                Some(backend.render_at(self.position.current_page, self.position.total_pages));
        }
    }

    fn set_state(&mut self, state: LoadState) {
        if self.state == state {
            return;
        }
        debug!("load state {:?} -> {:?} (gen {})", self.state, state, self.generation);
        self.state = state.clone();
        self.events.push(SessionEvent::StateChanged(state));
    }

    fn fail(&mut self, fault: Fault) {
        error!("session failed: {}", fault);
        self.set_state(LoadState::Failed(fault));
    }

    fn emit_page_changed(&mut self) {
        self.events.push(SessionEvent::PageChanged {
            current_page: self.position.current_page,
            total_pages: self.position.total_pages,
        });
    }

    fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::RuntimeReady => {
                if self.state == LoadState::LoadingRuntime {
                    self.set_state(LoadState::LoadingDocument);
                }
            }
            BackendEvent::RuntimeFailed(fault) | BackendEvent::OpenFailed(fault) => {
                self.fail(fault);
            }
            BackendEvent::Opened { page_count } => {
                if let Some(count) = page_count {
                    // Structural count; authoritative from here on.
                    self.position = self.position.with_total(count);
                    self.set_state(LoadState::Ready);
                } else {
                    // Reflowable: stay on the fallback total until the
                    // index resolves.
                    self.position = self.position.with_total(FALLBACK_TOTAL_PAGES);
                }
                self.emit_page_changed();
                self.issue_render();
            }
            BackendEvent::OutlineLoaded(entries) => {
                self.events.push(SessionEvent::OutlineLoaded {
                    chapter_count: entries.len(),
                });
                self.outline = entries;
            }
            BackendEvent::IndexingStarted => {
                self.set_state(LoadState::Indexing);
            }
            BackendEvent::IndexingFinished(_) => {
                // The backend only marks its count authoritative for a
                // usable index; otherwise the fallback estimate stands.
                let indexed_total = self
                    .backend
                    .as_ref()
                    .filter(|b| b.page_count_authoritative())
                    .map(|b| b.page_count());
                if let Some(total) = indexed_total {
                    if total != self.position.total_pages {
                        self.position = self.position.with_total(total);
                        self.emit_page_changed();
                    }
                }
                self.set_state(LoadState::Ready);
            }
            BackendEvent::Rendered { id, page } => {
                if self.latest_render == Some(id) {
                    self.displayed_page = Some(page);
                } else {
                    debug!("discarding superseded render of page {}", page);
                }
            }
            BackendEvent::RenderFailed { page, .. } => {
                // Worker already logged the fault; the previously displayed
                // page stays up and navigation remains available.
                debug!("render of page {} failed, keeping previous page", page);
            }
            BackendEvent::TextExtracted { page, text, .. } => {
                self.events.push(SessionEvent::PageText { page, text });
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown_backend();
    }
}
