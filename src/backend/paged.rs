//! Fixed-layout backend (the raster-paginated variant).
//!
//! The page count is read once at open time and is authoritative from then
//! on. Rasterization is the expensive part, so it runs on the worker; the
//! session discards completions whose request id is older than the latest
//! navigation.

use std::sync::Arc;

use flume::{Receiver, Sender};
use log::{debug, warn};

use crate::book::BookFormat;
use crate::engine::{EngineFactory, OutlineEntry, PagedEngine};
use crate::runtime::{RuntimeCache, RuntimeFetcher};

use super::{BackendEvent, DocumentBackend, RequestId};

/// Chapters synthesized for files without an outline of their own.
const FALLBACK_CHAPTER_COUNT: u32 = 10;

/// Ten evenly spaced "Chapter N" entries, the stand-in when the file has no
/// outline. Small documents bunch up at page 1 rather than skipping entries.
fn fallback_outline(total: u32) -> Vec<OutlineEntry> {
    let pages_per_chapter = total / FALLBACK_CHAPTER_COUNT;
    (0..FALLBACK_CHAPTER_COUNT)
        .map(|i| {
            let page = (i * pages_per_chapter + 1).min(total.max(1));
            OutlineEntry::new(format!("Chapter {}", i + 1), page)
        })
        .collect()
}

#[derive(Debug)]
enum WorkerRequest {
    Render { id: RequestId, page: u32 },
    ExtractText { id: RequestId, page: u32 },
    SetFontSize(u16),
    Shutdown,
}

pub struct PagedBackend {
    request_tx: Option<Sender<WorkerRequest>>,
    event_rx: Receiver<BackendEvent>,
    next_request_id: u64,
    page_count: u32,
    opened: bool,
    disposed: bool,
}

impl PagedBackend {
    /// Spawn the load pipeline for a paged document: ensure the runtime,
    /// open the file, then serve render requests until disposal.
    #[must_use]
    pub fn open(
        url: String,
        font_size_px: u16,
        runtime: Arc<RuntimeCache>,
        fetcher: Arc<dyn RuntimeFetcher>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        let (request_tx, request_rx) = flume::unbounded();
        let (event_tx, event_rx) = flume::unbounded();

        std::thread::spawn(move || {
            pipeline_worker(&url, font_size_px, runtime, fetcher, engines, request_rx, event_tx);
        });

        Self {
            request_tx: Some(request_tx),
            event_rx,
            next_request_id: 1,
            page_count: 0,
            opened: false,
            disposed: false,
        }
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        id
    }

    fn send(&self, request: WorkerRequest) {
        if let Some(tx) = &self.request_tx {
            let _ = tx.send(request);
        }
    }
}

impl DocumentBackend for PagedBackend {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_count_authoritative(&self) -> bool {
        self.opened
    }

    fn render_at(&mut self, page: u32, _total: u32) -> RequestId {
        let id = self.next_id();
        self.send(WorkerRequest::Render { id, page });
        id
    }

    fn extract_text(&mut self, page: u32) -> Option<RequestId> {
        let id = self.next_id();
        self.send(WorkerRequest::ExtractText { id, page });
        Some(id)
    }

    fn set_font_size(&mut self, px: u16) {
        self.send(WorkerRequest::SetFontSize(px));
    }

    fn poll(&mut self) -> Vec<BackendEvent> {
        if self.disposed {
            return Vec::new();
        }
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            if let BackendEvent::Opened {
                page_count: Some(count),
            } = &event
            {
                self.page_count = *count;
                self.opened = true;
            }
            events.push(event);
        }
        events
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.send(WorkerRequest::Shutdown);
        // Dropping the sender lets a worker still mid-pipeline exit as soon
        // as it reaches the request loop.
        self.request_tx = None;
        debug!("paged backend disposed");
    }
}

impl Drop for PagedBackend {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn pipeline_worker(
    url: &str,
    font_size_px: u16,
    runtime: Arc<RuntimeCache>,
    fetcher: Arc<dyn RuntimeFetcher>,
    engines: Arc<dyn EngineFactory>,
    request_rx: Receiver<WorkerRequest>,
    event_tx: Sender<BackendEvent>,
) {
    if let Err(fault) = runtime.ensure_loaded(BookFormat::Pdf, fetcher.as_ref()) {
        let _ = event_tx.send(BackendEvent::RuntimeFailed(fault));
        return;
    }
    let _ = event_tx.send(BackendEvent::RuntimeReady);

    let mut engine = engines.paged();
    let page_count = match engine.open(url) {
        Ok(count) => count,
        Err(fault) => {
            let _ = event_tx.send(BackendEvent::OpenFailed(fault));
            return;
        }
    };
    engine.set_font_size(font_size_px);
    let _ = event_tx.send(BackendEvent::Opened {
        page_count: Some(page_count),
    });

    let outline = match engine.outline() {
        Ok(entries) if !entries.is_empty() => entries,
        Ok(_) => fallback_outline(page_count),
        Err(fault) => {
            debug!("no outline available: {}", fault);
            fallback_outline(page_count)
        }
    };
    let _ = event_tx.send(BackendEvent::OutlineLoaded(outline));

    while let Ok(request) = request_rx.recv() {
        match request {
            WorkerRequest::Render { id, page } => match engine.rasterize(page) {
                Ok(()) => {
                    let _ = event_tx.send(BackendEvent::Rendered { id, page });
                }
                Err(fault) => {
                    warn!("render of page {} failed: {}", page, fault);
                    let _ = event_tx.send(BackendEvent::RenderFailed { id, page, fault });
                }
            },
            WorkerRequest::ExtractText { id, page } => {
                let text = engine.extract_text(page).unwrap_or_else(|fault| {
                    warn!("text extraction for page {} failed: {}", page, fault);
                    String::new()
                });
                let _ = event_tx.send(BackendEvent::TextExtracted { id, page, text });
            }
            WorkerRequest::SetFontSize(px) => engine.set_font_size(px),
            WorkerRequest::Shutdown => break,
        }
    }
}
