//! Reflowable backend (the location-indexed variant).
//!
//! A true page count does not exist for reflowable documents. The worker
//! builds the location index in bounded chunks after opening, serving display
//! requests between chunks so the document stays usable while the pass runs.
//! Until the index resolves, the fallback total keeps navigation and
//! percentage display coherent; indexing failure is non-fatal and leaves the
//! fallback in effect for the rest of the session.

use std::sync::Arc;

use flume::{Receiver, Sender, TryRecvError};
use log::{debug, warn};

use crate::book::{BookFormat, FALLBACK_TOTAL_PAGES};
use crate::engine::{EngineFactory, IndexStep, ReflowEngine};
use crate::mapper;
use crate::runtime::{RuntimeCache, RuntimeFetcher};

use super::{BackendEvent, DocumentBackend, RequestId};

#[derive(Debug)]
enum WorkerRequest {
    Display { id: RequestId, page: u32, fraction: f64 },
    SetFontSize(u16),
    Shutdown,
}

pub struct ReflowBackend {
    request_tx: Option<Sender<WorkerRequest>>,
    event_rx: Receiver<BackendEvent>,
    next_request_id: u64,
    total: u32,
    indexed: bool,
    disposed: bool,
}

impl ReflowBackend {
    /// Spawn the load pipeline for a reflowable document: ensure the
    /// runtime, open the file, build the location index, serve display
    /// requests throughout.
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
            total: FALLBACK_TOTAL_PAGES,
            indexed: false,
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

impl DocumentBackend for ReflowBackend {
    fn page_count(&self) -> u32 {
        self.total
    }

    fn page_count_authoritative(&self) -> bool {
        self.indexed
    }

    fn render_at(&mut self, page: u32, total: u32) -> RequestId {
        let id = self.next_id();
        let fraction = mapper::page_to_location_fraction(page, total);
        self.send(WorkerRequest::Display { id, page, fraction });
        id
    }

    fn extract_text(&mut self, _page: u32) -> Option<RequestId> {
        // The reflow engines we bind expose no per-page text API.
        None
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
            if let BackendEvent::IndexingFinished(Ok(total)) = &event {
                // An empty index is as useless as no index.
                if *total >= 1 {
                    self.total = *total;
                    self.indexed = true;
                }
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
        // Dropping the sender disconnects the channel, which cancels an
        // in-flight indexing pass at the next chunk boundary.
        self.request_tx = None;
        debug!("reflow backend disposed");
    }
}

impl Drop for ReflowBackend {
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
    if let Err(fault) = runtime.ensure_loaded(BookFormat::Epub, fetcher.as_ref()) {
        let _ = event_tx.send(BackendEvent::RuntimeFailed(fault));
        return;
    }
    let _ = event_tx.send(BackendEvent::RuntimeReady);

    let mut engine = engines.reflow();
    if let Err(fault) = engine.open(url) {
        let _ = event_tx.send(BackendEvent::OpenFailed(fault));
        return;
    }
    engine.set_font_size(font_size_px);
    let _ = event_tx.send(BackendEvent::Opened { page_count: None });
    let _ = event_tx.send(BackendEvent::IndexingStarted);

    // Interleave indexing chunks with display requests until the index
    // resolves one way or the other.
    let mut indexing = true;
    while indexing {
        match request_rx.try_recv() {
            Ok(request) => {
                if !handle_request(engine.as_mut(), &event_tx, request) {
                    return;
                }
            }
            Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => match engine.index_step() {
                Ok(IndexStep::More) => {}
                Ok(IndexStep::Done { total }) => {
                    indexing = false;
                    let _ = event_tx.send(BackendEvent::IndexingFinished(Ok(total)));
                }
                Err(fault) => {
                    indexing = false;
                    warn!("location indexing failed, keeping fallback total: {}", fault);
                    let _ = event_tx.send(BackendEvent::IndexingFinished(Err(fault)));
                }
            },
        }
    }

    while let Ok(request) = request_rx.recv() {
        if !handle_request(engine.as_mut(), &event_tx, request) {
            return;
        }
    }
}

/// Returns false when the worker should shut down.
fn handle_request(
    engine: &mut dyn ReflowEngine,
    event_tx: &Sender<BackendEvent>,
    request: WorkerRequest,
) -> bool {
    match request {
        WorkerRequest::Display { id, page, fraction } => match engine.display_at(fraction) {
            Ok(()) => {
                let _ = event_tx.send(BackendEvent::Rendered { id, page });
            }
            Err(fault) => {
                warn!("display at fraction {:.4} failed: {}", fraction, fault);
                let _ = event_tx.send(BackendEvent::RenderFailed { id, page, fault });
            }
        },
        WorkerRequest::SetFontSize(px) => engine.set_font_size(px),
        WorkerRequest::Shutdown => return false,
    }
    true
}
