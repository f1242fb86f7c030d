//! Fakes for exercising the session pipeline without real rendering
//! libraries: scripted runtime fetchers, engines with observable side
//! effects, and a backend whose completions the test emits by hand.

use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};

use crate::backend::{BackendEvent, DocumentBackend, RequestId};
use crate::book::BookFormat;
use crate::engine::{EngineFactory, IndexStep, OutlineEntry, PagedEngine, ReflowEngine};
use crate::error::Fault;
use crate::runtime::RuntimeFetcher;
use crate::session::{SessionController, SessionEvent};

/// Counts fetches; fails the first `fail_first` of them.
pub struct FakeFetcher {
    calls: AtomicUsize,
    fail_first: usize,
}

impl FakeFetcher {
    #[must_use]
    pub fn reliable() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: 0,
        })
    }

    #[must_use]
    pub fn failing_first(fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first,
        })
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RuntimeFetcher for FakeFetcher {
    fn fetch(&self, _format: BookFormat) -> Result<(), Fault> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            Err(Fault::runtime_load("scripted fetch failure"))
        } else {
            Ok(())
        }
    }
}

/// Factory for fake engines. Construction parameters are plain fields;
/// observation happens through the shared logs.
pub struct FakeEngineFactory {
    /// Structural page count the paged engine reports at open.
    pub paged_pages: u32,
    /// Outline the paged engine reports; empty means the file has none.
    pub outline: Vec<OutlineEntry>,
    /// How many `open` calls (either variant) fail before one succeeds.
    /// `usize::MAX` keeps failing.
    pub open_failures: Arc<AtomicUsize>,
    /// Index chunks before the reflow pass resolves.
    pub index_chunks: u32,
    /// `Some(total)` for a successful index, `None` for a failing one.
    pub index_outcome: Option<u32>,
    /// Pages the paged engine displayed, in order.
    pub displayed_pages: Arc<Mutex<Vec<u32>>>,
    /// Fractions the reflow engine displayed, in order.
    pub displayed_fractions: Arc<Mutex<Vec<f64>>>,
    /// Last font size any engine saw.
    pub font_px: Arc<AtomicU16>,
}

impl Default for FakeEngineFactory {
    fn default() -> Self {
        Self {
            paged_pages: 10,
            outline: Vec::new(),
            open_failures: Arc::new(AtomicUsize::new(0)),
            index_chunks: 2,
            index_outcome: Some(248),
            displayed_pages: Arc::new(Mutex::new(Vec::new())),
            displayed_fractions: Arc::new(Mutex::new(Vec::new())),
            font_px: Arc::new(AtomicU16::new(0)),
        }
    }
}

impl FakeEngineFactory {
    #[must_use]
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn displayed_pages(&self) -> Vec<u32> {
        self.displayed_pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn displayed_fractions(&self) -> Vec<f64> {
        self.displayed_fractions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

struct FakePagedEngine {
    pages: u32,
    outline: Vec<OutlineEntry>,
    open_failures: Arc<AtomicUsize>,
    displayed: Arc<Mutex<Vec<u32>>>,
    font_px: Arc<AtomicU16>,
}

impl PagedEngine for FakePagedEngine {
    fn open(&mut self, _url: &str) -> Result<u32, Fault> {
        if take_failure(&self.open_failures) {
            Err(Fault::document_open("scripted open failure"))
        } else {
            Ok(self.pages)
        }
    }

    fn rasterize(&mut self, page: u32) -> Result<(), Fault> {
        self.displayed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(page);
        Ok(())
    }

    fn extract_text(&mut self, page: u32) -> Result<String, Fault> {
        Ok(format!("text of page {}", page))
    }

    fn outline(&mut self) -> Result<Vec<OutlineEntry>, Fault> {
        Ok(self.outline.clone())
    }

    fn set_font_size(&mut self, px: u16) {
        self.font_px.store(px, Ordering::SeqCst);
    }
}

struct FakeReflowEngine {
    open_failures: Arc<AtomicUsize>,
    chunks_left: u32,
    outcome: Option<u32>,
    displayed: Arc<Mutex<Vec<f64>>>,
    font_px: Arc<AtomicU16>,
}

impl ReflowEngine for FakeReflowEngine {
    fn open(&mut self, _url: &str) -> Result<(), Fault> {
        if take_failure(&self.open_failures) {
            Err(Fault::document_open("scripted open failure"))
        } else {
            Ok(())
        }
    }

    fn index_step(&mut self) -> Result<IndexStep, Fault> {
        if self.chunks_left > 0 {
            self.chunks_left -= 1;
            return Ok(IndexStep::More);
        }
        match self.outcome {
            Some(total) => Ok(IndexStep::Done { total }),
            None => Err(Fault::indexing("scripted indexing failure")),
        }
    }

    fn display_at(&mut self, fraction: f64) -> Result<(), Fault> {
        self.displayed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fraction);
        Ok(())
    }

    fn set_font_size(&mut self, px: u16) {
        self.font_px.store(px, Ordering::SeqCst);
    }
}

impl EngineFactory for FakeEngineFactory {
    fn paged(&self) -> Box<dyn PagedEngine> {
        Box::new(FakePagedEngine {
            pages: self.paged_pages,
            outline: self.outline.clone(),
            open_failures: self.open_failures.clone(),
            displayed: self.displayed_pages.clone(),
            font_px: self.font_px.clone(),
        })
    }

    fn reflow(&self) -> Box<dyn ReflowEngine> {
        Box::new(FakeReflowEngine {
            open_failures: self.open_failures.clone(),
            chunks_left: self.index_chunks,
            outcome: self.index_outcome,
            displayed: self.displayed_fractions.clone(),
            font_px: self.font_px.clone(),
        })
    }
}

/// Test side of a [`ScriptedBackend`]: emit completions in any order and
/// observe the requests the session issued.
pub struct ScriptHandle {
    event_tx: Sender<BackendEvent>,
    issued: Arc<Mutex<Vec<(RequestId, u32)>>>,
}

impl ScriptHandle {
    pub fn emit(&self, event: BackendEvent) {
        let _ = self.event_tx.send(event);
    }

    #[must_use]
    pub fn issued(&self) -> Vec<(RequestId, u32)> {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Backend whose worker is the test itself: render requests are recorded,
/// completions arrive only when the test emits them.
pub struct ScriptedBackend {
    page_count: u32,
    authoritative: bool,
    event_rx: Receiver<BackendEvent>,
    issued: Arc<Mutex<Vec<(RequestId, u32)>>>,
    next_id: u64,
    disposed: bool,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new(page_count: u32) -> (Self, ScriptHandle) {
        let (event_tx, event_rx) = flume::unbounded();
        let issued = Arc::new(Mutex::new(Vec::new()));
        let backend = Self {
            page_count,
            authoritative: false,
            event_rx,
            issued: issued.clone(),
            next_id: 1,
            disposed: false,
        };
        (backend, ScriptHandle { event_tx, issued })
    }
}

impl DocumentBackend for ScriptedBackend {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_count_authoritative(&self) -> bool {
        self.authoritative
    }

    fn render_at(&mut self, page: u32, _total: u32) -> RequestId {
        let id = RequestId::new(self.next_id);
        self.next_id += 1;
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, page));
        id
    }

    fn extract_text(&mut self, _page: u32) -> Option<RequestId> {
        None
    }

    fn set_font_size(&mut self, _px: u16) {}

    fn poll(&mut self) -> Vec<BackendEvent> {
        if self.disposed {
            return Vec::new();
        }
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            match &event {
                BackendEvent::Opened {
                    page_count: Some(count),
                } => {
                    self.page_count = *count;
                    self.authoritative = true;
                }
                BackendEvent::IndexingFinished(Ok(total)) if *total >= 1 => {
                    self.page_count = *total;
                    self.authoritative = true;
                }
                _ => {}
            }
            events.push(event);
        }
        events
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }
}

/// Pump `session` until `done` holds, failing the test after `timeout`.
/// Returns every session event seen along the way.
pub fn pump_until(
    session: &mut SessionController,
    timeout: Duration,
    mut done: impl FnMut(&SessionController) -> bool,
) -> Vec<SessionEvent> {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    loop {
        events.extend(session.pump());
        if done(session) {
            return events;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for session condition; events so far: {:?}",
            events
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}
