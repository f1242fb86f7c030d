//! End-to-end session pipeline tests: real backend workers driven by fake
//! engines, wired to progress sync and the activity gate the way a host
//! shell would.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::{Duration, Instant};

use serial_test::serial;

use lectern::book::{Book, BookFormat};
use lectern::gate::ActivityGate;
use lectern::progress::ProgressSync;
use lectern::runtime::RuntimeCache;
use lectern::session::{LoadState, SessionController, SessionEvent};
use lectern::store::{MemoryStore, ProgressStore};
use lectern::test_utils::{FakeEngineFactory, FakeFetcher, pump_until};
use lectern::{FALLBACK_TOTAL_PAGES, Fault, OutlineEntry};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = simplelog::SimpleLogger::init(
        simplelog::LevelFilter::Debug,
        simplelog::Config::default(),
    );
}

fn pdf_book(pages: Option<u32>) -> Book {
    Book {
        id: 42,
        file_url: "https://books.example/meditations.pdf".into(),
        file_type: BookFormat::Pdf,
        pages,
    }
}

fn epub_book() -> Book {
    Book {
        id: 43,
        file_url: "https://books.example/meditations.epub".into(),
        file_type: BookFormat::Epub,
        pages: None,
    }
}

fn session_with(factory: Arc<FakeEngineFactory>, fetcher: Arc<FakeFetcher>) -> SessionController {
    init_logging();
    SessionController::new(factory, fetcher, Arc::new(RuntimeCache::new()))
}

#[test]
fn paged_document_reports_structural_total_immediately() {
    let factory = FakeEngineFactory::arc();
    let mut session = session_with(factory.clone(), FakeFetcher::reliable());

    session.open(pdf_book(Some(10)));
    let events = pump_until(&mut session, TIMEOUT, |s| *s.state() == LoadState::Ready);

    assert_eq!(session.position().total_pages, 10);
    assert!(events.contains(&SessionEvent::StateChanged(LoadState::LoadingRuntime)));
    assert!(events.contains(&SessionEvent::StateChanged(LoadState::LoadingDocument)));
    assert!(events.contains(&SessionEvent::PageChanged {
        current_page: 1,
        total_pages: 10,
    }));
}

#[test]
fn last_page_of_paged_document_completes_the_book() {
    let factory = FakeEngineFactory::arc();
    let store = Arc::new(MemoryStore::new());
    let mut progress = ProgressSync::new(store.clone(), 5, 42, Some(10));
    let mut session = session_with(factory.clone(), FakeFetcher::reliable());

    progress.hydrate();
    session.open(pdf_book(Some(10)));
    pump_until(&mut session, TIMEOUT, |s| *s.state() == LoadState::Ready);

    session.go_to_page(10);
    for event in session.pump() {
        if let SessionEvent::PageChanged {
            current_page,
            total_pages,
        } = event
        {
            progress.record_page_change(current_page, total_pages);
        }
    }
    progress.flush();

    let record = store.get(5, 42).unwrap().unwrap();
    assert_eq!(record.percentage, 100);
    assert!(record.completed);

    pump_until(&mut session, TIMEOUT, |s| s.displayed_page() == Some(10));
    assert_eq!(factory.displayed_pages().last(), Some(&10));
}

#[test]
fn document_outline_drives_chapter_jumps() {
    let factory = Arc::new(FakeEngineFactory {
        outline: vec![
            OutlineEntry::new("Cover", 1),
            OutlineEntry::new("Part One", 3),
            OutlineEntry::new("Part Two", 8),
        ],
        ..FakeEngineFactory::default()
    });
    let mut session = session_with(factory, FakeFetcher::reliable());

    session.open(pdf_book(Some(10)));
    let events = pump_until(&mut session, TIMEOUT, |s| !s.outline().is_empty());

    assert!(events.contains(&SessionEvent::OutlineLoaded { chapter_count: 3 }));
    assert_eq!(session.outline()[2], OutlineEntry::new("Part Two", 8));

    session.go_to_chapter(2);
    assert_eq!(session.position().current_page, 8);
    pump_until(&mut session, TIMEOUT, |s| s.displayed_page() == Some(8));
}

#[test]
fn missing_outline_falls_back_to_generated_chapters() {
    let factory = FakeEngineFactory::arc();
    let mut session = session_with(factory, FakeFetcher::reliable());

    session.open(pdf_book(Some(10)));
    pump_until(&mut session, TIMEOUT, |s| !s.outline().is_empty());

    let outline = session.outline();
    assert_eq!(outline.len(), 10);
    assert_eq!(outline[0], OutlineEntry::new("Chapter 1", 1));
    assert_eq!(outline[9].page, 10);

    session.go_to_chapter(4);
    assert_eq!(session.position().current_page, 5);
}

#[test]
fn extracted_text_reaches_the_session() {
    let factory = FakeEngineFactory::arc();
    let mut session = session_with(factory, FakeFetcher::reliable());

    session.open(pdf_book(Some(10)));
    pump_until(&mut session, TIMEOUT, |s| *s.state() == LoadState::Ready);

    session.request_text(2);
    let deadline = Instant::now() + TIMEOUT;
    let mut text = None;
    while text.is_none() {
        for event in session.pump() {
            if let SessionEvent::PageText { page, text: t } = event {
                assert_eq!(page, 2);
                text = Some(t);
            }
        }
        assert!(Instant::now() < deadline, "no page text arrived");
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(text.as_deref(), Some("text of page 2"));
}

#[test]
fn reflow_indexing_success_replaces_the_fallback_total() {
    let factory = Arc::new(FakeEngineFactory {
        index_chunks: 3,
        index_outcome: Some(248),
        ..FakeEngineFactory::default()
    });
    let mut session = session_with(factory, FakeFetcher::reliable());

    session.open(epub_book());
    let events = pump_until(&mut session, TIMEOUT, |s| *s.state() == LoadState::Ready);

    assert!(events.contains(&SessionEvent::StateChanged(LoadState::Indexing)));
    assert_eq!(session.position().total_pages, 248);
    assert!(events.contains(&SessionEvent::PageChanged {
        current_page: 1,
        total_pages: 248,
    }));
}

#[test]
fn reflow_indexing_failure_keeps_fallback_total_for_the_session() {
    let factory = Arc::new(FakeEngineFactory {
        index_outcome: None,
        ..FakeEngineFactory::default()
    });
    let mut session = session_with(factory.clone(), FakeFetcher::reliable());

    session.open(epub_book());
    pump_until(&mut session, TIMEOUT, |s| *s.state() == LoadState::Ready);

    // Indexing failed: the estimate stands for the rest of the session.
    assert_eq!(session.position().total_pages, FALLBACK_TOTAL_PAGES);

    session.go_to_page(50);
    assert_eq!(session.position().percentage, 50);
    assert_eq!(session.position().total_pages, FALLBACK_TOTAL_PAGES);

    pump_until(&mut session, TIMEOUT, |s| s.displayed_page() == Some(50));
    let fractions = factory.displayed_fractions();
    let last = *fractions.last().unwrap();
    assert!((last - 49.0 / 99.0).abs() < 1e-12);
}

#[test]
fn reload_from_failed_restarts_without_refetching_the_runtime() {
    let factory = Arc::new(FakeEngineFactory {
        open_failures: Arc::new(AtomicUsize::new(usize::MAX)),
        ..FakeEngineFactory::default()
    });
    let fetcher = FakeFetcher::reliable();
    let mut session = session_with(factory, fetcher.clone());

    session.open(pdf_book(None));
    pump_until(&mut session, TIMEOUT, |s| {
        matches!(s.state(), LoadState::Failed(Fault::DocumentOpen { .. }))
    });

    for expected_retries in 1..=2 {
        session.reload();
        assert_eq!(session.retry_count(), expected_retries);

        let events = pump_until(&mut session, TIMEOUT, |s| {
            matches!(s.state(), LoadState::Failed(_))
        });
        assert!(events.contains(&SessionEvent::StateChanged(LoadState::Idle)));
    }

    // The runtime was marked loaded by the first attempt; reloads reuse it.
    assert_eq!(fetcher.calls(), 1);
}

#[test]
fn runtime_fetch_failure_is_fatal_and_retryable() {
    let factory = FakeEngineFactory::arc();
    let fetcher = FakeFetcher::failing_first(1);
    let mut session = session_with(factory, fetcher.clone());

    session.open(epub_book());
    pump_until(&mut session, TIMEOUT, |s| {
        matches!(s.state(), LoadState::Failed(Fault::RuntimeLoad { .. }))
    });

    session.reload();
    pump_until(&mut session, TIMEOUT, |s| *s.state() == LoadState::Ready);
    assert_eq!(fetcher.calls(), 2);
}

#[test]
fn font_size_survives_reload() {
    let open_failures = Arc::new(AtomicUsize::new(1));
    let factory = Arc::new(FakeEngineFactory {
        open_failures: open_failures.clone(),
        ..FakeEngineFactory::default()
    });
    let mut session = session_with(factory.clone(), FakeFetcher::reliable());

    session.set_font_size(22);
    session.open(pdf_book(Some(10)));
    pump_until(&mut session, TIMEOUT, |s| {
        matches!(s.state(), LoadState::Failed(_))
    });

    session.reload();
    pump_until(&mut session, TIMEOUT, |s| *s.state() == LoadState::Ready);
    assert_eq!(
        factory.font_px.load(std::sync::atomic::Ordering::SeqCst),
        22
    );
}

#[test]
fn page_changes_reset_the_controls_timer() {
    let factory = FakeEngineFactory::arc();
    let mut session = session_with(factory, FakeFetcher::reliable());

    let t0 = Instant::now();
    let mut gate = ActivityGate::new(t0);

    session.open(pdf_book(Some(10)));
    pump_until(&mut session, TIMEOUT, |s| *s.state() == LoadState::Ready);

    // Page change at t=4s keeps the controls up past the original deadline.
    session.go_to_page(2);
    for event in session.pump() {
        if matches!(event, SessionEvent::PageChanged { .. }) {
            gate.note_activity(t0 + Duration::from_secs(4));
        }
    }
    assert_eq!(gate.tick(t0 + Duration::from_millis(5500)), None);
    assert!(gate.is_visible());
}

#[test]
fn dispose_mid_indexing_is_clean() {
    let factory = Arc::new(FakeEngineFactory {
        index_chunks: u32::MAX,
        ..FakeEngineFactory::default()
    });
    let mut session = session_with(factory, FakeFetcher::reliable());

    session.open(epub_book());
    pump_until(&mut session, TIMEOUT, |s| *s.state() == LoadState::Indexing);

    session.dispose();
    assert_eq!(*session.state(), LoadState::Idle);

    // Drain the Idle transition; after that, late worker callbacks have
    // nowhere to land and the pump stays quiet.
    session.pump();
    std::thread::sleep(Duration::from_millis(10));
    assert!(session.pump().is_empty());
}

#[test]
#[serial]
fn shared_runtime_cache_spans_sessions() {
    let fetcher = FakeFetcher::reliable();
    let cache = RuntimeCache::shared();

    cache.ensure_loaded(BookFormat::Pdf, fetcher.as_ref()).unwrap();
    cache.ensure_loaded(BookFormat::Pdf, fetcher.as_ref()).unwrap();

    assert_eq!(fetcher.calls(), 1);
    assert!(RuntimeCache::shared().is_loaded(BookFormat::Pdf));
}
