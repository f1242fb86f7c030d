//! Progress synchronization: hydrate once, then persist page changes.
//!
//! Hydration runs before the first write can be issued, so a write can never
//! race ahead of it and get clobbered. Writes are fire-and-forget for the
//! caller but serialized on a single writer thread; the worker coalesces the
//! queue to the newest pending record before each store call, so a later
//! page's write is never overtaken by an earlier one still in flight. A
//! failed write is absorbed with a warning and superseded by the write the
//! next navigation event produces.

use std::sync::Arc;

use chrono::Utc;
use flume::{Receiver, Sender};
use log::{debug, warn};

use crate::book::{FALLBACK_TOTAL_PAGES, Position};
use crate::store::{ProgressRecord, ProgressStore};

enum WriteJob {
    Upsert(ProgressRecord),
    Flush(Sender<()>),
}

pub struct ProgressSync {
    user_id: u64,
    book_id: u64,
    declared_pages: Option<u32>,
    store: Arc<dyn ProgressStore>,
    job_tx: Option<Sender<WriteJob>>,
    hydrated: Option<Position>,
}

impl ProgressSync {
    /// Create the sync for one (user, book) pair. `declared_pages` seeds the
    /// synthesized default record when the store has none.
    #[must_use]
    pub fn new(
        store: Arc<dyn ProgressStore>,
        user_id: u64,
        book_id: u64,
        declared_pages: Option<u32>,
    ) -> Self {
        let (job_tx, job_rx) = flume::unbounded();
        let worker_store = store.clone();
        std::thread::spawn(move || write_worker(&job_rx, worker_store.as_ref()));
        Self {
            user_id,
            book_id,
            declared_pages,
            store,
            job_tx: Some(job_tx),
            hydrated: None,
        }
    }

    /// Seed the in-memory position from the stored record. When no record
    /// exists, a default is synthesized and created upstream; when the read
    /// fails, hydration is abandoned with the same default. Idempotent:
    /// repeated calls without intervening writes return the same position.
    ///
    /// The read runs synchronously on the caller's thread, which is what
    /// keeps it ordered before any write; call it during session setup, not
    /// from a per-tick path.
    pub fn hydrate(&mut self) -> Position {
        if let Some(position) = self.hydrated {
            return position;
        }
        let position = match self.store.get(self.user_id, self.book_id) {
            Ok(Some(record)) => {
                debug!(
                    "hydrated book {} at page {}/{}",
                    self.book_id, record.current_page, record.total_pages
                );
                Position::new(record.current_page, record.total_pages)
            }
            Ok(None) => {
                let position = self.default_position();
                self.enqueue(position);
                position
            }
            Err(fault) => {
                warn!(
                    "hydration for book {} failed, starting from defaults: {}",
                    self.book_id, fault
                );
                self.default_position()
            }
        };
        self.hydrated = Some(position);
        position
    }

    /// Persist a page change. Recomputes the percentage from the latest
    /// known total and upserts asynchronously.
    pub fn record_page_change(&mut self, current_page: u32, total_pages: u32) {
        if self.hydrated.is_none() {
            self.hydrate();
        }
        let position = Position::new(current_page, total_pages);
        self.hydrated = Some(position);
        self.enqueue(position);
    }

    /// Block until every queued write has been attempted.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = flume::bounded(1);
        if let Some(tx) = &self.job_tx {
            if tx.send(WriteJob::Flush(ack_tx)).is_ok() {
                let _ = ack_rx.recv();
            }
        }
    }

    #[must_use]
    pub fn position(&self) -> Option<Position> {
        self.hydrated
    }

    fn default_position(&self) -> Position {
        Position::start(self.declared_pages.unwrap_or(FALLBACK_TOTAL_PAGES))
    }

    fn enqueue(&self, position: Position) {
        let record = ProgressRecord {
            user_id: self.user_id,
            book_id: self.book_id,
            current_page: position.current_page,
            total_pages: position.total_pages,
            percentage: position.percentage,
            completed: position.percentage == 100,
            last_read_at: Utc::now(),
        };
        if let Some(tx) = &self.job_tx {
            let _ = tx.send(WriteJob::Upsert(record));
        }
    }
}

impl Drop for ProgressSync {
    fn drop(&mut self) {
        // Disconnecting the channel lets the worker drain what is queued and
        // exit.
        self.job_tx = None;
    }
}

fn write_worker(job_rx: &Receiver<WriteJob>, store: &dyn ProgressStore) {
    while let Ok(first) = job_rx.recv() {
        let mut pending: Option<ProgressRecord> = None;
        let mut acks: Vec<Sender<()>> = Vec::new();

        absorb(first, &mut pending, &mut acks);
        while let Ok(job) = job_rx.try_recv() {
            absorb(job, &mut pending, &mut acks);
        }

        if let Some(record) = pending {
            match store.put(&record) {
                Ok(stored) => debug!(
                    "progress for book {} saved at {}%",
                    stored.book_id, stored.percentage
                ),
                Err(fault) => warn!(
                    "progress write for book {} failed: {}",
                    record.book_id, fault
                ),
            }
        }
        for ack in acks {
            let _ = ack.send(());
        }
    }
}

/// Coalesce queued jobs: only the newest upsert survives, flush acks are
/// answered after the write it covers.
fn absorb(job: WriteJob, pending: &mut Option<ProgressRecord>, acks: &mut Vec<Sender<()>>) {
    match job {
        WriteJob::Upsert(record) => *pending = Some(record),
        WriteJob::Flush(ack) => acks.push(ack),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn hydration_synthesizes_and_creates_the_default_record() {
        let store = Arc::new(MemoryStore::new());
        let mut sync = ProgressSync::new(store.clone(), 1, 7, Some(320));

        let position = sync.hydrate();
        assert_eq!(position, Position::new(1, 320));

        sync.flush();
        let record = store.get(1, 7).unwrap().unwrap();
        assert_eq!(record.current_page, 1);
        assert_eq!(record.total_pages, 320);
        assert_eq!(record.percentage, 0);
        assert!(!record.completed);
    }

    #[test]
    fn hydration_defaults_to_fallback_total_without_declared_pages() {
        let store = Arc::new(MemoryStore::new());
        let mut sync = ProgressSync::new(store, 1, 7, None);
        assert_eq!(sync.hydrate().total_pages, FALLBACK_TOTAL_PAGES);
    }

    #[test]
    fn hydration_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(&ProgressRecord {
                user_id: 1,
                book_id: 7,
                current_page: 40,
                total_pages: 200,
                percentage: 20,
                completed: false,
                last_read_at: Utc::now(),
            })
            .unwrap();

        let mut sync = ProgressSync::new(store, 1, 7, None);
        let first = sync.hydrate();
        let second = sync.hydrate();
        assert_eq!(first, second);
        assert_eq!(first.current_page, 40);
    }

    #[test]
    fn completion_flips_exactly_at_one_hundred_percent() {
        let store = Arc::new(MemoryStore::new());
        let mut sync = ProgressSync::new(store.clone(), 1, 7, Some(10));

        sync.record_page_change(9, 10);
        sync.flush();
        assert!(!store.get(1, 7).unwrap().unwrap().completed);

        sync.record_page_change(10, 10);
        sync.flush();
        let record = store.get(1, 7).unwrap().unwrap();
        assert_eq!(record.percentage, 100);
        assert!(record.completed);
    }

    #[test]
    fn first_write_hydrates_first() {
        let store = Arc::new(MemoryStore::new());
        let mut sync = ProgressSync::new(store.clone(), 1, 7, Some(50));

        // No explicit hydrate call: the write must not race ahead of it.
        sync.record_page_change(5, 50);
        sync.flush();

        assert_eq!(sync.position().unwrap().current_page, 5);
        assert_eq!(store.get(1, 7).unwrap().unwrap().current_page, 5);
    }
}
