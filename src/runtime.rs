//! Process-wide cache of loaded rendering runtimes.
//!
//! The external rendering library for each format is fetched at most once per
//! process, no matter how many documents get opened. Concurrent callers while
//! a fetch is in flight block on the same attempt and all observe its
//! outcome; a failed attempt resets the slot instead of poisoning it, so a
//! later call may retry the fetch.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, LazyLock, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use crate::book::BookFormat;
use crate::error::Fault;

/// Fetches the external rendering library for one format. Implementations
/// wrap whatever delivery mechanism the host uses; tests substitute scripted
/// fetchers.
pub trait RuntimeFetcher: Send + Sync {
    fn fetch(&self, format: BookFormat) -> Result<(), Fault>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SlotState {
    #[default]
    Idle,
    Loading,
    Loaded,
}

#[derive(Debug, Default)]
struct Slot {
    state: SlotState,
    attempts: u64,
    last_failure: Option<(u64, String)>,
}

/// Per-format load cache with in-flight-request deduplication.
#[derive(Debug, Default)]
pub struct RuntimeCache {
    slots: Mutex<HashMap<BookFormat, Slot>>,
    resolved: Condvar,
}

static GLOBAL: LazyLock<Arc<RuntimeCache>> = LazyLock::new(|| Arc::new(RuntimeCache::new()));

impl RuntimeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache shared by all reading sessions.
    #[must_use]
    pub fn shared() -> Arc<RuntimeCache> {
        GLOBAL.clone()
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<BookFormat, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once a runtime for the format has been loaded successfully.
    #[must_use]
    pub fn is_loaded(&self, format: BookFormat) -> bool {
        self.lock_slots()
            .get(&format)
            .is_some_and(|slot| slot.state == SlotState::Loaded)
    }

    /// Ensure the runtime for `format` is loaded, fetching it through
    /// `fetcher` if needed. The fetch runs without the cache lock held;
    /// callers arriving while it is in flight wait for that same attempt.
    pub fn ensure_loaded(
        &self,
        format: BookFormat,
        fetcher: &dyn RuntimeFetcher,
    ) -> Result<(), Fault> {
        let mut slots = self.lock_slots();
        loop {
            let slot = slots.entry(format).or_default();
            match slot.state {
                SlotState::Loaded => return Ok(()),

                SlotState::Idle => {
                    slot.attempts += 1;
                    let attempt = slot.attempts;
                    slot.state = SlotState::Loading;
                    drop(slots);

                    debug!(
                        "fetching {} rendering runtime (attempt {})",
                        format.as_str(),
                        attempt
                    );
                    let outcome = fetcher.fetch(format);

                    slots = self.lock_slots();
                    let slot = slots.entry(format).or_default();
                    match &outcome {
                        Ok(()) => {
                            slot.state = SlotState::Loaded;
                            info!("{} rendering runtime ready", format.as_str());
                        }
                        Err(fault) => {
                            slot.state = SlotState::Idle;
                            slot.last_failure = Some((attempt, fault.to_string()));
                            warn!("{} runtime fetch failed: {}", format.as_str(), fault);
                        }
                    }
                    self.resolved.notify_all();
                    return outcome;
                }

                SlotState::Loading => {
                    let attempt = slot.attempts;
                    slots = self
                        .resolved
                        .wait(slots)
                        .unwrap_or_else(PoisonError::into_inner);
                    let slot = slots.entry(format).or_default();
                    if slot.state == SlotState::Loaded {
                        return Ok(());
                    }
                    if slot.state == SlotState::Idle {
                        if let Some((failed_attempt, detail)) = &slot.last_failure {
                            if *failed_attempt == attempt {
                                return Err(Fault::runtime_load(detail.clone()));
                            }
                        }
                    }
                    // A newer attempt took over; evaluate it from the top.
                }
            }
        }
    }
}
