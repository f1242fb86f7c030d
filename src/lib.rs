//! Reading session engine for paginated and reflowable ebooks.
//!
//! Two structurally incompatible document formats are presented through one
//! "current page / total pages / percentage" model: fixed-layout files whose
//! page count is structural, and reflowable files whose pages are an
//! approximation derived by a background location-indexing pass. The
//! [`session::SessionController`] owns the asynchronous load pipeline and
//! navigation for one document; [`progress::ProgressSync`] keeps the position
//! synchronized with the remote progress store; [`gate::ActivityGate`] drives
//! the auto-hide timer for the on-screen controls. The host UI thread wires
//! them together and pumps the controller once per tick.

pub mod backend;
pub mod book;
pub mod engine;
pub mod error;
pub mod gate;
pub mod mapper;
pub mod progress;
pub mod runtime;
pub mod session;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use book::{Book, BookFormat, FALLBACK_TOTAL_PAGES, Position};
pub use engine::OutlineEntry;
pub use error::Fault;
pub use gate::{ActivityGate, HIDE_DELAY, Visibility};
pub use progress::ProgressSync;
pub use session::{DEFAULT_FONT_PX, LoadState, SessionController, SessionEvent};
pub use store::{JsonFileStore, MemoryStore, ProgressRecord, ProgressStore};
