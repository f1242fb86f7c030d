//! Catalog-facing types: the book payload served by the collaborator API and
//! the in-memory reading position derived from it.

use serde::{Deserialize, Serialize};

use crate::mapper;

/// Provisional page total substituted while authoritative pagination is not
/// available (reflowable documents before or after a failed indexing pass).
pub const FALLBACK_TOTAL_PAGES: u32 = 100;

/// Document format discriminator. Used once, to pick the backend variant;
/// everything past construction goes through the `DocumentBackend` trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    /// Fixed layout with a structural page count known at open time.
    Pdf,
    /// Reflowable; "pages" are an approximation built by location indexing.
    Epub,
}

impl BookFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            BookFormat::Pdf => "pdf",
            BookFormat::Epub => "epub",
        }
    }

    /// True when the page count is a structural property of the file.
    #[must_use]
    pub fn is_paginated(self) -> bool {
        matches!(self, BookFormat::Pdf)
    }
}

/// Book record as returned by the catalog collaborator (`GET book(id)`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: u64,
    pub file_url: String,
    pub file_type: BookFormat,
    /// Declared page count, when the catalog knows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
}

/// Current reading position. `total_pages` may be an estimate until the
/// backend reports an authoritative (or indexed) value; `percentage` is
/// recomputed from the latest known total whenever either field changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub current_page: u32,
    pub total_pages: u32,
    pub percentage: u8,
}

impl Position {
    /// Build a position, clamping the page into `[1, total]` and deriving
    /// the percentage.
    #[must_use]
    pub fn new(current_page: u32, total_pages: u32) -> Self {
        let total_pages = total_pages.max(1);
        let current_page = current_page.clamp(1, total_pages);
        Self {
            current_page,
            total_pages,
            percentage: mapper::page_to_percentage(current_page, total_pages),
        }
    }

    /// Page 1 of the given total.
    #[must_use]
    pub fn start(total_pages: u32) -> Self {
        Self::new(1, total_pages)
    }

    /// Same page against a new total, with the percentage recomputed.
    #[must_use]
    pub fn with_total(self, total_pages: u32) -> Self {
        Self::new(self.current_page, total_pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_clamps_page_into_bounds() {
        let pos = Position::new(50, 10);
        assert_eq!(pos.current_page, 10);
        assert_eq!(pos.percentage, 100);

        let pos = Position::new(0, 10);
        assert_eq!(pos.current_page, 1);
    }

    #[test]
    fn with_total_recomputes_percentage() {
        let pos = Position::new(50, FALLBACK_TOTAL_PAGES);
        assert_eq!(pos.percentage, 50);

        let pos = pos.with_total(200);
        assert_eq!(pos.current_page, 50);
        assert_eq!(pos.percentage, 25);
    }

    #[test]
    fn book_payload_round_trips_camel_case() {
        let json = r#"{"id":7,"fileUrl":"https://example.com/b.epub","fileType":"epub"}"#;
        let book: Book = serde_json::from_str(json).unwrap();
        assert_eq!(book.file_type, BookFormat::Epub);
        assert_eq!(book.pages, None);
        assert!(!book.file_type.is_paginated());
    }
}
