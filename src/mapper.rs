//! Pure page/percentage arithmetic shared by both backends.
//!
//! Deterministic and independent of backend state: a page number and a total
//! in, a percentage or a fractional location out. Totals of zero are treated
//! as one and pages are clamped into `[1, total]` before mapping.

/// Map a 1-based page onto an integer percentage in `[0, 100]`.
#[must_use]
pub fn page_to_percentage(page: u32, total: u32) -> u8 {
    let total = total.max(1);
    let page = page.clamp(1, total);
    let pct = (100.0 * f64::from(page) / f64::from(total)).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Fractional location in `[0.0, 1.0]` for displaying a page of a
/// reflowable document: page 1 maps to 0.0, the last page to 1.0.
#[must_use]
pub fn page_to_location_fraction(page: u32, total: u32) -> f64 {
    let total = total.max(1);
    let page = page.clamp(1, total);
    f64::from(page - 1) / f64::from((total - 1).max(1))
}
