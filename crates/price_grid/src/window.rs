//! Candidate date windows.

use chrono::Duration;
use common::{CacheKey, CalendarDate, DateAxis};

/// Display format of a strip label, e.g. `Wed 10 Dec`.
pub const LABEL_FORMAT: &str = "%a %d %b";

pub fn display_label(date: CalendarDate) -> String {
    date.format(LABEL_FORMAT).to_string()
}

/// Ordered dates centered on a base date: `dates[i] = base + (i - center)` days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWindow {
    axis: DateAxis,
    base: CalendarDate,
    dates: Vec<CalendarDate>,
}

impl DateWindow {
    pub fn generate(axis: DateAxis, base: CalendarDate, size: usize) -> Self {
        let center = (size / 2) as i64;
        let dates = (0..size as i64)
            .map(|i| base + Duration::days(i - center))
            .collect();
        Self { axis, base, dates }
    }

    pub fn axis(&self) -> DateAxis {
        self.axis
    }

    pub fn base(&self) -> CalendarDate {
        self.base
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn center_index(&self) -> usize {
        self.dates.len() / 2
    }

    /// Distance of `index` from the center, used as fetch priority.
    pub fn distance(&self, index: usize) -> usize {
        index.abs_diff(self.center_index())
    }

    pub fn date(&self, index: usize) -> Option<CalendarDate> {
        self.dates.get(index).copied()
    }

    pub fn key(&self, index: usize) -> Option<CacheKey> {
        self.date(index).map(|date| CacheKey::new(self.axis, date))
    }

    pub fn index_of(&self, date: CalendarDate) -> Option<usize> {
        self.dates.iter().position(|d| *d == date)
    }

    pub fn dates(&self) -> &[CalendarDate] {
        &self.dates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> CalendarDate {
        CalendarDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn test_window_is_centered_on_base() {
        let w = DateWindow::generate(DateAxis::Outbound, date(2025, 12, 10), 7);
        assert_eq!(w.len(), 7);
        assert_eq!(w.center_index(), 3);
        assert_eq!(w.date(0), Some(date(2025, 12, 7)));
        assert_eq!(w.date(3), Some(date(2025, 12, 10)));
        assert_eq!(w.date(6), Some(date(2025, 12, 13)));
        assert_eq!(w.date(7), None);
        assert_eq!(w.index_of(date(2025, 12, 12)), Some(5));
    }

    #[test]
    fn test_window_crosses_month_and_year() {
        let w = DateWindow::generate(DateAxis::Return, date(2025, 12, 30), 7);
        assert_eq!(w.date(6), Some(date(2026, 1, 2)));
        assert_eq!(w.key(6), Some(CacheKey::new(DateAxis::Return, date(2026, 1, 2))));
    }

    #[test]
    fn test_even_size_uses_floor_center() {
        let w = DateWindow::generate(DateAxis::Outbound, date(2025, 3, 1), 4);
        assert_eq!(w.center_index(), 2);
        assert_eq!(w.date(0), Some(date(2025, 2, 27)));
        assert_eq!(w.distance(0), 2);
        assert_eq!(w.distance(3), 1);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = DateWindow::generate(DateAxis::Outbound, date(2025, 12, 10), 7);
        let b = DateWindow::generate(DateAxis::Outbound, date(2025, 12, 10), 7);
        assert_eq!(a, b);
        assert!(DateWindow::generate(DateAxis::Outbound, date(2025, 12, 10), 0).is_empty());
    }

    #[test]
    fn test_display_label() {
        assert_eq!(display_label(date(2025, 12, 10)), "Wed 10 Dec");
    }
}
