//! Cross-axis ordering rule between departure and return dates.

use chrono::Duration;
use common::{CalendarDate, DateAxis, SearchContext};

/// Minimum gap kept between departure and return when a selection forces
/// the companion date to move.
pub const MIN_STAY_DAYS: i64 = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidityPolicy;

impl ValidityPolicy {
    /// Whether `date` on `axis` may be searched given the other axis'
    /// committed date. One-way contexts impose no constraint.
    pub fn is_fetchable(&self, axis: DateAxis, date: CalendarDate, context: &SearchContext) -> bool {
        if !context.is_round_trip() {
            return true;
        }
        match axis {
            DateAxis::Return => date > context.departure,
            DateAxis::Outbound => match context.return_date {
                Some(ret) => date < ret,
                None => true,
            },
        }
    }

    /// Commit `date` on `axis`, moving the companion date by the minimum
    /// amount needed to keep departure strictly before return.
    pub fn restore_validity(
        &self,
        axis: DateAxis,
        date: CalendarDate,
        context: &SearchContext,
    ) -> SearchContext {
        let mut next = context.with_committed(axis, date);
        if !next.is_round_trip() || self.is_fetchable(axis, date, context) {
            return next;
        }
        match axis {
            DateAxis::Outbound => next.return_date = Some(date + Duration::days(MIN_STAY_DAYS)),
            DateAxis::Return => next.departure = date - Duration::days(MIN_STAY_DAYS),
        }
        next
    }
}
