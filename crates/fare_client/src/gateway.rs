//! The single-date price lookup boundary.

use async_trait::async_trait;
use common::{CalendarDate, DateAxis, FetchError, Money, SearchContext};
use tokio_util::sync::CancellationToken;

/// Looks up the cheapest per-person fare for one (axis, date) candidate.
///
/// Implementations must return promptly with `FetchError::Cancelled` once
/// `cancel` fires, and must be safe to call more than once with the same
/// inputs.
#[async_trait]
pub trait FetchGateway: Send + Sync {
    async fn fetch_min_price(
        &self,
        axis: DateAxis,
        date: CalendarDate,
        context: &SearchContext,
        cancel: &CancellationToken,
    ) -> Result<Money, FetchError>;
}
