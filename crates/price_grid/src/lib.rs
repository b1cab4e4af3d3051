//! Flexible-date price grid.
//!
//! Keeps the per-date cheapest fares shown in the date strip next to search
//! results, and fills them in the background without starving foreground
//! lookups.

pub mod cache;
pub mod controller;
pub mod scheduler;
pub mod validity;
pub mod window;

pub use cache::{PassId, PendingWork, PriceCacheStore};
pub use controller::{DateSlot, GridPhase, GridSnapshot, PriceGridController};
pub use scheduler::{PassReport, PassScope, PrefetchScheduler, PriceUpdate};
pub use validity::ValidityPolicy;
pub use window::{display_label, DateWindow};

#[cfg(test)]
pub(crate) mod testing;
