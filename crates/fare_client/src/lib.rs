//! Fare-search client library.
//!
//! Provides the `FetchGateway` boundary used by the date strip, and an HTTP
//! implementation backed by a rate limiter and a whole-response cache.

pub mod gateway;
pub mod rate_limit;
pub mod response_cache;
pub mod rest;

pub use gateway::FetchGateway;
pub use rate_limit::RateLimiter;
pub use response_cache::ResponseCache;
pub use rest::{FareSearchClient, FareSearchResponse, FlightOffer, SearchQuery};
