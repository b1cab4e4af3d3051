//! REST client for the upstream fare-search API.
//!
//! One `POST /flights/search` per (axis, date) candidate, reduced to the
//! cheapest per-person fare. Responses are shared through `ResponseCache`
//! so a query already run by the main search never hits the network twice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::config::UpstreamConfig;
use common::{CabinClass, CalendarDate, DateAxis, FetchError, Money, SearchContext};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::gateway::FetchGateway;
use crate::rate_limit::RateLimiter;
use crate::response_cache::ResponseCache;

// ── Wire types ────────────────────────────────────────────────────────

/// Full parameter set of one upstream search. Also the response cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SearchQuery {
    pub origin: String,
    pub destination: String,
    pub departure_date: CalendarDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_date: Option<CalendarDate>,
    pub adults: u32,
    pub children: u32,
    pub infants: u32,
    pub cabin: CabinClass,
}

impl SearchQuery {
    /// The query for the committed context itself.
    pub fn from_context(context: &SearchContext) -> Self {
        Self {
            origin: context.origin.clone(),
            destination: context.destination.clone(),
            departure_date: context.departure,
            return_date: context.committed(DateAxis::Return),
            adults: context.adults,
            children: context.children,
            infants: context.infants,
            cabin: context.cabin,
        }
    }

    /// The query for one candidate date, keeping the other axis committed.
    pub fn for_candidate(axis: DateAxis, date: CalendarDate, context: &SearchContext) -> Self {
        Self::from_context(&context.with_committed(axis, date))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FareSearchResponse {
    #[serde(default)]
    pub flights: Vec<FlightOffer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlightOffer {
    #[serde(default)]
    pub id: String,
    pub price: OfferPrice,
}

/// Total price of an offer for all passengers, in major units.
#[derive(Debug, Clone, Deserialize)]
pub struct OfferPrice {
    pub total: f64,
    pub currency: String,
}

/// Cheapest per-person fare across `offers`.
///
/// Offers with a non-finite or non-positive total are skipped.
pub fn min_per_person(offers: &[FlightOffer], paying_passengers: u32) -> Result<Money, FetchError> {
    let divisor = f64::from(paying_passengers.max(1));

    offers
        .iter()
        .filter(|o| o.price.total.is_finite() && o.price.total > 0.0)
        .filter_map(|o| Money::from_major(o.price.total / divisor, o.price.currency.clone()))
        .min_by_key(|m| m.amount_cents)
        .ok_or_else(|| {
            FetchError::NoUsablePrice(format!("{} offers, none with a usable price", offers.len()))
        })
}

// ── Client ────────────────────────────────────────────────────────────

/// Async REST client for fare search.
#[derive(Debug, Clone)]
pub struct FareSearchClient {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    responses: ResponseCache,
}

impl FareSearchClient {
    pub fn new(config: &UpstreamConfig, responses: ResponseCache) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::per_second(config.requests_per_sec),
            responses,
        }
    }

    /// The response cache this client reads and populates.
    pub fn responses(&self) -> &ResponseCache {
        &self.responses
    }

    /// Run one upstream search, bypassing the response cache.
    pub async fn search(&self, query: &SearchQuery) -> Result<FareSearchResponse, FetchError> {
        self.limiter.wait().await;

        let url = format!("{}/flights/search", self.base_url);
        debug!(
            "Searching {}->{} dep={} ret={:?}",
            query.origin, query.destination, query.departure_date, query.return_date
        );

        let resp = self
            .client
            .post(&url)
            .json(query)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::UpstreamStatus {
                status,
                message: body.chars().take(500).collect(),
            });
        }

        resp.json()
            .await
            .map_err(|e| FetchError::Transport(format!("JSON parse error: {}", e)))
    }

    /// Cached-or-network search, racing the network path against `cancel`.
    pub async fn search_cached(
        &self,
        query: SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Arc<FareSearchResponse>, FetchError> {
        if let Some(hit) = self.responses.get_fresh(&query) {
            debug!("Response cache hit for {}->{} dep={}", query.origin, query.destination, query.departure_date);
            return Ok(hit);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            result = self.search(&query) => Arc::new(result?),
        };

        self.responses.insert(query, Arc::clone(&response));
        Ok(response)
    }
}

#[async_trait]
impl FetchGateway for FareSearchClient {
    async fn fetch_min_price(
        &self,
        axis: DateAxis,
        date: CalendarDate,
        context: &SearchContext,
        cancel: &CancellationToken,
    ) -> Result<Money, FetchError> {
        let query = SearchQuery::for_candidate(axis, date, context);
        let response = self.search_cached(query, cancel).await?;
        min_per_person(&response.flights, context.paying_passengers())
    }
}
