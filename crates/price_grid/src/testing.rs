//! Test doubles shared by the scheduler and controller tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Datelike;
use common::{CabinClass, CalendarDate, DateAxis, FetchError, Money, SearchContext, TripType};
use fare_client::FetchGateway;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(crate) fn date(d: u32) -> CalendarDate {
    CalendarDate::from_ymd_opt(2025, 12, d).expect("valid date")
}

pub(crate) fn one_way(dep: u32) -> SearchContext {
    SearchContext {
        origin: "MAD".into(),
        destination: "JFK".into(),
        trip_type: TripType::OneWay,
        adults: 1,
        children: 0,
        infants: 0,
        cabin: CabinClass::Economy,
        departure: date(dep),
        return_date: None,
    }
}

pub(crate) fn round_trip(dep: u32, ret: u32) -> SearchContext {
    SearchContext {
        trip_type: TripType::RoundTrip,
        return_date: Some(date(ret)),
        ..one_way(dep)
    }
}

/// Deterministic fare: day of month in euros, plus one cent for a BCN origin.
pub(crate) fn fare_for(context: &SearchContext, date: CalendarDate) -> Money {
    let origin_cents = if context.origin == "BCN" { 1 } else { 0 };
    Money::new(i64::from(date.day()) * 100 + origin_cents, "EUR")
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub axis: DateAxis,
    pub date: CalendarDate,
    pub started: Instant,
    pub finished: Option<Instant>,
}

/// Records every lookup and answers after a fixed delay. Ignores the
/// cancellation token, like a slow upstream that completes anyway.
pub(crate) struct FakeGateway {
    delay: Duration,
    fail_on: HashSet<CalendarDate>,
    hang_on: HashSet<CalendarDate>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeGateway {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            fail_on: HashSet::new(),
            hang_on: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, date: CalendarDate) -> Self {
        self.fail_on.insert(date);
        self
    }

    pub fn hanging(mut self, date: CalendarDate) -> Self {
        self.hang_on.insert(date);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_dates(&self) -> Vec<CalendarDate> {
        self.calls().into_iter().map(|c| c.date).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchGateway for FakeGateway {
    async fn fetch_min_price(
        &self,
        axis: DateAxis,
        date: CalendarDate,
        context: &SearchContext,
        _cancel: &CancellationToken,
    ) -> Result<Money, FetchError> {
        let slot = {
            let mut calls = self.calls.lock().expect("calls lock");
            calls.push(Call {
                axis,
                date,
                started: Instant::now(),
                finished: None,
            });
            calls.len() - 1
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.hang_on.contains(&date) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().expect("calls lock")[slot].finished = Some(Instant::now());

        if self.fail_on.contains(&date) {
            return Err(FetchError::Transport("connection reset by peer".into()));
        }
        Ok(fare_for(context, date))
    }
}
