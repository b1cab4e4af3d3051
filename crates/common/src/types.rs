//! Domain types shared across the date strip.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::Error;

/// A pure calendar date with no time component.
pub type CalendarDate = NaiveDate;

// ── Search context ────────────────────────────────────────────────────

/// Which leg of the trip a date belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateAxis {
    Outbound,
    Return,
}

impl DateAxis {
    /// The companion axis.
    pub fn other(self) -> Self {
        match self {
            DateAxis::Outbound => DateAxis::Return,
            DateAxis::Return => DateAxis::Outbound,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DateAxis::Outbound => "outbound",
            DateAxis::Return => "return",
        }
    }
}

impl fmt::Display for DateAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    OneWay,
    RoundTrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CabinClass {
    Economy,
    PremiumEconomy,
    Business,
    First,
}

impl CabinClass {
    pub fn as_str(self) -> &'static str {
        match self {
            CabinClass::Economy => "economy",
            CabinClass::PremiumEconomy => "premium_economy",
            CabinClass::Business => "business",
            CabinClass::First => "first",
        }
    }

    /// Parse a cabin name as typed on the command line.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "economy" | "y" => Some(CabinClass::Economy),
            "premium_economy" | "premium" | "w" => Some(CabinClass::PremiumEconomy),
            "business" | "c" => Some(CabinClass::Business),
            "first" | "f" => Some(CabinClass::First),
            _ => None,
        }
    }
}

/// The committed search parameters. Read-only to the date strip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchContext {
    /// IATA origin code (e.g. "MAD").
    pub origin: String,
    /// IATA destination code.
    pub destination: String,
    pub trip_type: TripType,
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    #[serde(default)]
    pub infants: u32,
    pub cabin: CabinClass,
    /// Committed departure date.
    pub departure: CalendarDate,
    /// Committed return date. Required for round trips.
    #[serde(default)]
    pub return_date: Option<CalendarDate>,
}

impl SearchContext {
    pub fn is_round_trip(&self) -> bool {
        self.trip_type == TripType::RoundTrip
    }

    /// The committed date for an axis, if that axis is part of the trip.
    pub fn committed(&self, axis: DateAxis) -> Option<CalendarDate> {
        match axis {
            DateAxis::Outbound => Some(self.departure),
            DateAxis::Return if self.is_round_trip() => self.return_date,
            DateAxis::Return => None,
        }
    }

    /// Copy of this context with one axis' committed date replaced.
    pub fn with_committed(&self, axis: DateAxis, date: CalendarDate) -> Self {
        let mut next = self.clone();
        match axis {
            DateAxis::Outbound => next.departure = date,
            DateAxis::Return => next.return_date = Some(date),
        }
        next
    }

    /// Passengers that pay a seat fare. Lap infants are excluded.
    pub fn paying_passengers(&self) -> u32 {
        (self.adults + self.children).max(1)
    }

    /// Axes that get a date window for this context.
    pub fn axes(&self) -> Vec<DateAxis> {
        if self.is_round_trip() {
            vec![DateAxis::Outbound, DateAxis::Return]
        } else {
            vec![DateAxis::Outbound]
        }
    }

    /// Structural checks; the departure/return ordering is not enforced here.
    pub fn validate(&self) -> Result<(), Error> {
        let mut issues: Vec<String> = Vec::new();

        if self.origin.trim().is_empty() {
            issues.push("origin must not be empty".into());
        }
        if self.destination.trim().is_empty() {
            issues.push("destination must not be empty".into());
        }
        if self.adults == 0 {
            issues.push("at least one adult is required".into());
        }
        if self.infants > self.adults {
            issues.push("each infant must travel with an adult".into());
        }
        if self.is_round_trip() && self.return_date.is_none() {
            issues.push("round trip requires a return date".into());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidContext(issues.join("; ")))
        }
    }
}

// ── Money ─────────────────────────────────────────────────────────────

/// A price in minor units (cents) with its ISO currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount_cents: i64,
    pub currency: String,
}

impl Money {
    pub fn new(amount_cents: i64, currency: impl Into<String>) -> Self {
        Self {
            amount_cents,
            currency: currency.into(),
        }
    }

    /// Build from a major-unit amount (e.g. `412.5` EUR), rounding to the cent.
    /// Returns `None` for non-finite amounts.
    pub fn from_major(amount: f64, currency: impl Into<String>) -> Option<Self> {
        if !amount.is_finite() {
            return None;
        }
        Some(Self::new((amount * 100.0).round() as i64, currency))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount_cents < 0 { "-" } else { "" };
        let abs = self.amount_cents.unsigned_abs();
        write!(f, "{} {}{}.{:02}", self.currency, sign, abs / 100, abs % 100)
    }
}

/// Fares already known from the main search, used to seed each window's center.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedFares {
    pub outbound: Option<Money>,
    pub inbound: Option<Money>,
}

impl SeedFares {
    pub fn get(&self, axis: DateAxis) -> Option<&Money> {
        match axis {
            DateAxis::Outbound => self.outbound.as_ref(),
            DateAxis::Return => self.inbound.as_ref(),
        }
    }

    pub fn set(&mut self, axis: DateAxis, fare: Option<Money>) {
        match axis {
            DateAxis::Outbound => self.outbound = fare,
            DateAxis::Return => self.inbound = fare,
        }
    }
}

// ── Price cache types ─────────────────────────────────────────────────

/// Identity of one price slot. Two keys are equal iff axis and date match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub axis: DateAxis,
    pub date: CalendarDate,
}

impl CacheKey {
    pub fn new(axis: DateAxis, date: CalendarDate) -> Self {
        Self { axis, date }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.axis, self.date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Empty,
    Loading,
    Loaded,
    Errored,
}

impl EntryStatus {
    /// `Loaded` and `Errored` are never re-fetched within a window.
    pub fn is_terminal(self) -> bool {
        matches!(self, EntryStatus::Loaded | EntryStatus::Errored)
    }
}

/// One price slot of the date strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Presentation only, never used as identity.
    pub display_label: String,
    pub price: Option<Money>,
    pub status: EntryStatus,
}

impl CacheEntry {
    pub fn empty(key: CacheKey, display_label: impl Into<String>) -> Self {
        Self {
            key,
            display_label: display_label.into(),
            price: None,
            status: EntryStatus::Empty,
        }
    }

    pub fn loading(key: CacheKey, display_label: impl Into<String>) -> Self {
        Self {
            status: EntryStatus::Loading,
            ..Self::empty(key, display_label)
        }
    }

    /// `price = None` is the resolved-null state: deliberately not fetched.
    pub fn loaded(key: CacheKey, display_label: impl Into<String>, price: Option<Money>) -> Self {
        Self {
            key,
            display_label: display_label.into(),
            price,
            status: EntryStatus::Loaded,
        }
    }

    pub fn errored(key: CacheKey, display_label: impl Into<String>) -> Self {
        Self {
            status: EntryStatus::Errored,
            ..Self::empty(key, display_label)
        }
    }

    pub fn is_resolved_null(&self) -> bool {
        self.status == EntryStatus::Loaded && self.price.is_none()
    }
}
