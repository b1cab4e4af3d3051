//! fare-strip: flexible-date fare strip.
//!
//! Single-binary Tokio application that:
//! 1. Loads upstream and prefetch settings
//! 2. Starts a date strip session for the given search
//! 3. Prefetches the cheapest fare around each committed date
//! 4. Prints the strip every time a price lands

mod config;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use common::{CabinClass, DateAxis, Money, SearchContext, SeedFares, TripType};
use fare_client::{FareSearchClient, FetchGateway, ResponseCache};
use price_grid::{DateSlot, GridSnapshot, PriceGridController};

/// Flexible-date fare strip
#[derive(Parser)]
#[command(name = "fare-strip", about = "Cheapest fares around a departure and return date")]
struct Cli {
    /// Origin airport (IATA).
    #[arg(long)]
    from: String,

    /// Destination airport (IATA).
    #[arg(long)]
    to: String,

    /// Departure date (YYYY-MM-DD).
    #[arg(long)]
    depart: NaiveDate,

    /// Return date (YYYY-MM-DD). Omit for a one-way trip.
    #[arg(long = "return")]
    return_date: Option<NaiveDate>,

    #[arg(long, default_value_t = 1)]
    adults: u32,

    #[arg(long, default_value_t = 0)]
    children: u32,

    #[arg(long, default_value_t = 0)]
    infants: u32,

    /// economy, premium_economy, business or first.
    #[arg(long, default_value = "economy")]
    cabin: String,

    /// Per-person fare already known for the committed dates (major units).
    #[arg(long)]
    seed_price: Option<f64>,

    #[arg(long, default_value = "EUR")]
    currency: String,

    /// Give up after this many seconds even if prices are still loading.
    #[arg(long, default_value_t = 60)]
    wait_secs: u64,
}

fn build_context(cli: &Cli) -> Result<SearchContext, common::Error> {
    let cabin = CabinClass::parse(&cli.cabin)
        .ok_or_else(|| common::Error::InvalidContext(format!("unknown cabin '{}'", cli.cabin)))?;

    Ok(SearchContext {
        origin: cli.from.trim().to_ascii_uppercase(),
        destination: cli.to.trim().to_ascii_uppercase(),
        trip_type: if cli.return_date.is_some() {
            TripType::RoundTrip
        } else {
            TripType::OneWay
        },
        adults: cli.adults,
        children: cli.children,
        infants: cli.infants,
        cabin,
        departure: cli.depart,
        return_date: cli.return_date,
    })
}

fn build_seeds(cli: &Cli) -> SeedFares {
    let fare = cli
        .seed_price
        .and_then(|p| Money::from_major(p, cli.currency.clone()));
    SeedFares {
        outbound: fare.clone(),
        inbound: fare,
    }
}

fn render_slot(slot: &DateSlot) -> String {
    let price = match (&slot.price, slot.estimated) {
        (Some(p), false) => p.to_string(),
        (Some(p), true) => format!("~{}", p),
        (None, _) => "n/a".to_string(),
    };
    let marker = if slot.selected { "*" } else { " " };
    let loading = if slot.loading { "…" } else { "" };
    format!("{}{} {}{}", marker, slot.label, price, loading)
}

fn render_strip(axis: DateAxis, slots: &[DateSlot]) -> String {
    let cells: Vec<String> = slots.iter().map(render_slot).collect();
    format!("{:>8}: {}", axis.as_str(), cells.join(" | "))
}

fn print_snapshot(snapshot: &GridSnapshot) {
    println!("{}", render_strip(DateAxis::Outbound, &snapshot.outbound));
    if let Some(inbound) = &snapshot.inbound {
        println!("{}", render_strip(DateAxis::Return, inbound));
    }
    println!();
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "fare_strip=info,fare_client=info,price_grid=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let context = match build_context(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    info!(
        "Upstream: {} ({} req/s), window={} concurrency={} pacing={}ms",
        cfg.upstream.base_url,
        cfg.upstream.requests_per_sec,
        cfg.prefetch.window_size,
        cfg.prefetch.concurrency,
        cfg.prefetch.pacing_ms
    );

    let responses = ResponseCache::new(Duration::from_secs(cfg.response_cache.ttl_secs));
    let gateway: Arc<dyn FetchGateway> = Arc::new(FareSearchClient::new(&cfg.upstream, responses));
    let grid = PriceGridController::new(gateway, &cfg.prefetch);
    let mut updates = grid.subscribe();

    if let Err(e) = grid.start(context, build_seeds(&cli)).await {
        error!("Could not start date strip: {}", e);
        std::process::exit(2);
    }
    print_snapshot(&grid.snapshot().await);

    let deadline = tokio::time::sleep(Duration::from_secs(cli.wait_secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline => {
                warn!("Gave up after {}s with prices still loading", cli.wait_secs);
                break;
            }
            update = updates.recv() => match update {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    print_snapshot(&grid.snapshot().await);
                    if grid.is_idle().await {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            _ = grid.wait_idle() => {
                print_snapshot(&grid.snapshot().await);
                break;
            }
        }
    }

    grid.cancel().await;
    info!("Done");
}
