//! CLI entry point for the nearby departures service.
//!
//! Provides subcommands for querying nearby stops, fetching trip detail and
//! running the precache scheduler against the configured partners.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, FixedOffset};
use clap::{Parser, Subcommand};
use nearby_transit::{
    area::SearchArea,
    cache::{LiveCache, MemoryCache},
    config::Config,
    here::{HereRequest, NearbyService},
    models::RouteType,
    partners::{PartnerRegistry, PartnersConfig},
    precache::PrecacheScheduler,
    schedule::{MemoryStore, ScheduleStore},
};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "nearby_transit")]
#[command(about = "Nearby transit departures with live status", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print nearby stops with fused departures as JSON
    Here {
        /// Bounding box as SW_LAT,SW_LON,NE_LAT,NE_LON
        #[arg(long, allow_hyphen_values = true, conflicts_with_all = ["lat", "lon"])]
        bbox: Option<String>,

        /// Latitude of the search point
        #[arg(long, allow_negative_numbers = true, requires = "lon")]
        lat: Option<f64>,

        /// Longitude of the search point
        #[arg(long, allow_negative_numbers = true, requires = "lat")]
        lon: Option<f64>,

        /// Search radius around the point, in meters
        #[arg(short, long, default_value_t = 500.0)]
        radius: f64,

        /// Route types to keep (e.g. "subway,bus"); all when omitted
        #[arg(short = 't', long = "route-type", value_delimiter = ',')]
        route_types: Vec<RouteType>,

        /// RFC 3339 timestamp to use instead of the clock
        #[arg(long)]
        now: Option<DateTime<FixedOffset>>,

        /// Filter token from a previous response
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Print full detail of one trip as JSON
    Trip {
        #[arg(short, long)]
        agency: String,

        #[arg(short, long)]
        route: String,

        /// Trip ID, possibly from a live feed
        #[arg(value_name = "TRIP_ID")]
        trip: String,

        /// Scheduled trip ID to use when TRIP_ID cannot be resolved
        #[arg(long)]
        fallback: Option<String>,
    },
    /// Keep partner data warm until interrupted
    Precache,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/nearby_transit.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("nearby_transit.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let store = Arc::new(
        MemoryStore::load_dir(&config.data_dir)
            .with_context(|| format!("loading schedule from {}", config.data_dir.display()))?,
    );
    let cache = Arc::new(MemoryCache::new(config.precache.cache_ttl));
    let registry = load_partners(&config, cache.clone())?;
    info!(partners = registry.len(), agencies = ?config.agencies, "Partners loaded");

    match cli.command {
        Commands::Here {
            bbox,
            lat,
            lon,
            radius,
            route_types,
            now,
            filter,
        } => {
            let area = match (bbox, lat, lon) {
                (Some(bbox), _, _) => parse_bbox(&bbox)?,
                (None, Some(lat), Some(lon)) => SearchArea::from_point_radius(lat, lon, radius)?,
                _ => bail!("either --bbox or --lat/--lon is required"),
            };

            let service = NearbyService::new(
                store,
                registry,
                config.fusion.clone(),
                config.agencies.clone(),
                config.timezone,
            );
            let request = HereRequest {
                area,
                route_types,
                now: now.map(|now| now.with_timezone(&config.timezone)),
                filter,
            };

            let result = service.here(request).await;
            service.shutdown().await;

            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
        Commands::Trip {
            agency,
            route,
            trip,
            fallback,
        } => {
            let service = NearbyService::new(
                store,
                registry,
                config.fusion.clone(),
                config.agencies.clone(),
                config.timezone,
            );

            let result = service
                .trip(&agency, &route, &trip, fallback.as_deref())
                .await;
            service.shutdown().await;

            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
        Commands::Precache => {
            precache(store, registry, cache, &config).await?;
        }
    }

    Ok(())
}

/// Runs the scheduler until Ctrl+C, purging expired cache entries once per
/// TTL.
#[tracing::instrument(skip_all, fields(agencies = ?config.agencies))]
async fn precache(
    store: Arc<dyn ScheduleStore>,
    registry: PartnerRegistry,
    cache: Arc<MemoryCache>,
    config: &Config,
) -> Result<()> {
    if registry.is_empty() {
        warn!("No partners configured, nothing to precache");
        return Ok(());
    }

    let handle = PrecacheScheduler::start(
        store.as_ref(),
        &registry,
        &config.agencies,
        config.precache.clone(),
    )
    .await?;
    info!(drivers = handle.driver_count(), "Precaching. Press Ctrl+C to stop.");

    let purge = tokio::spawn(async move {
        let mut interval = tokio::time::interval(cache.ttl().max(Duration::from_secs(1)));
        loop {
            interval.tick().await;
            cache.purge().await;
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    purge.abort();
    handle.shutdown().await;
    Ok(())
}

fn load_partners(config: &Config, cache: Arc<dyn LiveCache>) -> Result<PartnerRegistry> {
    let Some(path) = &config.partners_path else {
        warn!("NEARBY_PARTNERS not set, serving schedule only");
        return Ok(PartnerRegistry::new());
    };

    let path = path.to_string_lossy();
    PartnersConfig::load(&path)?.build_registry(
        cache,
        config.timezone,
        config.precache.call_timeout,
        |key| std::env::var(key).ok(),
    )
}

fn parse_bbox(raw: &str) -> Result<SearchArea> {
    let coords = raw
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .with_context(|| format!("invalid coordinate '{part}' in --bbox"))
        })
        .collect::<Result<Vec<_>>>()?;

    let [sw_lat, sw_lon, ne_lat, ne_lon] = coords[..] else {
        bail!("--bbox needs four comma-separated numbers, got {}", coords.len());
    };
    Ok(SearchArea::from_bbox(sw_lat, sw_lon, ne_lat, ne_lon, None)?)
}
