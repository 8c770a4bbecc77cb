//! The nearby-departures request path: build windows, query, aggregate,
//! fuse live data, then disclose what the client has not seen yet.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::area::SearchArea;
use crate::delta::{self, BloomFilter};
use crate::error::Result;
use crate::fusion::{FusionConfig, FusionEngine};
use crate::models::{Route, RouteType, Stop, Trip};
use crate::partners::PartnerRegistry;
use crate::schedule::trips::resolve_trip;
use crate::schedule::{HereQuery, ScheduleStore, aggregate};

const SLOW_QUERY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct HereRequest {
    pub area: SearchArea,

    /// Empty means every route type.
    pub route_types: Vec<RouteType>,

    /// Overrides the wall clock.
    pub now: Option<DateTime<Tz>>,

    /// Token from the previous response, if any.
    pub filter: Option<String>,
}

impl HereRequest {
    pub fn new(area: SearchArea) -> Self {
        Self {
            area,
            route_types: Vec::new(),
            now: None,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HereResponse {
    pub stops: Vec<Stop>,

    /// Routes the client's filter did not yet contain, with shapes.
    pub routes: Vec<Route>,

    /// Primary trips the client's filter did not yet contain.
    pub trips: Vec<Trip>,

    /// Token to send with the next request.
    pub filter: String,
}

pub struct NearbyService {
    store: Arc<dyn ScheduleStore>,
    registry: PartnerRegistry,
    engine: FusionEngine,
    agencies: Vec<String>,
    tz: Tz,
}

impl NearbyService {
    /// Starts the fusion engine; must be called inside a Tokio runtime.
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        registry: PartnerRegistry,
        fusion: FusionConfig,
        agencies: Vec<String>,
        tz: Tz,
    ) -> Self {
        Self {
            store,
            registry,
            engine: FusionEngine::start(fusion),
            agencies,
            tz,
        }
    }

    #[tracing::instrument(skip_all, fields(route_types = ?request.route_types))]
    pub async fn here(&self, request: HereRequest) -> Result<HereResponse> {
        let mut filter = match &request.filter {
            Some(token) if !token.trim().is_empty() => BloomFilter::from_token(token)?,
            _ => BloomFilter::default(),
        };
        let now = request
            .now
            .map(|now| now.with_timezone(&self.tz))
            .unwrap_or_else(|| Utc::now().with_timezone(&self.tz));

        let query = HereQuery::build(
            self.store.as_ref(),
            &self.agencies,
            request.area,
            now,
            request.route_types,
        )
        .await?;

        let started = Instant::now();
        let rows = self.store.query_here(&query).await?;
        let elapsed = started.elapsed();
        if elapsed > SLOW_QUERY {
            warn!(elapsed_ms = elapsed.as_millis() as u64, rows = rows.len(), "Slow Here query");
        }

        let aggregation = aggregate(&query, rows);

        let scheduled_trips: HashMap<String, String> = aggregation
            .stops
            .iter()
            .filter_map(|stop| {
                let first = stop.departures.first()?;
                Some((stop.unique_id.clone(), first.trip_id.clone()))
            })
            .collect();

        let mut stops = self.engine.fuse(aggregation.stops, &self.registry).await;

        let disclosure = delta::disclose(
            self.store.as_ref(),
            &mut filter,
            &mut stops,
            &aggregation.stop_routes,
            &scheduled_trips,
            now,
        )
        .await?;

        info!(
            stops = stops.len(),
            routes = disclosure.routes.len(),
            trips = disclosure.trips.len(),
            "Here response ready"
        );

        Ok(HereResponse {
            stops,
            routes: disclosure.routes,
            trips: disclosure.trips,
            filter: filter.to_token(),
        })
    }

    /// Full detail of one trip, resolved the same way as a stop's primary
    /// trip.
    #[tracing::instrument(skip(self))]
    pub async fn trip(
        &self,
        agency_id: &str,
        route_id: &str,
        trip_id: &str,
        fallback_trip_id: Option<&str>,
    ) -> Result<Trip> {
        let resolved = resolve_trip(
            self.store.as_ref(),
            agency_id,
            route_id,
            trip_id,
            fallback_trip_id,
        )
        .await?;
        Ok(resolved.trip)
    }

    pub async fn shutdown(self) {
        self.engine.shutdown().await;
    }
}
