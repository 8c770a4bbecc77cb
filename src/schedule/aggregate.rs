//! Folds Here rows into stops, routes and departures.

use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::area::compass_dir;
use crate::models::{Departure, MAX_DEPARTURES, Route, Stop, stop_unique_id};
use crate::schedule::{HereQuery, HereRow};

/// Stops returned per request.
pub const MAX_STOPS: usize = 20;

#[derive(Debug, Default)]
pub struct Aggregation {
    pub stops: Vec<Stop>,

    /// The route serving each stop, keyed by stop unique ID.
    pub stop_routes: HashMap<String, Route>,
}

impl Aggregation {
    pub fn route_for(&self, stop: &Stop) -> Option<&Route> {
        self.stop_routes.get(&stop.unique_id)
    }
}

/// Rows must arrive ordered by distance then `sort_sec`, so the first stop
/// seen for a route and direction is the closest one and wins it.
pub fn aggregate(query: &HereQuery, rows: Vec<HereRow>) -> Aggregation {
    let mut stops: HashMap<String, Stop> = HashMap::new();
    let mut stop_routes: HashMap<String, Route> = HashMap::new();

    // route unique ID | direction -> stop unique ID
    let mut routes_by_direction: HashMap<String, String> = HashMap::new();

    let total = rows.len();
    let mut skipped = 0usize;

    for row in rows {
        let Some(window) = query.window_for(&row) else {
            warn!(
                agency_id = %row.agency_id,
                trip_id = %row.trip_id,
                service_id = %row.service_id,
                departure_sec = row.departure_sec,
                "Row outside every service window, skipping"
            );
            skipped += 1;
            continue;
        };

        let route = match Route::new(
            &row.agency_id,
            &row.route_id,
            row.route_type,
            &row.route_color,
            &row.route_text_color,
        ) {
            Ok(route) => route,
            Err(e) => {
                warn!(stop_id = %row.stop_id, error = %e, "Malformed row, skipping");
                skipped += 1;
                continue;
            }
        };

        let stop_id = stop_unique_id(&row.agency_id, &row.route_id, &row.stop_id);
        let route_dir = format!("{}|{}", route.unique_id, row.direction_id);

        if routes_by_direction
            .get(&route_dir)
            .is_some_and(|bound| *bound != stop_id)
        {
            continue;
        }

        if stops
            .get(&stop_id)
            .is_some_and(|s| s.departures.len() >= MAX_DEPARTURES)
        {
            continue;
        }

        let compass = match (row.next_lat, row.next_lon) {
            (Some(next_lat), Some(next_lon)) => compass_dir(row.lat, row.lon, next_lat, next_lon),
            _ => 0.0,
        };
        let departure = Departure::scheduled(
            &row.trip_id,
            &row.service_id,
            row.departure_sec,
            window.base,
            compass,
        );

        routes_by_direction
            .entry(route_dir)
            .or_insert_with(|| stop_id.clone());

        stops
            .entry(stop_id.clone())
            .or_insert_with(|| new_stop(&row, &route, &stop_id))
            .departures
            .push(departure);

        stop_routes.entry(stop_id).or_insert(route);
    }

    let mut stops: Vec<Stop> = stops.into_values().collect();
    for stop in &mut stops {
        stop.sort_departures();
    }
    stops.sort_by(compare_stops);
    stops.truncate(MAX_STOPS);
    stop_routes.retain(|id, _| stops.iter().any(|s| s.unique_id == *id));

    debug!(rows = total, skipped, stops = stops.len(), "Aggregated here rows");

    Aggregation { stops, stop_routes }
}

/// Mode tier, then distance, then unique ID.
pub fn compare_stops(a: &Stop, b: &Stop) -> Ordering {
    a.route_type
        .sort_tier()
        .cmp(&b.route_type.sort_tier())
        .then_with(|| a.dist.total_cmp(&b.dist))
        .then_with(|| a.unique_id.cmp(&b.unique_id))
}

fn new_stop(row: &HereRow, route: &Route, unique_id: &str) -> Stop {
    Stop {
        agency_id: row.agency_id.clone(),
        route_id: row.route_id.clone(),
        stop_id: row.stop_id.clone(),
        unique_id: unique_id.to_string(),
        name: row.stop_name.clone(),
        direction_id: row.direction_id,
        headsign: row.headsign.clone(),
        lat: row.lat,
        lon: row.lon,
        route_type: route.route_type,
        route_color: route.color.clone(),
        route_text_color: route.text_color.clone(),
        departures: Vec::new(),
        vehicles: Vec::new(),
        dist: row.dist,
    }
}
