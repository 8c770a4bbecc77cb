//! Delta sync: only routes and trips the client has not seen are
//! serialized. What the client has seen travels with it in a
//! [`BloomFilter`] token; the server keeps no state between requests.

pub mod bloom;

pub use bloom::BloomFilter;

use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::{NearbyError, Result};
use crate::models::{Route, Stop, Trip, trip_unique_id};
use crate::schedule::ScheduleStore;
use crate::schedule::trips::resolve_trip;

/// Only stops whose first departure leaves within this many seconds get
/// trip detail.
pub const TRIP_LOOKAHEAD_SECS: i64 = 7200;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Disclosure {
    pub routes: Vec<Route>,
    pub trips: Vec<Trip>,
}

/// Routes then trips, sharing one filter.
pub async fn disclose(
    store: &dyn ScheduleStore,
    filter: &mut BloomFilter,
    stops: &mut [Stop],
    stop_routes: &HashMap<String, Route>,
    scheduled_trips: &HashMap<String, String>,
    now: DateTime<Tz>,
) -> Result<Disclosure> {
    let routes = disclose_routes(store, filter, stops, stop_routes).await?;
    let trips = disclose_trips(store, filter, stops, scheduled_trips, now).await?;
    Ok(Disclosure { routes, trips })
}

/// Routes of `stops` missing from `filter`, with their shapes loaded.
/// Every disclosed route is added to the filter.
pub async fn disclose_routes(
    store: &dyn ScheduleStore,
    filter: &mut BloomFilter,
    stops: &[Stop],
    stop_routes: &HashMap<String, Route>,
) -> Result<Vec<Route>> {
    let mut routes = Vec::new();

    for stop in stops {
        let Some(route) = stop_routes.get(&stop.unique_id) else {
            continue;
        };
        if filter.contains(&route.unique_id) {
            continue;
        }

        let mut route = route.clone();
        route.route_shapes = store.route_shapes(&route.agency_id, &route.route_id).await?;
        filter.insert(&route.unique_id);
        routes.push(route);
    }

    Ok(routes)
}

/// Trip detail for each stop's first departure within [`TRIP_LOOKAHEAD_SECS`]
/// of `now`. Live trip IDs unknown to the schedule are resolved first and
/// the departure is renamed to the resolved trip.
///
/// `scheduled_trips` maps stop unique IDs to the trip that was first before
/// live fusion, the last resort when a live ID resolves to nothing.
pub async fn disclose_trips(
    store: &dyn ScheduleStore,
    filter: &mut BloomFilter,
    stops: &mut [Stop],
    scheduled_trips: &HashMap<String, String>,
    now: DateTime<Tz>,
) -> Result<Vec<Trip>> {
    let horizon = now + Duration::seconds(TRIP_LOOKAHEAD_SECS);
    let mut trips = Vec::new();
    let mut seen = HashSet::new();

    for stop in stops.iter_mut() {
        let Some(first) = stop.departures.first_mut() else {
            continue;
        };
        if first.time > horizon {
            continue;
        }
        if filter.contains(&trip_unique_id(&stop.agency_id, &first.trip_id)) {
            continue;
        }

        let fallback = scheduled_trips.get(&stop.unique_id).map(String::as_str);
        let resolved =
            resolve_trip(store, &stop.agency_id, &stop.route_id, &first.trip_id, fallback)
                .await
                .map_err(|e| match e {
                    NearbyError::NotFound(what) => NearbyError::DataInconsistency(format!(
                        "stop {} has no resolvable primary trip: {what}",
                        stop.unique_id
                    )),
                    other => other,
                })?;

        if resolved.trip.trip_id != first.trip_id {
            debug!(
                stop = %stop.unique_id,
                from = %first.trip_id,
                to = %resolved.trip.trip_id,
                resolution = ?resolved.resolution,
                "Renamed primary trip"
            );
            first.trip_id = resolved.trip.trip_id.clone();
        }

        let unique_id = resolved.trip.unique_id.clone();
        if filter.contains(&unique_id) || !seen.insert(unique_id.clone()) {
            continue;
        }
        filter.insert(&unique_id);
        trips.push(resolved.trip);
    }

    Ok(trips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Departure, RouteShape, RouteType};
    use crate::schedule::MemoryStore;
    use crate::schedule::memory::{RouteShapeRecord, TripRecord};
    use chrono::TimeZone;

    fn now() -> DateTime<Tz> {
        chrono_tz::UTC.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap()
    }

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        for id in ["B-T1", "B-T2"] {
            store.insert_trip(TripRecord {
                agency_id: "MTA NYCT".into(),
                route_id: "B63".into(),
                trip_id: id.into(),
                service_id: "WKD".into(),
                shape_id: String::new(),
                headsign: "Bay Ridge".into(),
                direction_id: 0,
            });
        }
        store.insert_route_shape(RouteShapeRecord {
            agency_id: "MTA NYCT".into(),
            route_id: "B63".into(),
            headsign: "Bay Ridge".into(),
            direction_id: 0,
            shape_id: "B63-0".into(),
        });
        store
    }

    fn bus_stop(trip_id: &str, offset_secs: i64, live: bool) -> Stop {
        let time = now() + Duration::seconds(offset_secs);
        let departure = if live {
            Departure::live(trip_id, time)
        } else {
            let midnight = now() - Duration::hours(12);
            Departure::scheduled(trip_id, "WKD", 43_200 + offset_secs, midnight, 0.0)
        };
        Stop {
            agency_id: "MTA NYCT".into(),
            route_id: "B63".into(),
            stop_id: "B1".into(),
            unique_id: "MTA NYCT|B63|B1".into(),
            name: "Stop B1".into(),
            direction_id: 0,
            headsign: "Bay Ridge".into(),
            lat: 40.75,
            lon: -73.98,
            route_type: RouteType::Bus,
            route_color: "#FFFFFF".into(),
            route_text_color: "#000000".into(),
            departures: vec![departure],
            vehicles: Vec::new(),
            dist: 0.0,
        }
    }

    fn routes_for(stop: &Stop) -> HashMap<String, Route> {
        let route = Route::new("MTA NYCT", "B63", 3, "", "").unwrap();
        HashMap::from([(stop.unique_id.clone(), route)])
    }

    #[tokio::test]
    async fn test_routes_disclosed_once() {
        let store = store();
        let stops = vec![bus_stop("B-T1", 600, false)];
        let mut filter = BloomFilter::default();

        let first = disclose_routes(&store, &mut filter, &stops, &routes_for(&stops[0]))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        let shape_ids: Vec<&str> = first[0]
            .route_shapes
            .iter()
            .map(|s: &RouteShape| s.shape_id.as_str())
            .collect();
        assert_eq!(shape_ids, vec!["B63-0"]);

        let mut filter = BloomFilter::from_token(&filter.to_token()).unwrap();
        let second = disclose_routes(&store, &mut filter, &stops, &routes_for(&stops[0]))
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_live_trip_renamed_by_partial_match() {
        let store = store();
        let mut stops = vec![bus_stop("T2", 300, true)];
        let scheduled = HashMap::from([(stops[0].unique_id.clone(), "B-T1".to_string())]);
        let mut filter = BloomFilter::default();

        let trips = disclose_trips(&store, &mut filter, &mut stops, &scheduled, now())
            .await
            .unwrap();

        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].trip_id, "B-T2");
        assert_eq!(stops[0].departures[0].trip_id, "B-T2");
        assert!(filter.contains("MTA NYCT|B-T2"));
    }

    #[tokio::test]
    async fn test_far_departures_not_enriched() {
        let store = store();
        let mut stops = vec![bus_stop("B-T1", 3 * 3600, false)];
        let mut filter = BloomFilter::default();

        let trips = disclose_trips(&store, &mut filter, &mut stops, &HashMap::new(), now())
            .await
            .unwrap();
        assert!(trips.is_empty());
    }

    #[tokio::test]
    async fn test_known_trip_skipped() {
        let store = store();
        let mut stops = vec![bus_stop("B-T1", 600, false)];
        let mut filter = BloomFilter::default();
        filter.insert("MTA NYCT|B-T1");

        let trips = disclose_trips(&store, &mut filter, &mut stops, &HashMap::new(), now())
            .await
            .unwrap();
        assert!(trips.is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_trip_is_fatal() {
        let store = store();
        let mut stops = vec![bus_stop("LIVE-99", 300, true)];
        let scheduled = HashMap::from([(stops[0].unique_id.clone(), "GONE".to_string())]);
        let mut filter = BloomFilter::default();

        let err = disclose_trips(&store, &mut filter, &mut stops, &scheduled, now())
            .await
            .unwrap_err();
        assert!(matches!(err, NearbyError::DataInconsistency(_)));
    }
}
