//! Resolving trip IDs that may come from a live feed rather than the
//! static schedule.

use tracing::debug;

use crate::error::{NearbyError, Result};
use crate::models::Trip;
use crate::schedule::ScheduleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Exact,
    Partial,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrip {
    pub trip: Trip,
    pub resolution: Resolution,
}

/// Tries the exact ID, then the first scheduled trip of the route whose ID
/// contains it, then `fallback_trip_id`. Exhausting all three is
/// [`NearbyError::NotFound`].
pub async fn resolve_trip(
    store: &dyn ScheduleStore,
    agency_id: &str,
    route_id: &str,
    trip_id: &str,
    fallback_trip_id: Option<&str>,
) -> Result<ResolvedTrip> {
    if let Some(trip) = store.trip(agency_id, route_id, trip_id).await? {
        return Ok(ResolvedTrip {
            trip,
            resolution: Resolution::Exact,
        });
    }

    if !trip_id.is_empty() {
        if let Some(matched) = store.partial_trip_match(agency_id, route_id, trip_id).await? {
            if let Some(trip) = store.trip(agency_id, route_id, &matched).await? {
                debug!(trip_id, matched = %matched, "Resolved trip by partial match");
                return Ok(ResolvedTrip {
                    trip,
                    resolution: Resolution::Partial,
                });
            }
        }
    }

    if let Some(fallback) = fallback_trip_id.filter(|f| !f.is_empty() && *f != trip_id) {
        if let Some(trip) = store.trip(agency_id, route_id, fallback).await? {
            debug!(trip_id, fallback, "Resolved trip by scheduled fallback");
            return Ok(ResolvedTrip {
                trip,
                resolution: Resolution::Fallback,
            });
        }
    }

    Err(NearbyError::NotFound(format!(
        "trip {agency_id}|{trip_id} on route {route_id}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::MemoryStore;
    use crate::schedule::memory::TripRecord;

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
        store
    }

    #[tokio::test]
    async fn test_exact() {
        let r = resolve_trip(&store(), "MTA NYCT", "B63", "B-T1", None).await.unwrap();
        assert_eq!(r.resolution, Resolution::Exact);
        assert_eq!(r.trip.trip_id, "B-T1");
    }

    #[tokio::test]
    async fn test_partial() {
        let r = resolve_trip(&store(), "MTA NYCT", "B63", "T2", Some("B-T1")).await.unwrap();
        assert_eq!(r.resolution, Resolution::Partial);
        assert_eq!(r.trip.trip_id, "B-T2");
    }

    #[tokio::test]
    async fn test_fallback() {
        let r = resolve_trip(&store(), "MTA NYCT", "B63", "LIVE-77", Some("B-T1")).await.unwrap();
        assert_eq!(r.resolution, Resolution::Fallback);
        assert_eq!(r.trip.trip_id, "B-T1");
    }

    #[tokio::test]
    async fn test_exhausted() {
        let err = resolve_trip(&store(), "MTA NYCT", "B63", "LIVE-77", Some("GONE"))
            .await
            .unwrap_err();
        assert!(matches!(err, NearbyError::NotFound(_)));
    }
}
