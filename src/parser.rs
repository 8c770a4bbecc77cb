//! Protobuf parser for GTFS Realtime feeds, plus extraction of the
//! departures and vehicles a single stop cares about.

use anyhow::Result;
use chrono::DateTime;
use chrono_tz::Tz;
use prost::Message;

use crate::gtfs_rt::FeedMessage;
use crate::gtfs_rt::trip_update::StopTimeUpdate;
use crate::models::{Departure, Vehicle};

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Live departures from `stop_id`. Trip updates naming a different route
/// are ignored; those naming no route are kept.
pub fn stop_departures(
    feed: &FeedMessage,
    route_id: &str,
    stop_id: &str,
    tz: Tz,
) -> Vec<Departure> {
    feed.entity
        .iter()
        .filter(|e| !e.is_deleted())
        .filter_map(|e| e.trip_update.as_ref())
        .filter(|tu| tu.trip.route_id.as_deref().is_none_or(|r| r == route_id))
        .flat_map(|tu| {
            let trip_id = tu.trip.trip_id();
            tu.stop_time_update
                .iter()
                .filter(|stu| stu.stop_id() == stop_id)
                .filter_map(move |stu| {
                    let time = event_time(stu)?;
                    let time = DateTime::from_timestamp(time, 0)?.with_timezone(&tz);
                    Some(Departure::live(trip_id, time))
                })
        })
        .collect()
}

/// Vehicle positions on `route_id`, optionally restricted to one direction.
pub fn route_vehicles(
    feed: &FeedMessage,
    route_id: &str,
    direction_id: Option<u8>,
) -> Vec<Vehicle> {
    feed.entity
        .iter()
        .filter(|e| !e.is_deleted())
        .filter_map(|e| e.vehicle.as_ref())
        .filter(|vp| {
            vp.trip.as_ref().is_some_and(|trip| {
                trip.route_id() == route_id
                    && match (direction_id, trip.direction_id) {
                        (Some(want), Some(got)) => u32::from(want) == got,
                        _ => true,
                    }
            })
        })
        .filter_map(|vp| vp.position.as_ref())
        .map(|p| Vehicle {
            lat: f64::from(p.latitude),
            lon: f64::from(p.longitude),
            live: true,
        })
        .collect()
}

/// Departure time, else arrival time.
fn event_time(stu: &StopTimeUpdate) -> Option<i64> {
    stu.departure
        .as_ref()
        .and_then(|e| e.time)
        .or_else(|| stu.arrival.as_ref().and_then(|e| e.time))
}
