use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use serde::Serialize;

use crate::models::route::RouteType;

/// Maximum departures kept per stop, after aggregation and after fusion.
pub const MAX_DEPARTURES: usize = 5;

/// A scheduled or live departure of one trip from one stop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Departure {
    pub time: DateTime<Tz>,
    pub trip_id: String,
    pub service_id: String,
    pub live: bool,

    /// Bearing towards the next stop, in degrees.
    pub compass_dir: f64,

    /// Seconds since midnight of the service day; absent for live departures.
    #[serde(skip)]
    pub departure_sec: Option<i64>,
}

impl Departure {
    /// A departure read from the schedule. `base` is midnight of its service
    /// day, so `departure_sec` may exceed one day for post-midnight trips.
    pub fn scheduled(
        trip_id: &str,
        service_id: &str,
        departure_sec: i64,
        base: DateTime<Tz>,
        compass_dir: f64,
    ) -> Self {
        Self {
            time: base + Duration::seconds(departure_sec),
            trip_id: trip_id.to_string(),
            service_id: service_id.to_string(),
            live: false,
            compass_dir,
            departure_sec: Some(departure_sec),
        }
    }

    pub fn live(trip_id: &str, time: DateTime<Tz>) -> Self {
        Self {
            time,
            trip_id: trip_id.to_string(),
            service_id: String::new(),
            live: true,
            compass_dir: 0.0,
            departure_sec: None,
        }
    }
}

/// A vehicle position; `live` is false when estimated from the schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    pub lat: f64,
    pub lon: f64,
    pub live: bool,
}

/// One stop as served by one route and direction. A platform served by
/// several routes appears once per route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stop {
    pub agency_id: String,
    pub route_id: String,
    pub stop_id: String,
    pub unique_id: String,
    pub name: String,
    pub direction_id: u8,
    pub headsign: String,
    pub lat: f64,
    pub lon: f64,

    pub route_type: RouteType,
    pub route_color: String,
    pub route_text_color: String,

    pub departures: Vec<Departure>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vehicles: Vec<Vehicle>,

    /// Distance from the search midpoint in meters.
    #[serde(skip)]
    pub dist: f64,
}

impl Stop {
    /// Restores chronological order after a mutation.
    pub fn sort_departures(&mut self) {
        self.departures.sort_by(|a, b| a.time.cmp(&b.time));
    }
}

pub fn stop_unique_id(agency_id: &str, route_id: &str, stop_id: &str) -> String {
    format!("{agency_id}|{route_id}|{stop_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_scheduled_time_can_pass_midnight() {
        let base = chrono_tz::UTC.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        let d = Departure::scheduled("T1", "WKD", 90_000, base, 0.0);

        assert_eq!(d.time, chrono_tz::UTC.with_ymd_and_hms(2024, 3, 6, 1, 0, 0).unwrap());
        assert_eq!(d.departure_sec, Some(90_000));
        assert!(!d.live);
    }

    #[test]
    fn test_live_departure_is_flagged() {
        let t = chrono_tz::UTC.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        let d = Departure::live("T9", t);
        assert!(d.live);
        assert!(d.departure_sec.is_none());
    }
}
