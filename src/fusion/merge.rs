use std::collections::HashSet;

use crate::models::{Departure, MAX_DEPARTURES, Stop};
use crate::partners::LiveData;

/// Merges live departures into a stop's scheduled ones.
///
/// Live departures come first. Scheduled departures are kept only when their
/// trip is not live and they leave strictly after the last live departure.
/// Live feeds carry no direction, so live departures inherit the compass
/// direction of the first scheduled departure.
pub fn fuse_departures(scheduled: &[Departure], mut live: Vec<Departure>) -> Vec<Departure> {
    let Some(last_live) = live.iter().map(|d| d.time).max() else {
        return scheduled.to_vec();
    };

    live.sort_by(|a, b| a.time.cmp(&b.time));

    let compass_dir = scheduled.first().map_or(0.0, |d| d.compass_dir);
    for d in &mut live {
        d.compass_dir = compass_dir;
    }

    let live_trips: HashSet<String> = live.iter().map(|d| d.trip_id.clone()).collect();

    let mut fused = live;
    for d in scheduled {
        if fused.len() >= MAX_DEPARTURES {
            break;
        }
        if live_trips.contains(&d.trip_id) {
            continue;
        }
        if d.time > last_live {
            fused.push(d.clone());
        }
    }

    fused.truncate(MAX_DEPARTURES);
    fused
}

/// Applies one partner answer to a stop.
pub fn apply_live(stop: &mut Stop, live: LiveData) {
    if !live.vehicles.is_empty() {
        stop.vehicles = live.vehicles;
    }
    stop.departures = fuse_departures(&stop.departures, live.departures);
}
