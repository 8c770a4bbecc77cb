//! An in-memory [`ScheduleStore`] loaded from CSV exports of the schedule
//! database. Used by the CLI and by tests; SQL-backed stores run the
//! rendered [`HereQuery::sql`] instead.

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{
    Route, RouteShape, ServiceRouteDay, ServiceRouteException, ShapePoint, Trip, TripStop,
    trip_unique_id,
};
use crate::schedule::{HereQuery, HereRow, ScheduleStore};

#[derive(Debug, Deserialize)]
struct RouteRecord {
    agency_id: String,
    route_id: String,
    route_type: i32,
    #[serde(default)]
    route_color: String,
    #[serde(default)]
    route_text_color: String,
    #[serde(default)]
    route_short_name: String,
    #[serde(default)]
    route_long_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TripRecord {
    pub agency_id: String,
    pub route_id: String,
    pub trip_id: String,
    pub service_id: String,
    #[serde(default)]
    pub shape_id: String,
    #[serde(default)]
    pub headsign: String,
    pub direction_id: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShapeRecord {
    pub agency_id: String,
    pub shape_id: String,
    pub seq: u32,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteShapeRecord {
    pub agency_id: String,
    pub route_id: String,
    pub headsign: String,
    pub direction_id: u8,
    pub shape_id: String,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    routes: Vec<Route>,
    service_days: Vec<ServiceRouteDay>,
    exceptions: Vec<ServiceRouteException>,
    rows: Vec<HereRow>,
    trips: HashMap<String, TripRecord>,
    shapes: HashMap<(String, String), Vec<ShapeRecord>>,
    route_shapes: Vec<RouteShapeRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every known CSV from `dir`. Missing files leave their table
    /// empty.
    pub fn load_dir(dir: impl AsRef<Path>) -> AnyResult<Self> {
        let dir = dir.as_ref();
        let mut store = Self::new();

        for record in read_csv::<RouteRecord>(&dir.join("routes.csv"))? {
            let route = Route::new(
                &record.agency_id,
                &record.route_id,
                record.route_type,
                &record.route_color,
                &record.route_text_color,
            )
            .with_context(|| format!("routes.csv: route {}", record.route_id))?
            .with_names(&record.route_short_name, &record.route_long_name);
            store.insert_route(route);
        }
        for day in read_csv(&dir.join("service_route_days.csv"))? {
            store.insert_service_day(day);
        }
        for exception in read_csv(&dir.join("service_route_exceptions.csv"))? {
            store.insert_exception(exception);
        }
        for row in read_csv(&dir.join("stop_times.csv"))? {
            store.insert_row(row);
        }
        for trip in read_csv(&dir.join("trips.csv"))? {
            store.insert_trip(trip);
        }
        for point in read_csv(&dir.join("shapes.csv"))? {
            store.insert_shape_point(point);
        }
        for shape in read_csv(&dir.join("route_shapes.csv"))? {
            store.insert_route_shape(shape);
        }

        info!(
            dir = %dir.display(),
            routes = store.routes.len(),
            rows = store.rows.len(),
            trips = store.trips.len(),
            "Loaded schedule"
        );

        Ok(store)
    }

    pub fn insert_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub fn insert_service_day(&mut self, day: ServiceRouteDay) {
        self.service_days.push(day);
    }

    pub fn insert_exception(&mut self, exception: ServiceRouteException) {
        self.exceptions.push(exception);
    }

    pub fn insert_row(&mut self, row: HereRow) {
        self.rows.push(row);
    }

    pub fn insert_trip(&mut self, trip: TripRecord) {
        self.trips
            .insert(trip_unique_id(&trip.agency_id, &trip.trip_id), trip);
    }

    pub fn insert_shape_point(&mut self, point: ShapeRecord) {
        let points = self
            .shapes
            .entry((point.agency_id.clone(), point.shape_id.clone()))
            .or_default();
        points.push(point);
        points.sort_by_key(|p| p.seq);
    }

    pub fn insert_route_shape(&mut self, shape: RouteShapeRecord) {
        self.route_shapes.push(shape);
    }

    fn shape_points(&self, agency_id: &str, shape_id: &str) -> Vec<ShapePoint> {
        self.shapes
            .get(&(agency_id.to_string(), shape_id.to_string()))
            .map(|points| {
                points
                    .iter()
                    .map(|p| ShapePoint { lat: p.lat, lon: p.lon })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Route geometry for a trip without its own shape: same direction and
    /// headsign first, then same direction alone.
    fn fallback_shape(&self, trip: &TripRecord) -> Vec<ShapePoint> {
        let same_direction = |s: &&RouteShapeRecord| {
            s.agency_id == trip.agency_id
                && s.route_id == trip.route_id
                && s.direction_id == trip.direction_id
        };

        self.route_shapes
            .iter()
            .filter(same_direction)
            .find(|s| s.headsign == trip.headsign)
            .or_else(|| self.route_shapes.iter().find(same_direction))
            .map(|s| self.shape_points(&s.agency_id, &s.shape_id))
            .unwrap_or_default()
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn service_days(&self, agency_id: &str, day: &str) -> Result<Vec<ServiceRouteDay>> {
        Ok(self
            .service_days
            .iter()
            .filter(|d| d.agency_id == agency_id && d.day == day)
            .cloned()
            .collect())
    }

    async fn service_exceptions(
        &self,
        agency_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<ServiceRouteException>> {
        Ok(self
            .exceptions
            .iter()
            .filter(|e| e.agency_id == agency_id && e.exception_date == date)
            .cloned()
            .collect())
    }

    async fn query_here(&self, query: &HereQuery) -> Result<Vec<HereRow>> {
        let mut matched: Vec<(i64, HereRow)> = self
            .rows
            .iter()
            .filter(|row| query.matches(row))
            .filter_map(|row| {
                let sort_sec = query.sort_sec(row)?;
                let mut row = row.clone();
                row.dist = query.area.distance_to(row.lat, row.lon);
                Some((sort_sec, row))
            })
            .collect();

        matched.sort_by(|(a_sec, a), (b_sec, b)| {
            a.dist.total_cmp(&b.dist).then_with(|| a_sec.cmp(b_sec))
        });
        matched.truncate(query.limit);

        debug!(rows = matched.len(), "Here query matched");

        Ok(matched.into_iter().map(|(_, row)| row).collect())
    }

    async fn routes(&self, agency_id: &str) -> Result<Vec<Route>> {
        Ok(self
            .routes
            .iter()
            .filter(|r| r.agency_id == agency_id)
            .cloned()
            .collect())
    }

    async fn route_shapes(&self, agency_id: &str, route_id: &str) -> Result<Vec<RouteShape>> {
        Ok(self
            .route_shapes
            .iter()
            .filter(|s| s.agency_id == agency_id && s.route_id == route_id)
            .map(|s| RouteShape {
                agency_id: s.agency_id.clone(),
                route_id: s.route_id.clone(),
                headsign: s.headsign.clone(),
                direction_id: s.direction_id,
                shape_id: s.shape_id.clone(),
                points: self.shape_points(&s.agency_id, &s.shape_id),
            })
            .collect())
    }

    async fn trip(&self, agency_id: &str, route_id: &str, trip_id: &str) -> Result<Option<Trip>> {
        let unique_id = trip_unique_id(agency_id, trip_id);
        let Some(record) = self
            .trips
            .get(&unique_id)
            .filter(|t| t.route_id == route_id)
        else {
            return Ok(None);
        };

        let mut shape_points = self.shape_points(agency_id, &record.shape_id);
        if shape_points.is_empty() {
            shape_points = self.fallback_shape(record);
        }

        let mut stops: Vec<TripStop> = self
            .rows
            .iter()
            .filter(|r| r.agency_id == agency_id && r.trip_id == trip_id)
            .map(|r| TripStop {
                stop_id: r.stop_id.clone(),
                name: r.stop_name.clone(),
                lat: r.lat,
                lon: r.lon,
                departure_sec: r.departure_sec,
            })
            .collect();
        stops.sort_by_key(|s| s.departure_sec);

        Ok(Some(Trip {
            agency_id: record.agency_id.clone(),
            route_id: record.route_id.clone(),
            trip_id: record.trip_id.clone(),
            unique_id,
            service_id: record.service_id.clone(),
            shape_id: record.shape_id.clone(),
            headsign: record.headsign.clone(),
            direction_id: record.direction_id,
            shape_points,
            stops,
        }))
    }

    async fn partial_trip_match(
        &self,
        agency_id: &str,
        route_id: &str,
        partial: &str,
    ) -> Result<Option<String>> {
        let mut candidates: Vec<&str> = self
            .trips
            .values()
            .filter(|t| {
                t.agency_id == agency_id && t.route_id == route_id && t.trip_id.contains(partial)
            })
            .map(|t| t.trip_id.as_str())
            .collect();
        candidates.sort_unstable();

        Ok(candidates.first().map(|id| id.to_string()))
    }
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> AnyResult<Vec<T>> {
    if !path.exists() {
        debug!(path = %path.display(), "No such table, skipping");
        return Ok(Vec::new());
    }

    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut rdr = csv::Reader::from_reader(file);
    let mut records = Vec::new();

    for result in rdr.deserialize() {
        let record: T = result.with_context(|| format!("parsing {}", path.display()))?;
        records.push(record);
    }

    Ok(records)
}
