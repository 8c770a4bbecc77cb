//! Everything between "now" and an aggregated stop list: the store
//! contract, the calendar resolver, the window stitcher, the compiled
//! Here query and the aggregator.

pub mod aggregate;
pub mod calendar;
pub mod memory;
pub mod query;
pub mod trips;
pub mod window;

pub use aggregate::{Aggregation, aggregate};
pub use memory::MemoryStore;
pub use query::HereQuery;
pub use window::{ServiceWindow, WindowDay, WindowSet};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::Result;
use crate::models::{Route, RouteShape, ServiceRouteDay, ServiceRouteException, Trip};

/// One joined stop/route/departure row produced by a Here query.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HereRow {
    pub agency_id: String,
    pub route_id: String,
    pub stop_id: String,
    pub trip_id: String,
    pub service_id: String,
    pub departure_sec: i64,

    pub stop_name: String,
    pub headsign: String,
    pub direction_id: u8,
    pub lat: f64,
    pub lon: f64,

    /// Coordinates of the trip's next stop, for the compass direction.
    #[serde(default)]
    pub next_lat: Option<f64>,
    #[serde(default)]
    pub next_lon: Option<f64>,

    pub route_type: i32,
    #[serde(default)]
    pub route_color: String,
    #[serde(default)]
    pub route_text_color: String,

    /// Filled in by the store: meters from the query midpoint.
    #[serde(default)]
    pub dist: f64,
}

/// The schedule store. Implementations must be safe for concurrent use;
/// it is the one resource shared by every request and driver.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Base calendar rows of an agency for a lowercase weekday name.
    async fn service_days(&self, agency_id: &str, day: &str) -> Result<Vec<ServiceRouteDay>>;

    /// Calendar exceptions of an agency on one date.
    async fn service_exceptions(
        &self,
        agency_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<ServiceRouteException>>;

    /// Rows matching the query, ordered by distance then `sort_sec`, capped
    /// at the query limit.
    async fn query_here(&self, query: &HereQuery) -> Result<Vec<HereRow>>;

    async fn routes(&self, agency_id: &str) -> Result<Vec<Route>>;

    async fn route_shapes(&self, agency_id: &str, route_id: &str) -> Result<Vec<RouteShape>>;

    /// Full trip detail, `None` when the ID is unknown.
    async fn trip(&self, agency_id: &str, route_id: &str, trip_id: &str) -> Result<Option<Trip>>;

    /// First known trip ID of the route that contains `partial`.
    async fn partial_trip_match(
        &self,
        agency_id: &str,
        route_id: &str,
        partial: &str,
    ) -> Result<Option<String>>;
}
