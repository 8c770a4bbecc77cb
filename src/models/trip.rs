use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapePoint {
    pub lat: f64,
    pub lon: f64,
}

/// The representative geometry of a route for one headsign and direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteShape {
    pub agency_id: String,
    pub route_id: String,
    pub headsign: String,
    pub direction_id: u8,
    pub shape_id: String,
    pub points: Vec<ShapePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripStop {
    pub stop_id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub departure_sec: i64,
}

/// Full trip detail: geometry plus the ordered stop sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trip {
    pub agency_id: String,
    pub route_id: String,
    pub trip_id: String,
    pub unique_id: String,
    pub service_id: String,
    pub shape_id: String,
    pub headsign: String,
    pub direction_id: u8,
    pub shape_points: Vec<ShapePoint>,
    pub stops: Vec<TripStop>,
}

pub fn trip_unique_id(agency_id: &str, trip_id: &str) -> String {
    format!("{agency_id}|{trip_id}")
}
