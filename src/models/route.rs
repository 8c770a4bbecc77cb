use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{NearbyError, Result};
use crate::models::trip::RouteShape;

const DEFAULT_COLOR: &str = "#FFFFFF";
const DEFAULT_TEXT_COLOR: &str = "#000000";

/// GTFS route types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    Tram,
    Subway,
    Rail,
    Bus,
    Ferry,
    CableCar,
    Gondola,
    Funicular,
}

impl RouteType {
    pub const ALL: [RouteType; 8] = [
        RouteType::Tram,
        RouteType::Subway,
        RouteType::Rail,
        RouteType::Bus,
        RouteType::Ferry,
        RouteType::CableCar,
        RouteType::Gondola,
        RouteType::Funicular,
    ];

    pub fn from_gtfs(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Tram),
            1 => Some(Self::Subway),
            2 => Some(Self::Rail),
            3 => Some(Self::Bus),
            4 => Some(Self::Ferry),
            5 => Some(Self::CableCar),
            6 => Some(Self::Gondola),
            7 => Some(Self::Funicular),
            _ => None,
        }
    }

    pub fn gtfs_code(self) -> i32 {
        match self {
            Self::Tram => 0,
            Self::Subway => 1,
            Self::Rail => 2,
            Self::Bus => 3,
            Self::Ferry => 4,
            Self::CableCar => 5,
            Self::Gondola => 6,
            Self::Funicular => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Tram => "tram",
            Self::Subway => "subway",
            Self::Rail => "rail",
            Self::Bus => "bus",
            Self::Ferry => "ferry",
            Self::CableCar => "cable_car",
            Self::Gondola => "gondola",
            Self::Funicular => "funicular",
        }
    }

    /// Ordering tier for nearby results: rapid modes first, ferries above buses.
    pub fn sort_tier(self) -> u8 {
        match self {
            Self::Tram => 0,
            Self::Subway => 1,
            Self::Rail => 2,
            Self::Ferry => 3,
            Self::Bus => 4,
            Self::CableCar => 5,
            Self::Gondola => 6,
            Self::Funicular => 7,
        }
    }
}

impl fmt::Display for RouteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RouteType {
    type Err = NearbyError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        RouteType::ALL
            .into_iter()
            .find(|t| t.name() == wanted)
            .ok_or_else(|| NearbyError::InvalidInput(format!("unknown route type '{s}'")))
    }
}

/// A route of one agency. Shapes are only attached when the route is
/// disclosed to a client that has not seen it yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub agency_id: String,
    pub route_id: String,
    pub route_type: RouteType,
    pub route_type_name: &'static str,
    pub color: String,
    pub text_color: String,
    pub short_name: String,
    pub long_name: String,
    pub unique_id: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub route_shapes: Vec<RouteShape>,
}

impl Route {
    pub fn new(
        agency_id: &str,
        route_id: &str,
        route_type: i32,
        color: &str,
        text_color: &str,
    ) -> Result<Self> {
        if route_id.trim().is_empty() {
            return Err(NearbyError::InvalidInput("route without ID".into()));
        }

        let route_type = RouteType::from_gtfs(route_type).ok_or_else(|| {
            NearbyError::InvalidInput(format!(
                "route {agency_id}|{route_id} has invalid route_type {route_type}"
            ))
        })?;

        Ok(Self {
            agency_id: agency_id.to_string(),
            route_id: route_id.to_string(),
            route_type,
            route_type_name: route_type.name(),
            color: normalize_color(color, DEFAULT_COLOR),
            text_color: normalize_color(text_color, DEFAULT_TEXT_COLOR),
            short_name: String::new(),
            long_name: String::new(),
            unique_id: route_unique_id(agency_id, route_id),
            route_shapes: Vec::new(),
        })
    }

    pub fn with_names(mut self, short_name: &str, long_name: &str) -> Self {
        self.short_name = short_name.to_string();
        self.long_name = long_name.to_string();
        self
    }
}

pub fn route_unique_id(agency_id: &str, route_id: &str) -> String {
    format!("{agency_id}|{route_id}")
}

/// Returns `#RRGGBB`, or `default` when the input is blank or not six hex digits.
fn normalize_color(color: &str, default: &str) -> String {
    let hex = color.trim().trim_start_matches('#');
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        format!("#{}", hex.to_ascii_uppercase())
    } else {
        default.to_string()
    }
}
