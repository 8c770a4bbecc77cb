//! Calendar catalog rows, owned by the schedule store.

use chrono::NaiveDate;
use serde::Deserialize;

/// Base validity: `service_id` runs `route_id` on `day` (lowercase weekday
/// name) between `start_date` and `end_date`, inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceRouteDay {
    pub agency_id: String,
    pub route_id: String,
    pub service_id: String,
    pub day: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum ExceptionType {
    Added,
    Removed,
}

impl TryFrom<u8> for ExceptionType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Added),
            2 => Ok(Self::Removed),
            other => Err(format!("invalid exception_type {other}")),
        }
    }
}

/// Overrides base validity for a single date.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceRouteException {
    pub agency_id: String,
    pub route_id: String,
    pub service_id: String,
    pub exception_date: NaiveDate,
    pub exception_type: ExceptionType,
}
