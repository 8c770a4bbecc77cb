//! Request-scoped transit entities and the read-only calendar catalog rows.

pub mod calendar;
pub mod route;
pub mod stop;
pub mod trip;

pub use calendar::{ExceptionType, ServiceRouteDay, ServiceRouteException};
pub use route::{Route, RouteType, route_unique_id};
pub use stop::{Departure, MAX_DEPARTURES, Stop, Vehicle, stop_unique_id};
pub use trip::{RouteShape, ShapePoint, Trip, TripStop, trip_unique_id};
