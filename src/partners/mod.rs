//! Real-time data sources.
//!
//! A [`Partner`] serves live departures and vehicles for one agency and
//! mode. The [`PartnerRegistry`] maps `(agency, route type)` to the partner
//! responsible; routes without an entry are served from the schedule only.

pub mod config;
pub mod gtfs_rt;

pub use config::{PartnerAuth, PartnerEntry, PartnersConfig};
pub use gtfs_rt::GtfsRtPartner;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::models::{Departure, RouteType, Vehicle};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteDirection {
    pub agency_id: String,
    pub route_id: String,
    pub direction_id: u8,
}

impl RouteDirection {
    pub fn new(agency_id: &str, route_id: &str, direction_id: u8) -> Self {
        Self {
            agency_id: agency_id.to_string(),
            route_id: route_id.to_string(),
            direction_id,
        }
    }
}

impl fmt::Display for RouteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.agency_id, self.route_id, self.direction_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveData {
    pub departures: Vec<Departure>,
    pub vehicles: Vec<Vehicle>,
}

#[async_trait]
pub trait Partner: Send + Sync {
    fn name(&self) -> &str;

    /// Refreshes the partner's cache for one route and direction.
    /// Idempotent; the only side effect is on that cache.
    async fn precache(&self, route: &RouteDirection) -> Result<()>;

    /// Live departures from `stop_id` plus vehicles on the route, read
    /// through the cache `precache` fills.
    async fn live(&self, route: &RouteDirection, stop_id: &str) -> Result<LiveData>;
}

/// Runs one partner call, giving up after `timeout` or when `cancel` fires.
pub async fn call_with_deadline<T, F>(
    call: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(anyhow!("partner call cancelled")),
        result = tokio::time::timeout(timeout, call) => {
            result.map_err(|_| anyhow!("partner call timed out after {}s", timeout.as_secs()))?
        }
    }
}

#[derive(Clone, Default)]
pub struct PartnerRegistry {
    partners: HashMap<(String, RouteType), Arc<dyn Partner>>,
}

impl PartnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any partner already registered for the pair.
    pub fn register(&mut self, agency_id: &str, route_type: RouteType, partner: Arc<dyn Partner>) {
        self.partners
            .insert((agency_id.to_string(), route_type), partner);
    }

    pub fn find(&self, agency_id: &str, route_type: RouteType) -> Option<Arc<dyn Partner>> {
        self.partners
            .get(&(agency_id.to_string(), route_type))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.partners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partners.is_empty()
    }
}

impl fmt::Debug for PartnerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.partners
                    .iter()
                    .map(|((agency, rt), p)| (format!("{agency}|{rt}"), p.name())),
            )
            .finish()
    }
}
