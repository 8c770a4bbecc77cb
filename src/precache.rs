//! Background refresh of partner data ahead of client demand.
//!
//! One driver task per `(agency, route, direction)` with a partner loops
//! forever: it queues a refresh on its agency's bounded channel, waits for
//! the answer, then sleeps. A fixed pool of workers per agency drains the
//! channel, so the channel send is where drivers feel backpressure.

use anyhow::anyhow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::partners::{Partner, PartnerRegistry, RouteDirection, call_with_deadline};
use crate::schedule::ScheduleStore;

#[derive(Debug, Clone)]
pub struct PrecacheConfig {
    pub workers_per_agency: usize,
    pub queue_capacity: usize,

    /// Pause after a successful refresh.
    pub delay: Duration,

    /// Pause after a failed refresh.
    pub err_delay: Duration,

    /// Age of the live cache entries; a driver without success for longer
    /// is serving stale data.
    pub cache_ttl: Duration,

    pub call_timeout: Duration,
}

impl Default for PrecacheConfig {
    fn default() -> Self {
        Self {
            workers_per_agency: 20,
            queue_capacity: 50_000,
            delay: Duration::from_secs(60),
            err_delay: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(90),
            call_timeout: Duration::from_secs(20),
        }
    }
}

struct PrecacheRequest {
    route: RouteDirection,
    partner: Arc<dyn Partner>,
    respond: oneshot::Sender<anyhow::Result<()>>,
}

pub struct PrecacheScheduler;

impl PrecacheScheduler {
    /// Discovers every route of `agencies` served by a partner and starts a
    /// driver for each of its two directions.
    #[tracing::instrument(skip(store, registry, config))]
    pub async fn start(
        store: &dyn ScheduleStore,
        registry: &PartnerRegistry,
        agencies: &[String],
        config: PrecacheConfig,
    ) -> Result<PrecacheHandle> {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        let mut drivers = 0usize;

        for agency_id in agencies {
            let routes = store.routes(agency_id).await?;
            let served: Vec<_> = routes
                .iter()
                .filter_map(|route| {
                    registry
                        .find(agency_id, route.route_type)
                        .map(|partner| (route, partner))
                })
                .collect();
            if served.is_empty() {
                debug!(agency_id = %agency_id, "No partner routes to precache");
                continue;
            }

            let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
            let receiver = Arc::new(Mutex::new(receiver));

            for id in 0..config.workers_per_agency.max(1) {
                tasks.push(tokio::spawn(worker(
                    agency_id.clone(),
                    id,
                    receiver.clone(),
                    cancel.clone(),
                    config.call_timeout,
                )));
            }

            for (route, partner) in served {
                for direction_id in 0..=1 {
                    tasks.push(tokio::spawn(driver(
                        RouteDirection::new(agency_id, &route.route_id, direction_id),
                        partner.clone(),
                        sender.clone(),
                        config.clone(),
                        cancel.clone(),
                    )));
                    drivers += 1;
                }
            }

            info!(
                agency_id = %agency_id,
                routes = routes.len(),
                workers = config.workers_per_agency.max(1),
                "Precache started for agency"
            );
        }

        info!(drivers, "Precache scheduler running");

        Ok(PrecacheHandle {
            cancel,
            tasks,
            drivers,
        })
    }
}

pub struct PrecacheHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    drivers: usize,
}

impl PrecacheHandle {
    pub fn driver_count(&self) -> usize {
        self.drivers
    }

    /// Stops every driver and worker and waits for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Precache scheduler stopped");
    }
}

async fn driver(
    route: RouteDirection,
    partner: Arc<dyn Partner>,
    sender: mpsc::Sender<PrecacheRequest>,
    config: PrecacheConfig,
    cancel: CancellationToken,
) {
    let mut last_success = Instant::now();

    loop {
        let (respond, response) = oneshot::channel();
        let request = PrecacheRequest {
            route: route.clone(),
            partner: partner.clone(),
            respond,
        };

        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = sender.send(request) => sent,
        };
        if sent.is_err() {
            break;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = response => result
                .unwrap_or_else(|_| Err(anyhow!("precache worker dropped the request"))),
        };

        let gap = last_success.elapsed();
        if gap > config.cache_ttl {
            warn!(
                route = %route,
                gap_secs = gap.as_secs(),
                ttl_secs = config.cache_ttl.as_secs(),
                "Live data is stale"
            );
        }

        let wait = match result {
            Ok(()) => {
                last_success = Instant::now();
                config.delay
            }
            Err(e) => {
                warn!(
                    route = %route,
                    partner = partner.name(),
                    error = %format!("{e:#}"),
                    "Precache failed"
                );
                config.err_delay
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    debug!(route = %route, "Precache driver stopped");
}

async fn worker(
    agency_id: String,
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<PrecacheRequest>>>,
    cancel: CancellationToken,
    call_timeout: Duration,
) {
    loop {
        let request = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                request = receiver.recv() => request,
            }
        };
        let Some(request) = request else {
            break;
        };

        let refresh = request.partner.precache(&request.route);
        let result = call_with_deadline(refresh, call_timeout, &cancel).await;
        let _ = request.respond.send(result);
    }

    debug!(agency_id = %agency_id, worker = id, "Precache worker stopped");
}
