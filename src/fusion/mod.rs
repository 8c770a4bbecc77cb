//! Live fusion: a fixed pool of workers that asks partners for live data
//! and merges it into aggregated stops.
//!
//! Each stop is handed to a worker by value and handed back through the
//! caller's response channel, so no stop is ever shared between tasks.
//! A failed or late stop keeps its scheduled departures.

pub mod merge;

pub use merge::{apply_live, fuse_departures};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{NearbyError, Result};
use crate::models::Stop;
use crate::partners::{Partner, PartnerRegistry, RouteDirection, call_with_deadline};

#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub workers: usize,
    pub queue_capacity: usize,

    /// Limit on a single partner call.
    pub call_timeout: Duration,

    /// Limit on waiting for every stop of one request.
    pub request_timeout: Duration,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 10_000,
            call_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(30),
        }
    }
}

struct FusionRequest {
    index: usize,
    stop: Stop,
    partner: Arc<dyn Partner>,

    /// When the caller stops waiting for this stop.
    deadline: Instant,
    respond: mpsc::Sender<FusionResponse>,
}

struct FusionResponse {
    index: usize,
    result: Result<Stop>,
}

pub struct FusionEngine {
    sender: mpsc::Sender<FusionRequest>,
    config: FusionConfig,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl FusionEngine {
    /// Spawns the worker pool. Must be called inside a Tokio runtime.
    pub fn start(config: FusionConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let cancel = CancellationToken::new();

        let workers = (0..config.workers.max(1))
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    receiver.clone(),
                    cancel.clone(),
                    config.call_timeout,
                ))
            })
            .collect();

        info!(workers = config.workers.max(1), "Fusion engine started");

        Self {
            sender,
            config,
            cancel,
            workers,
        }
    }

    /// Fuses live data into every stop that has a registered partner. Stops
    /// come back in their original order.
    #[tracing::instrument(skip_all, fields(stops = stops.len()))]
    pub async fn fuse(&self, mut stops: Vec<Stop>, registry: &PartnerRegistry) -> Vec<Stop> {
        let deadline = Instant::now() + self.config.request_timeout;
        let (respond, mut responses) = mpsc::channel(stops.len().max(1));

        let mut dispatched = 0usize;
        for (index, stop) in stops.iter().enumerate() {
            let Some(partner) = registry.find(&stop.agency_id, stop.route_type) else {
                continue;
            };

            let request = FusionRequest {
                index,
                stop: stop.clone(),
                partner,
                deadline,
                respond: respond.clone(),
            };
            match tokio::time::timeout_at(deadline, self.sender.send(request)).await {
                Ok(Ok(())) => dispatched += 1,
                Ok(Err(_)) => {
                    warn!("Fusion engine is shut down, serving schedule only");
                    break;
                }
                Err(_) => {
                    warn!(dispatched, "Fusion queue full until deadline");
                    break;
                }
            }
        }
        drop(respond);

        let mut received = 0usize;
        while received < dispatched {
            let response = tokio::select! {
                response = responses.recv() => response,
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(pending = dispatched - received, "Live fusion timed out");
                    break;
                }
            };
            let Some(response) = response else {
                break;
            };
            received += 1;

            match response.result {
                Ok(stop) => stops[response.index] = stop,
                Err(e) => {
                    let stop = &stops[response.index];
                    warn!(
                        agency_id = %stop.agency_id,
                        route_id = %stop.route_id,
                        stop_id = %stop.stop_id,
                        error = %e,
                        "Live departures unavailable"
                    );
                }
            }
        }

        debug!(dispatched, received, "Live fusion finished");
        stops
    }

    /// Stops the workers, abandoning in-flight partner calls.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        drop(self.sender);
        for handle in self.workers {
            let _ = handle.await;
        }
        info!("Fusion engine stopped");
    }
}

async fn worker(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<FusionRequest>>>,
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

        let FusionRequest {
            index,
            stop,
            partner,
            deadline,
            respond,
        } = request;

        let budget = call_timeout.min(deadline.saturating_duration_since(Instant::now()));
        if respond.is_closed() || budget.is_zero() {
            debug!(worker = id, stop_id = %stop.stop_id, "Request abandoned, skipping stop");
            continue;
        }

        let result = tokio::select! {
            result = fuse_stop(stop, partner.as_ref(), budget, &cancel) => result,
            _ = respond.closed() => {
                debug!(worker = id, "Request abandoned during partner call");
                continue;
            }
        };

        // The caller may have stopped waiting
        let _ = respond.send(FusionResponse { index, result }).await;
    }

    debug!(worker = id, "Fusion worker stopped");
}

async fn fuse_stop(
    mut stop: Stop,
    partner: &dyn Partner,
    call_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Stop> {
    let route = RouteDirection::new(&stop.agency_id, &stop.route_id, stop.direction_id);
    let live = call_with_deadline(partner.live(&route, &stop.stop_id), call_timeout, cancel)
        .await
        .map_err(|e| NearbyError::upstream(&e.context(format!("partner {}", partner.name()))))?;

    apply_live(&mut stop, live);
    Ok(stop)
}
