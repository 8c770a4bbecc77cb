//! Error taxonomy for the nearby-departures core.
//!
//! Per-stop live failures never surface here; they are logged by the
//! fusion engine and the stop keeps its scheduled departures.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NearbyError {
    /// Requested entity is absent, e.g. a trip that no fallback tier resolves.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad filter token, route type, coordinate or request shape.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The schedule store or a partner call failed.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Fatal: the data violates an assumption downstream consumers rely on.
    #[error("data inconsistency: {0}")]
    DataInconsistency(String),
}

impl NearbyError {
    /// Wraps an opaque collaborator failure (partner, fetch, parse).
    pub fn upstream(err: &anyhow::Error) -> Self {
        NearbyError::UpstreamUnavailable(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, NearbyError>;
