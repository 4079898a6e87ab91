//! Route Progression Engine
//!
//! Holds at most one active route and a cursor pointing at the first stop
//! still pending. Completing or skipping the cursor stop persists locally
//! first, then pushes the new status to the service best-effort. A failed
//! push is logged and published as an event; it never blocks progression
//! and is not retried here.
//!
//! Progression changes are published on a broadcast channel. The engine
//! does not care whether anyone is listening.

mod progress;

pub use progress::RouteProgress;

use serde::Serialize;

use crate::gateway::GatewayError;
use crate::storage::StorageError;
use crate::types::{RouteError, StopStatus};

/// Notification of a progression change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEvent {
    Loaded {
        route_id: String,
        cursor: usize,
        total_stops: usize,
    },
    StopResolved {
        route_id: String,
        sequence: u32,
        status: StopStatus,
    },
    RemoteUpdateFailed {
        route_id: String,
        sequence: u32,
        error: GatewayError,
    },
    RouteCompleted {
        route_id: String,
        completed: usize,
        skipped: usize,
    },
}

/// Driver-supplied reason for skipping a stop; never blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipReason(String);

impl SkipReason {
    pub fn new(reason: impl Into<String>) -> Result<Self, ProgressError> {
        let reason = reason.into();
        let trimmed = reason.trim();
        if trimmed.is_empty() {
            return Err(ProgressError::EmptySkipReason);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of resolving the cursor stop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopResolution {
    pub sequence: u32,
    pub status: StopStatus,
    /// The service acknowledged the update
    pub remote_synced: bool,
    /// This resolution finished the route
    pub route_complete: bool,
}

/// Result of pulling the assigned route from the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Loaded { route_id: String, cursor: usize },
    /// The service has no route for this vehicle and date
    NoRouteAssigned,
    /// The service could not be asked; local state is untouched
    Unavailable(GatewayError),
}

/// Progression failures visible to the caller
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("no active route")]
    NoActiveRoute,
    #[error("invalid route: {0}")]
    InvalidRoute(#[from] RouteError),
    #[error("skip reason must not be blank")]
    EmptySkipReason,
    #[error(transparent)]
    Storage(#[from] StorageError),
}
