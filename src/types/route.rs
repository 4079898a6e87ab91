//! Delivery types: Route, Stop, StopStatus, RouteStatus

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::GeoPoint;

/// Structural problems that prevent a route from being loaded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("route id is empty")]
    EmptyRouteId,
    #[error("stop sequence {next} does not follow {previous}")]
    SequenceNotIncreasing { previous: u32, next: u32 },
}

/// Delivery state of a single stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopStatus {
    #[default]
    Pending,
    Completed,
    Skipped,
}

impl StopStatus {
    /// Completed and skipped are final
    pub fn is_terminal(self) -> bool {
        !matches!(self, StopStatus::Pending)
    }
}

impl std::fmt::Display for StopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopStatus::Pending => write!(f, "pending"),
            StopStatus::Completed => write!(f, "completed"),
            StopStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Lifecycle of a route on the driver device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStatus {
    #[default]
    Planned,
    #[serde(alias = "in_progress")]
    Active,
    #[serde(alias = "completed")]
    Complete,
}

/// One element of a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    /// Position in the route; 0 is the depot
    pub sequence: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    pub location: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_arrival: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: StopStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrived_at: Option<DateTime<Utc>>,
}

impl Stop {
    /// A fresh pending stop
    pub fn new(sequence: u32, package_id: Option<String>, location: GeoPoint) -> Self {
        Self {
            sequence,
            package_id,
            location,
            address_summary: None,
            estimated_arrival: None,
            status: StopStatus::Pending,
            notes: None,
            arrived_at: None,
        }
    }

    pub fn is_depot(&self) -> bool {
        self.sequence == 0
    }

    /// Move a pending stop into a terminal state.
    ///
    /// Returns `false` (and changes nothing) if the stop is already terminal
    /// or `status` is not terminal.
    pub fn resolve(&mut self, status: StopStatus, at: DateTime<Utc>, notes: Option<String>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.arrived_at = Some(at);
        if notes.is_some() {
            self.notes = notes;
        }
        true
    }
}

/// A server-assigned ordered list of stops for one vehicle and day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub route_id: String,
    pub vehicle_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: RouteStatus,
    pub stops: Vec<Stop>,
}

impl Route {
    pub fn new(route_id: impl Into<String>, vehicle_id: impl Into<String>, stops: Vec<Stop>) -> Self {
        Self {
            route_id: route_id.into(),
            vehicle_id: vehicle_id.into(),
            planned_date: None,
            status: RouteStatus::Planned,
            stops,
        }
    }

    /// Check the structural invariants (non-empty id, strictly increasing sequence).
    pub fn validate(&self) -> Result<(), RouteError> {
        if self.route_id.trim().is_empty() {
            return Err(RouteError::EmptyRouteId);
        }
        for pair in self.stops.windows(2) {
            if pair[1].sequence <= pair[0].sequence {
                return Err(RouteError::SequenceNotIncreasing {
                    previous: pair[0].sequence,
                    next: pair[1].sequence,
                });
            }
        }
        Ok(())
    }

    /// Index of the first pending stop at or after `from`, or `len` if none.
    pub fn next_pending_from(&self, from: usize) -> usize {
        self.stops
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, stop)| stop.status == StopStatus::Pending)
            .map_or(self.stops.len(), |(idx, _)| idx)
    }

    /// Number of stops in a terminal state
    pub fn resolved_count(&self) -> usize {
        self.stops.iter().filter(|s| s.status.is_terminal()).count()
    }

    pub fn completed_count(&self) -> usize {
        self.stops
            .iter()
            .filter(|s| s.status == StopStatus::Completed)
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.stops
            .iter()
            .filter(|s| s.status == StopStatus::Skipped)
            .count()
    }

    /// Every stop is terminal
    pub fn all_resolved(&self) -> bool {
        self.stops.iter().all(|s| s.status.is_terminal())
    }
}
