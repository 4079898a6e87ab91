//! Remote Gateway: accessor for the package/route service
//!
//! ## Error classification
//!
//! Every failure is one of two kinds, and all retry decisions downstream key
//! on the distinction:
//!
//! - **Transient**: the request never reliably reached the server or was
//!   never answered (connection refused, DNS, timeout, broken body), or an
//!   intermediary answered for it (408, 429, 502, 503, 504).
//!   Retrying later may succeed.
//! - **Rejected**: the service answered and refused (any other non-success
//!   status, or a success body of the wrong shape). Retrying the same request
//!   will not help.
//!
//! The gateway never retries and touches no local state.

mod client;
pub mod scripted;
mod wire;

pub use client::HttpGateway;
pub use scripted::{ScriptedGateway, SubmitMode};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::{ConfirmedRecord, Observation, Route, StopStatus};

/// Classified gateway failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("transient gateway failure: {0}")]
    Transient(String),
    #[error("rejected by server (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl GatewayError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        GatewayError::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        GatewayError::Transient(message.into())
    }

    /// Retrying later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

/// A stop resolution pushed to the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopStatusUpdate {
    pub sequence: u32,
    pub status: StopStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrived_at: Option<DateTime<Utc>>,
}

/// Route listing filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteFilter {
    pub planned_date: Option<NaiveDate>,
    pub vehicle_id: Option<String>,
}

/// Service health report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub version: String,
}

/// Remote operations the engines depend on
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Submit a captured observation for ingestion.
    async fn submit_observation(
        &self,
        observation: &Observation,
    ) -> Result<ConfirmedRecord, GatewayError>;

    /// Report a stop's new status.
    async fn update_stop_status(
        &self,
        route_id: &str,
        update: &StopStatusUpdate,
    ) -> Result<(), GatewayError>;

    /// List routes matching the filter.
    async fn fetch_routes(&self, filter: &RouteFilter) -> Result<Vec<Route>, GatewayError>;

    /// Basic service health.
    async fn health(&self) -> Result<HealthStatus, GatewayError>;
}

/// Shared reference to a gateway
pub type SharedGateway = Arc<dyn RemoteGateway>;
