//! Scripted in-process gateway
//!
//! Stands in for the remote service in tests and offline demos. Submissions
//! return queued one-shot outcomes first, then fall back to a default mode.
//! Every call is recorded for later inspection.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{GatewayError, HealthStatus, RemoteGateway, RouteFilter, StopStatusUpdate};
use crate::types::{ConfirmedRecord, Observation, PackageStatus, Route};

/// What a submission does when no scripted outcome is queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitMode {
    /// Accept and echo back a confirmation
    #[default]
    Confirm,
    /// Fail as if the network were down
    Transient,
    /// Refuse with HTTP 422
    Reject,
}

#[derive(Debug, Default)]
struct State {
    mode: SubmitMode,
    scripted: VecDeque<Result<ConfirmedRecord, GatewayError>>,
    submitted: Vec<String>,
    stop_result: Option<GatewayError>,
    stop_updates: Vec<(String, StopStatusUpdate)>,
    routes: Vec<Route>,
    routes_error: Option<GatewayError>,
    submit_delay: Option<Duration>,
    next_server_id: u64,
}

/// `RemoteGateway` driven by a script
#[derive(Debug)]
pub struct ScriptedGateway {
    state: Mutex<State>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new(SubmitMode::Confirm)
    }
}

impl ScriptedGateway {
    pub fn new(mode: SubmitMode) -> Self {
        Self {
            state: Mutex::new(State {
                mode,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not take every later assertion with it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Change the fallback submission behavior
    pub fn set_mode(&self, mode: SubmitMode) {
        self.lock().mode = mode;
    }

    /// Queue a one-shot submission outcome
    pub fn push_outcome(&self, outcome: Result<ConfirmedRecord, GatewayError>) {
        self.lock().scripted.push_back(outcome);
    }

    /// Hold every submission for `delay` before answering, like a slow link
    pub fn set_submit_delay(&self, delay: Option<Duration>) {
        self.lock().submit_delay = delay;
    }

    /// Make every stop update fail with `err`, or succeed with `None`
    pub fn set_stop_update_result(&self, err: Option<GatewayError>) {
        self.lock().stop_result = err;
    }

    /// Routes returned by `fetch_routes`
    pub fn set_routes(&self, routes: Vec<Route>) {
        let mut state = self.lock();
        state.routes = routes;
        state.routes_error = None;
    }

    /// Make `fetch_routes` fail
    pub fn fail_routes(&self, err: GatewayError) {
        self.lock().routes_error = Some(err);
    }

    /// Package ids of every submission attempt, in call order
    pub fn submitted(&self) -> Vec<String> {
        self.lock().submitted.clone()
    }

    /// Every stop update attempt, in call order
    pub fn stop_updates(&self) -> Vec<(String, StopStatusUpdate)> {
        self.lock().stop_updates.clone()
    }

    fn confirmation(state: &mut State, observation: &Observation) -> ConfirmedRecord {
        state.next_server_id += 1;
        ConfirmedRecord {
            server_id: format!("srv-{}", state.next_server_id),
            package_id: observation.package_id.clone(),
            status: PackageStatus::Pending,
            message: "Package received".to_string(),
            created_at: Utc::now().to_rfc3339(),
            parsed_address: None,
            geocoded: false,
            requires_verification: false,
        }
    }
}

#[async_trait]
impl RemoteGateway for ScriptedGateway {
    async fn submit_observation(
        &self,
        observation: &Observation,
    ) -> Result<ConfirmedRecord, GatewayError> {
        let delay = {
            let mut state = self.lock();
            state.submitted.push(observation.package_id.clone());
            state.submit_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();

        if let Some(outcome) = state.scripted.pop_front() {
            return outcome;
        }

        match state.mode {
            SubmitMode::Confirm => Ok(Self::confirmation(&mut state, observation)),
            SubmitMode::Transient => Err(GatewayError::transient("connection refused")),
            SubmitMode::Reject => Err(GatewayError::rejected(422, "unprocessable observation")),
        }
    }

    async fn update_stop_status(
        &self,
        route_id: &str,
        update: &StopStatusUpdate,
    ) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.stop_updates.push((route_id.to_string(), update.clone()));
        match &state.stop_result {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn fetch_routes(&self, filter: &RouteFilter) -> Result<Vec<Route>, GatewayError> {
        let state = self.lock();
        if let Some(err) = &state.routes_error {
            return Err(err.clone());
        }
        Ok(state
            .routes
            .iter()
            .filter(|r| {
                filter.planned_date.map_or(true, |d| r.planned_date == Some(d))
                    && filter.vehicle_id.as_deref().map_or(true, |v| r.vehicle_id == v)
            })
            .cloned()
            .collect())
    }

    async fn health(&self) -> Result<HealthStatus, GatewayError> {
        if self.lock().mode == SubmitMode::Transient {
            return Err(GatewayError::transient("connection refused"));
        }
        Ok(HealthStatus {
            status: "healthy".to_string(),
            service: "scripted".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    fn obs(pkg: &str) -> Observation {
        Observation::new(pkg, "scanner-01", "Jl. Thamrin 5", 0.9, Priority::Standard, None).unwrap()
    }

    #[tokio::test]
    async fn test_scripted_outcomes_take_precedence() {
        let gw = ScriptedGateway::new(SubmitMode::Confirm);
        gw.push_outcome(Err(GatewayError::transient("offline")));

        assert!(gw.submit_observation(&obs("PKT1")).await.unwrap_err().is_transient());
        let confirmed = gw.submit_observation(&obs("PKT2")).await.unwrap();
        assert_eq!(confirmed.package_id, "PKT2");
        assert_eq!(gw.submitted(), vec!["PKT1", "PKT2"]);
    }

    #[tokio::test]
    async fn test_route_filter_applied() {
        let gw = ScriptedGateway::default();
        gw.set_routes(vec![Route::new("r1", "V001", vec![]), Route::new("r2", "V002", vec![])]);

        let filter = RouteFilter {
            vehicle_id: Some("V002".to_string()),
            ..RouteFilter::default()
        };
        let routes = gw.fetch_routes(&filter).await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].route_id, "r2");
    }
}
