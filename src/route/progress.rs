//! RouteProgress: active route, cursor and stop resolution

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{ProgressError, RefreshOutcome, RouteEvent, SkipReason, StopResolution};
use crate::config::defaults::ROUTE_EVENT_CHANNEL_CAPACITY;
use crate::config::ConfigHandle;
use crate::gateway::{RouteFilter, SharedGateway, StopStatusUpdate};
use crate::storage::{load_collection, save_collection, Collection, SharedStore};
use crate::types::{Route, RouteStatus, Stop, StopStatus};

/// Route progression state machine.
///
/// The cursor always indexes the first pending stop at or after the last
/// resolution, or equals the stop count when nothing is left.
pub struct RouteProgress {
    store: SharedStore,
    gateway: SharedGateway,
    config: ConfigHandle,
    route: Option<Route>,
    cursor: usize,
    events: broadcast::Sender<RouteEvent>,
}

impl RouteProgress {
    /// Rehydrate the persisted active route and recompute the cursor.
    pub fn open(
        store: SharedStore,
        gateway: SharedGateway,
        config: ConfigHandle,
    ) -> Result<Self, ProgressError> {
        let route: Option<Route> = load_collection(store.as_ref(), Collection::ActiveRoute)?
            .into_iter()
            .next();
        let cursor = route.as_ref().map_or(0, |r| r.next_pending_from(0));
        let (events, _) = broadcast::channel(ROUTE_EVENT_CHANNEL_CAPACITY);

        match &route {
            Some(r) => info!(
                route_id = %r.route_id,
                cursor,
                stops = r.stops.len(),
                "Resumed active route"
            ),
            None => debug!("No active route on disk"),
        }

        Ok(Self {
            store,
            gateway,
            config,
            route,
            cursor,
            events,
        })
    }

    /// Subscribe to progression events
    pub fn subscribe(&self) -> broadcast::Receiver<RouteEvent> {
        self.events.subscribe()
    }

    /// Replace the active route.
    ///
    /// Reloading the route already active keeps every stop that was resolved
    /// locally; a terminal stop never reverts to pending. Returns the cursor.
    pub fn load_route(&mut self, mut route: Route) -> Result<usize, ProgressError> {
        route.validate()?;

        if let Some(current) = self.route.as_ref().filter(|c| c.route_id == route.route_id) {
            let carried = carry_forward(current, &mut route.stops);
            if carried > 0 {
                debug!(route_id = %route.route_id, carried, "Kept locally resolved stops");
            }
        }

        route.status = if !route.stops.is_empty() && route.all_resolved() {
            RouteStatus::Complete
        } else {
            RouteStatus::Active
        };
        let cursor = route.next_pending_from(0);

        save_collection(self.store.as_ref(), Collection::ActiveRoute, std::slice::from_ref(&route))?;

        info!(
            route_id = %route.route_id,
            vehicle_id = %route.vehicle_id,
            stops = route.stops.len(),
            cursor,
            "Route loaded"
        );
        self.publish(RouteEvent::Loaded {
            route_id: route.route_id.clone(),
            cursor,
            total_stops: route.stops.len(),
        });

        self.route = Some(route);
        self.cursor = cursor;
        Ok(cursor)
    }

    /// Fetch the vehicle's route from the service and load it.
    ///
    /// A missing vehicle filter defaults to the configured vehicle. Gateway
    /// failures leave local state untouched and come back as
    /// [`RefreshOutcome::Unavailable`].
    pub async fn refresh(&mut self, filter: RouteFilter) -> Result<RefreshOutcome, ProgressError> {
        let vehicle_id = filter
            .vehicle_id
            .clone()
            .unwrap_or_else(|| self.config.current().device.vehicle_id.clone());
        let filter = RouteFilter {
            vehicle_id: Some(vehicle_id.clone()),
            ..filter
        };

        let routes = match self.gateway.fetch_routes(&filter).await {
            Ok(routes) => routes,
            Err(e) => {
                warn!(error = %e, "Route fetch failed, keeping local route");
                return Ok(RefreshOutcome::Unavailable(e));
            }
        };

        let mut candidates = routes.into_iter().filter(|r| r.vehicle_id == vehicle_id);
        let first = candidates.next();
        let chosen = match first {
            Some(r) if r.status == RouteStatus::Complete => {
                Some(candidates.find(|r| r.status != RouteStatus::Complete).unwrap_or(r))
            }
            other => other,
        };

        let Some(route) = chosen else {
            info!(vehicle_id = %vehicle_id, "No route assigned");
            return Ok(RefreshOutcome::NoRouteAssigned);
        };

        let route_id = route.route_id.clone();
        let cursor = self.load_route(route)?;
        Ok(RefreshOutcome::Loaded { route_id, cursor })
    }

    /// Mark the cursor stop completed and advance.
    ///
    /// Past the end of the route this is a no-op returning `Ok(None)`.
    pub async fn complete_current_stop(&mut self) -> Result<Option<StopResolution>, ProgressError> {
        self.resolve_current(StopStatus::Completed, None).await
    }

    /// Mark the cursor stop skipped, recording the reason, and advance.
    pub async fn skip_current_stop(
        &mut self,
        reason: SkipReason,
    ) -> Result<Option<StopResolution>, ProgressError> {
        self.resolve_current(StopStatus::Skipped, Some(reason.0)).await
    }

    async fn resolve_current(
        &mut self,
        status: StopStatus,
        notes: Option<String>,
    ) -> Result<Option<StopResolution>, ProgressError> {
        // Work on a copy; the live route only changes once the save succeeds
        let Some(mut route) = self.route.clone() else {
            return no_active_route();
        };
        let Some(stop) = route.stops.get_mut(self.cursor) else {
            debug!(route_id = %route.route_id, "Route already finished, nothing to resolve");
            return Ok(None);
        };

        let now = Utc::now();
        if !stop.resolve(status, now, notes) {
            // Cursor only ever rests on pending stops
            warn!(sequence = stop.sequence, status = %stop.status, "Cursor stop was not pending");
            self.cursor = route.next_pending_from(self.cursor);
            return Ok(None);
        }
        let update = StopStatusUpdate {
            sequence: stop.sequence,
            status,
            notes: stop.notes.clone(),
            arrived_at: stop.arrived_at,
        };

        let cursor = route.next_pending_from(self.cursor + 1);
        let route_complete = route.all_resolved();
        if route_complete {
            route.status = RouteStatus::Complete;
        }
        let route_id = route.route_id.clone();
        let (completed, skipped) = (route.completed_count(), route.skipped_count());

        save_collection(self.store.as_ref(), Collection::ActiveRoute, std::slice::from_ref(&route))?;
        self.route = Some(route);
        self.cursor = cursor;

        info!(
            route_id = %route_id,
            sequence = update.sequence,
            status = %status,
            cursor,
            "Stop resolved"
        );
        self.publish(RouteEvent::StopResolved {
            route_id: route_id.clone(),
            sequence: update.sequence,
            status,
        });

        let remote_synced = match self.gateway.update_stop_status(&route_id, &update).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    route_id = %route_id,
                    sequence = update.sequence,
                    error = %e,
                    "Stop status update not delivered"
                );
                self.publish(RouteEvent::RemoteUpdateFailed {
                    route_id: route_id.clone(),
                    sequence: update.sequence,
                    error: e,
                });
                false
            }
        };

        if route_complete {
            info!(route_id = %route_id, completed, skipped, "Route complete");
            self.publish(RouteEvent::RouteCompleted {
                route_id,
                completed,
                skipped,
            });
        }

        Ok(Some(StopResolution {
            sequence: update.sequence,
            status,
            remote_synced,
            route_complete,
        }))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Fraction of stops resolved, in [0, 1]; 0 without a route or stops.
    pub fn progress(&self) -> f64 {
        match &self.route {
            Some(route) if !route.stops.is_empty() => {
                route.resolved_count() as f64 / route.stops.len() as f64
            }
            _ => 0.0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The stop the driver should handle next
    pub fn current_stop(&self) -> Option<&Stop> {
        self.route.as_ref()?.stops.get(self.cursor)
    }

    pub fn route(&self) -> Option<&Route> {
        self.route.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.route
            .as_ref()
            .map_or(false, |r| r.status == RouteStatus::Complete)
    }

    fn publish(&self, event: RouteEvent) {
        // No receivers is fine
        if self.events.send(event).is_err() {
            debug!("Route event dropped (no subscribers)");
        }
    }
}

/// Copy terminal local stop states onto matching pending incoming stops.
fn carry_forward(current: &Route, incoming: &mut [Stop]) -> usize {
    let mut carried = 0;
    for stop in incoming.iter_mut().filter(|s| !s.status.is_terminal()) {
        let local = current
            .stops
            .iter()
            .find(|s| s.sequence == stop.sequence && s.status.is_terminal());
        if let Some(local) = local {
            stop.status = local.status;
            stop.arrived_at = local.arrived_at;
            stop.notes = local.notes.clone();
            carried += 1;
        }
    }
    carried
}

#[cfg(debug_assertions)]
fn no_active_route() -> Result<Option<StopResolution>, ProgressError> {
    Err(ProgressError::NoActiveRoute)
}

#[cfg(not(debug_assertions))]
fn no_active_route() -> Result<Option<StopResolution>, ProgressError> {
    tracing::error!("Stop resolution requested with no active route");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayError, ScriptedGateway};
    use crate::storage::InMemoryStore;
    use crate::types::GeoPoint;
    use std::sync::Arc;

    fn route(id: &str, n: u32) -> Route {
        let stops = (0..n)
            .map(|i| Stop::new(i, Some(format!("PKT{i:03}")), GeoPoint { lat: -6.2, lon: 106.8 }))
            .collect();
        Route::new(id, "V001", stops)
    }

    fn engine() -> (Arc<ScriptedGateway>, RouteProgress) {
        let gateway = Arc::new(ScriptedGateway::default());
        let progress = RouteProgress::open(
            Arc::new(InMemoryStore::new()),
            gateway.clone(),
            ConfigHandle::default(),
        )
        .unwrap();
        (gateway, progress)
    }

    #[tokio::test]
    async fn test_reload_keeps_resolved_stops() {
        let (_gw, mut progress) = engine();
        progress.load_route(route("r1", 3)).unwrap();
        progress.complete_current_stop().await.unwrap();

        let cursor = progress.load_route(route("r1", 3)).unwrap();
        assert_eq!(cursor, 1);
        assert_eq!(progress.route().unwrap().stops[0].status, StopStatus::Completed);

        // A different route starts from scratch
        assert_eq!(progress.load_route(route("r2", 3)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_route_rejected_and_state_kept() {
        let (_gw, mut progress) = engine();
        progress.load_route(route("r1", 2)).unwrap();

        let mut bad = route("r2", 3);
        bad.stops[2].sequence = 1;
        assert!(matches!(
            progress.load_route(bad),
            Err(ProgressError::InvalidRoute(_))
        ));
        assert_eq!(progress.route().unwrap().route_id, "r1");
    }

    #[tokio::test]
    async fn test_remote_failure_does_not_block() {
        let (gw, mut progress) = engine();
        gw.set_stop_update_result(Some(GatewayError::transient("offline")));
        progress.load_route(route("r1", 2)).unwrap();
        let mut events = progress.subscribe();

        let res = progress.complete_current_stop().await.unwrap().unwrap();
        assert!(!res.remote_synced);
        assert_eq!(progress.cursor(), 1);

        assert!(matches!(events.recv().await.unwrap(), RouteEvent::StopResolved { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            RouteEvent::RemoteUpdateFailed { sequence: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_refresh_picks_vehicle_route() {
        let (gw, mut progress) = engine();
        let mut other = route("r-other", 2);
        other.vehicle_id = "V009".to_string();
        gw.set_routes(vec![other, route("r-mine", 4)]);

        let outcome = progress.refresh(RouteFilter::default()).await.unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome::Loaded {
                route_id: "r-mine".to_string(),
                cursor: 0
            }
        );
    }

    #[tokio::test]
    async fn test_refresh_unavailable_keeps_local_route() {
        let (gw, mut progress) = engine();
        progress.load_route(route("r1", 2)).unwrap();
        gw.fail_routes(GatewayError::transient("offline"));

        let outcome = progress.refresh(RouteFilter::default()).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Unavailable(_)));
        assert_eq!(progress.route().unwrap().route_id, "r1");
    }

    #[tokio::test]
    async fn test_refresh_without_assignment() {
        let (_gw, mut progress) = engine();
        let outcome = progress.refresh(RouteFilter::default()).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::NoRouteAssigned);
        assert!(progress.route().is_none());
    }

    #[tokio::test]
    async fn test_failed_save_leaves_stop_pending() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let mut progress =
            RouteProgress::open(store.clone(), gateway.clone(), ConfigHandle::default()).unwrap();
        progress.load_route(route("r1", 3)).unwrap();

        store.fail_next_saves(Collection::ActiveRoute, 1);
        assert!(matches!(
            progress.complete_current_stop().await,
            Err(ProgressError::Storage(_))
        ));
        assert_eq!(progress.cursor(), 0);
        assert_eq!(progress.route().unwrap().stops[0].status, StopStatus::Pending);
        assert!(gateway.stop_updates().is_empty());

        // The retry resolves the same stop and reports it
        let res = progress.complete_current_stop().await.unwrap().unwrap();
        assert_eq!(res.sequence, 0);
        assert!(res.remote_synced);
        assert_eq!(progress.cursor(), 1);
        let updates = gateway.stop_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.sequence, 0);
    }

    #[test]
    fn test_progress_without_route() {
        let (_gw, progress) = engine();
        assert_eq!(progress.progress(), 0.0);
        assert!(progress.current_stop().is_none());
    }
}
