//! Route progression integration tests
//!
//! Walk routes through completion and skip against the scripted gateway,
//! checking cursor, progress, persistence and published events.

use std::sync::Arc;

use paket_field::config::ConfigHandle;
use paket_field::gateway::{GatewayError, ScriptedGateway};
use paket_field::route::{ProgressError, RouteEvent, RouteProgress, SkipReason};
use paket_field::storage::{FileStore, InMemoryStore, SharedStore};
use paket_field::types::{GeoPoint, Route, RouteStatus, Stop, StopStatus};

fn stop(sequence: u32) -> Stop {
    let mut stop = Stop::new(
        sequence,
        Some(format!("PKT{:03}", sequence)),
        GeoPoint {
            lat: -6.2 - f64::from(sequence) * 0.01,
            lon: 106.8,
        },
    );
    stop.address_summary = Some(format!("Jl. Kemang Raya {}", sequence));
    stop
}

fn route(id: &str, n: u32) -> Route {
    Route::new(id, "V001", (1..=n).map(stop).collect())
}

fn engine(store: SharedStore) -> (Arc<ScriptedGateway>, RouteProgress) {
    let gateway = Arc::new(ScriptedGateway::default());
    let progress = RouteProgress::open(store, gateway.clone(), ConfigHandle::default()).unwrap();
    (gateway, progress)
}

#[tokio::test]
async fn test_three_stop_route_walkthrough() {
    let (gateway, mut progress) = engine(Arc::new(InMemoryStore::new()));
    let mut events = progress.subscribe();

    assert_eq!(progress.load_route(route("r-1", 3)).unwrap(), 0);
    assert_eq!(progress.progress(), 0.0);

    let first = progress.complete_current_stop().await.unwrap().unwrap();
    assert_eq!(first.sequence, 1);
    assert!(first.remote_synced);
    assert!((progress.progress() - 1.0 / 3.0).abs() < 1e-9);

    let reason = SkipReason::new("customer not home").unwrap();
    let second = progress.skip_current_stop(reason).await.unwrap().unwrap();
    assert_eq!(second.sequence, 2);
    assert_eq!(second.status, StopStatus::Skipped);
    assert!(!second.route_complete);

    let third = progress.complete_current_stop().await.unwrap().unwrap();
    assert!(third.route_complete);
    assert_eq!(progress.progress(), 1.0);
    assert!(progress.is_complete());
    assert_eq!(progress.cursor(), 3);
    assert!(progress.current_stop().is_none());

    let route = progress.route().unwrap();
    assert_eq!(route.status, RouteStatus::Complete);
    assert_eq!(route.stops[1].notes.as_deref(), Some("customer not home"));
    assert!(route.stops.iter().all(|s| s.arrived_at.is_some()));

    let updates = gateway.stop_updates();
    assert_eq!(updates.len(), 3);
    assert!(updates.iter().all(|(id, _)| id == "r-1"));
    assert_eq!(updates[1].1.status, StopStatus::Skipped);
    assert_eq!(updates[1].1.notes.as_deref(), Some("customer not home"));

    // Loaded, 3x StopResolved, RouteCompleted
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.len(), 5);
    assert!(matches!(seen[0], RouteEvent::Loaded { total_stops: 3, .. }));
    assert_eq!(
        seen[4],
        RouteEvent::RouteCompleted {
            route_id: "r-1".to_string(),
            completed: 2,
            skipped: 1
        }
    );
}

#[tokio::test]
async fn test_cursor_after_load_skips_resolved_stops() {
    let (_gw, mut progress) = engine(Arc::new(InMemoryStore::new()));
    let mut r = route("r-2", 4);
    r.stops[0].status = StopStatus::Completed;
    r.stops[1].status = StopStatus::Skipped;

    assert_eq!(progress.load_route(r).unwrap(), 2);
    assert_eq!(progress.current_stop().unwrap().sequence, 3);
    assert_eq!(progress.progress(), 0.5);
    assert_eq!(progress.route().unwrap().status, RouteStatus::Active);
}

#[tokio::test]
async fn test_second_complete_acts_on_next_stop() {
    let (gateway, mut progress) = engine(Arc::new(InMemoryStore::new()));
    progress.load_route(route("r-3", 3)).unwrap();

    progress.complete_current_stop().await.unwrap();
    progress.complete_current_stop().await.unwrap();

    let stops = &progress.route().unwrap().stops;
    assert_eq!(stops[0].status, StopStatus::Completed);
    assert_eq!(stops[1].status, StopStatus::Completed);
    assert_eq!(stops[2].status, StopStatus::Pending);
    let sequences: Vec<u32> = gateway.stop_updates().iter().map(|(_, u)| u.sequence).collect();
    assert_eq!(sequences, vec![1, 2]);
}

#[tokio::test]
async fn test_progress_is_monotone() {
    let (_gw, mut progress) = engine(Arc::new(InMemoryStore::new()));
    progress.load_route(route("r-4", 5)).unwrap();

    let mut last = progress.progress();
    for i in 0..7 {
        if i % 2 == 0 {
            progress.complete_current_stop().await.unwrap();
        } else {
            let reason = SkipReason::new("gate locked").unwrap();
            progress.skip_current_stop(reason).await.unwrap();
        }
        let now = progress.progress();
        assert!(now >= last);
        assert!(now <= 1.0);
        last = now;
    }
    assert_eq!(last, 1.0);
}

#[tokio::test]
async fn test_past_end_is_noop() {
    let (gateway, mut progress) = engine(Arc::new(InMemoryStore::new()));
    progress.load_route(route("r-5", 1)).unwrap();
    progress.complete_current_stop().await.unwrap();

    assert!(progress.complete_current_stop().await.unwrap().is_none());
    let reason = SkipReason::new("late").unwrap();
    assert!(progress.skip_current_stop(reason).await.unwrap().is_none());
    assert_eq!(gateway.stop_updates().len(), 1);
}

#[tokio::test]
async fn test_empty_route_has_zero_progress() {
    let (_gw, mut progress) = engine(Arc::new(InMemoryStore::new()));
    assert_eq!(progress.load_route(Route::new("r-empty", "V001", vec![])).unwrap(), 0);
    assert_eq!(progress.progress(), 0.0);
    assert!(progress.complete_current_stop().await.unwrap().is_none());
}

#[cfg(debug_assertions)]
#[tokio::test]
async fn test_resolution_without_route_is_precondition_error() {
    let (_gw, mut progress) = engine(Arc::new(InMemoryStore::new()));
    assert!(matches!(
        progress.complete_current_stop().await,
        Err(ProgressError::NoActiveRoute)
    ));
}

#[tokio::test]
async fn test_remote_failure_still_advances_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(ScriptedGateway::default());
    gateway.set_stop_update_result(Some(GatewayError::rejected(404, "Stop not found")));

    {
        let store: SharedStore = Arc::new(FileStore::open(dir.path()).unwrap());
        let mut progress =
            RouteProgress::open(store, gateway.clone(), ConfigHandle::default()).unwrap();
        progress.load_route(route("r-6", 3)).unwrap();
        let res = progress.complete_current_stop().await.unwrap().unwrap();
        assert!(!res.remote_synced);
    }

    // Restart resumes at the next pending stop
    let store: SharedStore = Arc::new(FileStore::open(dir.path()).unwrap());
    let progress = RouteProgress::open(store, gateway, ConfigHandle::default()).unwrap();
    assert_eq!(progress.cursor(), 1);
    assert_eq!(progress.route().unwrap().stops[0].status, StopStatus::Completed);
    assert!((progress.progress() - 1.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_blank_skip_reason_refused() {
    assert!(matches!(
        SkipReason::new(""),
        Err(ProgressError::EmptySkipReason)
    ));
    assert!(matches!(
        SkipReason::new("\t \n"),
        Err(ProgressError::EmptySkipReason)
    ));
}
