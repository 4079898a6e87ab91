//! HTTP gateway tests against an in-process service
//!
//! Each test binds an axum app to an ephemeral localhost port and points the
//! gateway at it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use paket_field::config::ConfigHandle;
use paket_field::gateway::{GatewayError, HttpGateway, RemoteGateway, RouteFilter, StopStatusUpdate};
use paket_field::types::{GeoPoint, Observation, PackageStatus, Priority, StopStatus};

type Captured = Arc<Mutex<Vec<Value>>>;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn gateway(base_url: &str) -> HttpGateway {
    let config = ConfigHandle::default();
    config
        .update(|c| {
            c.gateway.base_url = base_url.to_string();
            c.gateway.request_timeout_secs = 1;
        })
        .unwrap();
    HttpGateway::new(config).unwrap()
}

fn observation() -> Observation {
    Observation::new(
        "PKT2025000001",
        "scanner-17",
        "Jl. Merdeka 45, Jakarta Selatan 12220",
        0.83,
        Priority::Urgent,
        Some(GeoPoint::new(-6.2088, 106.8456).unwrap()),
    )
    .unwrap()
}

fn ingest_ok(body: &Value) -> Value {
    json!({
        "id": "7d1f0a52-0000-4000-8000-000000000001",
        "package_id": body["package_id"],
        "status": "parsed",
        "message": "Package received",
        "created_at": "2025-12-12T08:00:00Z",
        "parsed_address": {"city": "Jakarta Selatan", "postal_code": "12220"},
        "geocoded": true,
        "requires_verification": false
    })
}

#[tokio::test]
async fn test_submit_observation_success() {
    let captured: Captured = Arc::default();
    let app = Router::new()
        .route(
            "/api/v1/ingest/ocr-text",
            post(|State(seen): State<Captured>, Json(body): Json<Value>| async move {
                let resp = ingest_ok(&body);
                seen.lock().unwrap().push(body);
                (StatusCode::CREATED, Json(resp))
            }),
        )
        .with_state(captured.clone());
    let gw = gateway(&serve(app).await);

    let confirmed = gw.submit_observation(&observation()).await.unwrap();
    assert_eq!(confirmed.package_id, "PKT2025000001");
    assert_eq!(confirmed.status, PackageStatus::Parsed);
    assert!(confirmed.geocoded);

    let body = captured.lock().unwrap()[0].clone();
    assert_eq!(body["device_id"], "scanner-17");
    assert_eq!(body["ocr_text"], "Jl. Merdeka 45, Jakarta Selatan 12220");
    assert_eq!(body["ocr_confidence"], 0.83);
    assert_eq!(body["priority"], "urgent");
    assert_eq!(body["gps"]["lat"], -6.2088);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_conflict_is_rejected_with_detail() {
    let app = Router::new().route(
        "/api/v1/ingest/ocr-text",
        post(|| async {
            (
                StatusCode::CONFLICT,
                Json(json!({"detail": "Package already exists"})),
            )
        }),
    );
    let gw = gateway(&serve(app).await);

    let err = gw.submit_observation(&observation()).await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Rejected {
            status: 409,
            message: "Package already exists".to_string()
        }
    );
}

#[tokio::test]
async fn test_internal_server_error_is_rejected() {
    let app = Router::new().route(
        "/api/v1/ingest/ocr-text",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"detail": "Parser crashed"})),
            )
        }),
    );
    let gw = gateway(&serve(app).await);

    let err = gw.submit_observation(&observation()).await.unwrap_err();
    assert_eq!(err, GatewayError::rejected(500, "Parser crashed"));
}

#[tokio::test]
async fn test_unavailable_and_proxy_timeouts_are_transient() {
    for status in [
        StatusCode::SERVICE_UNAVAILABLE,
        StatusCode::BAD_GATEWAY,
        StatusCode::GATEWAY_TIMEOUT,
        StatusCode::TOO_MANY_REQUESTS,
    ] {
        let app = Router::new().route(
            "/api/v1/ingest/ocr-text",
            post(move || async move { (status, "upstream unavailable") }),
        );
        let gw = gateway(&serve(app).await);

        let err = gw.submit_observation(&observation()).await.unwrap_err();
        assert!(err.is_transient(), "{status}: unexpected {err}");
    }
}

#[tokio::test]
async fn test_malformed_success_body_is_rejected() {
    let app = Router::new().route(
        "/api/v1/ingest/ocr-text",
        post(|| async { (StatusCode::CREATED, Json(json!({"ok": true}))) }),
    );
    let gw = gateway(&serve(app).await);

    let err = gw.submit_observation(&observation()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Rejected { status: 201, .. }));
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    // Reserve a port, then close it
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gw = gateway(&format!("http://{}", addr));
    let err = gw.submit_observation(&observation()).await.unwrap_err();
    assert!(err.is_transient(), "unexpected: {err}");
}

#[tokio::test]
async fn test_timeout_is_transient() {
    let app = Router::new().route(
        "/api/v1/ingest/ocr-text",
        post(|Json(body): Json<Value>| async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            (StatusCode::CREATED, Json(ingest_ok(&body)))
        }),
    );
    let gw = gateway(&serve(app).await);

    let err = gw.submit_observation(&observation()).await.unwrap_err();
    assert!(err.is_transient(), "unexpected: {err}");
}

#[tokio::test]
async fn test_stop_status_update_path_and_body() {
    let captured: Captured = Arc::default();
    let app = Router::new()
        .route(
            "/api/v1/routes/:route_id/stops/:sequence/status",
            patch(
                |State(seen): State<Captured>,
                 Path((route_id, sequence)): Path<(String, u32)>,
                 Json(body): Json<Value>| async move {
                    seen.lock().unwrap().push(json!({
                        "route_id": route_id,
                        "sequence": sequence,
                        "body": body,
                    }));
                    Json(json!({"status": "ok"}))
                },
            ),
        )
        .with_state(captured.clone());
    let gw = gateway(&serve(app).await);

    let update = StopStatusUpdate {
        sequence: 4,
        status: StopStatus::Skipped,
        notes: Some("customer not home".to_string()),
        arrived_at: None,
    };
    gw.update_stop_status("550e8400-e29b-41d4-a716-446655440000", &update)
        .await
        .unwrap();

    let seen = captured.lock().unwrap()[0].clone();
    assert_eq!(seen["route_id"], "550e8400-e29b-41d4-a716-446655440000");
    assert_eq!(seen["sequence"], 4);
    assert_eq!(seen["body"]["status"], "skipped");
    assert_eq!(seen["body"]["notes"], "customer not home");
    assert!(seen["body"].get("arrived_at").is_none());
}

#[tokio::test]
async fn test_stop_update_not_found_is_rejected() {
    let app = Router::new().route(
        "/api/v1/routes/:route_id/stops/:sequence/status",
        patch(|| async { (StatusCode::NOT_FOUND, Json(json!({"detail": "Stop not found"}))) }),
    );
    let gw = gateway(&serve(app).await);

    let update = StopStatusUpdate {
        sequence: 9,
        status: StopStatus::Completed,
        notes: None,
        arrived_at: None,
    };
    let err = gw.update_stop_status("r-1", &update).await.unwrap_err();
    assert_eq!(err, GatewayError::rejected(404, "Stop not found"));
}

#[tokio::test]
async fn test_fetch_routes_passes_filter() {
    let captured: Captured = Arc::default();
    let app = Router::new()
        .route(
            "/api/v1/routes/",
            get(
                |State(seen): State<Captured>,
                 Query(params): Query<std::collections::HashMap<String, String>>| async move {
                    seen.lock().unwrap().push(json!(params));
                    Json(json!({
                        "total": 1,
                        "routes": [{
                            "route_id": "r-77",
                            "vehicle_id": "V001",
                            "planned_date": "2025-12-12",
                            "status": "planned",
                            "stops": [
                                {"sequence": 0, "lat": -6.2088, "lon": 106.8456, "address_summary": "Depot"},
                                {"sequence": 1, "package_id": "PKT001", "lat": -6.225, "lon": 106.795}
                            ]
                        }]
                    }))
                },
            ),
        )
        .with_state(captured.clone());
    let gw = gateway(&serve(app).await);

    let filter = RouteFilter {
        planned_date: chrono::NaiveDate::from_ymd_opt(2025, 12, 12),
        vehicle_id: Some("V001".to_string()),
    };
    let routes = gw.fetch_routes(&filter).await.unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].route_id, "r-77");
    assert!(routes[0].stops[0].is_depot());

    let query = captured.lock().unwrap()[0].clone();
    assert_eq!(query["planned_date"], "2025-12-12");
    assert_eq!(query["vehicle_id"], "V001");
}

#[tokio::test]
async fn test_health_and_bearer_auth() {
    let app = Router::new().route(
        "/health",
        get(|headers: HeaderMap| async move {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            if auth == "Bearer field-secret" {
                (
                    StatusCode::OK,
                    Json(json!({"status": "healthy", "service": "paket-api", "version": "1.0.0"})),
                )
            } else {
                (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Not authenticated"})))
            }
        }),
    );
    let base = serve(app).await;

    let gw = gateway(&base);
    assert_eq!(
        gw.health().await.unwrap_err(),
        GatewayError::rejected(401, "Not authenticated")
    );

    let config = ConfigHandle::default();
    config
        .update(|c| {
            c.gateway.base_url = base.clone();
            c.gateway.api_key = Some("field-secret".to_string());
        })
        .unwrap();
    let gw = HttpGateway::new(config).unwrap();
    let health = gw.health().await.unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.service, "paket-api");
}
