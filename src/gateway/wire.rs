//! Request/response shapes of the package/route service

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    ConfirmedRecord, GeoPoint, Observation, PackageStatus, Priority, Route, RouteStatus, Stop,
    StopStatus,
};

/// Body of `POST /api/v1/ingest/ocr-text`
#[derive(Debug, Serialize)]
pub(crate) struct IngestRequest<'a> {
    pub device_id: &'a str,
    pub package_id: &'a str,
    pub ocr_text: &'a str,
    pub ocr_confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps: Option<GeoPoint>,
    pub priority: Priority,
}

impl<'a> From<&'a Observation> for IngestRequest<'a> {
    fn from(obs: &'a Observation) -> Self {
        Self {
            device_id: &obs.device_id,
            package_id: &obs.package_id,
            ocr_text: &obs.text,
            ocr_confidence: obs.confidence,
            timestamp: obs.created_at,
            gps: obs.location,
            priority: obs.priority,
        }
    }
}

/// Response of the ingest endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct IngestResponse {
    pub id: String,
    pub package_id: String,
    pub status: PackageStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub parsed_address: Option<serde_json::Value>,
    #[serde(default)]
    pub geocoded: bool,
    #[serde(default)]
    pub requires_verification: bool,
}

impl From<IngestResponse> for ConfirmedRecord {
    fn from(resp: IngestResponse) -> Self {
        Self {
            server_id: resp.id,
            package_id: resp.package_id,
            status: resp.status,
            message: resp.message,
            created_at: resp.created_at,
            parsed_address: resp.parsed_address,
            geocoded: resp.geocoded,
            requires_verification: resp.requires_verification,
        }
    }
}

/// Response of `GET /api/v1/routes/`
#[derive(Debug, Deserialize)]
pub(crate) struct RouteListResponse {
    #[serde(default)]
    pub routes: Vec<RouteDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RouteDetail {
    pub route_id: String,
    pub vehicle_id: String,
    #[serde(default)]
    pub planned_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: RouteStatus,
    #[serde(default)]
    pub stops: Vec<RouteStopDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RouteStopDetail {
    pub sequence: u32,
    #[serde(default)]
    pub package_id: Option<String>,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub address_summary: Option<String>,
    #[serde(default)]
    pub estimated_arrival: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: StopStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

impl From<RouteDetail> for Route {
    fn from(detail: RouteDetail) -> Self {
        let stops = detail
            .stops
            .into_iter()
            .map(|s| Stop {
                sequence: s.sequence,
                package_id: s.package_id,
                location: GeoPoint { lat: s.lat, lon: s.lon },
                address_summary: s.address_summary,
                estimated_arrival: s.estimated_arrival,
                status: s.status,
                notes: s.notes,
                arrived_at: None,
            })
            .collect();

        Self {
            route_id: detail.route_id,
            vehicle_id: detail.vehicle_id,
            planned_date: detail.planned_date,
            status: detail.status,
            stops,
        }
    }
}

/// FastAPI-style error body: `{"detail": "..."}`
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_request_omits_missing_gps() {
        let obs = Observation::new("PKT1", "scanner-17", "Jl. Sudirman 1", 0.8, Priority::High, None)
            .unwrap();
        let json = serde_json::to_value(IngestRequest::from(&obs)).unwrap();
        assert!(json.get("gps").is_none());
        assert_eq!(json["ocr_text"], "Jl. Sudirman 1");
        assert_eq!(json["priority"], "high");
    }

    #[test]
    fn test_route_detail_conversion() {
        let body = r#"{
            "total": 1,
            "routes": [{
                "route_id": "550e8400-e29b-41d4-a716-446655440000",
                "vehicle_id": "V001",
                "planned_date": "2025-12-12",
                "status": "planned",
                "stops": [
                    {"sequence": 0, "lat": -6.2088, "lon": 106.8456, "address_summary": "Depot"},
                    {"sequence": 1, "package_id": "PKT001", "lat": -6.225, "lon": 106.795}
                ]
            }]
        }"#;
        let list: RouteListResponse = serde_json::from_str(body).unwrap();
        let route: Route = list.routes.into_iter().next().unwrap().into();
        assert_eq!(route.stops.len(), 2);
        assert_eq!(route.stops[1].package_id.as_deref(), Some("PKT001"));
        assert_eq!(route.stops[1].status, StopStatus::Pending);
        assert_eq!(route.planned_date, NaiveDate::from_ymd_opt(2025, 12, 12));
    }
}
