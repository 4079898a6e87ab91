//! HTTP gateway client for the package/route service
//!
//! Base URL, timeout and API key are read from the live config on every
//! request, so a reloaded config takes effect without rebuilding the client.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::wire::{ErrorBody, IngestRequest, IngestResponse, RouteListResponse};
use super::{GatewayError, HealthStatus, RemoteGateway, RouteFilter, StopStatusUpdate};
use crate::config::defaults::GATEWAY_ERROR_DETAIL_MAX_CHARS;
use crate::config::ConfigHandle;
use crate::types::{ConfirmedRecord, Observation, Route};

/// `RemoteGateway` over HTTP/JSON
#[derive(Clone)]
pub struct HttpGateway {
    http: reqwest::Client,
    config: ConfigHandle,
}

impl HttpGateway {
    /// Create a new gateway client
    pub fn new(config: ConfigHandle) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("paket-field/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    /// Build an endpoint URL from path segments.
    ///
    /// Segments are percent-encoded individually, so ids containing `/` or
    /// spaces cannot escape their position in the path.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let base = self.config.current().gateway.base_url.clone();
        let mut url = Url::parse(&base)
            .map_err(|e| GatewayError::transient(format!("invalid base URL {:?}: {}", base, e)))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| GatewayError::transient(format!("base URL {:?} cannot carry a path", base)))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    /// Apply per-request timeout and authorization
    fn prepare(&self, req: RequestBuilder) -> RequestBuilder {
        let cfg = self.config.current();
        let req = req.timeout(Duration::from_secs(cfg.gateway.request_timeout_secs));
        match cfg.gateway.api_key.as_deref() {
            Some(key) if !key.is_empty() => req.bearer_auth(key),
            _ => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, GatewayError> {
        let resp = self
            .prepare(req)
            .send()
            .await
            .map_err(|e| GatewayError::transient(describe_transport_error(&e)))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        // Body read failures still leave a usable classification
        let body = resp.text().await.unwrap_or_default();
        let detail = error_detail(&body, status);
        if is_retryable_status(status) {
            return Err(GatewayError::transient(format!("HTTP {}: {}", status.as_u16(), detail)));
        }
        Err(GatewayError::rejected(status.as_u16(), detail))
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, GatewayError> {
        let status = resp.status().as_u16();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| GatewayError::transient(describe_transport_error(&e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::rejected(status, format!("malformed response body: {}", e)))
    }
}

/// Statuses meaning the service itself never handled the request: request
/// timeout, rate limiting, and gateway/availability failures from a proxy.
fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn submit_observation(
        &self,
        observation: &Observation,
    ) -> Result<ConfirmedRecord, GatewayError> {
        let url = self.endpoint(&["api", "v1", "ingest", "ocr-text"])?;
        let body = IngestRequest::from(observation);

        let resp = self.send(self.http.post(url).json(&body)).await?;
        let parsed: IngestResponse = Self::decode(resp).await?;

        tracing::debug!(
            package_id = %parsed.package_id,
            server_id = %parsed.id,
            "Observation accepted by server"
        );
        Ok(parsed.into())
    }

    async fn update_stop_status(
        &self,
        route_id: &str,
        update: &StopStatusUpdate,
    ) -> Result<(), GatewayError> {
        let sequence = update.sequence.to_string();
        let url = self.endpoint(&["api", "v1", "routes", route_id, "stops", &sequence, "status"])?;

        self.send(self.http.patch(url).json(update)).await?;
        Ok(())
    }

    async fn fetch_routes(&self, filter: &RouteFilter) -> Result<Vec<Route>, GatewayError> {
        // Trailing empty segment keeps the collection path's slash
        let url = self.endpoint(&["api", "v1", "routes", ""])?;

        let mut req = self.http.get(url);
        if let Some(date) = filter.planned_date {
            req = req.query(&[("planned_date", date.to_string())]);
        }
        if let Some(vehicle) = filter.vehicle_id.as_deref() {
            req = req.query(&[("vehicle_id", vehicle)]);
        }

        let resp = self.send(req).await?;
        let list: RouteListResponse = Self::decode(resp).await?;
        Ok(list.routes.into_iter().map(Route::from).collect())
    }

    async fn health(&self) -> Result<HealthStatus, GatewayError> {
        let url = self.endpoint(&["health"])?;
        let resp = self.send(self.http.get(url)).await?;
        Self::decode(resp).await
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

/// Human-readable message from an error response body.
///
/// Prefers the `detail` field; falls back to the raw body, then the status
/// reason. Truncated to a bounded length.
fn error_detail(body: &str, status: reqwest::StatusCode) -> String {
    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    truncate_chars(&message, GATEWAY_ERROR_DETAIL_MAX_CHARS)
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
