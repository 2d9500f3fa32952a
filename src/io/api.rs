//! HTTP API and Prometheus endpoint
//!
//! Serves the operator operations (trip transitions, fetch-now, history,
//! alert status, settings, on-demand scans) as JSON, plus `/metrics` in
//! Prometheus text format. Uses hyper for the HTTP server.

use crate::domain::{AlertId, AlertStatus, TripId};
use crate::infra::error::{Result, StoreError, TrackingError};
use crate::infra::metrics::{
    Metrics, ProviderKind, ScanKind, LATENCY_BUCKET_BOUNDS_MS, LATENCY_NUM_BUCKETS,
};
use crate::services::alerts::StatusUpdate;
use crate::services::scans::TrackingService;
use crate::services::trip_machine::{CompleteOptions, StartOptions, TransitionOptions, TripAction};
use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use smallvec::SmallVec;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

type ApiResponse = Response<Full<Bytes>>;

const MAX_BODY_BYTES: usize = 64 * 1024;
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub struct ApiState {
    service: Arc<TrackingService>,
    service_id: String,
}

impl ApiState {
    pub fn new(service: Arc<TrackingService>, service_id: impl Into<String>) -> Self {
        Self { service, service_id: service_id.into() }
    }
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: AlertStatus,
    #[serde(flatten)]
    update: StatusUpdate,
}

#[derive(Debug, Deserialize)]
struct BulkStatusRequest {
    alert_ids: Vec<AlertId>,
    status: AlertStatus,
    #[serde(flatten)]
    update: StatusUpdate,
}

/// Setting values arrive as JSON strings, numbers or booleans
#[derive(Debug, Deserialize)]
struct SettingRequest {
    value: Value,
}

impl SettingRequest {
    fn as_stored(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

// --- Prometheus text ---

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
        }
    }
}

fn write_header(output: &mut String, name: &str, help: &str, typ: MetricType) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
}

/// Write a single-series metric with the service label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, service: &str, val: u64) {
    write_header(output, name, help, typ);
    let _ = writeln!(output, "{name}{{service=\"{service}\"}} {val}");
}

/// Write one counter family with an extra label per series
fn write_labeled_counter(
    output: &mut String,
    name: &str,
    help: &str,
    service: &str,
    label: &str,
    series: &[(&str, u64)],
) {
    write_header(output, name, help, MetricType::Counter);
    for (value, count) in series {
        let _ = writeln!(output, "{name}{{service=\"{service}\",{label}=\"{value}\"}} {count}");
    }
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    service: &str,
    buckets: &[u64; LATENCY_NUM_BUCKETS],
    sum: u64,
) {
    write_header(output, name, help, MetricType::Histogram);

    let mut cumulative = 0u64;
    for (i, bound) in LATENCY_BUCKET_BOUNDS_MS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{service=\"{service}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[LATENCY_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{service=\"{service}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{service=\"{service}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{service=\"{service}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, service: &str) -> String {
    let mut output = String::with_capacity(4096);

    let scans: SmallVec<[(&str, u64); 4]> =
        ScanKind::ALL.iter().map(|k| (k.as_str(), metrics.scans_total(*k))).collect();
    write_labeled_counter(&mut output, "trip_telemetry_scans_total", "Scan invocations", service, "kind", &scans);
    write_metric(
        &mut output,
        "trip_telemetry_trips_processed_total",
        "Trips processed by scans",
        MetricType::Counter,
        service,
        metrics.trips_processed_total(),
    );
    write_metric(
        &mut output,
        "trip_telemetry_trips_failed_total",
        "Trips whose scan step failed",
        MetricType::Counter,
        service,
        metrics.trips_failed_total(),
    );

    let providers = [ProviderKind::Sim, ProviderKind::Gps];
    let calls: SmallVec<[(&str, u64); 2]> =
        providers.iter().map(|p| (p.as_str(), metrics.provider_calls_total(*p))).collect();
    let failures: SmallVec<[(&str, u64); 2]> =
        providers.iter().map(|p| (p.as_str(), metrics.provider_failures_total(*p))).collect();
    write_labeled_counter(
        &mut output,
        "trip_telemetry_provider_calls_total",
        "Location provider calls",
        service,
        "provider",
        &calls,
    );
    write_labeled_counter(
        &mut output,
        "trip_telemetry_provider_failures_total",
        "Failed location provider calls",
        service,
        "provider",
        &failures,
    );
    write_histogram(
        &mut output,
        "trip_telemetry_provider_latency_ms",
        "Provider call latency in milliseconds",
        service,
        &metrics.provider_latency_buckets(),
        metrics.provider_latency_sum_ms(),
    );

    write_metric(
        &mut output,
        "trip_telemetry_samples_recorded_total",
        "Location samples appended",
        MetricType::Counter,
        service,
        metrics.samples_recorded_total(),
    );
    write_metric(
        &mut output,
        "trip_telemetry_alerts_created_total",
        "Alerts created",
        MetricType::Counter,
        service,
        metrics.alerts_created_total(),
    );
    write_metric(
        &mut output,
        "trip_telemetry_alerts_resolved_total",
        "Alerts resolved",
        MetricType::Counter,
        service,
        metrics.alerts_resolved_total(),
    );
    write_metric(
        &mut output,
        "trip_telemetry_credential_refreshes_total",
        "Provider credential refreshes",
        MetricType::Counter,
        service,
        metrics.credential_refreshes_total(),
    );
    write_metric(
        &mut output,
        "trip_telemetry_trip_transitions_total",
        "Trip status transitions",
        MetricType::Counter,
        service,
        metrics.trip_transitions_total(),
    );
    write_metric(
        &mut output,
        "trip_telemetry_up",
        "Service is serving requests",
        MetricType::Gauge,
        service,
        1,
    );

    output
}

// --- Responses ---

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> ApiResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn json_response(status: StatusCode, body: &Value) -> ApiResponse {
    respond(status, "application/json", body.to_string())
}

fn failure(status: StatusCode, code: &str, message: &str) -> ApiResponse {
    json_response(status, &json!({ "ok": false, "error": code, "message": message }))
}

fn status_for(e: &TrackingError) -> StatusCode {
    match e {
        TrackingError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        TrackingError::InvalidTransition { .. }
        | TrackingError::InvalidAlertTransition { .. }
        | TrackingError::PodNotCollected { .. }
        | TrackingError::ValidationFailed { .. } => StatusCode::CONFLICT,
        TrackingError::ProviderAuth(_)
        | TrackingError::ProviderUnavailable(_)
        | TrackingError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
        TrackingError::Store(StoreError::Backend(_)) | TrackingError::TaskAborted(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn error_response(e: &TrackingError) -> ApiResponse {
    let mut body = json!({ "ok": false, "error": e.code(), "message": e.to_string() });
    match e {
        TrackingError::PodNotCollected { shipment_codes } => {
            body["shipment_codes"] = json!(shipment_codes.as_slice());
        }
        TrackingError::ValidationFailed { distance_meters, radius_meters } => {
            body["distance_meters"] = json!(distance_meters);
            body["radius_meters"] = json!(radius_meters);
        }
        _ => {}
    }
    json_response(status_for(e), &body)
}

fn reply<T: Serialize>(result: Result<T>) -> ApiResponse {
    match result.map(|data| serde_json::to_value(&data)) {
        Ok(Ok(data)) => json_response(StatusCode::OK, &json!({ "ok": true, "data": data })),
        Ok(Err(e)) => failure(StatusCode::INTERNAL_SERVER_ERROR, "serialization_error", &e.to_string()),
        Err(e) => error_response(&e),
    }
}

fn not_found(path: &str) -> ApiResponse {
    failure(StatusCode::NOT_FOUND, "not_found", &format!("no route for {path}"))
}

/// Deserialize a JSON body; an empty body yields the defaults
fn parse_optional<T: DeserializeOwned + Default>(body: &Bytes) -> std::result::Result<T, ApiResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_required(body)
}

fn parse_required<T: DeserializeOwned>(body: &Bytes) -> std::result::Result<T, ApiResponse> {
    serde_json::from_slice(body)
        .map_err(|e| failure(StatusCode::BAD_REQUEST, "bad_request", &format!("invalid JSON body: {e}")))
}

// --- Routing ---

pub(crate) async fn route(state: &ApiState, method: &Method, path: &str, body: Bytes) -> ApiResponse {
    let service = &state.service;
    let machine = service.machine();
    let segments: SmallVec<[&str; 6]> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (method, segments.as_slice()) {
        (&Method::GET, ["health"]) => respond(StatusCode::OK, "text/plain", "ok"),
        (&Method::GET, ["metrics"]) => respond(
            StatusCode::OK,
            PROMETHEUS_CONTENT_TYPE,
            format_prometheus_metrics(service.metrics(), &state.service_id),
        ),

        (&Method::POST, ["trips", id, "validate", action]) => match action.parse::<TripAction>() {
            Ok(action) => reply(machine.validate_for_action(&TripId::new(*id), action).await),
            Err(_) => not_found(path),
        },
        (&Method::POST, ["trips", id, "start"]) => match parse_optional::<StartOptions>(&body) {
            Ok(opts) => reply(machine.start(&TripId::new(*id), &opts).await),
            Err(resp) => resp,
        },
        (&Method::POST, ["trips", id, "complete"]) => match parse_optional::<CompleteOptions>(&body) {
            Ok(opts) => reply(machine.complete(&TripId::new(*id), &opts).await),
            Err(resp) => resp,
        },
        (&Method::POST, ["trips", id, action @ ("hold" | "cancel" | "close")]) => {
            let opts = match parse_optional::<TransitionOptions>(&body) {
                Ok(opts) => opts,
                Err(resp) => return resp,
            };
            let trip_id = TripId::new(*id);
            let result = match *action {
                "hold" => machine.hold(&trip_id, &opts).await,
                "cancel" => machine.cancel(&trip_id, &opts).await,
                _ => machine.close(&trip_id, &opts).await,
            };
            reply(result)
        }
        (&Method::POST, ["trips", id, "location"]) => {
            reply(service.fetch_location_now(&TripId::new(*id)).await)
        }
        (&Method::GET, ["trips", id, "history"]) => {
            reply(service.get_tracking_history(&TripId::new(*id)).await)
        }

        (&Method::POST, ["alerts", "status"]) => match parse_required::<BulkStatusRequest>(&body) {
            Ok(req) => reply(Ok(service
                .alerts()
                .bulk_update_status(&req.alert_ids, req.status, &req.update)
                .await)),
            Err(resp) => resp,
        },
        (&Method::POST, ["alerts", id, "status"]) => match parse_required::<StatusRequest>(&body) {
            Ok(req) => reply(service.alerts().update_status(&AlertId::new(*id), req.status, &req.update).await),
            Err(resp) => resp,
        },

        (&Method::GET, ["settings"]) => reply(service.get_settings().await),
        (&Method::PUT, ["settings", key]) => match parse_required::<SettingRequest>(&body) {
            Ok(req) => reply(service.update_setting(key, &req.as_stored()).await),
            Err(resp) => resp,
        },

        (&Method::POST, ["scans", "refresh"]) => reply(service.refresh_all_locations().await),
        (&Method::POST, ["scans", "geofence"]) => reply(service.check_geofence().await),
        (&Method::POST, ["scans", "delays"]) => reply(service.check_delays().await),
        (&Method::POST, ["scans", "auto-start"]) => reply(service.check_geofence_auto_start().await),

        _ => not_found(path),
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ApiState>,
) -> std::result::Result<ApiResponse, Infallible> {
    let started = Instant::now();
    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return Ok(failure(StatusCode::BAD_REQUEST, "bad_request", &e.to_string())),
    };

    let response = route(&state, &parts.method, parts.uri.path(), body).await;
    debug!(
        method = %parts.method,
        path = %parts.uri.path(),
        status = %response.status().as_u16(),
        elapsed_ms = %started.elapsed().as_millis(),
        "api_request"
    );
    Ok(response)
}

/// Serve the API until `shutdown` flips to true
pub async fn start_api_server(
    bind_address: &str,
    port: u16,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{bind_address}:{port}")
        .parse()
        .with_context(|| format!("invalid API bind address {bind_address}:{port}"))?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;

    info!(addr = %addr, service = %state.service_id, "api_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
