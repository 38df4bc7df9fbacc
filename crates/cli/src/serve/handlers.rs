//! HTTP route handlers: catalog, devices, tests, manufacturing orders.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use labseq_core::{DeviceView, ErrorKind, NewDevice, SequencerError};
use serde::Deserialize;
use serde_json::json;

use super::json_error;
use super::state::AppState;

/// Page size for `GET /devices` when no `limit` is given.
const DEFAULT_DEVICE_LIMIT: usize = 100;

/// A sequencer error rendered as `{"error": ...}` with a matching status.
pub(crate) struct ApiError(SequencerError);

impl From<SequencerError> for ApiError {
    fn from(e: SequencerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Backend details stay in the log.
            tracing::error!(error = %self.0, "storage failure");
            return json_error(status, "internal storage error").into_response();
        }
        json_error(status, &self.0.to_string()).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

// ── Catalog ─────────────────────────────────────────────────────────────────

/// GET /device-types
pub(crate) async fn handle_list_device_types(
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    let device_types = state.sequencer.catalog().list_device_types().await?;
    Ok(Json(json!({ "device_types": device_types })))
}

/// GET /device-types/{device_type}/test-sequences
pub(crate) async fn handle_test_sequences(
    State(state): State<Arc<AppState>>,
    Path(device_type): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let sequence = state.sequencer.catalog().get_sequence(&device_type).await?;
    Ok(Json(json!({
        "device_type": device_type,
        "test_sequences": sequence,
    })))
}

/// GET /device-types/{device_type}/required-tests
pub(crate) async fn handle_required_tests(
    State(state): State<Arc<AppState>>,
    Path(device_type): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let required = state.sequencer.catalog().get_required(&device_type).await?;
    Ok(Json(json!({
        "device_type": device_type,
        "required_tests": required,
    })))
}

/// GET /device-types/{device_type}/tests-preview
pub(crate) async fn handle_tests_preview(
    State(state): State<Arc<AppState>>,
    Path(device_type): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let preview = state.sequencer.catalog().preview(&device_type).await?;
    Ok(Json(preview))
}

/// GET /test-definitions
pub(crate) async fn handle_test_definitions(
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    let definitions = state.sequencer.catalog().test_definitions().await?;
    Ok(Json(json!({ "test_definitions": definitions })))
}

// ── Devices ─────────────────────────────────────────────────────────────────

/// POST /devices
pub(crate) async fn handle_create_device(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewDevice>, JsonRejection>,
) -> Response {
    let Json(new) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return json_error(StatusCode::BAD_REQUEST, &rejection.body_text()).into_response()
        }
    };
    match state.sequencer.create(new).await {
        Ok(device) => (StatusCode::CREATED, Json(DeviceView::from(device))).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListParams {
    limit: Option<usize>,
}

/// GET /devices?limit=N
pub(crate) async fn handle_list_devices(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Response {
    let limit = match params {
        Ok(Query(p)) => p.limit.unwrap_or(DEFAULT_DEVICE_LIMIT),
        Err(rejection) => {
            return json_error(StatusCode::BAD_REQUEST, &rejection.body_text()).into_response()
        }
    };
    match state.sequencer.list_devices(limit).await {
        Ok(devices) => {
            let devices: Vec<DeviceView> = devices.into_iter().map(DeviceView::from).collect();
            Json(json!({ "devices": devices })).into_response()
        }
        Err(e) => ApiError(e).into_response(),
    }
}

/// GET /devices/{serial_number}
pub(crate) async fn handle_get_device(
    State(state): State<Arc<AppState>>,
    Path(serial_number): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let device = state.sequencer.get_device(&serial_number).await?;
    Ok(Json(DeviceView::from(device)))
}

/// GET /devices/{serial_number}/status
pub(crate) async fn handle_device_status(
    State(state): State<Arc<AppState>>,
    Path(serial_number): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = state.sequencer.device_status(&serial_number).await?;
    Ok(Json(json!({
        "serial_number": serial_number,
        "status": status,
    })))
}

// ── Tests ───────────────────────────────────────────────────────────────────

/// POST /devices/{serial_number}/tests/{test_id}/start
pub(crate) async fn handle_start_test(
    State(state): State<Arc<AppState>>,
    Path((serial_number, test_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let device = state.sequencer.start_test(&serial_number, &test_id).await?;
    Ok(Json(json!({
        "serial_number": serial_number,
        "test_id": test_id,
        "status": "running",
        "current_stage": device.current_stage,
    })))
}

/// POST /devices/{serial_number}/tests/{test_id}/complete
pub(crate) async fn handle_complete_test(
    State(state): State<Arc<AppState>>,
    Path((serial_number, test_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let completion = state
        .sequencer
        .complete_test(&serial_number, &test_id)
        .await?;
    Ok(Json(json!({
        "serial_number": serial_number,
        "test_id": completion.test_id,
        "status": "completed",
        "next_test": completion.next_test,
        "advance": completion.advance,
        "completed_tests": completion.device.completed_tests,
    })))
}

/// GET /devices/{serial_number}/tests/{test_id}/status
pub(crate) async fn handle_test_status(
    State(state): State<Arc<AppState>>,
    Path((serial_number, test_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let status = state.sequencer.status(&serial_number, &test_id).await?;
    Ok(Json(json!({
        "serial_number": serial_number,
        "test_id": test_id,
        "status": status,
    })))
}

// ── Manufacturing orders ────────────────────────────────────────────────────

/// GET /manufacturing-orders
pub(crate) async fn handle_list_orders(
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    let orders = state.sequencer.list_manufacturing_orders().await?;
    Ok(Json(json!({ "manufacturing_orders": orders })))
}

/// GET /manufacturing-orders/{number}
pub(crate) async fn handle_get_order(
    State(state): State<Arc<AppState>>,
    Path(number): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let order = state.sequencer.manufacturing_order(&number).await?;
    Ok(Json(order))
}
