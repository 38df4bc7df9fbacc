//! `labseq serve` -- HTTP JSON API for the device test sequencer.
//!
//! Endpoints:
//! - GET  /health
//! - GET  /device-types
//! - GET  /device-types/{device_type}/test-sequences
//! - GET  /device-types/{device_type}/required-tests
//! - GET  /device-types/{device_type}/tests-preview
//! - GET  /test-definitions
//! - POST /devices
//! - GET  /devices?limit=N
//! - GET  /devices/{serial_number}
//! - GET  /devices/{serial_number}/status
//! - POST /devices/{serial_number}/tests/{test_id}/start
//! - POST /devices/{serial_number}/tests/{test_id}/complete
//! - GET  /devices/{serial_number}/tests/{test_id}/status
//! - GET  /manufacturing-orders
//! - GET  /manufacturing-orders/{number}
//!
//! All responses use Content-Type: application/json. Errors are
//! `{"error": "<message>"}`.

mod handlers;
mod middleware;
mod state;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use labseq_core::Sequencer;
use labseq_storage::{LabData, MemoryStorage};
use tower_http::cors::{Any, CorsLayer};

use self::handlers::{
    handle_complete_test, handle_create_device, handle_device_status, handle_get_device,
    handle_get_order, handle_health, handle_list_device_types, handle_list_devices,
    handle_list_orders, handle_not_found, handle_required_tests, handle_start_test,
    handle_test_definitions, handle_test_sequences, handle_test_status, handle_tests_preview,
};
use self::middleware::trace_middleware;
use self::state::AppState;
use crate::config::{self, ServeSettings};

/// Maximum request body size: 1 MB.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/device-types", get(handle_list_device_types))
        .route(
            "/device-types/{device_type}/test-sequences",
            get(handle_test_sequences),
        )
        .route(
            "/device-types/{device_type}/required-tests",
            get(handle_required_tests),
        )
        .route(
            "/device-types/{device_type}/tests-preview",
            get(handle_tests_preview),
        )
        .route("/test-definitions", get(handle_test_definitions))
        .route(
            "/devices",
            get(handle_list_devices).post(handle_create_device),
        )
        .route("/devices/{serial_number}", get(handle_get_device))
        .route("/devices/{serial_number}/status", get(handle_device_status))
        .route(
            "/devices/{serial_number}/tests/{test_id}/start",
            post(handle_start_test),
        )
        .route(
            "/devices/{serial_number}/tests/{test_id}/complete",
            post(handle_complete_test),
        )
        .route(
            "/devices/{serial_number}/tests/{test_id}/status",
            get(handle_test_status),
        )
        .route("/manufacturing-orders", get(handle_list_orders))
        .route("/manufacturing-orders/{number}", get(handle_get_order))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn(trace_middleware))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Start the HTTP server with an in-memory store seeded from `settings.data`.
pub(crate) async fn start_server(settings: ServeSettings) -> Result<(), Box<dyn std::error::Error>> {
    let data = match &settings.data {
        Some(path) => {
            let data = config::load_lab_data(path)?;
            tracing::info!(
                path = %path.display(),
                device_types = data.device_test_sequences.len(),
                test_definitions = data.test_definitions.len(),
                manufacturing_orders = data.manufacturing_orders.len(),
                devices = data.devices.len(),
                "loaded lab data"
            );
            data
        }
        None => {
            tracing::warn!("no lab data file given; starting with an empty catalog");
            LabData::default()
        }
    };

    let storage = Arc::new(MemoryStorage::from_lab_data(data));
    let sequencer = Sequencer::new(storage).with_resolver(settings.resolver);
    let app = router(Arc::new(AppState::new(sequencer)));

    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("labseq listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a handler the server runs until killed.
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
