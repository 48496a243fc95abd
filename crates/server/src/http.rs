//! HTTP Endpoints
//!
//! Router for the two WebSocket channels, health probes, the device
//! listing, and Prometheus metrics.

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::device_ws::device_ws_handler;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::websocket::ws_handler;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.config.server.cors_origins,
        state.config.server.cors_enabled,
    );

    Router::new()
        // Client channel
        .route("/ws", get(ws_handler))
        // Device channel
        .route("/ws/device", get(device_ws_handler))
        // Connected devices
        .route("/api/devices", get(list_devices))
        // Health checks
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Prometheus metrics
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS layer from configured origins.
///
/// Disabled CORS means a permissive layer for development; no configured
/// origins falls back to localhost.
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            let parsed = origin.parse::<HeaderValue>().ok();
            if parsed.is_none() {
                tracing::warn!("Invalid CORS origin: {}", origin);
            }
            parsed
        })
        .collect();

    if parsed_origins.is_empty() {
        tracing::info!("No valid CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin(
                "http://localhost:3000"
                    .parse::<HeaderValue>()
                    .unwrap_or_else(|_| HeaderValue::from_static("http://localhost:3000")),
            )
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// List connected devices
async fn list_devices(State(state): State<AppState>) -> Json<serde_json::Value> {
    let devices = state.devices.list();
    Json(serde_json::json!({
        "devices": devices,
        "count": devices.len(),
    }))
}

/// Health check
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ready": true,
        "devices_connected": state.devices.list().len(),
    }))
}
