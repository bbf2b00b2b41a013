//! # Health Monitoring
//!
//! Liveness endpoint reporting uptime, active sessions, and streaming
//! counters. Kept intentionally cheap: one read lock per counter group,
//! no per-session iteration.

use crate::state::AppState;
use actix_web::{web, HttpResponse, Result as ActixResult};
use crate::session::registry::SessionRegistry;
use serde_json::json;

/// `GET /health` — liveness plus a small metrics snapshot.
pub async fn health_check(
    app_state: web::Data<AppState>,
    registry: web::Data<SessionRegistry>,
) -> ActixResult<HttpResponse> {
    let metrics = app_state.metrics.read().unwrap();

    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": app_state.uptime_seconds(),
        "sessions": {
            "active": registry.active_session_count(),
        },
        "streaming": {
            "connections_total": metrics.connections_total,
            "frames_received": metrics.frames_received,
            "decode_failures": metrics.decode_failures,
            "transcripts_dispatched": metrics.transcripts_dispatched,
            "dispatch_dropped": metrics.dispatch_dropped,
        }
    })))
}
