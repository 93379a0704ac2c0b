//! Inbound loopback HTTP server (A5, §6): the sysinv callback surface.
//! Recognized requests are forwarded to the FSM driver over a channel rather
//! than mutating `CoreState` directly from a handler task.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

const REQUIRED_USER_AGENT_PREFIX: &str = "sysinv/1.0";

#[derive(Debug, Clone)]
pub enum InboundEvent {
    SensorModify { uuid: String, patch: serde_json::Value },
    GroupModify { uuid: String, patch: serde_json::Value },
    Relearn { host_uuid: String },
}

#[derive(Clone)]
struct ServerState {
    events: mpsc::Sender<InboundEvent>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    reason: String,
    action: &'static str,
}

struct ApiError {
    code: StatusCode,
    reason: String,
    action: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody { status: "fail", reason: self.reason, action: self.action };
        (self.code, Json(body)).into_response()
    }
}

fn require_sysinv_user_agent(headers: &HeaderMap) -> Result<(), ApiError> {
    let ua = headers.get("user-agent").and_then(|v| v.to_str().ok()).unwrap_or("");
    if ua.starts_with(REQUIRED_USER_AGENT_PREFIX) {
        Ok(())
    } else {
        Err(ApiError { code: StatusCode::FORBIDDEN, reason: "unrecognized client".into(), action: "retry" })
    }
}

#[derive(Deserialize)]
struct RelearnBody {
    host_uuid: String,
}

async fn patch_sensor(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
    Json(patch): Json<serde_json::Value>,
) -> Result<StatusCode, ApiError> {
    require_sysinv_user_agent(&headers)?;
    state
        .events
        .send(InboundEvent::SensorModify { uuid, patch })
        .await
        .map_err(|_| ApiError { code: StatusCode::CONFLICT, reason: "driver channel closed".into(), action: "retry" })?;
    Ok(StatusCode::ACCEPTED)
}

async fn patch_group(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
    Json(patch): Json<serde_json::Value>,
) -> Result<StatusCode, ApiError> {
    require_sysinv_user_agent(&headers)?;
    state
        .events
        .send(InboundEvent::GroupModify { uuid, patch })
        .await
        .map_err(|_| ApiError { code: StatusCode::CONFLICT, reason: "driver channel closed".into(), action: "retry" })?;
    Ok(StatusCode::ACCEPTED)
}

async fn post_relearn(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<RelearnBody>,
) -> Result<StatusCode, ApiError> {
    require_sysinv_user_agent(&headers)?;
    state
        .events
        .send(InboundEvent::Relearn { host_uuid: body.host_uuid })
        .await
        .map_err(|_| ApiError { code: StatusCode::CONFLICT, reason: "driver channel closed".into(), action: "retry" })?;
    Ok(StatusCode::ACCEPTED)
}

pub fn router(events: mpsc::Sender<InboundEvent>) -> Router {
    let state = ServerState { events };
    Router::new()
        .route("/v1/isensors/:uuid", patch(patch_sensor))
        .route("/v1/isensorgroups/:uuid", patch(patch_group))
        .route("/v1/isensorgroups/", post(post_relearn))
        .with_state(state)
}

/// Bind the inbound server to loopback only (§6: "bound to the loopback address").
pub async fn serve(port: u16, events: mpsc::Sender<InboundEvent>) -> std::io::Result<()> {
    let app = router(events);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    warn!(port, "inbound sysinv callback server listening on loopback");
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn rejects_non_sysinv_user_agent() {
        let (tx, _rx) = mpsc::channel(8);
        let app = router(tx);
        let request = Request::builder()
            .method("PATCH")
            .uri("/v1/isensors/abc")
            .header("user-agent", "curl/8.0")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn accepts_sysinv_patch_and_forwards_event() {
        let (tx, mut rx) = mpsc::channel(8);
        let app = router(tx);
        let request = Request::builder()
            .method("PATCH")
            .uri("/v1/isensors/abc")
            .header("user-agent", "sysinv/1.0")
            .header("content-type", "application/json")
            .body(Body::from(r#"[{"path":"/suppress","value":true,"op":"replace"}]"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, InboundEvent::SensorModify { uuid, .. } if uuid == "abc"));
    }
}
