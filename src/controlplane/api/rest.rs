//! REST API Handlers
//!
//! JSON-over-HTTP binding of the CSI controller service. One POST route per
//! RPC, named after the gRPC method path.

use crate::controlplane::context::RequestContext;
use crate::controlplane::controller::Controller;
use crate::controlplane::csi::{
    ControllerPublishVolumeRequest, ControllerUnpublishVolumeRequest, CreateSnapshotRequest,
    CreateVolumeRequest, DeleteSnapshotRequest, DeleteVolumeRequest, GetCapacityRequest,
    ListSnapshotsRequest, ListVolumesRequest, ValidateVolumeCapabilitiesRequest,
};
use crate::error::{Error, Result};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Route prefix of the controller service
pub const CONTROLLER_SERVICE: &str = "/csi.v1.Controller";

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&Error> for ApiErrorResponse {
    fn from(e: &Error) -> Self {
        Self {
            error: e.code().as_str().to_string(),
            message: e.to_string(),
            details: None,
        }
    }
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    controller: Arc<Controller>,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl RestRouter {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self {
            controller,
            request_timeout: Duration::from_secs(30),
            shutdown: CancellationToken::new(),
        }
    }

    /// Deadline applied to every request context
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// In-flight requests are cancelled when this token fires
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            controller: self.controller,
            request_timeout: self.request_timeout,
            shutdown: self.shutdown,
        };

        Router::new()
            .route(&rpc("CreateVolume"), post(create_volume))
            .route(&rpc("DeleteVolume"), post(delete_volume))
            .route(&rpc("ControllerPublishVolume"), post(publish_volume))
            .route(&rpc("ControllerUnpublishVolume"), post(unpublish_volume))
            .route(
                &rpc("ValidateVolumeCapabilities"),
                post(validate_volume_capabilities),
            )
            .route(&rpc("ListVolumes"), post(list_volumes))
            .route(&rpc("GetCapacity"), post(get_capacity))
            .route(&rpc("ControllerGetCapabilities"), post(get_capabilities))
            .route(&rpc("CreateSnapshot"), post(create_snapshot))
            .route(&rpc("DeleteSnapshot"), post(delete_snapshot))
            .route(&rpc("ListSnapshots"), post(list_snapshots))
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

fn rpc(method: &str) -> String {
    format!("{}/{}", CONTROLLER_SERVICE, method)
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    controller: Arc<Controller>,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl AppState {
    fn context(&self) -> RequestContext {
        RequestContext::child_of(&self.shutdown, Some(self.request_timeout))
    }
}

fn respond<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => {
            let status = StatusCode::from_u16(e.code().http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(ApiErrorResponse::from(&e))).into_response()
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn create_volume(
    State(state): State<AppState>,
    Json(request): Json<CreateVolumeRequest>,
) -> Response {
    debug!("CreateVolume request: {:?}", request);
    respond(state.controller.create_volume(&state.context(), request).await)
}

async fn delete_volume(
    State(state): State<AppState>,
    Json(request): Json<DeleteVolumeRequest>,
) -> Response {
    debug!("DeleteVolume request: {:?}", request);
    respond(state.controller.delete_volume(&state.context(), request).await)
}

async fn publish_volume(
    State(state): State<AppState>,
    Json(request): Json<ControllerPublishVolumeRequest>,
) -> Response {
    debug!("ControllerPublishVolume request: {:?}", request);
    respond(
        state
            .controller
            .controller_publish_volume(&state.context(), request)
            .await,
    )
}

async fn unpublish_volume(
    State(state): State<AppState>,
    Json(request): Json<ControllerUnpublishVolumeRequest>,
) -> Response {
    debug!("ControllerUnpublishVolume request: {:?}", request);
    respond(
        state
            .controller
            .controller_unpublish_volume(&state.context(), request)
            .await,
    )
}

async fn validate_volume_capabilities(
    State(state): State<AppState>,
    Json(request): Json<ValidateVolumeCapabilitiesRequest>,
) -> Response {
    respond(
        state
            .controller
            .validate_volume_capabilities(&state.context(), request)
            .await,
    )
}

async fn list_volumes(
    State(state): State<AppState>,
    Json(request): Json<ListVolumesRequest>,
) -> Response {
    debug!("ListVolumes request: {:?}", request);
    respond(state.controller.list_volumes(&state.context(), request).await)
}

async fn get_capacity(
    State(state): State<AppState>,
    Json(request): Json<GetCapacityRequest>,
) -> Response {
    respond(state.controller.get_capacity(&state.context(), request).await)
}

async fn get_capabilities(State(state): State<AppState>) -> Response {
    respond(Ok(state.controller.controller_get_capabilities()))
}

async fn create_snapshot(
    State(state): State<AppState>,
    Json(request): Json<CreateSnapshotRequest>,
) -> Response {
    respond(state.controller.create_snapshot(&state.context(), request).await)
}

async fn delete_snapshot(
    State(state): State<AppState>,
    Json(request): Json<DeleteSnapshotRequest>,
) -> Response {
    respond(state.controller.delete_snapshot(&state.context(), request).await)
}

async fn list_snapshots(
    State(state): State<AppState>,
    Json(request): Json<ListSnapshotsRequest>,
) -> Response {
    respond(state.controller.list_snapshots(&state.context(), request).await)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::controlplane::backends::simulator::SimulatedConnectionManager;
    use crate::controlplane::csi::{
        ControllerGetCapabilitiesResponse, CreateVolumeResponse, ListVolumesResponse,
    };
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde::de::DeserializeOwned;
    use serde_json::json;
    use tower::ServiceExt;

    fn router() -> Router {
        let config = Config::from_yaml(
            r#"
virtualCenters:
  vc1.example.com:
    datacenters:
      - name: dc-a
        zone: zone-a
        region: region-x
        datastores: [ds-1]
        nodes: [node-1.example.com]
"#,
        )
        .unwrap();
        let cm = Arc::new(SimulatedConnectionManager::from_config(&config));
        RestRouter::new(Controller::new(&config, cm).unwrap()).build()
    }

    async fn call(app: &Router, method: &str, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method("POST")
            .uri(rpc(method))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).unwrap()
    }

    fn create_body(name: &str) -> serde_json::Value {
        json!({
            "name": name,
            "capacityRange": { "requiredBytes": 1 },
            "parameters": {
                "parent_type": "Datastore",
                "parent_name": "ds-1",
                "zone": "zone-a",
                "region": "region-x"
            }
        })
    }

    #[tokio::test]
    async fn test_create_and_list_over_http() {
        let app = router();

        let (status, body) = call(&app, "CreateVolume", create_body("pvc-1")).await;
        assert_eq!(status, StatusCode::OK);
        let created: CreateVolumeResponse = decode(&body);
        assert_eq!(created.volume.capacity_bytes, 1024 * 1024 * 1024);

        let (status, body) = call(&app, "ListVolumes", json!({ "maxEntries": 10 })).await;
        assert_eq!(status, StatusCode::OK);
        let listed: ListVolumesResponse = decode(&body);
        assert_eq!(listed.entries.len(), 1);
        assert_eq!(listed.entries[0].volume.volume_id, created.volume.volume_id);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let app = router();

        let (status, body) = call(&app, "CreateVolume", json!({ "name": "pvc-1" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ApiErrorResponse = decode(&body);
        assert_eq!(err.error, "INVALID_ARGUMENT");

        let (status, _) = call(&app, "CreateSnapshot", json!({})).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);

        let (status, _) = call(&app, "ListVolumes", json!({ "startingToken": "abc" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_unknown_volume_is_ok() {
        let app = router();
        let (status, _) = call(&app, "DeleteVolume", json!({ "volumeId": "gone" })).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_capabilities_route() {
        let app = router();
        let request = Request::builder()
            .method("POST")
            .uri(rpc("ControllerGetCapabilities"))
            .body(Body::empty())
            .unwrap();

        let response = tokio_test::assert_ok!(app.oneshot(request).await);
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let caps: ControllerGetCapabilitiesResponse = decode(&bytes);
        assert_eq!(caps.capabilities.len(), 3);
    }

    #[tokio::test]
    async fn test_health() {
        let app = router();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
