//! REST API handlers

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use gpumgr_core::{
    AllocationId, AllocationRequest, AllocationView, ApiConfig, GpuDevice, GpuMgrError,
};
use gpumgr_health::ServiceHealth;
use gpumgr_scheduler::GpuManager;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::metrics;

/// Application state shared across handlers
pub struct AppState {
    pub manager: Arc<GpuManager>,
}

/// Create the API router
pub fn create_router(manager: Arc<GpuManager>, config: &ApiConfig) -> Router {
    let state = Arc::new(AppState { manager });

    let router = Router::new()
        .route("/health", get(health))
        .route("/status", get(get_status))
        .route("/allocate", post(allocate))
        .route("/release", post(release))
        .route("/metrics", get(get_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.cors_enabled {
        router.layer(cors_layer(&config.cors_origins))
    } else {
        router
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

fn error_response(err: GpuMgrError) -> (StatusCode, String) {
    match err {
        GpuMgrError::ResourceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

/// Liveness response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub device_count: usize,
}

/// Liveness check
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        device_count: state.manager.device_count().await,
    })
}

/// Device and allocation status
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub gpus: Vec<GpuDevice>,
    pub allocations: BTreeMap<String, AllocationView>,
    pub total_vram_mb: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
    pub services: BTreeMap<String, ServiceHealthResponse>,
}

/// Cached health of one service
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceHealthResponse {
    pub service: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl From<ServiceHealth> for ServiceHealthResponse {
    fn from(health: ServiceHealth) -> Self {
        Self {
            service: health.service.to_string(),
            healthy: health.healthy,
            endpoint: health.endpoint,
            error: health.error,
            checked_at: health.checked_at,
        }
    }
}

/// Get GPU and allocation status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let status = state.manager.status().await;

    Json(StatusResponse {
        gpus: status.devices,
        allocations: status
            .allocations
            .into_iter()
            .map(|a| (a.id.to_string(), a))
            .collect(),
        total_vram_mb: status.total_capacity_mb,
        observed_at: status.observed_at,
        services: status
            .services
            .into_iter()
            .map(|h| (h.service.to_string(), h.into()))
            .collect(),
    })
}

/// Response to an allocation request
#[derive(Debug, Serialize, Deserialize)]
pub struct AllocationResponse {
    pub success: bool,
    pub allocation_id: String,
    pub gpu_indices: Vec<u32>,
    pub memory_limit_mb: u64,
    pub message: String,
    pub wait_time_s: f64,
}

/// Request GPU allocation
async fn allocate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AllocationRequest>,
) -> Result<Json<AllocationResponse>, (StatusCode, String)> {
    debug!(
        service = %req.service,
        priority = %req.priority,
        estimated_vram_mb = req.estimated_vram_mb,
        pipeline_id = req.pipeline_id.as_deref().unwrap_or("-"),
        "Allocation requested"
    );

    let grant = state.manager.request(req).await.map_err(error_response)?;

    Ok(Json(AllocationResponse {
        success: true,
        allocation_id: grant.id.to_string(),
        gpu_indices: grant.gpu_indices,
        memory_limit_mb: grant.memory_limit_mb,
        message: format!("Allocated {}MB VRAM", grant.memory_limit_mb),
        wait_time_s: grant.wait_time_s,
    }))
}

/// Request to release an allocation
#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub allocation_id: String,
}

/// Response to a release
#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub success: bool,
    pub message: String,
}

/// Release GPU allocation. Unknown ids still succeed.
async fn release(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReleaseRequest>,
) -> Json<ReleaseResponse> {
    let id = AllocationId::from(req.allocation_id);
    state.manager.release(&id).await;

    Json(ReleaseResponse {
        success: true,
        message: format!("Released {}", id),
    })
}

/// Prometheus metrics endpoint
async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.manager.status().await;

    match metrics::render(&status) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            error_response(e).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use gpumgr_health::HealthChecker;
    use gpumgr_telemetry::FakeTelemetry;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn router_with(fake: FakeTelemetry) -> (Router, Arc<GpuManager>) {
        let manager = Arc::new(GpuManager::new(
            Arc::new(fake),
            HealthChecker::disabled().unwrap(),
            Duration::from_secs(300),
        ));
        manager.initialize().await;
        (
            create_router(Arc::clone(&manager), &ApiConfig::default()),
            manager,
        )
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = router_with(FakeTelemetry::single(24000)).await;
        let (status, body) = send(&router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);

        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.device_count, 1);
    }

    #[tokio::test]
    async fn test_allocate_and_status() {
        let (router, _) = router_with(FakeTelemetry::single(24000)).await;

        let (status, body) = send(
            &router,
            post_json(
                "/allocate",
                serde_json::json!({
                    "service": "ollama",
                    "priority": 2,
                    "estimated_vram_mb": 8000,
                    "estimated_duration_s": 12.5,
                    "pipeline_id": "rag-42"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let alloc: AllocationResponse = serde_json::from_slice(&body).unwrap();
        assert!(alloc.success);
        assert_eq!(alloc.allocation_id, "alloc-ollama-1");
        assert_eq!(alloc.gpu_indices, vec![0]);
        assert_eq!(alloc.memory_limit_mb, 24000);
        assert_eq!(alloc.wait_time_s, 0.0);
        assert_eq!(alloc.message, "Allocated 24000MB VRAM");

        let (status, body) = send(&router, get("/status")).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["total_vram_mb"], 24000);
        assert_eq!(json["gpus"][0]["total_memory_mb"], 24000);
        let entry = &json["allocations"]["alloc-ollama-1"];
        assert_eq!(entry["service"], "ollama");
        assert_eq!(entry["priority"], "NORMAL");
        assert_eq!(entry["active_requests"], 1);
        assert_eq!(entry["memory_limit_mb"], 24000);
        assert_eq!(entry["pipeline_id"], "rag-42");
    }

    #[tokio::test]
    async fn test_status_reports_cached_service_health() {
        let (router, manager) = router_with(FakeTelemetry::single(24000)).await;
        manager.refresh_health().await;

        let (_, body) = send(&router, get("/status")).await;
        let status: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(status.services.len(), 5);
        assert!(status.services["whisper"].healthy);
        assert!(status.allocations.is_empty());
    }

    #[tokio::test]
    async fn test_allocate_without_gpus_is_503() {
        let (router, _) = router_with(FakeTelemetry::failing()).await;
        let (status, _) = send(
            &router,
            post_json("/allocate", serde_json::json!({"service": "whisper"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_allocate_unknown_service_rejected() {
        let (router, manager) = router_with(FakeTelemetry::single(24000)).await;
        let (status, _) = send(
            &router,
            post_json("/allocate", serde_json::json!({"service": "stable-cascade"})),
        )
        .await;
        assert!(status.is_client_error());
        assert!(manager.status().await.allocations.is_empty());
    }

    #[tokio::test]
    async fn test_release_unknown_still_succeeds() {
        let (router, manager) = router_with(FakeTelemetry::single(24000)).await;
        let (status, body) = send(
            &router,
            post_json(
                "/release",
                serde_json::json!({"allocation_id": "alloc-ollama-999"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let release: ReleaseResponse = serde_json::from_slice(&body).unwrap();
        assert!(release.success);
        assert_eq!(release.message, "Released alloc-ollama-999");
        assert!(manager.status().await.allocations.is_empty());
    }

    #[tokio::test]
    async fn test_release_decrements_active_requests() {
        let (router, manager) = router_with(FakeTelemetry::single(24000)).await;
        let (_, body) = send(
            &router,
            post_json("/allocate", serde_json::json!({"service": "comfyui"})),
        )
        .await;
        let alloc: AllocationResponse = serde_json::from_slice(&body).unwrap();

        for _ in 0..2 {
            let (status, _) = send(
                &router,
                post_json(
                    "/release",
                    serde_json::json!({"allocation_id": alloc.allocation_id}),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let status = manager.status().await;
        assert_eq!(status.allocations.len(), 1);
        assert_eq!(status.allocations[0].active_requests, 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (router, _) = router_with(FakeTelemetry::single(24000)).await;
        send(
            &router,
            post_json("/allocate", serde_json::json!({"service": "video_gen"})),
        )
        .await;

        let (status, body) = send(&router, get("/metrics")).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("gpu_memory_total_mb{gpu=\"0\"} 24000"));
        assert!(text.contains("gpu_active_allocations 1"));
        assert!(text.contains("gpu_total_allocations 1"));
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let (router, _) = router_with(FakeTelemetry::single(24000)).await;
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/allocate")
            .header("origin", "http://dashboard.local")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "*"
        );
    }
}
