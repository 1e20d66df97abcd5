//! Health checking for services that share the GPU

use chrono::{DateTime, Utc};
use futures::future::join_all;
use gpumgr_core::{GpuMgrError, GpuMgrResult, HealthConfig, ServiceKind};
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of probing one service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub service: ServiceKind,
    pub healthy: bool,
    /// Probed endpoint, `None` when the kind has no endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Failure reason for unhealthy services
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Health checker for GPU services
pub struct HealthChecker {
    /// HTTP client for health checks
    client: reqwest::Client,
    /// Endpoint per service kind
    endpoints: HashMap<ServiceKind, String>,
    /// Timeout duration
    timeout: Duration,
}

impl HealthChecker {
    /// Create a new health checker
    pub fn new(endpoints: HashMap<ServiceKind, String>, timeout: Duration) -> GpuMgrResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GpuMgrError::HealthCheck(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoints,
            timeout,
        })
    }

    /// Create a health checker from configuration
    pub fn from_config(config: &HealthConfig) -> GpuMgrResult<Self> {
        Self::new(config.endpoints.clone(), config.timeout())
    }

    /// Checker with no endpoints: every service reports healthy
    pub fn disabled() -> GpuMgrResult<Self> {
        Self::new(HashMap::new(), Duration::from_secs(5))
    }

    /// Check the health of a service
    pub async fn check(&self, service: ServiceKind) -> ServiceHealth {
        let Some(url) = self.endpoints.get(&service) else {
            return ServiceHealth {
                service,
                healthy: true,
                endpoint: None,
                error: None,
                checked_at: Utc::now(),
            };
        };

        let error = match self.client.get(url).send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                debug!(service = %service, endpoint = %url, "Health check passed");
                None
            }
            Ok(response) => {
                warn!(
                    service = %service,
                    endpoint = %url,
                    status = %response.status(),
                    "Health check failed"
                );
                Some(format!("unexpected status {}", response.status()))
            }
            Err(e) => {
                warn!(
                    service = %service,
                    endpoint = %url,
                    error = %e,
                    "Health check error"
                );
                Some(e.to_string())
            }
        };

        ServiceHealth {
            service,
            healthy: error.is_none(),
            endpoint: Some(url.clone()),
            error,
            checked_at: Utc::now(),
        }
    }

    /// Probe every service kind concurrently
    pub async fn check_all(&self) -> Vec<ServiceHealth> {
        join_all(ServiceKind::ALL.into_iter().map(|kind| self.check(kind))).await
    }

    /// Get the timeout duration
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as AxumStatus, routing::get, Router};

    async fn spawn_target() -> String {
        let app = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/busy", get(|| async { AxumStatus::SERVICE_UNAVAILABLE }))
            .route("/created", get(|| async { AxumStatus::CREATED }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_health_checker_creation() {
        let checker = HealthChecker::new(HashMap::new(), Duration::from_secs(10)).unwrap();
        assert_eq!(checker.timeout(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_healthy() {
        let checker = HealthChecker::disabled().unwrap();
        let health = checker.check(ServiceKind::VideoGeneration).await;
        assert!(health.healthy);
        assert!(health.endpoint.is_none());

        let all = checker.check_all().await;
        assert_eq!(all.len(), ServiceKind::ALL.len());
        assert!(all.iter().all(|h| h.healthy));
    }

    #[tokio::test]
    async fn test_only_200_is_healthy() {
        let base = spawn_target().await;
        let endpoints = HashMap::from([
            (ServiceKind::InferenceServer, format!("{}/ok", base)),
            (ServiceKind::ImageGeneration, format!("{}/busy", base)),
            (ServiceKind::SpeechToText, format!("{}/created", base)),
        ]);
        let checker = HealthChecker::new(endpoints, Duration::from_secs(2)).unwrap();

        assert!(checker.check(ServiceKind::InferenceServer).await.healthy);

        let busy = checker.check(ServiceKind::ImageGeneration).await;
        assert!(!busy.healthy);
        assert!(busy.error.unwrap().contains("503"));

        assert!(!checker.check(ServiceKind::SpeechToText).await.healthy);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unhealthy() {
        let endpoints = HashMap::from([(
            ServiceKind::LegacyImageGeneration,
            "http://127.0.0.1:1/sdapi/v1/progress".to_string(),
        )]);
        let checker = HealthChecker::new(endpoints, Duration::from_secs(1)).unwrap();

        let health = checker.check(ServiceKind::LegacyImageGeneration).await;
        assert!(!health.healthy);
        assert!(health.error.is_some());
    }
}
