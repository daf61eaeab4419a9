//! ABOUTME: Observability services including health checks and metrics
//! ABOUTME: Provides monitoring endpoints for operational visibility

use actix_web::{
    dev::{ServiceRequest, ServiceResponse},
    middleware::Logger,
    web, App, HttpResponse, HttpServer, Result as ActixResult,
};
use orc_core::Result;
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use serde_json::json;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

/// Readiness gate that can be toggled to indicate service readiness
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    ready: Arc<AtomicBool>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Prometheus registry for the orchestrator's own operational gauges: queue
/// depth, lock contention, and fan-out outcomes (§4.13).
#[derive(Debug)]
pub struct Metrics {
    registry: Arc<Mutex<Registry>>,
    pipeline_queue_depth: Gauge,
    lock_contention_total: Counter,
    deploy_requests_total: Counter,
    deploy_failures_total: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let pipeline_queue_depth = Gauge::default();
        registry.register(
            "pipeline_queue_depth",
            "Tasks currently queued or running in the pipeline runtime",
            pipeline_queue_depth.clone(),
        );

        let lock_contention_total = Counter::default();
        registry.register(
            "lock_contention_total",
            "Number of lock acquire attempts that found the lock already held",
            lock_contention_total.clone(),
        );

        let deploy_requests_total = Counter::default();
        registry.register(
            "deploy_requests_total",
            "Total deploy fan-out requests dispatched",
            deploy_requests_total.clone(),
        );

        let deploy_failures_total = Counter::default();
        registry.register(
            "deploy_failures_total",
            "Total deploy fan-out requests that ended fatally",
            deploy_failures_total.clone(),
        );

        Self {
            registry: Arc::new(Mutex::new(registry)),
            pipeline_queue_depth,
            lock_contention_total,
            deploy_requests_total,
            deploy_failures_total,
        }
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.pipeline_queue_depth.set(depth);
    }

    pub fn inc_lock_contention(&self) {
        self.lock_contention_total.inc();
    }

    pub fn inc_deploy_requests(&self) {
        self.deploy_requests_total.inc();
    }

    pub fn inc_deploy_failures(&self) {
        self.deploy_failures_total.inc();
    }

    pub fn encode(&self) -> Result<String> {
        let registry = self.registry.lock().map_err(|e| {
            orc_core::Error::Internal(format!("failed to lock metrics registry: {e}"))
        })?;

        let mut buffer = String::new();
        encode(&mut buffer, &registry)
            .map_err(|e| orc_core::Error::Internal(format!("failed to encode metrics: {e}")))?;

        Ok(buffer)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Application state for observability endpoints
#[derive(Debug, Clone)]
pub struct ObsState {
    pub readiness: ReadinessGate,
    pub metrics: Arc<Metrics>,
}

impl ObsState {
    pub fn new() -> Self {
        Self {
            readiness: ReadinessGate::new(),
            metrics: Arc::new(Metrics::new()),
        }
    }
}

impl Default for ObsState {
    fn default() -> Self {
        Self::new()
    }
}

/// Liveness endpoint handler
async fn health() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok"
    })))
}

/// Readiness endpoint handler; gated on store connectivity via `ObsState::readiness`.
async fn readiness(state: web::Data<ObsState>) -> ActixResult<HttpResponse> {
    let is_ready = state.readiness.is_ready();

    if is_ready {
        Ok(HttpResponse::Ok().json(json!({
            "status": "ready"
        })))
    } else {
        Ok(HttpResponse::ServiceUnavailable().json(json!({
            "status": "not ready"
        })))
    }
}

/// Metrics endpoint handler
async fn metrics(state: web::Data<ObsState>) -> ActixResult<HttpResponse> {
    match state.metrics.encode() {
        Ok(metrics_text) => Ok(HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4; charset=utf-8")
            .body(metrics_text)),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": "Failed to encode metrics"
            })))
        }
    }
}

/// Create observability service factory
pub fn create_service(
    state: ObsState,
) -> App<
    impl actix_web::dev::ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl actix_web::body::MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    App::new()
        .app_data(web::Data::new(state))
        .wrap(Logger::default())
        .service(
            web::scope("")
                .route("/healthz", web::get().to(health))
                .route("/readyz", web::get().to(readiness))
                .route("/metrics", web::get().to(metrics)),
        )
}

/// Start observability server
pub async fn start_server(bind_addr: &str, state: ObsState) -> Result<()> {
    tracing::info!("Starting observability server on {}", bind_addr);

    HttpServer::new(move || create_service(state.clone()))
        .bind(bind_addr)
        .map_err(|e| orc_core::Error::External(format!("failed to bind server: {e}")))?
        .run()
        .await
        .map_err(|e| orc_core::Error::External(format!("server error: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = ObsState::new();
        let app = test::init_service(create_service(state)).await;

        let req = test::TestRequest::get().uri("/healthz").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_readiness_endpoint_ready() {
        let state = ObsState::new();
        state.readiness.set_ready(true);

        let app = test::init_service(create_service(state)).await;

        let req = test::TestRequest::get().uri("/readyz").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "ready");
    }

    #[tokio::test]
    async fn test_readiness_endpoint_not_ready() {
        let state = ObsState::new();
        state.readiness.set_ready(false);

        let app = test::init_service(create_service(state)).await;

        let req = test::TestRequest::get().uri("/readyz").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 503);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "not ready");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_reports_registered_gauges() {
        let state = ObsState::new();
        state.metrics.set_queue_depth(3);
        state.metrics.inc_lock_contention();
        state.metrics.inc_deploy_requests();

        let app = test::init_service(create_service(state)).await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/plain; version=0.0.4; charset=utf-8"
        );

        let body = test::read_body(resp).await;
        let body_str = std::str::from_utf8(&body).unwrap();

        assert!(body_str.contains("pipeline_queue_depth"));
        assert!(body_str.contains("lock_contention_total"));
        assert!(body_str.contains("deploy_requests_total"));
    }

    #[tokio::test]
    async fn test_readiness_gate_toggle() {
        let gate = ReadinessGate::new();

        assert!(gate.is_ready());
        gate.set_ready(false);
        assert!(!gate.is_ready());
        gate.set_ready(true);
        assert!(gate.is_ready());
    }
}
