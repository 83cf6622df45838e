//! HTTP Server
//!
//! Builds the axum router and serves it on TCP until the shutdown future resolves.

use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::{info, info_span, Level};

use crate::handler;
use crate::middleware::{finish_envelope, REQUEST_ID_HEADER};
use crate::types::AppState;

const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
const DEFAULT_HTTP_PORT: u16 = 9530;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP Server Configuration
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
    /// Requests still running after this are answered with 408
    pub request_timeout: Duration,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HTTP_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// CORS from `CORS_ALLOW_ORIGIN`
fn create_cors_layer() -> CorsLayer {
    cors_layer_for(std::env::var("CORS_ALLOW_ORIGIN").ok().as_deref())
}

/// Comma-separated origins. Unset, empty or `*` allows every origin.
fn cors_layer_for(origins: Option<&str>) -> CorsLayer {
    match origins {
        Some(origins) if !origins.is_empty() && origins != "*" => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        }
        _ => CorsLayer::permissive(),
    }
}

/// Create the router with every API route
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let routes = Router::new()
        // Queues
        .route(
            "/queue",
            post(handler::create_queue)
                .get(handler::get_queues)
                .patch(handler::update_queue)
                .delete(handler::delete_queue),
        )
        .route("/queue/search", get(handler::search_queues))
        .route("/queue/{id}/start", post(handler::start_queue))
        .route("/queue/{id}/stop", post(handler::stop_queue))
        .route("/queue/{id}/pause", post(handler::pause_queue))
        .route("/queue/{id}/unpause", post(handler::unpause_queue))
        .route("/queue/{id}/drain", post(handler::drain_queue))
        .route("/queue/{id}/tasks", get(handler::queue_tasks))
        // Tasks
        .route("/task", post(handler::enqueue_task))
        .route("/tasks", post(handler::enqueue_tasks))
        .route(
            "/task/{id}",
            get(handler::get_task)
                .patch(handler::update_task)
                .delete(handler::cancel_task),
        )
        .route("/task/{id}/ack", post(handler::ack_task))
        .route("/task/{id}/fail", post(handler::fail_task))
        .route("/health", get(handler::health))
        .fallback(handler::not_found)
        .with_state(state);

    with_request_layers(routes, create_cors_layer(), request_timeout)
}

/// Outermost first: call id, access log, call id echo, CORS, envelope, timeout
fn with_request_layers(routes: Router, cors: CorsLayer, request_timeout: Duration) -> Router {
    routes
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(finish_envelope))
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    let call_id = request
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or_default();
                    info_span!(
                        "request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        call_id = %call_id
                    )
                })
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// HTTP Server
pub struct HttpServer {
    config: HttpServerConfig,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Bind and serve until `shutdown` completes
    pub async fn serve<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(
            addr = %addr,
            request_timeout_ms = self.config.request_timeout.as_millis() as u64,
            "HTTP API listening"
        );

        axum::serve(listener, create_router(self.state, self.config.request_timeout))
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP API stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderMap, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use taskmill_core::application::QueueManager;
    use taskmill_core::port::id_provider::mocks::SequentialIdProvider;
    use taskmill_core::port::worker_sink::mocks::RecordingSink;
    use taskmill_core::port::MonotonicTimeProvider;
    use tower::ServiceExt;

    fn test_app() -> (Router, AppState) {
        let state: AppState = Arc::new(QueueManager::new(
            Arc::new(RecordingSink::new()),
            Arc::new(MonotonicTimeProvider::anchored_at(0)),
            Arc::new(SequentialIdProvider::new()),
            None,
        ));
        (create_router(state.clone(), DEFAULT_REQUEST_TIMEOUT), state)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        send(app, request).await.1
    }

    async fn send(app: &Router, request: Request<Body>) -> (HeaderMap, (StatusCode, Value)) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (headers, (status, json))
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method("OPTIONS")
            .uri("/health")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap()
    }

    fn emails_queue() -> Value {
        json!({
            "name": "emails",
            "mode": "fifo",
            "rate_limits": [{"frequency": 5, "rate": "second"}, {"frequency": 100, "rate": "minute"}]
        })
    }

    fn health_only(cors: CorsLayer, request_timeout: Duration) -> Router {
        let (_, state) = test_app();
        let routes = Router::new()
            .route("/health", get(handler::health))
            .with_state(state);
        with_request_layers(routes, cors, request_timeout)
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin_by_default() {
        let app = health_only(cors_layer_for(None), DEFAULT_REQUEST_TIMEOUT);
        let (headers, _) = send(&app, preflight("http://anywhere.test")).await;
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_cors_origin_list_is_enforced() {
        let cors = cors_layer_for(Some("http://a.test, http://b.test"));
        let app = health_only(cors, DEFAULT_REQUEST_TIMEOUT);

        let (headers, _) = send(&app, preflight("http://b.test")).await;
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://b.test");

        let (headers, _) = send(&app, preflight("http://evil.test")).await;
        assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn test_envelope_carries_call_id_status_and_time() {
        let (app, _) = test_app();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (headers, (status, body)) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], 200);
        assert!(body["time"].as_str().unwrap().ends_with('Z'));

        let call_id = body["call_id"].as_str().unwrap();
        assert!(!call_id.is_empty());
        assert_eq!(headers[REQUEST_ID_HEADER], call_id);

        // A caller-supplied id is kept
        let request = Request::builder()
            .uri("/queue/ghost/start")
            .method("POST")
            .header(REQUEST_ID_HEADER, "call-42")
            .body(Body::empty())
            .unwrap();
        let (headers, (status, body)) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["call_id"], "call-42");
        assert_eq!(body["status"], 404);
        assert_eq!(headers[REQUEST_ID_HEADER], "call-42");
    }

    #[tokio::test]
    async fn test_unknown_endpoint_uses_envelope() {
        let (app, _) = test_app();
        let (status, body) = call(&app, "GET", "/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "Endpoint not found");

        let (status, body) = call(&app, "PUT", "/health", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["error"]["code"], "METHOD_NOT_ALLOWED");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_request_times_out_with_envelope() {
        let routes = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "late"
            }),
        );
        let app = with_request_layers(routes, cors_layer_for(None), Duration::from_millis(100));

        let (status, body) = call(&app, "GET", "/slow", None).await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"]["code"], "REQUEST_TIMEOUT");
        assert_eq!(body["status"], 408);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = test_app();
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["data"]["queues"], 0);
    }

    #[tokio::test]
    async fn test_create_and_get_queue() {
        let (app, _) = test_app();
        let (status, body) = call(&app, "POST", "/queue", Some(emails_queue())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["state"], "IDLE");
        assert_eq!(body["data"]["effective_rate"]["frequency"], 100);
        assert_eq!(body["data"]["effective_rate"]["period_ms"], 60_000);

        let (status, body) = call(&app, "GET", "/queue?name=emails", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["config"]["rate_limits"][0]["rate"], "second");

        let (_, body) = call(&app, "GET", "/queue", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_queue_is_conflict() {
        let (app, _) = test_app();
        call(&app, "POST", "/queue", Some(emails_queue())).await;
        let (status, body) = call(&app, "POST", "/queue", Some(emails_queue())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"]["code"], "DUPLICATE_QUEUE_NAME");
    }

    #[tokio::test]
    async fn test_unknown_period_is_rejected() {
        let (app, _) = test_app();
        let body = json!({
            "name": "emails",
            "mode": "fifo",
            "rate_limits": [{"frequency": 5, "rate": "week"}]
        });
        let (status, body) = call(&app, "POST", "/queue", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "UNKNOWN_PERIOD");
    }

    #[tokio::test]
    async fn test_malformed_body_uses_envelope() {
        let (app, _) = test_app();
        let (status, body) = call(&app, "POST", "/queue", Some(json!({"name": 3}))).await;
        assert!(status.is_client_error());
        assert_eq!(body["error"]["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_missing_queue_is_not_found() {
        let (app, _) = test_app();
        let (status, body) = call(&app, "POST", "/queue/nope/start", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "QUEUE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_lifecycle_routes() {
        let (app, _) = test_app();
        call(&app, "POST", "/queue", Some(emails_queue())).await;

        let (_, body) = call(&app, "POST", "/queue/emails/pause", None).await;
        assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

        let (_, body) = call(&app, "POST", "/queue/emails/start", None).await;
        assert_eq!(body["data"]["state"], "ACTIVE");
        let (_, body) = call(&app, "POST", "/queue/emails/pause", None).await;
        assert_eq!(body["data"]["state"], "PAUSED");
        let (_, body) = call(&app, "POST", "/queue/emails/unpause", None).await;
        assert_eq!(body["data"]["state"], "ACTIVE");
        let (_, body) = call(&app, "POST", "/queue/emails/stop", None).await;
        assert_eq!(body["data"]["state"], "IDLE");
    }

    #[tokio::test]
    async fn test_enqueue_requires_accepting_queue() {
        let (app, _) = test_app();
        call(&app, "POST", "/queue", Some(emails_queue())).await;

        let job = json!({"queue": "emails", "payload": {"to": "a@b"}});
        let (status, body) = call(&app, "POST", "/task", Some(job.clone())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "QUEUE_NOT_ACCEPTING_JOBS");

        call(&app, "POST", "/queue/emails/start", None).await;
        call(&app, "POST", "/queue/emails/pause", None).await;
        let (status, body) = call(&app, "POST", "/task", Some(job)).await;
        assert_eq!(status, StatusCode::OK);
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (_, body) = call(&app, "GET", &format!("/task/{}", id), None).await;
        assert_eq!(body["data"]["status"], "PENDING");
        assert_eq!(body["data"]["payload"]["to"], "a@b");

        let (_, body) = call(&app, "GET", "/queue/emails/tasks?status=pending", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_enqueue_is_all_or_nothing() {
        let (app, state) = test_app();
        call(&app, "POST", "/queue", Some(emails_queue())).await;
        call(&app, "POST", "/queue/emails/start", None).await;
        call(&app, "POST", "/queue/emails/pause", None).await;

        let bad = json!({"queue": "emails", "jobs": [{"payload": 1}, {"payload": null}]});
        let (status, body) = call(&app, "POST", "/tasks", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_JOB");
        assert_eq!(state.get_queue("emails").await.unwrap().pending, 0);

        let good = json!({"queue": "emails", "jobs": [{"payload": 1}, {"payload": 2}]});
        let (_, body) = call(&app, "POST", "/tasks", Some(good)).await;
        assert_eq!(body["data"]["ids"].as_array().unwrap().len(), 2);
        assert_eq!(state.get_queue("emails").await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn test_cancel_and_update_task() {
        let (app, _) = test_app();
        let queue = json!({
            "name": "ranked",
            "mode": "priority",
            "rate_limits": [{"frequency": 1, "rate": "second"}]
        });
        call(&app, "POST", "/queue", Some(queue)).await;
        call(&app, "POST", "/queue/ranked/start", None).await;
        call(&app, "POST", "/queue/ranked/pause", None).await;

        let (_, body) = call(&app, "POST", "/task", Some(json!({"queue": "ranked", "payload": "x"}))).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (_, body) = call(&app, "PATCH", &format!("/task/{}", id), Some(json!({"priority": 9}))).await;
        assert_eq!(body["data"]["priority"], 9);

        let (_, body) = call(&app, "DELETE", &format!("/task/{}", id), None).await;
        assert_eq!(body["data"]["status"], "CANCELLED");

        let (status, body) = call(&app, "DELETE", &format!("/task/{}", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "JOB_NOT_CANCELLABLE");

        let (status, _) = call(&app, "GET", "/task/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_search_and_delete_queue() {
        let (app, _) = test_app();
        call(&app, "POST", "/queue", Some(emails_queue())).await;

        let patch = json!({"name": "emails", "rate_limits": [{"frequency": 2, "rate": "second"}], "batch_size": 2});
        let (_, body) = call(&app, "PATCH", "/queue", Some(patch)).await;
        assert_eq!(body["data"]["config"]["batch_size"], 2);
        assert_eq!(body["data"]["effective_rate"]["frequency"], 2);

        let (_, body) = call(&app, "GET", "/queue/search?name=mail&mode=fifo", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        let (_, body) = call(&app, "GET", "/queue/search?mode=priority", None).await;
        assert!(body["data"].as_array().unwrap().is_empty());

        let (status, _) = call(&app, "DELETE", "/queue?name=emails", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, "POST", "/queue", Some(emails_queue())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "DUPLICATE_QUEUE_NAME");

        let (_, body) = call(&app, "DELETE", "/queue?name=emails&release_name=true", None).await;
        assert_eq!(body["data"]["released"], true);
        let (status, _) = call(&app, "POST", "/queue", Some(emails_queue())).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, "DELETE", "/queue?name=ghost&release_name=true", None).await;
        assert_eq!(body["error"]["code"], "QUEUE_NOT_FOUND");
    }
}
