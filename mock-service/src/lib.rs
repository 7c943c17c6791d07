//! Stand-in for the service under load: a small product API with health, readiness and
//! Prometheus endpoints.
use axum::{
    debug_handler,
    extract::{MatchedPath, Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use metrics::{counter, histogram, Label};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    net::SocketAddr,
    num::NonZeroU32,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::{net::TcpListener, time::Instant};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

#[derive(Clone, Debug, Default)]
pub struct MockConfig {
    /// Requests per second the product API accepts before answering 503.
    pub max_rps: Option<NonZeroU32>,
    /// Latency added to every product API response.
    pub delay: Duration,
}

#[derive(Clone)]
struct AppState {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    delay: Duration,
}

/// The service's router. Each instance keeps its own Prometheus registry.
pub fn app(config: MockConfig) -> Router {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let state = AppState {
        recorder: Arc::new(recorder),
        handle,
        limiter: config.max_rps.map(|rps| Arc::new(rate_limiter(rps))),
        delay: config.delay,
    };

    let api = Router::new()
        .route("/api/products", get(products))
        .route("/api/products/search", get(search))
        .route("/api/products/:id", get(product))
        .route_layer(middleware::from_fn_with_state(state.clone(), shed_load));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(prometheus))
        .route("/delay/ms/:delay_ms", get(delay))
        .merge(api)
        .route_layer(middleware::from_fn_with_state(state.clone(), track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, config: MockConfig) -> std::io::Result<()> {
    info!("Mock service listening on {}", listener.local_addr()?);
    axum::serve(listener, app(config)).await
}

pub async fn run(addr: SocketAddr, config: MockConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, config).await?;
    Ok(())
}

/** Middleware **/

async fn track_metrics(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    let labels = vec![
        Label::new("method", method),
        Label::new("route", route),
        Label::new("status_code", response.status().as_u16().to_string()),
    ];
    let elapsed = start.elapsed().as_secs_f64();
    metrics::with_local_recorder(state.recorder.as_ref(), || {
        counter!("http_requests_total", labels.clone()).increment(1);
        histogram!("http_request_duration_seconds", labels).record(elapsed);
    });

    response
}

async fn shed_load(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(limiter) = &state.limiter {
        if limiter.check().is_err() {
            debug!("Shedding {}", req.uri());
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "Service overloaded" })),
            )
                .into_response();
        }
    }

    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }

    next.run(req).await
}

/** Handlers **/

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    pub name: String,
    pub price: f64,
}

pub fn catalog() -> Vec<Product> {
    vec![
        Product {
            id: 1,
            name: "Sample Product 1".to_string(),
            price: 29.99,
        },
        Product {
            id: 2,
            name: "Sample Product 2".to_string(),
            price: 49.99,
        },
    ]
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Platform Showcase API",
        "version": "1.0.0",
        "status": "healthy",
    }))
}

async fn health() -> Json<Value> {
    let timestamp = humantime::format_rfc3339_millis(SystemTime::now()).to_string();
    Json(json!({ "status": "healthy", "timestamp": timestamp }))
}

async fn ready() -> Json<Value> {
    Json(json!({ "status": "ready", "database": "not configured" }))
}

async fn prometheus(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.handle.render(),
    )
}

async fn products() -> Json<Value> {
    Json(json!({ "products": catalog() }))
}

#[debug_handler]
async fn product(Path(id): Path<u64>) -> Result<Json<Product>, (StatusCode, Json<Value>)> {
    catalog()
        .into_iter()
        .find(|p| p.id == id)
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("Product {id} not found") })),
            )
        })
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

async fn search(Query(params): Query<SearchParams>) -> Json<Value> {
    let needle = params.q.to_lowercase();
    let matches: Vec<_> = catalog()
        .into_iter()
        .filter(|p| p.name.to_lowercase().contains(&needle))
        .collect();
    Json(json!({ "query": params.q, "products": matches }))
}

#[debug_handler]
async fn delay(Path(delay_ms): Path<u64>) {
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

/** Utils **/

pub fn rate_limiter(rps: NonZeroU32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(rps))
}
