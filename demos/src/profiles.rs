//! The four load profiles. Each iteration is one simulated user visit.
use rampart::core::Labels;
use rampart::http::Method;
use rampart::prelude::*;
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

const ERRORS: &str = "errors";
const API_LATENCY: &str = "api_latency";

const BROWSE_ENDPOINTS: [&str; 4] = [
    "/health",
    "/api/products",
    "/api/products/1",
    "/api/products/search?q=test",
];

fn has_products(res: &Response) -> bool {
    res.json::<Value>()
        .ok()
        .and_then(|v| v["products"].as_array().map(|p| !p.is_empty()))
        .unwrap_or(false)
}

/// Walks every public endpoint in turn with think time in between.
#[scenario]
pub async fn api_load(ctx: VuContext) -> anyhow::Result<()> {
    let http = ctx.http();

    let res = http.get("/health").await;
    ctx.check(&res)
        .that("health check status is 200", |r| r.status == 200)
        .that("health check response time < 200ms", |r| {
            r.duration_ms() < 200.
        })
        .error_rate(ERRORS)
        .run();
    ctx.sleep(Duration::from_secs(1)).await;

    let res = http.get("/api/products").await;
    ctx.check(&res)
        .that("products status is 200", |r| r.status == 200)
        .that("products response time < 500ms", |r| r.duration_ms() < 500.)
        .that("products response has data", has_products)
        .error_rate(ERRORS)
        .run();
    ctx.metrics()
        .record_trend(API_LATENCY, &Labels::new(), res.duration_ms());
    ctx.sleep(Duration::from_secs(1)).await;

    let res = http.get("/api/products/1").await;
    ctx.check(&res)
        .that("product status is 200", |r| r.status == 200)
        .that("product response time < 300ms", |r| r.duration_ms() < 300.)
        .error_rate(ERRORS)
        .run();
    ctx.sleep(Duration::from_secs(1)).await;

    let res = http
        .request(Method::GET, "/api/products/search?q=test")
        .name("/api/products/search")
        .send()
        .await;
    ctx.check(&res)
        .that("search status is 200", |r| r.status == 200)
        .that("search response time < 600ms", |r| r.duration_ms() < 600.)
        .error_rate(ERRORS)
        .run();
    ctx.sleep(Duration::from_secs(2)).await;

    let res = http.get("/metrics").await;
    ctx.check(&res)
        .that("metrics status is 200", |r| r.status == 200)
        .that("metrics contains prometheus data", |r| {
            r.body.contains("http_requests_total")
        })
        .error_rate(ERRORS)
        .run();
    ctx.sleep(Duration::from_secs(1)).await;

    Ok(())
}

/// Sustained browsing of the product list.
#[scenario]
pub async fn soak(ctx: VuContext) -> anyhow::Result<()> {
    let res = ctx.http().get("/api/products").await;
    ctx.check(&res)
        .that("status is 200", |r| r.status == 200)
        .run();
    ctx.sleep(Duration::from_secs(3)).await;
    Ok(())
}

/// Random endpoint, random think time between one and three seconds.
#[scenario]
pub async fn spike(ctx: VuContext) -> anyhow::Result<()> {
    let (endpoint, think) = {
        let mut rng = rand::thread_rng();
        let endpoint = BROWSE_ENDPOINTS[rng.gen_range(0..BROWSE_ENDPOINTS.len())];
        (endpoint, rng.gen_range(1.0..3.0))
    };

    let res = ctx.http().get(endpoint).await;
    ctx.check(&res)
        .that("status is 200", |r| r.status == 200)
        .error_rate(ERRORS)
        .run();
    ctx.sleep(Duration::from_secs_f64(think)).await;
    Ok(())
}

/// Aggressive product list requests. Shed load (503) is an expected answer.
#[scenario]
pub async fn stress(ctx: VuContext) -> anyhow::Result<()> {
    let res = ctx.http().get("/api/products").await;
    ctx.check(&res)
        .that("status is 200 or 503", |r| r.status == 200 || r.status == 503)
        .run();
    ctx.sleep(Duration::from_millis(500)).await;
    Ok(())
}

pub async fn announce(ctx: VuContext, profile: &'static str) -> anyhow::Result<Value> {
    info!("Starting {profile} test against {}", ctx.base_url());
    Ok(json!({ "profile": profile, "target": ctx.base_url().as_str() }))
}

pub async fn summarize(ctx: VuContext) -> anyhow::Result<()> {
    info!(
        "{} test completed",
        ctx.setup_data()["profile"].as_str().unwrap_or("load")
    );
    Ok(())
}
