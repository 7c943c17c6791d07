mod utils;
use utils::*;

use mock_service::MockConfig;
use rampart::core::{
    AbortReason, MetricSummary, ThresholdStatus, EXIT_EXTERNAL_ABORT, EXIT_PASS,
    EXIT_THRESHOLDS_FAILED, HTTP_REQS, HTTP_REQ_DURATION, VUS,
};
use rampart::prelude::*;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[scenario]
async fn browse_health(ctx: VuContext) -> anyhow::Result<()> {
    let res = ctx.http().get("/health").await;
    ctx.check(&res)
        .that("status is 200", |r| r.status == 200)
        .that("reports healthy", |r| {
            r.json::<Value>().map(|v| v["status"] == "healthy").ok()
        })
        .error_rate("errors")
        .run();
    ctx.sleep(Duration::from_millis(100)).await;
    Ok(())
}

#[scenario]
async fn browse_missing_product(ctx: VuContext) -> anyhow::Result<()> {
    let res = ctx.http().get("/api/products/99").await;
    ctx.check(&res)
        .that("status is 200", |r| r.status == 200)
        .error_rate("errors")
        .run();
    ctx.sleep(Duration::from_millis(100)).await;
    Ok(())
}

#[scenario]
async fn browse_catalog(ctx: VuContext) -> anyhow::Result<()> {
    let _ = list_products(&ctx).await;
    let res = ctx.http().get("/health").await;
    ctx.check(&res).that("status is 200", |r| r.status == 200).run();
    ctx.sleep(Duration::from_millis(100)).await;
    Ok(())
}

#[transaction]
async fn list_products(ctx: &VuContext) -> anyhow::Result<usize> {
    let res = ctx.http().get("/api/products").await;
    if res.failed() {
        anyhow::bail!("product list answered {}", res.status);
    }
    let body: Value = res.json()?;
    Ok(body["products"].as_array().map(Vec::len).unwrap_or(0))
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn ramp_against_healthy_service_passes() {
    init();
    let base = spawn_mock_service(MockConfig::default()).await;

    let report = browse_health()
        .base_address(&base)
        .stage(Duration::from_secs(2), 10)
        .stage(Duration::from_secs(2), 0)
        .threshold("http_req_duration", "p(95)<500")
        .threshold("http_req_failed", "rate<0.05")
        .threshold("errors", "rate<0.05")
        .await
        .unwrap();

    assert!(report.passed(), "{report:#?}");
    assert_eq!(report.exit_code(), EXIT_PASS);
    assert!(report.elapsed >= Duration::from_secs(4));
    assert!(matches!(
        report.metrics[HTTP_REQS],
        MetricSummary::Counter { count, .. } if count > 10
    ));
    assert!(matches!(
        report.metrics[VUS],
        MetricSummary::Gauge { value: 0, max } if max <= 10 && max > 0
    ));
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn failing_checks_fail_the_run() {
    init();
    let base = spawn_mock_service(MockConfig::default()).await;

    let report = browse_missing_product()
        .base_address(&base)
        .stage(Duration::from_secs(2), 3)
        .threshold("errors", "rate<0.1")
        .threshold("http_req_failed", "rate<0.1")
        .threshold("http_req_duration", "p(95)<1000")
        .await
        .unwrap();

    assert!(!report.passed());
    assert_eq!(report.exit_code(), EXIT_THRESHOLDS_FAILED);

    let verdict = report.verdict.per_threshold();
    assert_eq!(verdict["errors: rate<0.1"], false);
    assert_eq!(verdict["http_req_failed: rate<0.1"], false);
    assert_eq!(verdict["http_req_duration: p(95)<1000"], true);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn slow_service_breaches_latency_threshold() {
    init();
    let base = spawn_mock_service(MockConfig {
        max_rps: None,
        delay: Duration::from_millis(150),
    })
    .await;

    let report = browse_catalog()
        .base_address(&base)
        .stage(Duration::from_secs(2), 2)
        .threshold("http_req_duration{route:/api/products}", "p(95)<100")
        .threshold("http_req_duration{route:/health}", "p(95)<100")
        .threshold("transaction_failed", "rate<=0")
        .await
        .unwrap();

    let outcomes: Vec<_> = report
        .verdict
        .thresholds
        .iter()
        .map(|t| (t.metric.as_str(), t.status))
        .collect();
    assert!(outcomes.contains(&("http_req_duration{route:/api/products}", ThresholdStatus::Fail)));
    assert!(outcomes.contains(&("http_req_duration{route:/health}", ThresholdStatus::Pass)));
    assert!(outcomes.contains(&("transaction_failed", ThresholdStatus::Pass)));
    assert!(matches!(
        report.metrics["transaction_duration"],
        MetricSummary::Trend { min, .. } if min >= 150.
    ));
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn abort_on_fail_ends_a_long_run() {
    init();
    let base = spawn_mock_service(MockConfig::default()).await;

    let report = browse_missing_product()
        .base_address(&base)
        .stage(Duration::ZERO, 3)
        .stage(Duration::from_secs(60), 3)
        .threshold(
            "http_req_failed",
            ThresholdConfig::Detailed {
                threshold: "rate<0.5".to_string(),
                abort_on_fail: true,
                delay_abort_eval: Some(Duration::from_secs(1)),
            },
        )
        .await
        .unwrap();

    assert_eq!(
        report.aborted,
        Some(AbortReason::Threshold("http_req_failed: rate<0.5".to_string()))
    );
    assert_eq!(report.exit_code(), EXIT_THRESHOLDS_FAILED);
    assert!(report.elapsed < Duration::from_secs(10));
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn shed_load_is_counted_as_failed_requests() {
    init();
    let base = spawn_mock_service(MockConfig {
        max_rps: NonZeroU32::new(5),
        delay: Duration::ZERO,
    })
    .await;

    let report = browse_catalog()
        .base_address(&base)
        .stage(Duration::from_secs(2), 10)
        .threshold("http_req_failed{route:/api/products}", "rate<0.01")
        .threshold("http_req_failed{route:/health}", "rate<0.01")
        .await
        .unwrap();

    let verdict = report.verdict.per_threshold();
    assert_eq!(verdict["http_req_failed{route:/api/products}: rate<0.01"], false);
    assert_eq!(verdict["http_req_failed{route:/health}: rate<0.01"], true);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn interrupted_run_still_tears_down() {
    init();
    let base = spawn_mock_service(MockConfig::default()).await;
    let torn_down = Arc::new(AtomicBool::new(false));
    let flag = torn_down.clone();

    let run = browse_health()
        .base_address(&base)
        .stage(Duration::from_secs(60), 5)
        .setup(|ctx| async move {
            let res = ctx.http().get("/ready").await;
            anyhow::ensure!(res.status == 200, "target not ready");
            Ok(json!({ "target": ctx.base_url().as_str() }))
        })
        .teardown(move |ctx| {
            let flag = flag.clone();
            async move {
                anyhow::ensure!(ctx.setup_data()["target"].is_string());
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        });

    let handle = run.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.abort();
    });

    let report = run.await.unwrap();
    assert_eq!(report.aborted, Some(AbortReason::External));
    assert_eq!(report.exit_code(), EXIT_EXTERNAL_ABORT);
    assert!(report.elapsed < Duration::from_secs(10));
    assert!(torn_down.load(Ordering::SeqCst));
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn json_profile_drives_the_run() {
    init();
    let base = spawn_mock_service(MockConfig::default()).await;

    let config = RunConfig::from_json(&format!(
        r#"{{
            "baseAddress": "{base}",
            "stages": [
                {{ "duration": "1s", "target": 4 }},
                {{ "duration": "1s", "target": 0 }}
            ],
            "thresholds": {{
                "http_req_duration": ["p(95)<500", "avg<250"],
                "checks{{check:status is 200}}": ["rate>0.99"]
            }}
        }}"#
    ))
    .unwrap();

    let report = browse_health().config(config).await.unwrap();

    assert!(report.passed(), "{report:#?}");
    assert_eq!(report.verdict.thresholds.len(), 3);
    assert!(report.metrics.contains_key(HTTP_REQ_DURATION));

    let summary: Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(summary["name"], "browse_health");
    assert_eq!(summary["verdict"]["overall_pass"], true);
}
