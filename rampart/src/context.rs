//! Per-iteration handle passed to scenarios and lifecycle hooks.
use crate::aggregator::Aggregator;
use crate::check::Checks;
use crate::http::HttpClient;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// State shared by every virtual user of a run.
#[derive(Clone)]
pub(crate) struct RunShared {
    pub http: HttpClient,
    pub aggregator: Arc<Aggregator>,
    pub env: BTreeMap<String, String>,
    pub setup_data: Arc<Value>,
}

/// What a scenario iteration gets to work with.
///
/// Cheap to clone. Setup and teardown hooks receive a context with VU id `0`.
#[derive(Clone)]
pub struct VuContext {
    vu: u64,
    iteration: u64,
    shared: Arc<RunShared>,
}

impl VuContext {
    pub(crate) fn new(vu: u64, shared: Arc<RunShared>) -> Self {
        Self {
            vu,
            iteration: 0,
            shared,
        }
    }

    pub(crate) fn for_iteration(&self, iteration: u64) -> Self {
        Self {
            iteration,
            ..self.clone()
        }
    }

    /// 1-based id of the virtual user running this iteration.
    pub fn vu(&self) -> u64 {
        self.vu
    }

    /// 0-based iteration count of this virtual user.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn base_url(&self) -> &Url {
        self.shared.http.base_url()
    }

    pub fn http(&self) -> &HttpClient {
        &self.shared.http
    }

    pub fn metrics(&self) -> &Aggregator {
        &self.shared.aggregator
    }

    /// Data returned by the setup hook, `Null` without one.
    pub fn setup_data(&self) -> &Value {
        &self.shared.setup_data
    }

    /// Run configuration `env` first, then the process environment.
    pub fn env(&self, key: &str) -> Option<String> {
        self.shared
            .env
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }

    pub fn check<'a, T>(&'a self, subject: &'a T) -> Checks<'a, T> {
        Checks::new(&self.shared.aggregator, subject)
    }

    /// Think time between requests.
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
