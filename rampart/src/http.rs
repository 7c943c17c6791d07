//! Black-box request boundary to the system under test.
//!
//! Every request is timed and recorded into the built-in `http_*` metrics. Transport failures
//! (connection refused, timeouts, unreadable bodies) never surface as errors: they come back as a
//! [`Response`] with status `0` and an `error` message, so checks run against them like any other
//! response and the run carries on. Such a failure also records a failed
//! `checks{check="request completed"}` observation and marks the current iteration failed.
use crate::aggregator::Aggregator;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use crate::executor::flag_request_failure;
use rampart_core::{
    labels, Labels, CHECKS, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQ_RECEIVING,
    HTTP_REQ_WAITING, LABEL_CHECK, LABEL_METHOD, LABEL_ROUTE, LABEL_STATUS, REQUEST_CHECK,
};
use reqwest::header::HeaderMap;
pub use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
#[allow(unused_imports)]
use tracing::{debug, error, trace, warn};
use url::Url;

/// Timing breakdown of one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timings {
    /// Start of the request until the body was fully read.
    pub duration: Duration,
    /// Start of the request until response headers arrived.
    pub waiting: Duration,
    /// Time spent reading the body.
    pub receiving: Duration,
}

#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status, `0` if no response was received.
    pub status: u16,
    pub body: String,
    pub headers: HeaderMap,
    pub timings: Timings,
    pub url: String,
    /// Transport error, if the exchange did not complete.
    pub error: Option<String>,
}

impl Response {
    fn transport_failure(url: String, error: String, timings: Timings) -> Self {
        Self {
            status: 0,
            body: String::new(),
            headers: HeaderMap::new(),
            timings,
            url,
            error: Some(error),
        }
    }

    /// A request counts as failed on a transport error or a status outside 200-399.
    pub fn failed(&self) -> bool {
        self.error.is_some() || !(200..400).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }

    /// Total duration in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        millis(self.timings.duration)
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.
}

/// HTTP client bound to the run's base address and metric store.
///
/// Relative paths resolve against the base address; absolute URLs are used as given.
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: Url,
    aggregator: Arc<Aggregator>,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl HttpClient {
    pub fn new(
        base_url: Url,
        aggregator: Arc<Aggregator>,
        timeout: Duration,
        rps: Option<NonZeroU32>,
    ) -> Result<Self, reqwest::Error> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner,
            base_url,
            aggregator,
            limiter: rps.map(|rps| Arc::new(rate_limiter(rps))),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        match Url::parse(path) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self.base_url.join(path),
            Err(err) => Err(err),
        }
    }

    pub async fn get(&self, path: &str) -> Response {
        self.request(Method::GET, path).send().await
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder<'_> {
        let (inner, route) = match self.resolve(path) {
            Ok(url) => {
                let route = url.path().to_string();
                (Ok(self.inner.request(method.clone(), url)), route)
            }
            Err(err) => (Err(format!("invalid url `{path}`: {err}")), path.to_string()),
        };

        RequestBuilder {
            client: self,
            method,
            route,
            url: path.to_string(),
            inner,
        }
    }

    fn record(&self, method: &Method, route: &str, response: &Response) {
        let labels = Labels::new()
            .with(LABEL_METHOD, method.as_str())
            .with(LABEL_ROUTE, route)
            .with(LABEL_STATUS, response.status.to_string());

        let agg = &self.aggregator;
        agg.record_counter(HTTP_REQS, &labels, 1);
        agg.record_trend(HTTP_REQ_DURATION, &labels, millis(response.timings.duration));
        agg.record_trend(HTTP_REQ_WAITING, &labels, millis(response.timings.waiting));
        agg.record_trend(HTTP_REQ_RECEIVING, &labels, millis(response.timings.receiving));
        agg.record_rate(HTTP_REQ_FAILED, &labels, response.failed());
    }
}

/// A request under construction. Nothing is sent until [`RequestBuilder::send`].
pub struct RequestBuilder<'a> {
    client: &'a HttpClient,
    method: Method,
    route: String,
    url: String,
    inner: Result<reqwest::RequestBuilder, String>,
}

impl<'a> RequestBuilder<'a> {
    fn map(mut self, f: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder) -> Self {
        self.inner = self.inner.map(f);
        self
    }

    /// Name the request in the `route` label instead of the URL path.
    pub fn name(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    pub fn header(self, key: &str, value: &str) -> Self {
        let (key, value) = (key.to_string(), value.to_string());
        self.map(|b| b.header(key, value))
    }

    pub fn query<T: Serialize + ?Sized>(self, query: &T) -> Self {
        self.map(|b| b.query(query))
    }

    pub fn body(self, body: impl Into<reqwest::Body>) -> Self {
        self.map(|b| b.body(body))
    }

    pub fn json<T: Serialize + ?Sized>(self, json: &T) -> Self {
        self.map(|b| b.json(json))
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.map(|b| b.timeout(timeout))
    }

    pub async fn send(self) -> Response {
        let RequestBuilder {
            client,
            method,
            route,
            url,
            inner,
        } = self;

        let response = match inner {
            Ok(request) => {
                if let Some(limiter) = &client.limiter {
                    limiter.until_ready().await;
                }
                exchange(request, url).await
            }
            Err(err) => Response::transport_failure(url, err, Timings::default()),
        };

        if let Some(err) = &response.error {
            debug!("{method} {} failed: {err}", response.url);
            let check = labels! { LABEL_CHECK => REQUEST_CHECK };
            client.aggregator.record_rate(CHECKS, &check, false);
            flag_request_failure();
        }

        client.record(&method, &route, &response);
        response
    }
}

async fn exchange(request: reqwest::RequestBuilder, url: String) -> Response {
    let start = Instant::now();

    let res = match request.send().await {
        Ok(res) => res,
        Err(err) => {
            let elapsed = start.elapsed();
            let timings = Timings {
                duration: elapsed,
                waiting: elapsed,
                receiving: Duration::ZERO,
            };
            return Response::transport_failure(url, err.to_string(), timings);
        }
    };

    let waiting = start.elapsed();
    let status = res.status().as_u16();
    let headers = res.headers().clone();
    let url = res.url().to_string();
    let body = res.text().await;
    let duration = start.elapsed();

    let timings = Timings {
        duration,
        waiting,
        receiving: duration - waiting,
    };

    match body {
        Ok(body) => Response {
            status,
            body,
            headers,
            timings,
            url,
            error: None,
        },
        Err(err) => Response {
            status,
            body: String::new(),
            headers,
            timings,
            url,
            error: Some(format!("failed reading body: {err}")),
        },
    }
}

fn rate_limiter(rps: NonZeroU32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(rps).allow_burst(NonZeroU32::MIN))
}
