use std::time::Duration;

/// Target used when neither the configuration nor `BASE_URL` names one.
pub const DEFAULT_BASE_ADDRESS: &str = "http://localhost:3000";

/// Environment variable overriding the configured base address.
pub const BASE_ADDRESS_ENV: &str = "BASE_URL";

/// Interval of the scheduler's control tick.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest schedule, and longest control tick, a run accepts.
pub const MAX_RUN_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/* Built-in metric names */

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_WAITING: &str = "http_req_waiting";
pub const HTTP_REQ_RECEIVING: &str = "http_req_receiving";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const CHECKS: &str = "checks";
pub const ITERATIONS: &str = "iterations";
pub const ITERATIONS_FAILED: &str = "iterations_failed";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const VUS: &str = "vus";
pub const TRANSACTION_DURATION: &str = "transaction_duration";
pub const TRANSACTION_FAILED: &str = "transaction_failed";

/* Built-in label keys */

pub const LABEL_METHOD: &str = "method";
pub const LABEL_ROUTE: &str = "route";
pub const LABEL_STATUS: &str = "status";
pub const LABEL_CHECK: &str = "check";
pub const LABEL_TRANSACTION: &str = "transaction";

/// Check name recorded when a scenario iteration returns an error or panics.
pub const ITERATION_CHECK: &str = "iteration completed";

/// Check name recorded when a request gets no response at all.
pub const REQUEST_CHECK: &str = "request completed";

/* Process exit codes */

pub const EXIT_PASS: u8 = 0;
pub const EXIT_THRESHOLDS_FAILED: u8 = 99;
pub const EXIT_INVALID_CONFIG: u8 = 104;
pub const EXIT_EXTERNAL_ABORT: u8 = 105;
pub const EXIT_SETUP_FAILED: u8 = 107;
