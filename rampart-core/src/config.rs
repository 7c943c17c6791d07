use crate::constants::{BASE_ADDRESS_ENV, DEFAULT_BASE_ADDRESS};
use crate::error::ConfigError;
use crate::metric::PercentileMethod;
use crate::stage::Stage;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{serde_as, DeserializeAs, SerializeAs};
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

/// Declarative description of a run, shaped like a load-test `options` object.
///
/// ```
/// use rampart_core::RunConfig;
///
/// let config = RunConfig::from_json(r#"{
///     "stages": [{ "duration": "2m", "target": 50 }, { "duration": "30s", "target": 0 }],
///     "thresholds": { "http_req_duration": ["p(95)<500"] }
/// }"#).unwrap();
/// assert_eq!(config.stages.len(), 2);
/// ```
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub stages: Vec<Stage>,
    /// Concurrency the first stage ramps from.
    #[serde(default, rename = "startVUs")]
    pub start_vus: usize,
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<ThresholdConfig>>,
    #[serde(default)]
    pub base_address: Option<String>,
    #[serde_as(as = "Option<HumanDuration>")]
    #[serde(default)]
    pub tick: Option<Duration>,
    /// Upper bound on the final drain. Unset waits for every in-flight iteration.
    #[serde_as(as = "Option<HumanDuration>")]
    #[serde(default)]
    pub graceful_stop: Option<Duration>,
    #[serde_as(as = "Option<HumanDuration>")]
    #[serde(default)]
    pub request_timeout: Option<Duration>,
    /// Global cap on requests per second across every virtual user.
    #[serde(default)]
    pub rps: Option<NonZeroU32>,
    #[serde(default)]
    pub percentile: PercentileMethod,
    /// Free-form variables exposed to scenarios.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A threshold entry: either a bare expression or an expression with abort options.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdConfig {
    Expression(String),
    Detailed {
        threshold: String,
        #[serde(default, rename = "abortOnFail")]
        abort_on_fail: bool,
        #[serde_as(as = "Option<HumanDuration>")]
        #[serde(default, rename = "delayAbortEval")]
        delay_abort_eval: Option<Duration>,
    },
}

impl ThresholdConfig {
    pub fn expression(&self) -> &str {
        match self {
            ThresholdConfig::Expression(expr) => expr,
            ThresholdConfig::Detailed { threshold, .. } => threshold,
        }
    }
}

impl From<&str> for ThresholdConfig {
    fn from(expr: &str) -> Self {
        ThresholdConfig::Expression(expr.to_string())
    }
}

impl RunConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Apply the `BASE_URL` environment override, if set.
    pub fn with_env_overrides(self) -> Self {
        self.with_base_address_override(std::env::var(BASE_ADDRESS_ENV).ok())
    }

    pub fn with_base_address_override(mut self, address: Option<String>) -> Self {
        if let Some(address) = address.filter(|a| !a.trim().is_empty()) {
            tracing::debug!("Overriding base address with {address}");
            self.base_address = Some(address);
        }
        self
    }

    pub fn base_address(&self) -> &str {
        self.base_address.as_deref().unwrap_or(DEFAULT_BASE_ADDRESS)
    }

    /// Layer `other` on top of `self`: every field `other` sets wins, maps are merged.
    pub fn merge(mut self, other: RunConfig) -> Self {
        if !other.stages.is_empty() {
            self.stages = other.stages;
            self.start_vus = other.start_vus;
        }
        self.thresholds.extend(other.thresholds);
        self.env.extend(other.env);
        self.base_address = other.base_address.or(self.base_address);
        self.tick = other.tick.or(self.tick);
        self.graceful_stop = other.graceful_stop.or(self.graceful_stop);
        self.request_timeout = other.request_timeout.or(self.request_timeout);
        self.rps = other.rps.or(self.rps);
        if other.percentile != PercentileMethod::default() {
            self.percentile = other.percentile;
        }
        self
    }
}

/// `serde_with` adapter reading durations as humantime strings (`"2m"`, `"500ms"`) or as a
/// number of seconds, and writing them back as humantime strings.
pub struct HumanDuration;

impl SerializeAs<Duration> for HumanDuration {
    fn serialize_as<S>(source: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*source))
    }
}

impl<'de> DeserializeAs<'de, Duration> for HumanDuration {
    fn deserialize_as<D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(HumanDurationVisitor)
    }
}

struct HumanDurationVisitor;

impl<'de> de::Visitor<'de> for HumanDurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a duration such as \"30s\" or a number of seconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
        humantime::parse_duration(v.trim())
            .map_err(|err| E::custom(format!("invalid duration `{v}`: {err}")))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
        Ok(Duration::from_secs(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
        u64::try_from(v)
            .map(Duration::from_secs)
            .map_err(|_| E::custom(format!("negative duration `{v}`")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
        Duration::try_from_secs_f64(v)
            .map_err(|err| E::custom(format!("invalid duration `{v}`: {err}")))
    }
}
