use crate::config::RunConfig;
use crate::constants::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_TICK, MAX_RUN_DURATION};
use crate::error::ConfigError;
use crate::metric::PercentileMethod;
use crate::stage::Schedule;
use crate::threshold::Threshold;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::time::Duration;
use url::Url;

/// A validated, immutable description of a run.
///
/// Built once from a [`RunConfig`] before any virtual user starts; every configuration error is
/// reported here.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub name: String,
    pub schedule: Schedule,
    pub thresholds: Vec<Threshold>,
    pub base_url: Url,
    pub tick: Duration,
    pub graceful_stop: Option<Duration>,
    pub request_timeout: Duration,
    pub rps: Option<NonZeroU32>,
    pub percentile: PercentileMethod,
    pub env: BTreeMap<String, String>,
}

impl RunPlan {
    pub fn from_config(name: &str, config: &RunConfig) -> Result<Self, ConfigError> {
        if config.stages.is_empty() {
            return Err(ConfigError::NoStages);
        }

        let tick = config.tick.unwrap_or(DEFAULT_TICK);
        if tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }
        if tick > MAX_RUN_DURATION {
            return Err(ConfigError::DurationOverflow {
                what: "Control tick",
                limit: MAX_RUN_DURATION,
            });
        }

        config
            .stages
            .iter()
            .try_fold(Duration::ZERO, |total, stage| total.checked_add(stage.duration))
            .filter(|total| *total <= MAX_RUN_DURATION)
            .ok_or(ConfigError::DurationOverflow {
                what: "Total stage duration",
                limit: MAX_RUN_DURATION,
            })?;

        let address = config.base_address();
        let base_url = Url::parse(address).map_err(|source| ConfigError::InvalidBaseAddress {
            address: address.to_string(),
            source,
        })?;

        let thresholds = config
            .thresholds
            .iter()
            .flat_map(|(metric, entries)| {
                entries
                    .iter()
                    .map(move |entry| Threshold::from_config(metric, entry))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.to_string(),
            schedule: Schedule::with_start(config.stages.clone(), config.start_vus),
            thresholds,
            base_url,
            tick,
            graceful_stop: config.graceful_stop,
            request_timeout: config.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            rps: config.rps,
            percentile: config.percentile,
            env: config.env.clone(),
        })
    }

    /// Thresholds that may stop the run before the schedule completes.
    pub fn abort_thresholds(&self) -> impl Iterator<Item = &Threshold> {
        self.thresholds.iter().filter(|t| t.abort_on_fail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_plan_from_config() {
        let config = RunConfig::from_json(
            r#"{
                "stages": [{ "duration": "2s", "target": 10 }, { "duration": "2s", "target": 0 }],
                "thresholds": {
                    "http_req_duration": ["p(95)<500"],
                    "http_req_failed": ["rate<0.05"]
                }
            }"#,
        )
        .unwrap();

        let plan = RunPlan::from_config("smoke", &config).unwrap();
        assert_eq!(plan.schedule.total_duration(), Duration::from_secs(4));
        assert_eq!(plan.thresholds.len(), 2);
        assert_eq!(plan.base_url.as_str(), "http://localhost:3000/");
        assert_eq!(plan.tick, DEFAULT_TICK);
        assert_eq!(plan.abort_thresholds().count(), 0);
    }

    #[test]
    fn empty_stage_list_is_fatal() {
        let err = RunPlan::from_config("empty", &RunConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::NoStages));
    }

    #[test]
    fn malformed_threshold_is_fatal() {
        let config = RunConfig::from_json(
            r#"{
                "stages": [{ "duration": "1s", "target": 1 }],
                "thresholds": { "http_req_duration": ["p95<500"] }
            }"#,
        )
        .unwrap();
        let err = RunPlan::from_config("bad", &config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { .. }));
    }

    #[test]
    fn malformed_base_address_is_fatal() {
        let config = RunConfig::from_json(
            r#"{ "stages": [{ "duration": "1s", "target": 1 }], "baseAddress": "not a url" }"#,
        )
        .unwrap();
        let err = RunPlan::from_config("bad", &config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBaseAddress { .. }));
    }

    #[test]
    fn oversized_durations_are_fatal() {
        let config = RunConfig::from_json(
            r#"{ "stages": [
                { "duration": 18446744073709551615, "target": 1 },
                { "duration": 10, "target": 1 }
            ] }"#,
        )
        .unwrap();
        assert!(matches!(
            RunPlan::from_config("huge", &config),
            Err(ConfigError::DurationOverflow { .. })
        ));

        let config = RunConfig::from_json(
            r#"{ "stages": [{ "duration": "400days", "target": 1 }] }"#,
        )
        .unwrap();
        assert!(matches!(
            RunPlan::from_config("long", &config),
            Err(ConfigError::DurationOverflow { .. })
        ));

        let config = RunConfig::from_json(
            r#"{ "stages": [{ "duration": "1s", "target": 1 }], "tick": 18446744073709551615 }"#,
        )
        .unwrap();
        let err = RunPlan::from_config("tick", &config).unwrap_err();
        assert!(err.to_string().starts_with("Control tick exceeds the maximum"));
    }

    #[test]
    fn zero_tick_is_fatal() {
        let config = RunConfig::from_json(
            r#"{ "stages": [{ "duration": "1s", "target": 1 }], "tick": 0 }"#,
        )
        .unwrap();
        assert!(matches!(
            RunPlan::from_config("bad", &config),
            Err(ConfigError::ZeroTick)
        ));
    }
}
