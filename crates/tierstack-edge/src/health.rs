//! Target group health checks.

use std::time::Duration;

use serde_json::{Map, Value};

use tierstack_core::config::{HealthCheckConfig, duration_field};
use tierstack_core::{ComposeError, ComposeResult};

const RESOURCE: &str = "AlbTargetGroup";

/// Probe interval bounds accepted by the load balancer.
const MIN_INTERVAL: Duration = Duration::from_secs(5);
const MAX_INTERVAL: Duration = Duration::from_secs(300);
const MIN_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_TIMEOUT: Duration = Duration::from_secs(120);
const THRESHOLDS: std::ops::RangeInclusive<u32> = 2..=10;

/// A validated HTTP health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// Absolute HTTP path probed on each target.
    pub path: String,
    pub interval: Duration,
    pub timeout: Duration,
    /// Consecutive successes before a target receives traffic.
    pub healthy_threshold: u32,
    /// Consecutive failures before a target is drained.
    pub unhealthy_threshold: u32,
    /// Status codes counted as healthy, e.g. `200` or `200-299`.
    pub healthy_codes: String,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            healthy_threshold: 5,
            unhealthy_threshold: 2,
            healthy_codes: "200".to_string(),
        }
    }
}

impl HealthCheck {
    /// Build from configuration. Omitted values take the defaults above.
    pub fn from_config(config: &HealthCheckConfig) -> ComposeResult<Self> {
        let defaults = Self::default();
        let interval = duration_field(RESOURCE, "health.interval", &config.interval)?;
        let timeout = match &config.timeout {
            Some(t) => duration_field(RESOURCE, "health.timeout", t)?,
            None => defaults.timeout,
        };
        let check = Self {
            path: config.path.clone(),
            interval,
            timeout,
            healthy_threshold: config.healthy_threshold.unwrap_or(defaults.healthy_threshold),
            unhealthy_threshold: config
                .unhealthy_threshold
                .unwrap_or(defaults.unhealthy_threshold),
            healthy_codes: config
                .healthy_codes
                .clone()
                .unwrap_or(defaults.healthy_codes),
        };
        check.validate()?;
        Ok(check)
    }

    pub fn validate(&self) -> ComposeResult<()> {
        if !self.path.starts_with('/') || self.path.chars().any(char::is_whitespace) {
            return Err(ComposeError::configuration(
                RESOURCE,
                "health.path",
                format!("{:?} must be an absolute path without whitespace", self.path),
            ));
        }
        if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&self.interval) {
            return Err(ComposeError::configuration(
                RESOURCE,
                "health.interval",
                format!("{:?} is outside 5s..300s", self.interval),
            ));
        }
        if !(MIN_TIMEOUT..=MAX_TIMEOUT).contains(&self.timeout) {
            return Err(ComposeError::configuration(
                RESOURCE,
                "health.timeout",
                format!("{:?} is outside 2s..120s", self.timeout),
            ));
        }
        if self.timeout >= self.interval {
            return Err(ComposeError::configuration(
                RESOURCE,
                "health.timeout",
                format!(
                    "{:?} must be shorter than the interval {:?}",
                    self.timeout, self.interval
                ),
            ));
        }
        for (parameter, value) in [
            ("health.healthy_threshold", self.healthy_threshold),
            ("health.unhealthy_threshold", self.unhealthy_threshold),
        ] {
            if !THRESHOLDS.contains(&value) {
                return Err(ComposeError::configuration(
                    RESOURCE,
                    parameter,
                    format!("{value} is outside 2..=10"),
                ));
            }
        }
        validate_codes(&self.healthy_codes)
    }

    /// Target group properties for this check.
    pub fn properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("HealthCheckEnabled".into(), Value::Bool(true));
        props.insert("HealthCheckProtocol".into(), "HTTP".into());
        props.insert("HealthCheckPath".into(), self.path.clone().into());
        props.insert(
            "HealthCheckIntervalSeconds".into(),
            self.interval.as_secs().into(),
        );
        props.insert(
            "HealthCheckTimeoutSeconds".into(),
            self.timeout.as_secs().into(),
        );
        props.insert(
            "HealthyThresholdCount".into(),
            self.healthy_threshold.into(),
        );
        props.insert(
            "UnhealthyThresholdCount".into(),
            self.unhealthy_threshold.into(),
        );
        props.insert(
            "Matcher".into(),
            serde_json::json!({ "HttpCode": self.healthy_codes }),
        );
        props
    }
}

/// `200`, `200,302`, or `200-299`; every code within 200..=499.
fn validate_codes(codes: &str) -> ComposeResult<()> {
    let invalid = || {
        ComposeError::configuration(
            RESOURCE,
            "health.healthy_codes",
            format!("{codes:?} is not a list of HTTP codes or ranges within 200-499"),
        )
    };
    let code = |s: &str| -> ComposeResult<u16> {
        s.trim()
            .parse::<u16>()
            .ok()
            .filter(|c| (200..=499).contains(c))
            .ok_or_else(invalid)
    };

    if codes.trim().is_empty() {
        return Err(invalid());
    }
    for part in codes.split(',') {
        match part.split_once('-') {
            Some((low, high)) => {
                if code(low)? > code(high)? {
                    return Err(invalid());
                }
            }
            None => {
                code(part)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierstack_core::config::StackConfig;

    fn config() -> HealthCheckConfig {
        StackConfig::scaffold("demo").edge.health
    }

    #[test]
    fn reference_check() {
        let check = HealthCheck::from_config(&config()).unwrap();
        assert_eq!(check.path, "/health");
        assert_eq!(check.interval, Duration::from_secs(300));
        assert_eq!(check.timeout, Duration::from_secs(5));
        assert_eq!(check.healthy_threshold, 5);
        assert_eq!(check.unhealthy_threshold, 2);

        let props = check.properties();
        assert_eq!(props["HealthCheckIntervalSeconds"], 300);
        assert_eq!(props["Matcher"]["HttpCode"], "200");
    }

    #[test]
    fn omitted_values_use_defaults() {
        let config = HealthCheckConfig {
            path: "/".to_string(),
            interval: "1m".to_string(),
            timeout: None,
            healthy_threshold: None,
            unhealthy_threshold: None,
            healthy_codes: None,
        };
        let check = HealthCheck::from_config(&config).unwrap();
        assert_eq!(check.path, "/");
        assert_eq!(check.timeout, HealthCheck::default().timeout);
    }

    #[test]
    fn relative_path_rejected() {
        let mut config = config();
        config.path = "health".to_string();
        let err = HealthCheck::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("health.path"));
    }

    #[test]
    fn timeout_must_be_shorter_than_interval() {
        let mut config = config();
        config.interval = "10s".to_string();
        config.timeout = Some("10s".to_string());
        let err = HealthCheck::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("shorter"));
    }

    #[test]
    fn interval_bounds() {
        let mut config = config();
        config.interval = "10m".to_string();
        assert!(HealthCheck::from_config(&config).is_err());
        config.interval = "soon".to_string();
        assert!(HealthCheck::from_config(&config).is_err());
    }

    #[test]
    fn threshold_bounds() {
        let mut config = config();
        config.unhealthy_threshold = Some(1);
        assert!(HealthCheck::from_config(&config).is_err());
    }

    #[test]
    fn code_matchers() {
        assert!(validate_codes("200").is_ok());
        assert!(validate_codes("200,302").is_ok());
        assert!(validate_codes("200-299").is_ok());
        assert!(validate_codes("299-200").is_err());
        assert!(validate_codes("500").is_err());
        assert!(validate_codes("ok").is_err());
        assert!(validate_codes("").is_err());
    }
}
