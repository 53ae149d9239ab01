//! Validated step scaling policy.

use std::time::Duration;

use tierstack_core::config::{ScalingConfig, duration_field};
use tierstack_core::{ComposeError, ComposeResult};

const RESOURCE: &str = "EcsScaling";

const DEFAULT_PERIOD: Duration = Duration::from_secs(60);
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Step scaling on average CPU utilization.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingPolicy {
    pub min: u32,
    pub max: u32,
    /// Add `step` tasks at or above this CPU percentage.
    pub scale_out_cpu: f64,
    /// Remove `step` tasks at or below this CPU percentage.
    pub scale_in_cpu: f64,
    pub step: u32,
    /// Metric sampling period.
    pub period: Duration,
    /// Minimum time between two scaling actions.
    pub cooldown: Duration,
}

impl ScalingPolicy {
    pub fn from_config(config: &ScalingConfig) -> ComposeResult<Self> {
        let period = match &config.period {
            Some(p) => duration_field(RESOURCE, "scaling.period", p)?,
            None => DEFAULT_PERIOD,
        };
        let cooldown = match &config.cooldown {
            Some(c) => duration_field(RESOURCE, "scaling.cooldown", c)?,
            None => DEFAULT_COOLDOWN,
        };
        let policy = Self {
            min: config.min,
            max: config.max,
            scale_out_cpu: config.scale_out_cpu,
            scale_in_cpu: config.scale_in_cpu,
            step: 1,
            period,
            cooldown,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> ComposeResult<()> {
        if self.max == 0 {
            return Err(ComposeError::configuration(RESOURCE, "scaling.max", "must be at least 1"));
        }
        if self.min > self.max {
            return Err(ComposeError::configuration(
                RESOURCE,
                "scaling.min",
                format!("min {} exceeds max {}", self.min, self.max),
            ));
        }
        for (parameter, value) in [
            ("scaling.scale_out_cpu", self.scale_out_cpu),
            ("scaling.scale_in_cpu", self.scale_in_cpu),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(ComposeError::configuration(
                    RESOURCE,
                    parameter,
                    format!("{value} is not a CPU percentage in (0, 100]"),
                ));
            }
        }
        if self.scale_in_cpu >= self.scale_out_cpu {
            return Err(ComposeError::configuration(
                RESOURCE,
                "scaling.scale_in_cpu",
                format!(
                    "thresholds overlap: scale-in at {}% must be below scale-out at {}%",
                    self.scale_in_cpu, self.scale_out_cpu
                ),
            ));
        }
        if self.step == 0 {
            return Err(ComposeError::configuration(RESOURCE, "scaling.step", "must be at least 1"));
        }
        // Metric periods are 10s, 30s or whole minutes.
        let secs = self.period.as_secs();
        if self.period.subsec_nanos() != 0 || !(secs == 10 || secs == 30 || (secs > 0 && secs % 60 == 0)) {
            return Err(ComposeError::configuration(
                RESOURCE,
                "scaling.period",
                format!("{:?} must be 10s, 30s or a multiple of 60s", self.period),
            ));
        }
        Ok(())
    }

    /// Reject a desired count outside `[min, max]`.
    pub fn check_desired(&self, desired: u32) -> ComposeResult<()> {
        if (self.min..=self.max).contains(&desired) {
            Ok(())
        } else {
            Err(ComposeError::configuration(
                RESOURCE,
                "desired_count",
                format!("{desired} lies outside [{}, {}]", self.min, self.max),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierstack_core::ErrorKind;
    use tierstack_core::config::StackConfig;

    fn config() -> ScalingConfig {
        StackConfig::scaffold("demo").compute.scaling.unwrap()
    }

    #[test]
    fn reference_policy() {
        let policy = ScalingPolicy::from_config(&config()).unwrap();
        assert_eq!((policy.min, policy.max), (2, 6));
        assert_eq!(policy.scale_out_cpu, 70.0);
        assert_eq!(policy.scale_in_cpu, 30.0);
        assert_eq!(policy.period, Duration::from_secs(60));
        assert_eq!(policy.cooldown, Duration::from_secs(60));
        assert_eq!(policy.step, 1);
    }

    #[test]
    fn min_above_max_rejected() {
        let mut config = config();
        config.min = 7;
        let err = ScalingPolicy::from_config(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn overlapping_thresholds_rejected() {
        let mut config = config();
        config.scale_in_cpu = 70.0;
        let err = ScalingPolicy::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn thresholds_are_percentages() {
        let mut config = config();
        config.scale_out_cpu = 170.0;
        assert!(ScalingPolicy::from_config(&config).is_err());
        config.scale_out_cpu = f64::NAN;
        assert!(ScalingPolicy::from_config(&config).is_err());
    }

    #[test]
    fn period_granularity() {
        let mut config = config();
        config.period = Some("45s".to_string());
        assert!(ScalingPolicy::from_config(&config).is_err());
        config.period = Some("2m".to_string());
        assert!(ScalingPolicy::from_config(&config).is_ok());
    }

    #[test]
    fn desired_must_lie_within_bounds() {
        let policy = ScalingPolicy::from_config(&config()).unwrap();
        assert!(policy.check_desired(2).is_ok());
        assert!(policy.check_desired(6).is_ok());
        assert!(policy.check_desired(1).is_err());
        assert!(policy.check_desired(7).is_err());
    }
}
