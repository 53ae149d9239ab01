//! Step scaler: the controller a [`ScalingPolicy`] configures.

use serde::Serialize;
use tracing::debug;

use crate::policy::ScalingPolicy;

/// A scaling decision for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "count", rename_all = "snake_case")]
pub enum ScaleDecision {
    /// Scale to the specified task count.
    ScaleTo(u32),
    /// No change needed.
    NoChange,
}

/// Evaluates CPU samples against a policy, honouring the cooldown.
#[derive(Debug, Clone)]
pub struct StepScaler {
    policy: ScalingPolicy,
    /// Time of the last action, in seconds since the start of the run.
    last_action: Option<u64>,
}

impl StepScaler {
    pub fn new(policy: ScalingPolicy) -> Self {
        Self {
            policy,
            last_action: None,
        }
    }

    pub fn policy(&self) -> &ScalingPolicy {
        &self.policy
    }

    /// Decide what to do with `current` tasks at average `cpu` percent.
    pub fn evaluate(&mut self, now_secs: u64, cpu: f64, current: u32) -> ScaleDecision {
        let policy = &self.policy;
        if let Some(last) = self.last_action
            && now_secs.saturating_sub(last) < policy.cooldown.as_secs()
        {
            return ScaleDecision::NoChange;
        }

        let target = if cpu >= policy.scale_out_cpu && current < policy.max {
            current.saturating_add(policy.step).min(policy.max)
        } else if cpu <= policy.scale_in_cpu && current > policy.min {
            current.saturating_sub(policy.step).max(policy.min)
        } else {
            return ScaleDecision::NoChange;
        };

        debug!(from = current, to = target, cpu, at = now_secs, "scaling");
        self.last_action = Some(now_secs);
        ScaleDecision::ScaleTo(target)
    }
}

/// One sample of a simulated run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationStep {
    pub at_secs: u64,
    pub cpu: f64,
    pub decision: ScaleDecision,
    /// Task count after the decision.
    pub desired: u32,
}

/// Run `policy` over a CPU trace sampled once per period.
pub fn simulate(policy: &ScalingPolicy, initial: u32, trace: &[f64]) -> Vec<SimulationStep> {
    let mut scaler = StepScaler::new(policy.clone());
    let period = policy.period.as_secs();
    let mut desired = initial;

    trace
        .iter()
        .enumerate()
        .map(|(i, &cpu)| {
            let at_secs = i as u64 * period;
            let decision = scaler.evaluate(at_secs, cpu, desired);
            if let ScaleDecision::ScaleTo(n) = decision {
                desired = n;
            }
            SimulationStep {
                at_secs,
                cpu,
                decision,
                desired,
            }
        })
        .collect()
}
