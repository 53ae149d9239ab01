//! tierstack-autoscale — step scaling on average CPU utilization.
//!
//! [`ScalingPolicy`] is the validated policy the compute tier attaches to
//! its service. [`StepScaler`] models the platform's controller so a policy
//! can be checked against a CPU trace before it is deployed.
//!
//! # Scaling Algorithm
//!
//! ```text
//! every period:
//!     if now - last_action < cooldown:        NoChange
//!     if cpu >= scale_out and count < max:    ScaleTo(min(count + step, max))
//!     if cpu <= scale_in  and count > min:    ScaleTo(max(count - step, min))
//!     otherwise:                              NoChange
//! ```
//!
//! A single cooldown window covers both directions, so no two actions are
//! closer than `cooldown`.

pub mod policy;
pub mod scaler;

pub use policy::ScalingPolicy;
pub use scaler::{ScaleDecision, SimulationStep, StepScaler, simulate};
