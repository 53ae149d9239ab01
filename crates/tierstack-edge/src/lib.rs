//! tierstack-edge — the public entry point of a deployment.
//!
//! An internet-facing application load balancer in the edge tier's public
//! subnets. Its listener forwards to one health-checked target group, and
//! workloads join that group through [`Listener::add_targets`].
//!
//! ```text
//! client ─▶ listener :80 ─▶ target group (ip, /health) ─▶ compute tasks
//! ```

pub mod balancer;
pub mod health;

pub use balancer::{EdgeLoadBalancer, EdgeOptions, Endpoint, Listener, LoadBalancerTarget, TargetBinding};
pub use health::HealthCheck;
