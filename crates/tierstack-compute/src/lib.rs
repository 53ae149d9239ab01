//! tierstack-compute — the containerized workload of a deployment.
//!
//! # Components
//!
//! - **`image`**: a container image addressed by registry repository and tag
//! - **`shape`**: Fargate CPU / memory / architecture combinations
//! - **`injection`**: database parameters as secret-backed container variables
//! - **`service`**: cluster, task definition, service, and its scaling policy
//!
//! The service is declared lazily: registering it behind the edge listener
//! (or deploying it explicitly) is what emits the service resource, so the
//! load balancer attachment is part of its first declaration.

pub mod image;
pub mod injection;
pub mod service;
pub mod shape;

pub use image::ImageRef;
pub use injection::{ContainerSecrets, SecretInjection};
pub use service::{ComputeService, LogSettings, ScalingAttachment, ServiceOptions};
pub use shape::TaskShape;
