//! tierstack-network — the address space and the traffic allow-chain.
//!
//! # Components
//!
//! - **`vpc`**: carves the deployment CIDR into named subnet groups per
//!   availability zone, with internet/NAT routing per tier kind
//! - **`endpoint`**: private connectivity to registry, logs, secrets and
//!   object storage for tiers without internet egress
//! - **`policy`**: edge → compute → data security policies
//!
//! ```text
//! internet ──80/443──▶ edge ──app port──▶ compute ──db port──▶ data
//! ```

pub mod endpoint;
pub mod policy;
pub mod vpc;

pub use endpoint::{EndpointKind, EndpointService, PrivateEndpoint};
pub use policy::{AccessPolicies, AccessPolicy, IngressRule, PeerSource, PolicyPorts};
pub use vpc::{AddressSpace, Egress, Subnet, SubnetGroup, SubnetSelection};
