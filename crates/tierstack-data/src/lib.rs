//! tierstack-data — the managed relational database of a deployment.
//!
//! The data tier lives in isolated subnets behind the data policy. The
//! platform generates the admin password into a secret; the composer only
//! ever handles references to it.
//!
//! # Topologies
//!
//! ```text
//! single           primary
//! primary_replica  primary ──replicates──▶ read replica (second zone)
//! cluster          cluster ─┬─ instance 1
//!                           └─ instance n
//! ```

pub mod database;
pub mod options;

pub use database::Database;
pub use options::{DatabaseOptions, Topology};
