//! Shared types used across tierstack crates.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Egress posture of a subnet group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetKind {
    /// Routed through the internet gateway.
    Public,
    /// Outbound internet through a NAT gateway.
    PrivateWithEgress,
    /// No internet route; reaches managed services via private endpoints.
    Isolated,
}

impl SubnetKind {
    pub fn label(&self) -> &'static str {
        match self {
            SubnetKind::Public => "Public",
            SubnetKind::PrivateWithEgress => "Private",
            SubnetKind::Isolated => "Isolated",
        }
    }
}

/// Which link of the allow-chain a policy or subnet tier serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierRole {
    Edge,
    Compute,
    Data,
}

impl TierRole {
    pub const ALL: [TierRole; 3] = [TierRole::Edge, TierRole::Compute, TierRole::Data];

    /// The role allowed to open connections into this one.
    pub fn upstream(&self) -> Option<TierRole> {
        match self {
            TierRole::Edge => None,
            TierRole::Compute => Some(TierRole::Edge),
            TierRole::Data => Some(TierRole::Compute),
        }
    }
}

impl fmt::Display for TierRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierRole::Edge => f.write_str("edge"),
            TierRole::Compute => f.write_str("compute"),
            TierRole::Data => f.write_str("data"),
        }
    }
}

/// Relational engine provisioned by the data tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Mysql,
    Postgres,
}

impl EngineKind {
    pub fn default_port(&self) -> u16 {
        match self {
            EngineKind::Mysql => 3306,
            EngineKind::Postgres => 5432,
        }
    }

    /// Engine identifier as the platform spells it.
    pub fn engine_name(&self) -> &'static str {
        match self {
            EngineKind::Mysql => "mysql",
            EngineKind::Postgres => "postgres",
        }
    }

    pub fn engine_version(&self) -> &'static str {
        match self {
            EngineKind::Mysql => "8.0",
            EngineKind::Postgres => "15.5",
        }
    }

    /// Engine identifier for the clustered variant.
    pub fn cluster_engine_name(&self) -> &'static str {
        match self {
            EngineKind::Mysql => "aurora-mysql",
            EngineKind::Postgres => "aurora-postgresql",
        }
    }
}

/// CPU architecture of the container runtime platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    #[default]
    Arm64,
    X86_64,
}

impl Architecture {
    pub fn platform_name(&self) -> &'static str {
        match self {
            Architecture::Arm64 => "ARM64",
            Architecture::X86_64 => "X86_64",
        }
    }
}

/// Parse a duration string like "60s", "5m", "1h" or "250ms".
///
/// Bare integers are read as seconds. Returns `None` for anything else.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("60"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("-5s"), None);
    }

    #[test]
    fn upstream_chain() {
        assert_eq!(TierRole::Edge.upstream(), None);
        assert_eq!(TierRole::Compute.upstream(), Some(TierRole::Edge));
        assert_eq!(TierRole::Data.upstream(), Some(TierRole::Compute));
    }

    #[test]
    fn engine_ports() {
        assert_eq!(EngineKind::Mysql.default_port(), 3306);
        assert_eq!(EngineKind::Postgres.default_port(), 5432);
    }
}
