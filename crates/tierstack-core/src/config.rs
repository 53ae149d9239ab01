//! stack.toml configuration parser.
//!
//! The composer consumes one flat [`StackConfig`]. Values come from
//! `stack.toml`, then `TIERSTACK_*` environment variables override the
//! deployment target and image tag. Security-relevant values are never
//! defaulted to empty strings: [`StackConfig::require_target`] fails fast.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ComposeError, ComposeResult};
use crate::naming::snake_identifier_from;
use crate::types::{Architecture, EngineKind, SubnetKind, parse_duration};

pub const ENV_ACCOUNT: &str = "TIERSTACK_ACCOUNT";
pub const ENV_REGION: &str = "TIERSTACK_REGION";
pub const ENV_IMAGE_TAG: &str = "TIERSTACK_IMAGE_TAG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    pub stack: StackSection,
    pub network: NetworkConfig,
    pub edge: EdgeConfig,
    pub database: DatabaseConfig,
    pub compute: ComputeConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackSection {
    /// Prefix for every physical resource name.
    pub name: String,
    pub description: Option<String>,
    pub account: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub cidr: String,
    pub availability_zones: Vec<String>,
    #[serde(default)]
    pub nat_gateways: u32,
    pub subnets: Vec<SubnetGroupConfig>,
    pub tiers: TierMapping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetGroupConfig {
    pub name: String,
    pub kind: SubnetKind,
    pub mask: u8,
    /// Restrict the group to a subset of the deployment's zones.
    pub availability_zones: Option<Vec<String>>,
}

/// Which subnet group each tier is placed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierMapping {
    pub edge: String,
    pub compute: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub listener_port: Option<u16>,
    /// Public ports admitted by the edge policy.
    pub service_ports: Option<Vec<u16>>,
    pub health: HealthCheckConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// HTTP path to probe (e.g., "/health").
    pub path: String,
    /// Check interval (e.g., "60s").
    pub interval: String,
    /// Timeout per check (e.g., "5s").
    pub timeout: Option<String>,
    pub healthy_threshold: Option<u32>,
    /// Consecutive failures before a target is drained.
    pub unhealthy_threshold: Option<u32>,
    /// Status codes counted as healthy (e.g., "200" or "200-299").
    pub healthy_codes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub engine: EngineKind,
    pub name: String,
    pub username: String,
    /// Required prefix for the database name (e.g., "cdk_training_").
    pub name_prefix: Option<String>,
    pub instance_class: Option<String>,
    pub availability_zone: Option<String>,
    pub allocated_storage_gib: Option<u32>,
    #[serde(default)]
    pub topology: TopologyConfig,
    /// Secret name for the generated credentials.
    pub secret_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyConfig {
    #[default]
    Single,
    PrimaryReplica {
        replica_availability_zone: String,
    },
    Cluster {
        instances: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeConfig {
    pub repository: String,
    pub image_tag: Option<String>,
    pub container_port: Option<u16>,
    pub cpu: u32,
    pub memory_mib: u32,
    #[serde(default)]
    pub architecture: Architecture,
    pub desired_count: u32,
    pub secrets: Option<SecretInjectionConfig>,
    pub logging: Option<LoggingConfig>,
    pub scaling: Option<ScalingConfig>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// How database parameters reach the container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SecretInjectionConfig {
    /// One secret-backed variable per credential field.
    Discrete,
    /// A single composed URL in one variable.
    ConnectionString {
        variable: Option<String>,
        /// Read the URL from an imported secret instead of composing it.
        secret: Option<String>,
        field: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub stream_prefix: String,
    pub retention_days: u32,
}

/// Step scaling on average CPU utilization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingConfig {
    pub min: u32,
    pub max: u32,
    /// Scale out by one task at or above this CPU percentage.
    pub scale_out_cpu: f64,
    /// Scale in by one task at or below this CPU percentage.
    pub scale_in_cpu: f64,
    /// Metric sampling period (e.g., "60s").
    pub period: Option<String>,
    /// Minimum time between scaling actions (e.g., "60s").
    pub cooldown: Option<String>,
}

/// Externally managed secrets the stack may read from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub imported: Vec<ImportedSecretConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedSecretConfig {
    pub name: String,
    pub arn: Option<String>,
    pub fields: Vec<String>,
}

impl StackConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StackConfig = toml::from_str(&content)?;
        debug!(?path, name = %config.stack.name, "stack config loaded");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `TIERSTACK_*` overrides from the process environment.
    pub fn apply_process_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(account) = get(ENV_ACCOUNT) {
            self.stack.account = Some(account);
        }
        if let Some(region) = get(ENV_REGION) {
            self.stack.region = Some(region);
        }
        if let Some(tag) = get(ENV_IMAGE_TAG) {
            self.compute.image_tag = Some(tag);
        }
    }

    /// The deployment target. Fails when account or region is unset.
    pub fn require_target(&self) -> ComposeResult<(&str, &str)> {
        let account = non_empty(self.stack.account.as_deref()).ok_or_else(|| {
            ComposeError::configuration(
                "Stack",
                "account",
                format!("not set; add stack.account or export {ENV_ACCOUNT}"),
            )
        })?;
        let region = non_empty(self.stack.region.as_deref()).ok_or_else(|| {
            ComposeError::configuration(
                "Stack",
                "region",
                format!("not set; add stack.region or export {ENV_REGION}"),
            )
        })?;
        Ok((account, region))
    }

    /// Scaffold the reference deployment: two tiers in a /24, one MySQL
    /// instance, two Fargate tasks scaling between 2 and 6 on CPU.
    pub fn scaffold(name: &str) -> Self {
        let database = snake_identifier_from(name, "app_db");
        StackConfig {
            stack: StackSection {
                name: name.to_string(),
                description: Some(format!("{name} web service stack")),
                account: None,
                region: Some("ap-northeast-1".to_string()),
            },
            network: NetworkConfig {
                cidr: "192.168.0.0/24".to_string(),
                availability_zones: vec![
                    "ap-northeast-1a".to_string(),
                    "ap-northeast-1c".to_string(),
                ],
                nat_gateways: 0,
                subnets: vec![
                    SubnetGroupConfig {
                        name: "public".to_string(),
                        kind: SubnetKind::Public,
                        mask: 27,
                        availability_zones: None,
                    },
                    SubnetGroupConfig {
                        name: "isolated".to_string(),
                        kind: SubnetKind::Isolated,
                        mask: 27,
                        availability_zones: None,
                    },
                ],
                tiers: TierMapping {
                    edge: "public".to_string(),
                    compute: "isolated".to_string(),
                    data: "isolated".to_string(),
                },
            },
            edge: EdgeConfig {
                listener_port: Some(80),
                service_ports: Some(vec![80]),
                health: HealthCheckConfig {
                    path: "/health".to_string(),
                    interval: "5m".to_string(),
                    timeout: Some("5s".to_string()),
                    healthy_threshold: Some(5),
                    unhealthy_threshold: Some(2),
                    healthy_codes: Some("200".to_string()),
                },
            },
            database: DatabaseConfig {
                engine: EngineKind::Mysql,
                name: database.clone(),
                username: "app".to_string(),
                name_prefix: None,
                instance_class: Some("t4g.micro".to_string()),
                availability_zone: Some("ap-northeast-1a".to_string()),
                allocated_storage_gib: Some(20),
                topology: TopologyConfig::Single,
                secret_name: None,
            },
            compute: ComputeConfig {
                repository: name.to_string(),
                image_tag: Some("latest".to_string()),
                container_port: Some(80),
                cpu: 256,
                memory_mib: 512,
                architecture: Architecture::Arm64,
                desired_count: 2,
                secrets: Some(SecretInjectionConfig::Discrete),
                logging: Some(LoggingConfig {
                    stream_prefix: name.to_string(),
                    retention_days: 1,
                }),
                scaling: Some(ScalingConfig {
                    min: 2,
                    max: 6,
                    scale_out_cpu: 70.0,
                    scale_in_cpu: 30.0,
                    period: Some("60s".to_string()),
                    cooldown: Some("60s".to_string()),
                }),
                env: HashMap::new(),
            },
            secrets: SecretsConfig::default(),
        }
    }
}

/// Parse a duration field, naming the resource and parameter on failure.
pub fn duration_field(resource: &str, parameter: &str, value: &str) -> ComposeResult<Duration> {
    parse_duration(value).ok_or_else(|| {
        ComposeError::configuration(
            resource,
            parameter,
            format!("{value:?} is not a duration (expected e.g. \"60s\" or \"5m\")"),
        )
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
