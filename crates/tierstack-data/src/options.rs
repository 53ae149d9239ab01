//! Validated database settings.

use tierstack_core::config::{DatabaseConfig, TopologyConfig};
use tierstack_core::naming::validate_identifier;
use tierstack_core::{ComposeError, ComposeResult, EngineKind};

pub(crate) const RESOURCE: &str = "Rds";

const DEFAULT_INSTANCE_CLASS: &str = "t4g.micro";
const DEFAULT_STORAGE_GIB: u32 = 20;
const MAX_CLUSTER_INSTANCES: u32 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    Single,
    /// A read replica in a second availability zone.
    PrimaryReplica {
        replica_availability_zone: String,
    },
    Cluster {
        instances: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseOptions {
    pub engine: EngineKind,
    pub name: String,
    pub username: String,
    /// Instance class without the `db.` prefix, e.g. `t4g.micro`.
    pub instance_class: String,
    pub availability_zone: Option<String>,
    pub allocated_storage_gib: u32,
    pub topology: Topology,
    pub secret_name: Option<String>,
}

impl DatabaseOptions {
    /// Validate naming rules and topology, then fill defaults.
    ///
    /// Database name and username must be lowercase words joined by
    /// underscores. When `name_prefix` is set the database name must start
    /// with it.
    pub fn from_config(config: &DatabaseConfig) -> ComposeResult<Self> {
        validate_identifier(RESOURCE, "database_name", &config.name)?;
        validate_identifier(RESOURCE, "username", &config.username)?;
        if let Some(prefix) = &config.name_prefix
            && !config.name.starts_with(prefix.as_str())
        {
            return Err(ComposeError::validation(
                RESOURCE,
                "database_name",
                config.name.as_str(),
                format!("must start with {prefix:?}"),
            ));
        }

        let instance_class = config
            .instance_class
            .as_deref()
            .unwrap_or(DEFAULT_INSTANCE_CLASS)
            .trim_start_matches("db.")
            .to_string();
        if instance_class.split('.').count() != 2 || instance_class.contains(char::is_whitespace) {
            return Err(ComposeError::configuration(
                RESOURCE,
                "instance_class",
                format!("{instance_class:?} is not of the form <family>.<size>"),
            ));
        }

        let allocated_storage_gib = config.allocated_storage_gib.unwrap_or(DEFAULT_STORAGE_GIB);
        if !(20..=65536).contains(&allocated_storage_gib) {
            return Err(ComposeError::configuration(
                RESOURCE,
                "allocated_storage_gib",
                format!("{allocated_storage_gib} is outside 20..=65536"),
            ));
        }

        let topology = match &config.topology {
            TopologyConfig::Single => Topology::Single,
            TopologyConfig::PrimaryReplica {
                replica_availability_zone,
            } => Topology::PrimaryReplica {
                replica_availability_zone: replica_availability_zone.clone(),
            },
            TopologyConfig::Cluster { instances } => {
                if !(1..=MAX_CLUSTER_INSTANCES).contains(instances) {
                    return Err(ComposeError::configuration(
                        RESOURCE,
                        "topology.instances",
                        format!("{instances} is outside 1..={MAX_CLUSTER_INSTANCES}"),
                    ));
                }
                // Clustered engines start at medium sizes.
                if instance_class.ends_with(".micro") || instance_class.ends_with(".small") {
                    return Err(ComposeError::configuration(
                        RESOURCE,
                        "instance_class",
                        format!("{instance_class} is too small for a cluster"),
                    ));
                }
                Topology::Cluster {
                    instances: *instances,
                }
            }
        };

        if let Some(secret_name) = &config.secret_name
            && secret_name.trim().is_empty()
        {
            return Err(ComposeError::configuration(
                RESOURCE,
                "secret_name",
                "must not be empty when set",
            ));
        }

        Ok(Self {
            engine: config.engine,
            name: config.name.clone(),
            username: config.username.clone(),
            instance_class,
            availability_zone: config.availability_zone.clone(),
            allocated_storage_gib,
            topology,
            secret_name: config.secret_name.clone(),
        })
    }

    pub fn port(&self) -> u16 {
        self.engine.default_port()
    }

    /// `db.<class>` as the platform expects it.
    pub fn db_instance_class(&self) -> String {
        format!("db.{}", self.instance_class)
    }
}
