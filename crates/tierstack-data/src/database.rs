//! Database declaration and its generated secret.

use serde_json::{Value, json};
use tracing::{debug, info};

use tierstack_core::template::{ResourceDecl, attribute, reference};
use tierstack_core::{ComposeError, ComposeResult, EngineKind, LogicalId, SubnetKind, Template};
use tierstack_network::{AccessPolicy, SubnetSelection};
use tierstack_secrets::{CREDENTIAL_FIELDS, Credential, SecretAccessor, SecretRef, SecretStore};

use crate::options::{DatabaseOptions, RESOURCE, Topology};

/// Characters the generated password must avoid so it survives URLs and shells.
const PASSWORD_EXCLUDES: &str = " %+~`#$&*()|[]{}:;<>?!'/@\"\\";

/// Fields the generated secret holds before it is attached to the database.
const GENERATED_FIELDS: [&str; 2] = ["username", "password"];

/// Handle to the provisioned data tier.
#[derive(Debug, Clone)]
pub struct Database {
    /// The instance, or the cluster for clustered topologies.
    pub id: LogicalId,
    pub engine: EngineKind,
    pub port: u16,
    pub name: String,
    pub replicas: Vec<LogicalId>,
    pub subnet_group: LogicalId,
    secret: SecretRef,
    clustered: bool,
}

impl Database {
    /// Declare the subnet group, generated secret, database and attachment.
    ///
    /// The secret's `username`/`password` fields exist from creation; the
    /// attachment adds `engine`, `host`, `port` and `dbname`.
    pub fn provision<S>(
        template: &mut Template,
        store: &mut S,
        resource_name: &str,
        subnets: &SubnetSelection,
        policy: &AccessPolicy,
        options: &DatabaseOptions,
    ) -> ComposeResult<Self>
    where
        S: SecretStore + ?Sized,
    {
        if subnets.kind == SubnetKind::Public {
            return Err(ComposeError::configuration(
                RESOURCE,
                "subnets",
                format!("{} is a public group; databases are never internet-facing", subnets.group),
            ));
        }
        if subnets.availability_zones.len() < 2 {
            return Err(ComposeError::configuration(
                RESOURCE,
                "subnets",
                "a database subnet group needs at least two availability zones",
            ));
        }
        let zone_in_group = |parameter: &str, zone: &str| {
            if subnets.availability_zones.iter().any(|z| z == zone) {
                Ok(())
            } else {
                Err(ComposeError::configuration(
                    RESOURCE,
                    parameter,
                    format!("{zone} has no subnet in group {}", subnets.group),
                ))
            }
        };
        if let Some(zone) = &options.availability_zone {
            zone_in_group("availability_zone", zone)?;
        }
        if let Topology::PrimaryReplica {
            replica_availability_zone,
        } = &options.topology
        {
            zone_in_group("topology.replica_availability_zone", replica_availability_zone)?;
        }

        let subnet_group = template.add(
            ResourceDecl::new(&["Rds", "SubnetGroup"], "AWS::RDS::DBSubnetGroup")
                .property(
                    "DBSubnetGroupDescription",
                    format!("Subnet group for {resource_name} database"),
                )
                .property("SubnetIds", subnets.subnet_refs()),
        )?;

        let secret_id = template.add(
            ResourceDecl::new(&["Rds", "Secret"], "AWS::SecretsManager::Secret")
                .optional_property("Name", options.secret_name.clone())
                .property("Description", format!("Generated credentials for {resource_name} database"))
                .property(
                    "GenerateSecretString",
                    json!({
                        "SecretStringTemplate": json!({ "username": options.username }).to_string(),
                        "GenerateStringKey": "password",
                        "PasswordLength": 30,
                        "ExcludeCharacters": PASSWORD_EXCLUDES,
                    }),
                ),
        )?;
        let secret_name = options
            .secret_name
            .clone()
            .unwrap_or_else(|| format!("{resource_name}-db"));
        let secret = SecretRef::generated(secret_name, secret_id.clone());
        store.register(&secret, &GENERATED_FIELDS)?;

        let generated = SecretAccessor::new(&*store).resolve(&secret, &GENERATED_FIELDS)?;
        let master = |field: &str| -> ComposeResult<Value> {
            generated
                .get(field)
                .map(|v| v.dynamic_reference())
                .ok_or_else(|| ComposeError::resource(RESOURCE, format!("generated secret has no {field}")))
        };
        let master_username = master("username")?;
        let master_password = master("password")?;

        let security_groups = json!([policy.group_id()]);
        let port = options.port();
        let (id, replicas, clustered) = match &options.topology {
            Topology::Cluster { instances } => {
                let cluster = template.add(
                    ResourceDecl::new(&["Rds", "Cluster"], "AWS::RDS::DBCluster")
                        .property("Engine", options.engine.cluster_engine_name())
                        .property("DatabaseName", options.name.as_str())
                        .property("MasterUsername", master_username)
                        .property("MasterUserPassword", master_password)
                        .property("DBSubnetGroupName", reference(&subnet_group))
                        .property("VpcSecurityGroupIds", security_groups)
                        .property("Port", port)
                        .property("StorageEncrypted", true),
                )?;
                let mut members = Vec::new();
                for n in 1..=*instances {
                    let member_path = format!("Instance{n}");
                    let member = template.add(
                        ResourceDecl::new(&["Rds", "Cluster", member_path.as_str()], "AWS::RDS::DBInstance")
                            .property("Engine", options.engine.cluster_engine_name())
                            .property("DBClusterIdentifier", reference(&cluster))
                            .property("DBInstanceClass", options.db_instance_class())
                            .property("DBSubnetGroupName", reference(&subnet_group))
                            .property("PubliclyAccessible", false)
                            .property("AutoMinorVersionUpgrade", false),
                    )?;
                    members.push(member);
                }
                (cluster, members, true)
            }
            Topology::Single | Topology::PrimaryReplica { .. } => {
                let primary = template.add(
                    ResourceDecl::new(&["Rds", "PrimaryInstance"], "AWS::RDS::DBInstance")
                        .property("Engine", options.engine.engine_name())
                        .property("EngineVersion", options.engine.engine_version())
                        .property("DBInstanceClass", options.db_instance_class())
                        .property("AllocatedStorage", options.allocated_storage_gib.to_string())
                        .property("DBName", options.name.as_str())
                        .property("MasterUsername", master_username)
                        .property("MasterUserPassword", master_password)
                        .property("DBSubnetGroupName", reference(&subnet_group))
                        .property("VPCSecurityGroups", security_groups.clone())
                        .property("Port", port.to_string())
                        .optional_property("AvailabilityZone", options.availability_zone.clone())
                        .property("MultiAZ", false)
                        .property("PubliclyAccessible", false)
                        .property("StorageEncrypted", true)
                        .property("DeleteAutomatedBackups", true)
                        .property("AutoMinorVersionUpgrade", false),
                )?;
                let mut replicas = Vec::new();
                if let Topology::PrimaryReplica {
                    replica_availability_zone,
                } = &options.topology
                {
                    let replica = template.add(
                        ResourceDecl::new(&["Rds", "ReadReplica"], "AWS::RDS::DBInstance")
                            .property("SourceDBInstanceIdentifier", reference(&primary))
                            .property("DBInstanceClass", options.db_instance_class())
                            .property("AvailabilityZone", replica_availability_zone.as_str())
                            .property("VPCSecurityGroups", security_groups)
                            .property("PubliclyAccessible", false)
                            .property("DeleteAutomatedBackups", true)
                            .property("AutoMinorVersionUpgrade", false),
                    )?;
                    debug!(%replica, zone = %replica_availability_zone, "read replica declared");
                    replicas.push(replica);
                }
                (primary, replicas, false)
            }
        };

        template.add(
            ResourceDecl::new(&["Rds", "Secret", "Attachment"], "AWS::SecretsManager::SecretTargetAttachment")
                .property("SecretId", reference(&secret_id))
                .property("TargetId", reference(&id))
                .property(
                    "TargetType",
                    if clustered { "AWS::RDS::DBCluster" } else { "AWS::RDS::DBInstance" },
                ),
        )?;
        store.register(&secret, &CREDENTIAL_FIELDS)?;

        info!(
            engine = options.engine.engine_name(),
            version = options.engine.engine_version(),
            database = %options.name,
            port,
            replicas = replicas.len(),
            clustered,
            "database provisioned"
        );

        Ok(Self {
            id,
            engine: options.engine,
            port,
            name: options.name.clone(),
            replicas,
            subnet_group,
            secret,
            clustered,
        })
    }

    /// The generated credential secret.
    pub fn secret(&self) -> &SecretRef {
        &self.secret
    }

    pub fn secret_arn(&self) -> Value {
        self.secret.arn()
    }

    pub fn is_clustered(&self) -> bool {
        self.clustered
    }

    /// Writer endpoint address.
    pub fn endpoint_address(&self) -> Value {
        attribute(&self.id, "Endpoint.Address")
    }

    /// Resolve the six connection fields of the generated secret.
    pub fn credential<S>(&self, accessor: &SecretAccessor<'_, S>) -> ComposeResult<Credential>
    where
        S: SecretStore + ?Sized,
    {
        accessor.credential(&self.secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierstack_core::config::{StackConfig, TopologyConfig};
    use tierstack_core::{ErrorKind, TierRole};
    use tierstack_network::{AccessPolicies, AddressSpace, PolicyPorts};
    use tierstack_secrets::PlatformSecretStore;

    struct Fixture {
        template: Template,
        store: PlatformSecretStore,
        network: AddressSpace,
        policies: AccessPolicies,
    }

    fn fixture() -> Fixture {
        let mut template = Template::new(None);
        let network = AddressSpace::provision(
            &mut template,
            "cdk-training",
            "ap-northeast-1",
            &StackConfig::scaffold("cdk-training").network,
        )
        .unwrap();
        let policies = AccessPolicies::provision(
            &mut template,
            &network,
            "cdk-training",
            &PolicyPorts {
                service_ports: vec![80],
                application_port: 80,
                database_port: 3306,
            },
        )
        .unwrap();
        Fixture {
            template,
            store: PlatformSecretStore::new("123456789012", "ap-northeast-1"),
            network,
            policies,
        }
    }

    fn options(topology: TopologyConfig) -> DatabaseOptions {
        let mut config = StackConfig::scaffold("cdk-training").database;
        config.name = "cdk_training_nigg".to_string();
        config.username = "nigg".to_string();
        config.topology = topology;
        if matches!(config.topology, TopologyConfig::Cluster { .. }) {
            config.instance_class = Some("t4g.medium".to_string());
        }
        DatabaseOptions::from_config(&config).unwrap()
    }

    fn provision(f: &mut Fixture, options: &DatabaseOptions, group: &str) -> ComposeResult<Database> {
        let subnets = f.network.select(group)?;
        Database::provision(
            &mut f.template,
            &mut f.store,
            "cdk-training",
            &subnets,
            f.policies.get(TierRole::Data),
            options,
        )
    }

    #[test]
    fn single_instance_yields_six_credential_fields() {
        let mut f = fixture();
        let db = provision(&mut f, &options(TopologyConfig::Single), "isolated").unwrap();

        let credential = db.credential(&SecretAccessor::new(&f.store)).unwrap();
        assert_eq!(credential.fields().len(), 6);
        assert_eq!(credential.dbname.field(), "dbname");

        let instance = f.template.resource(&db.id).unwrap();
        assert_eq!(instance.property("Engine"), Some(&json!("mysql")));
        assert_eq!(instance.property("EngineVersion"), Some(&json!("8.0")));
        assert_eq!(instance.property("DBName"), Some(&json!("cdk_training_nigg")));
        assert_eq!(instance.property("PubliclyAccessible"), Some(&json!(false)));
        assert_eq!(
            instance.property("VPCSecurityGroups"),
            Some(&json!([f.policies.get(TierRole::Data).group_id()]))
        );
        assert!(db.replicas.is_empty());
    }

    #[test]
    fn password_is_never_literal() {
        let mut f = fixture();
        let db = provision(&mut f, &options(TopologyConfig::Single), "isolated").unwrap();
        let instance = f.template.resource(&db.id).unwrap();
        let password = instance.property("MasterUserPassword").unwrap().to_string();
        assert!(password.contains("{{resolve:secretsmanager:"));
        assert!(password.contains(":SecretString:password}}"));

        let secret = f.template.resources_of_kind("AWS::SecretsManager::Secret").next().unwrap().1;
        assert_eq!(
            secret.property("GenerateSecretString").unwrap()["GenerateStringKey"],
            "password"
        );
    }

    #[test]
    fn replica_lands_in_second_zone() {
        let mut f = fixture();
        let db = provision(
            &mut f,
            &options(TopologyConfig::PrimaryReplica {
                replica_availability_zone: "ap-northeast-1c".to_string(),
            }),
            "isolated",
        )
        .unwrap();
        assert_eq!(db.replicas.len(), 1);
        let replica = f.template.resource(&db.replicas[0]).unwrap();
        assert_eq!(replica.property("AvailabilityZone"), Some(&json!("ap-northeast-1c")));
        assert_eq!(replica.property("DeleteAutomatedBackups"), Some(&json!(true)));
        assert_eq!(replica.property("AutoMinorVersionUpgrade"), Some(&json!(false)));
        assert_eq!(
            replica.property("SourceDBInstanceIdentifier"),
            Some(&reference(&db.id))
        );
    }

    #[test]
    fn replica_zone_must_have_a_subnet() {
        let mut f = fixture();
        let err = provision(
            &mut f,
            &options(TopologyConfig::PrimaryReplica {
                replica_availability_zone: "ap-northeast-1d".to_string(),
            }),
            "isolated",
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("ap-northeast-1d"));
    }

    #[test]
    fn cluster_attaches_secret_to_cluster() {
        let mut f = fixture();
        let db = provision(&mut f, &options(TopologyConfig::Cluster { instances: 2 }), "isolated").unwrap();
        assert!(db.is_clustered());
        assert_eq!(db.replicas.len(), 2);
        let attachment = f
            .template
            .resources_of_kind("AWS::SecretsManager::SecretTargetAttachment")
            .next()
            .unwrap()
            .1;
        assert_eq!(attachment.property("TargetType"), Some(&json!("AWS::RDS::DBCluster")));
        assert_eq!(
            f.template.resource(&db.id).unwrap().property("Engine"),
            Some(&json!("aurora-mysql"))
        );
    }

    #[test]
    fn public_subnets_rejected() {
        let mut f = fixture();
        let err = provision(&mut f, &options(TopologyConfig::Single), "public").unwrap_err();
        assert!(err.to_string().contains("public"));
        assert!(f.template.resources_of_kind("AWS::RDS::DBInstance").next().is_none());
    }

    #[test]
    fn postgres_port_flows_through() {
        let mut f = fixture();
        let mut opts = options(TopologyConfig::Single);
        opts.engine = EngineKind::Postgres;
        let db = provision(&mut f, &opts, "isolated").unwrap();
        assert_eq!(db.port, 5432);
        let instance = f.template.resource(&db.id).unwrap();
        assert_eq!(instance.property("EngineVersion"), Some(&json!("15.5")));
        assert_eq!(instance.property("Port"), Some(&json!("5432")));
    }
}
