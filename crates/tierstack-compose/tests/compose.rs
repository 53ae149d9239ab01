//! End-to-end composition of reference deployments.

use serde_json::json;

use tierstack_compose::{OUTPUT_DATABASE_SECRET, OUTPUT_LOAD_BALANCER_DNS, compose};
use tierstack_core::config::{
    ImportedSecretConfig, SecretInjectionConfig, StackConfig, SubnetGroupConfig, TierMapping,
    TopologyConfig,
};
use tierstack_core::{ComposeError, EngineKind, ErrorKind, SubnetKind, TierRole};
use tierstack_network::{EndpointKind, PeerSource};
use tierstack_secrets::{CREDENTIAL_FIELDS, SecretAccessor};

fn reference() -> StackConfig {
    let mut config = StackConfig::scaffold("cdk-training");
    config.stack.account = Some("123456789012".to_string());
    config
}

fn three_tier() -> StackConfig {
    let mut config = StackConfig::scaffold("three-tier");
    config.stack.account = Some("123456789012".to_string());
    config.network.cidr = "10.0.0.0/16".to_string();
    config.network.nat_gateways = 1;
    config.network.subnets = vec![
        SubnetGroupConfig {
            name: "public".to_string(),
            kind: SubnetKind::Public,
            mask: 24,
            availability_zones: None,
        },
        SubnetGroupConfig {
            name: "app".to_string(),
            kind: SubnetKind::PrivateWithEgress,
            mask: 24,
            availability_zones: None,
        },
        SubnetGroupConfig {
            name: "data".to_string(),
            kind: SubnetKind::Isolated,
            mask: 24,
            availability_zones: None,
        },
    ];
    config.network.tiers = TierMapping {
        edge: "public".to_string(),
        compute: "app".to_string(),
        data: "data".to_string(),
    };
    config.database.engine = EngineKind::Postgres;
    config.database.topology = TopologyConfig::PrimaryReplica {
        replica_availability_zone: "ap-northeast-1c".to_string(),
    };
    config.compute.secrets = Some(SecretInjectionConfig::ConnectionString {
        variable: None,
        secret: None,
        field: None,
    });
    config
}

#[test]
fn reference_network_layout() {
    let stack = compose(&reference()).unwrap();

    assert_eq!(stack.network.groups().len(), 2);
    for name in ["public", "isolated"] {
        let group = stack.network.group(name).unwrap();
        assert_eq!(group.availability_zones(), vec!["ap-northeast-1a", "ap-northeast-1c"]);
    }
    assert_eq!(stack.network.group("isolated").unwrap().egress_paths(), 0);
    assert!(stack.network.nat_gateways().is_empty());

    let endpoints = stack.network.endpoints();
    let interface = endpoints
        .iter()
        .filter(|e| e.kind() == EndpointKind::Interface)
        .count();
    assert_eq!(interface, 4);
    assert_eq!(endpoints.len(), 5);
}

#[test]
fn access_chain_runs_edge_to_compute_to_data() {
    let stack = compose(&reference()).unwrap();
    let policies = &stack.policies;

    assert!(policies.admits(PeerSource::AnyIpv4, TierRole::Edge));
    assert!(policies.admits(PeerSource::Policy(TierRole::Edge), TierRole::Compute));
    assert!(policies.admits(PeerSource::Policy(TierRole::Compute), TierRole::Data));
    assert!(!policies.admits(PeerSource::Policy(TierRole::Edge), TierRole::Data));
    assert!(!policies.admits(PeerSource::AnyIpv4, TierRole::Data));
}

#[test]
fn training_database_yields_six_credential_fields() {
    let mut config = reference();
    config.database.name = "cdk_training_nigg".to_string();
    config.database.username = "nigg".to_string();
    config.database.name_prefix = Some("cdk_training_".to_string());

    let stack = compose(&config).unwrap();
    let credential = stack
        .database
        .credential(&SecretAccessor::new(&stack.secrets))
        .unwrap();
    let names: Vec<&str> = credential.fields().iter().map(|(n, _)| *n).collect();
    assert_eq!(names, CREDENTIAL_FIELDS);

    let again = stack
        .database
        .credential(&SecretAccessor::new(&stack.secrets))
        .unwrap();
    assert_eq!(credential, again);
}

#[test]
fn mixed_case_database_name_fails_without_endpoint() {
    let mut config = reference();
    config.database.name = "SampleDB".to_string();

    let err = compose(&config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(matches!(&err, ComposeError::Validation { value, .. } if value == "SampleDB"));
    assert!(err.to_string().contains("SampleDB"));
}

#[test]
fn missing_account_is_a_configuration_error() {
    let mut config = reference();
    config.stack.account = None;
    let err = compose(&config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("TIERSTACK_ACCOUNT"));

    config.apply_env(|key| (key == "TIERSTACK_ACCOUNT").then(|| "123456789012".to_string()));
    assert!(compose(&config).is_ok());
}

#[test]
fn missing_secret_source_is_a_resource_error() {
    let mut config = reference();
    config.compute.secrets = None;
    let err = compose(&config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
}

#[test]
fn desired_count_outside_scaling_bounds() {
    let mut config = reference();
    config.compute.desired_count = 8;
    let err = compose(&config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("desired_count"));
}

#[test]
fn outputs_expose_endpoint_and_secret() {
    let stack = compose(&reference()).unwrap();

    let dns = stack.template.output(OUTPUT_LOAD_BALANCER_DNS).unwrap();
    assert_eq!(dns.value, stack.endpoint().dns_name());
    assert!(stack.template.output(OUTPUT_DATABASE_SECRET).is_some());

    let rendered: serde_json::Value = serde_json::from_str(&stack.to_json_pretty().unwrap()).unwrap();
    assert_eq!(rendered["AWSTemplateFormatVersion"], "2010-09-09");
    assert!(rendered["Outputs"][OUTPUT_LOAD_BALANCER_DNS]["Value"].is_object());
}

#[test]
fn service_is_registered_and_scaled() {
    let stack = compose(&reference()).unwrap();
    let service_id = stack.compute.service_id().unwrap();
    let service = stack.template.resource(service_id).unwrap();
    assert_eq!(
        service.property("LoadBalancers").unwrap()[0]["ContainerPort"],
        json!(80)
    );
    assert_eq!(stack.edge.listener.targets(), &["cdk-training-service".to_string()]);

    let scaling = stack.compute.scaling().unwrap();
    assert_eq!((scaling.policy.min, scaling.policy.max), (2, 6));
}

#[test]
fn three_tier_postgres_with_replica() {
    let stack = compose(&three_tier()).unwrap();

    assert_eq!(stack.network.nat_gateways().len(), 1);
    assert_eq!(stack.network.group("app").unwrap().egress_paths(), 2);
    assert_eq!(stack.network.group("data").unwrap().egress_paths(), 0);
    assert_eq!(stack.database.port, 5432);
    assert_eq!(stack.database.replicas.len(), 1);
    assert!(stack.policies.get(TierRole::Data).ingress.iter().all(|r| r.port == 5432));

    let task = stack
        .template
        .resource(stack.compute.task_definition_id())
        .unwrap();
    let container = &task.property("ContainerDefinitions").unwrap()[0];
    assert_eq!(container["Secrets"].as_array().unwrap().len(), 6);
    assert_eq!(container["Environment"][0]["Name"], "DATABASE_URL");
    assert!(
        container["Environment"][0]["Value"]
            .as_str()
            .unwrap()
            .starts_with("postgresql://")
    );
}

#[test]
fn imported_connection_string_is_readable_by_the_task() {
    let mut config = reference();
    config.secrets.imported = vec![ImportedSecretConfig {
        name: "sample-node-app".to_string(),
        arn: None,
        fields: vec!["DATABASE_URL".to_string()],
    }];
    config.compute.secrets = Some(SecretInjectionConfig::ConnectionString {
        variable: None,
        secret: Some("sample-node-app".to_string()),
        field: None,
    });

    let stack = compose(&config).unwrap();
    let task = stack
        .template
        .resource(stack.compute.task_definition_id())
        .unwrap();
    let container = &task.property("ContainerDefinitions").unwrap()[0];
    let secrets = container["Secrets"].as_array().unwrap();
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0]["Name"], "DATABASE_URL");
    assert_eq!(
        secrets[0]["ValueFrom"],
        json!({
            "Fn::Sub": "arn:${AWS::Partition}:secretsmanager:ap-northeast-1:123456789012:secret:sample-node-app:DATABASE_URL::"
        })
    );

    let statements: Vec<&serde_json::Value> = stack
        .template
        .resources_of_kind("AWS::IAM::Role")
        .filter_map(|(_, role)| role.property("Policies"))
        .flat_map(|policies| policies.as_array().unwrap())
        .flat_map(|policy| policy["PolicyDocument"]["Statement"].as_array().unwrap())
        .collect();
    let read = statements
        .iter()
        .find(|s| s["Action"].to_string().contains("secretsmanager:GetSecretValue"))
        .unwrap();
    assert_eq!(
        read["Resource"],
        json!([{
            "Fn::Sub": "arn:${AWS::Partition}:secretsmanager:ap-northeast-1:123456789012:secret:sample-node-app-??????"
        }])
    );
}

#[test]
fn clustered_database_attaches_credentials_to_the_cluster() {
    let mut config = reference();
    config.database.topology = TopologyConfig::Cluster { instances: 2 };
    config.database.instance_class = Some("r6g.large".to_string());

    let stack = compose(&config).unwrap();
    assert!(stack.database.is_clustered());

    let counts = stack.resource_counts();
    assert_eq!(counts.get("AWS::RDS::DBCluster"), Some(&1));
    assert_eq!(counts.get("AWS::RDS::DBInstance"), Some(&2));

    let (_, attachment) = stack
        .template
        .resources_of_kind("AWS::SecretsManager::SecretTargetAttachment")
        .next()
        .unwrap();
    assert_eq!(attachment.property("TargetType"), Some(&json!("AWS::RDS::DBCluster")));

    let credential = stack
        .database
        .credential(&SecretAccessor::new(&stack.secrets))
        .unwrap();
    let names: Vec<&str> = credential.fields().iter().map(|(n, _)| *n).collect();
    assert_eq!(names, CREDENTIAL_FIELDS);
}

#[test]
fn scaffold_with_digits_in_name_composes() {
    let mut config = StackConfig::scaffold("app-v2");
    config.stack.account = Some("123456789012".to_string());
    let stack = compose(&config).unwrap();
    assert_eq!(stack.database.name, "app_v");
}

#[test]
fn loads_from_file_with_env_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stack.toml");
    std::fs::write(&path, StackConfig::scaffold("from-file").to_toml_string().unwrap()).unwrap();

    let mut config = StackConfig::from_file(&path).unwrap();
    config.apply_env(|key| match key {
        "TIERSTACK_ACCOUNT" => Some("210987654321".to_string()),
        "TIERSTACK_IMAGE_TAG" => Some("v1.2.3".to_string()),
        _ => None,
    });

    let stack = compose(&config).unwrap();
    assert_eq!(stack.account, "210987654321");
    let task = stack
        .template
        .resource(stack.compute.task_definition_id())
        .unwrap();
    let image = task.property("ContainerDefinitions").unwrap()[0]["Image"].to_string();
    assert!(image.contains("from-file:v1.2.3"));
}
