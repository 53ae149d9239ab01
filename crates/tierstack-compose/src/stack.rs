//! Stack composer.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, info_span, warn};

use tierstack_autoscale::ScalingPolicy;
use tierstack_compute::{
    ComputeService, ImageRef, LogSettings, SecretInjection, ServiceOptions, TaskShape,
};
use tierstack_core::naming::validate_resource_name;
use tierstack_core::{ComposeError, ComposeResult, StackConfig, Template, TierRole};
use tierstack_data::{Database, DatabaseOptions};
use tierstack_edge::{EdgeLoadBalancer, EdgeOptions, Endpoint, HealthCheck};
use tierstack_network::{AccessPolicies, AddressSpace, PolicyPorts};
use tierstack_secrets::{PlatformSecretStore, SecretAccessor};

pub const OUTPUT_LOAD_BALANCER_DNS: &str = "LoadBalancerDns";
pub const OUTPUT_DATABASE_SECRET: &str = "DatabaseSecretArn";

const DEFAULT_PORT: u16 = 80;
const DEFAULT_IMAGE_TAG: &str = "latest";

/// A fully composed deployment.
#[derive(Debug)]
pub struct Stack {
    pub name: String,
    pub account: String,
    pub region: String,
    pub template: Template,
    pub network: AddressSpace,
    pub policies: AccessPolicies,
    pub edge: EdgeLoadBalancer,
    pub database: Database,
    pub secrets: PlatformSecretStore,
    pub compute: ComputeService,
    pub scaling: Option<ScalingPolicy>,
}

impl Stack {
    /// The public address of the deployment.
    pub fn endpoint(&self) -> &Endpoint {
        &self.edge.endpoint
    }

    /// Number of declared resources per resource type.
    pub fn resource_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for id in self.template.declaration_order() {
            if let Some(resource) = self.template.resource(id) {
                *counts.entry(resource.kind.as_str()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn to_json_pretty(&self) -> ComposeResult<String> {
        self.template
            .to_json_pretty()
            .map_err(|e| ComposeError::resource("Template", format!("serialization failed: {e}")))
    }
}

/// Compose every tier of `config` in dependency order.
pub fn compose(config: &StackConfig) -> ComposeResult<Stack> {
    let (account, region) = config.require_target()?;
    let name = config.stack.name.as_str();
    validate_resource_name("Stack", "name", name)?;

    let span = info_span!("compose", stack = %name, %region);
    let _enter = span.enter();

    // Pure validation first: nothing is declared for a stack that cannot
    // be built.
    let database_options = DatabaseOptions::from_config(&config.database)?;
    let health = HealthCheck::from_config(&config.edge.health)?;
    let shape = TaskShape::new(
        config.compute.cpu,
        config.compute.memory_mib,
        config.compute.architecture,
    )?;
    let scaling = config
        .compute
        .scaling
        .as_ref()
        .map(ScalingPolicy::from_config)
        .transpose()?;
    if let Some(policy) = &scaling {
        policy.check_desired(config.compute.desired_count)?;
    }

    let listener_port = config.edge.listener_port.unwrap_or(DEFAULT_PORT);
    let container_port = config.compute.container_port.unwrap_or(DEFAULT_PORT);
    let service_ports = match &config.edge.service_ports {
        Some(ports) => ports.clone(),
        None => vec![listener_port],
    };
    if !service_ports.contains(&listener_port) {
        return Err(ComposeError::configuration(
            "Alb",
            "service_ports",
            format!("listener port {listener_port} is not admitted by the edge policy"),
        ));
    }

    let mut template = Template::new(config.stack.description.clone());

    let network = AddressSpace::provision(&mut template, name, region, &config.network)?;
    info!(
        cidr = %network.cidr(),
        groups = network.groups().len(),
        endpoints = network.endpoints().len(),
        "network ready"
    );

    let policies = AccessPolicies::provision(
        &mut template,
        &network,
        name,
        &PolicyPorts {
            service_ports,
            application_port: container_port,
            database_port: database_options.port(),
        },
    )?;
    info!(public = ?policies.publicly_reachable(), "access policies ready");

    let tag = config
        .compute
        .image_tag
        .as_deref()
        .unwrap_or(DEFAULT_IMAGE_TAG);
    let image = ImageRef::from_repository_name(&config.compute.repository, tag)?;
    info!(%image, "image resolved");

    let mut edge = EdgeLoadBalancer::provision(
        &mut template,
        name,
        network.vpc_id(),
        &network.select_tier(TierRole::Edge)?,
        policies.get(TierRole::Edge),
        &EdgeOptions {
            listener_port,
            target_port: container_port,
            health,
        },
    )?;
    info!(load_balancer = %edge.name, listener_port, "edge ready");

    let mut secrets = PlatformSecretStore::new(account, region);
    for imported in &config.secrets.imported {
        secrets.import(&imported.name, imported.arn.as_deref(), &imported.fields)?;
    }

    let database = Database::provision(
        &mut template,
        &mut secrets,
        name,
        &network.select_tier(TierRole::Data)?,
        policies.get(TierRole::Data),
        &database_options,
    )?;
    info!(
        database = %database.name,
        engine = database.engine.engine_name(),
        replicas = database.replicas.len(),
        clustered = database.is_clustered(),
        "data tier ready"
    );

    let accessor = SecretAccessor::new(&secrets);
    let injection = config
        .compute
        .secrets
        .as_ref()
        .map(|mode| SecretInjection::resolve(mode, &accessor, database.secret(), database.engine))
        .transpose()?;
    if let Some(variable) = injection.as_ref().and_then(SecretInjection::unexpanded_variable) {
        warn!(
            %variable,
            "connection URL is a template; the image entrypoint must expand it"
        );
    }

    let mut compute = ComputeService::provision(
        &mut template,
        name,
        &network.select_tier(TierRole::Compute)?,
        policies.get(TierRole::Compute),
        &image,
        &shape,
        injection.as_ref(),
        &ServiceOptions {
            region: region.to_string(),
            container_port,
            desired_count: config.compute.desired_count,
            logging: config.compute.logging.as_ref().map(|logging| LogSettings {
                stream_prefix: logging.stream_prefix.clone(),
                retention_days: logging.retention_days,
            }),
            environment: config
                .compute
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        },
    )?;

    edge.listener.add_targets(&mut template, &mut compute)?;

    if let Some(policy) = &scaling {
        compute.attach_scaling(&mut template, policy)?;
    }

    template.add_output(
        OUTPUT_LOAD_BALANCER_DNS,
        edge.endpoint.dns_name(),
        Some("Public DNS name of the load balancer"),
    )?;
    template.add_output(
        OUTPUT_DATABASE_SECRET,
        database.secret_arn(),
        Some("Secret holding the database credentials"),
    )?;

    let kinds: BTreeSet<&str> = template
        .declaration_order()
        .iter()
        .filter_map(|id| template.resource(id))
        .map(|r| r.kind.as_str())
        .collect();
    info!(
        resources = template.len(),
        resource_types = kinds.len(),
        scaling = scaling.is_some(),
        "stack composed"
    );

    Ok(Stack {
        name: name.to_string(),
        account: account.to_string(),
        region: region.to_string(),
        template,
        network,
        policies,
        edge,
        database,
        secrets,
        compute,
        scaling,
    })
}
