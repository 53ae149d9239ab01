//! Load balancer, listener and target registration.

use serde_json::{Value, json};
use tracing::{debug, info};

use tierstack_core::template::{ResourceDecl, attribute, join, reference};
use tierstack_core::{ComposeError, ComposeResult, LogicalId, SubnetKind, Template};
use tierstack_network::{AccessPolicy, SubnetSelection};

use crate::health::HealthCheck;

const RESOURCE: &str = "Alb";

/// Edge settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct EdgeOptions {
    /// Port the listener accepts traffic on.
    pub listener_port: u16,
    /// Port targets receive traffic on.
    pub target_port: u16,
    pub health: HealthCheck,
}

/// The public DNS name of the load balancer.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    load_balancer: LogicalId,
    port: u16,
}

impl Endpoint {
    pub fn load_balancer(&self) -> &LogicalId {
        &self.load_balancer
    }

    /// `{"Fn::GetAtt": [alb, "DNSName"]}`.
    pub fn dns_name(&self) -> Value {
        attribute(&self.load_balancer, "DNSName")
    }

    /// `http://<dns>[:port]` as a template expression.
    pub fn url(&self) -> Value {
        let mut parts = vec![json!("http://"), self.dns_name()];
        if self.port != 80 {
            parts.push(json!(format!(":{}", self.port)));
        }
        join(parts)
    }
}

/// What a target receives when it joins the listener's target group.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetBinding {
    pub target_group: LogicalId,
    pub listener: LogicalId,
    pub port: u16,
}

/// A workload that can sit behind the listener.
pub trait LoadBalancerTarget {
    /// Stable name used to detect double registration.
    fn target_name(&self) -> &str;

    /// Port the workload listens on.
    fn target_port(&self) -> u16;

    /// Declare whatever binds the workload to `binding`.
    fn register(&mut self, template: &mut Template, binding: &TargetBinding) -> ComposeResult<()>;
}

/// Handle to the listener. The only way to register targets.
#[derive(Debug, Clone)]
pub struct Listener {
    id: LogicalId,
    target_group: LogicalId,
    port: u16,
    target_port: u16,
    targets: Vec<String>,
}

impl Listener {
    pub fn id(&self) -> &LogicalId {
        &self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn target_group(&self) -> &LogicalId {
        &self.target_group
    }

    /// Names of registered targets, in registration order.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Put `target` behind this listener.
    pub fn add_targets<T>(&mut self, template: &mut Template, target: &mut T) -> ComposeResult<()>
    where
        T: LoadBalancerTarget + ?Sized,
    {
        let name = target.target_name().to_string();
        if self.targets.contains(&name) {
            return Err(ComposeError::configuration(
                RESOURCE,
                "targets",
                format!("{name} is already registered"),
            ));
        }
        if target.target_port() != self.target_port {
            return Err(ComposeError::configuration(
                RESOURCE,
                "targets",
                format!(
                    "{name} listens on {} but the target group forwards to {}",
                    target.target_port(),
                    self.target_port
                ),
            ));
        }

        let binding = TargetBinding {
            target_group: self.target_group.clone(),
            listener: self.id.clone(),
            port: self.target_port,
        };
        target.register(template, &binding)?;
        info!(target = %name, listener = %self.id, port = self.target_port, "target registered");
        self.targets.push(name);
        Ok(())
    }
}

/// The provisioned edge tier.
#[derive(Debug, Clone)]
pub struct EdgeLoadBalancer {
    pub id: LogicalId,
    /// Physical name, e.g. `cdk-training-alb`.
    pub name: String,
    pub endpoint: Endpoint,
    pub listener: Listener,
}

impl EdgeLoadBalancer {
    /// Declare the target group, the internet-facing load balancer in the
    /// public subnets, and a listener forwarding to the target group.
    pub fn provision(
        template: &mut Template,
        resource_name: &str,
        vpc: &LogicalId,
        subnets: &SubnetSelection,
        policy: &AccessPolicy,
        options: &EdgeOptions,
    ) -> ComposeResult<Self> {
        if subnets.kind != SubnetKind::Public {
            return Err(ComposeError::configuration(
                RESOURCE,
                "subnets",
                format!("{} subnets are not internet-facing", subnets.group),
            ));
        }
        if subnets.availability_zones.len() < 2 {
            return Err(ComposeError::configuration(
                RESOURCE,
                "subnets",
                "an application load balancer needs subnets in at least two availability zones",
            ));
        }
        for (parameter, port) in [
            ("listener_port", options.listener_port),
            ("target_port", options.target_port),
        ] {
            if port == 0 {
                return Err(ComposeError::configuration(RESOURCE, parameter, "port 0 is not valid"));
            }
        }
        options.health.validate()?;

        let name = format!("{resource_name}-alb");
        let mut target_group = ResourceDecl::new(
            &["Alb", "Listener", "TargetGroup"],
            "AWS::ElasticLoadBalancingV2::TargetGroup",
        )
        .property("Name", format!("{resource_name}-alb-tg"))
        .property("Port", options.target_port)
        .property("Protocol", "HTTP")
        .property("TargetType", "ip")
        .property("VpcId", reference(vpc));
        for (key, value) in options.health.properties() {
            target_group = target_group.property(&key, value);
        }
        let target_group = template.add(target_group)?;

        let id = template.add(
            ResourceDecl::new(&["Alb"], "AWS::ElasticLoadBalancingV2::LoadBalancer")
                .property("Name", name.as_str())
                .property("Type", "application")
                .property("Scheme", "internet-facing")
                .property("Subnets", subnets.subnet_refs())
                .property("SecurityGroups", json!([policy.group_id()])),
        )?;
        debug!(%id, %name, subnets = subnets.subnet_ids.len(), "load balancer declared");

        let listener = template.add(
            ResourceDecl::new(&["Alb", "Listener"], "AWS::ElasticLoadBalancingV2::Listener")
                .property("LoadBalancerArn", reference(&id))
                .property("Port", options.listener_port)
                .property("Protocol", "HTTP")
                .property(
                    "DefaultActions",
                    json!([{ "Type": "forward", "TargetGroupArn": reference(&target_group) }]),
                ),
        )?;

        info!(
            %name,
            listener_port = options.listener_port,
            target_port = options.target_port,
            health_path = %options.health.path,
            "edge load balancer provisioned"
        );

        Ok(Self {
            endpoint: Endpoint {
                load_balancer: id.clone(),
                port: options.listener_port,
            },
            listener: Listener {
                id: listener,
                target_group,
                port: options.listener_port,
                target_port: options.target_port,
                targets: Vec::new(),
            },
            id,
            name,
        })
    }
}
