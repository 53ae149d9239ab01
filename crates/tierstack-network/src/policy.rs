//! The edge → compute → data allow-chain.
//!
//! Each tier gets one security policy. Only the edge accepts traffic from
//! arbitrary addresses; every other tier admits exactly its upstream
//! neighbour, on exactly one port. Outbound traffic is unrestricted.

use std::collections::BTreeSet;

use serde_json::{Value, json};
use tracing::{debug, info};

use tierstack_core::template::{ResourceDecl, attribute, reference};
use tierstack_core::{ComposeError, ComposeResult, LogicalId, Template, TierRole};

use crate::vpc::AddressSpace;

/// Ports the chain opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyPorts {
    /// Public ports on the edge.
    pub service_ports: Vec<u16>,
    /// Port the compute tier listens on.
    pub application_port: u16,
    /// Port the data tier listens on.
    pub database_port: u16,
}

impl PolicyPorts {
    fn validate(&self) -> ComposeResult<()> {
        if self.service_ports.is_empty() {
            return Err(ComposeError::configuration(
                "Alb",
                "service_ports",
                "at least one public port is required",
            ));
        }
        if self.service_ports.contains(&0) {
            return Err(ComposeError::configuration("Alb", "service_ports", "port 0 is not valid"));
        }
        if self.application_port == 0 {
            return Err(ComposeError::configuration("Ecs", "container_port", "port 0 is not valid"));
        }
        if self.database_port == 0 {
            return Err(ComposeError::configuration("Rds", "port", "port 0 is not valid"));
        }
        Ok(())
    }
}

/// Where admitted traffic may come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PeerSource {
    AnyIpv4,
    Policy(TierRole),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub source: PeerSource,
    pub port: u16,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessPolicy {
    pub id: LogicalId,
    pub role: TierRole,
    /// Physical group name, e.g. `cdk-training-ecs-sg`.
    pub name: String,
    pub ingress: Vec<IngressRule>,
    pub allow_all_outbound: bool,
}

impl AccessPolicy {
    pub fn admits(&self, source: PeerSource) -> bool {
        self.ingress.iter().any(|r| r.source == source)
    }

    /// `{"Fn::GetAtt": [id, "GroupId"]}` for `SecurityGroups` properties.
    pub fn group_id(&self) -> Value {
        attribute(&self.id, "GroupId")
    }
}

/// All three policies of a deployment.
#[derive(Debug, Clone)]
pub struct AccessPolicies {
    edge: AccessPolicy,
    compute: AccessPolicy,
    data: AccessPolicy,
}

impl AccessPolicies {
    /// Declare the three policies and the cross-tier ingress rules.
    pub fn provision(
        template: &mut Template,
        network: &AddressSpace,
        resource_name: &str,
        ports: &PolicyPorts,
    ) -> ComposeResult<Self> {
        ports.validate()?;

        let service_ports: BTreeSet<u16> = ports.service_ports.iter().copied().collect();
        let edge_rules: Vec<IngressRule> = service_ports
            .into_iter()
            .map(|port| IngressRule {
                source: PeerSource::AnyIpv4,
                port,
                description: format!("Allow from anyone on port {port}"),
            })
            .collect();
        let edge = declare_group(
            template,
            network,
            TierRole::Edge,
            format!("{resource_name}-alb-sg"),
            edge_rules,
        )?;

        let compute = declare_group(
            template,
            network,
            TierRole::Compute,
            format!("{resource_name}-ecs-sg"),
            vec![IngressRule {
                source: PeerSource::Policy(TierRole::Edge),
                port: ports.application_port,
                description: format!("Load balancer to application on {}", ports.application_port),
            }],
        )?;

        let data = declare_group(
            template,
            network,
            TierRole::Data,
            format!("{resource_name}-rds-sg"),
            vec![IngressRule {
                source: PeerSource::Policy(TierRole::Compute),
                port: ports.database_port,
                description: format!("Application to database on {}", ports.database_port),
            }],
        )?;

        let policies = Self { edge, compute, data };
        // Peer rules are separate resources so neither group has to exist
        // inside the other's declaration.
        for policy in [&policies.compute, &policies.data] {
            for rule in &policy.ingress {
                if let PeerSource::Policy(peer) = rule.source {
                    let peer_policy = policies.get(peer);
                    template.add(
                        ResourceDecl::new(
                            &[policy_path(policy.role), format!("from{}", peer_path(peer))],
                            "AWS::EC2::SecurityGroupIngress",
                        )
                        .property("IpProtocol", "tcp")
                        .property("FromPort", rule.port)
                        .property("ToPort", rule.port)
                        .property("GroupId", policy.group_id())
                        .property("SourceSecurityGroupId", peer_policy.group_id())
                        .property("Description", rule.description.as_str()),
                    )?;
                }
            }
        }

        info!(
            edge = %policies.edge.name,
            compute = %policies.compute.name,
            data = %policies.data.name,
            "access policies provisioned"
        );
        Ok(policies)
    }

    pub fn get(&self, role: TierRole) -> &AccessPolicy {
        match role {
            TierRole::Edge => &self.edge,
            TierRole::Compute => &self.compute,
            TierRole::Data => &self.data,
        }
    }

    pub fn admits(&self, source: PeerSource, role: TierRole) -> bool {
        self.get(role).admits(source)
    }

    pub fn admitted_sources(&self, role: TierRole) -> BTreeSet<PeerSource> {
        self.get(role).ingress.iter().map(|r| r.source).collect()
    }

    /// Every tier a connection starting at `role` can reach, `role` included.
    pub fn reachable_from(&self, role: TierRole) -> BTreeSet<TierRole> {
        let mut reached = BTreeSet::from([role]);
        let mut frontier = vec![role];
        while let Some(current) = frontier.pop() {
            for next in TierRole::ALL {
                if !reached.contains(&next) && self.admits(PeerSource::Policy(current), next) {
                    reached.insert(next);
                    frontier.push(next);
                }
            }
        }
        reached
    }

    /// Tiers reachable from the internet.
    pub fn publicly_reachable(&self) -> BTreeSet<TierRole> {
        TierRole::ALL
            .into_iter()
            .filter(|&role| self.admits(PeerSource::AnyIpv4, role))
            .flat_map(|role| self.reachable_from(role))
            .collect()
    }
}

fn declare_group(
    template: &mut Template,
    network: &AddressSpace,
    role: TierRole,
    name: String,
    ingress: Vec<IngressRule>,
) -> ComposeResult<AccessPolicy> {
    // Only address-based rules live inline; peer rules follow once every
    // group exists.
    let inline: Vec<Value> = ingress
        .iter()
        .filter(|r| r.source == PeerSource::AnyIpv4)
        .map(|r| {
            json!({
                "IpProtocol": "tcp",
                "FromPort": r.port,
                "ToPort": r.port,
                "CidrIp": "0.0.0.0/0",
                "Description": r.description,
            })
        })
        .collect();

    let id = template.add(
        ResourceDecl::new(&[policy_path(role)], "AWS::EC2::SecurityGroup")
            .property("GroupName", name.as_str())
            .property("GroupDescription", format!("{role} tier of {name}"))
            .property("VpcId", reference(network.vpc_id()))
            .property(
                "SecurityGroupEgress",
                json!([{
                    "IpProtocol": "-1",
                    "CidrIp": "0.0.0.0/0",
                    "Description": "Allow all outbound traffic by default",
                }]),
            )
            .optional_property(
                "SecurityGroupIngress",
                (!inline.is_empty()).then_some(Value::Array(inline)),
            ),
    )?;
    debug!(%id, %role, %name, rules = ingress.len(), "security policy declared");

    Ok(AccessPolicy {
        id,
        role,
        name,
        ingress,
        allow_all_outbound: true,
    })
}

fn policy_path(role: TierRole) -> String {
    format!("{}SecurityGroup", peer_path(role))
}

fn peer_path(role: TierRole) -> &'static str {
    match role {
        TierRole::Edge => "Alb",
        TierRole::Compute => "Ecs",
        TierRole::Data => "Rds",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierstack_core::ErrorKind;
    use tierstack_core::config::StackConfig;

    fn ports() -> PolicyPorts {
        PolicyPorts {
            service_ports: vec![80],
            application_port: 80,
            database_port: 3306,
        }
    }

    fn provision(ports: &PolicyPorts) -> ComposeResult<(Template, AccessPolicies)> {
        let mut template = Template::new(None);
        let network = AddressSpace::provision(
            &mut template,
            "cdk-training",
            "ap-northeast-1",
            &StackConfig::scaffold("cdk-training").network,
        )?;
        let policies = AccessPolicies::provision(&mut template, &network, "cdk-training", ports)?;
        Ok((template, policies))
    }

    #[test]
    fn chain_admits_only_upstream_neighbour() {
        let (_, policies) = provision(&ports()).unwrap();

        assert_eq!(
            policies.admitted_sources(TierRole::Edge),
            BTreeSet::from([PeerSource::AnyIpv4])
        );
        assert_eq!(
            policies.admitted_sources(TierRole::Compute),
            BTreeSet::from([PeerSource::Policy(TierRole::Edge)])
        );
        assert_eq!(
            policies.admitted_sources(TierRole::Data),
            BTreeSet::from([PeerSource::Policy(TierRole::Compute)])
        );
        assert!(!policies.admits(PeerSource::Policy(TierRole::Edge), TierRole::Data));
        assert!(!policies.admits(PeerSource::AnyIpv4, TierRole::Compute));
        assert!(!policies.admits(PeerSource::AnyIpv4, TierRole::Data));
    }

    #[test]
    fn reachability_is_monotone_down_the_chain() {
        let (_, policies) = provision(&ports()).unwrap();
        let edge = policies.reachable_from(TierRole::Edge);
        let compute = policies.reachable_from(TierRole::Compute);
        let data = policies.reachable_from(TierRole::Data);

        assert!(data.is_subset(&compute));
        assert!(compute.is_subset(&edge));
        assert_eq!(edge, BTreeSet::from(TierRole::ALL));
        assert_eq!(data, BTreeSet::from([TierRole::Data]));
        assert_eq!(policies.publicly_reachable(), edge);
    }

    #[test]
    fn outbound_is_unrestricted_and_names_follow_resource_name() {
        let (template, policies) = provision(&ports()).unwrap();
        for role in TierRole::ALL {
            let policy = policies.get(role);
            assert!(policy.allow_all_outbound);
            let resource = template.resource(&policy.id).unwrap();
            assert_eq!(resource.property("SecurityGroupEgress").unwrap()[0]["CidrIp"], "0.0.0.0/0");
        }
        assert_eq!(policies.get(TierRole::Edge).name, "cdk-training-alb-sg");
        assert_eq!(policies.get(TierRole::Compute).name, "cdk-training-ecs-sg");
        assert_eq!(policies.get(TierRole::Data).name, "cdk-training-rds-sg");
    }

    #[test]
    fn peer_rules_are_single_port() {
        let (template, policies) = provision(&ports()).unwrap();
        let rules: Vec<_> = template
            .resources_of_kind("AWS::EC2::SecurityGroupIngress")
            .map(|(_, r)| r)
            .collect();
        assert_eq!(rules.len(), 2);

        let data_rule = rules
            .iter()
            .find(|r| r.property("GroupId") == Some(&policies.get(TierRole::Data).group_id()))
            .unwrap();
        assert_eq!(data_rule.property("FromPort"), Some(&json!(3306)));
        assert_eq!(data_rule.property("ToPort"), Some(&json!(3306)));
        assert_eq!(
            data_rule.property("SourceSecurityGroupId"),
            Some(&policies.get(TierRole::Compute).group_id())
        );
    }

    #[test]
    fn duplicate_service_ports_open_one_rule() {
        let mut ports = ports();
        ports.service_ports = vec![80, 443, 80];
        let (template, policies) = provision(&ports).unwrap();

        let edge = policies.get(TierRole::Edge);
        let opened: Vec<u16> = edge.ingress.iter().map(|r| r.port).collect();
        assert_eq!(opened, vec![80, 443]);
        let inline = template
            .resource(&edge.id)
            .unwrap()
            .property("SecurityGroupIngress")
            .unwrap();
        assert_eq!(inline.as_array().unwrap().len(), 2);
    }

    #[test]
    fn zero_ports_rejected() {
        let mut bad = ports();
        bad.database_port = 0;
        assert_eq!(provision(&bad).unwrap_err().kind(), ErrorKind::Configuration);

        let mut bad = ports();
        bad.service_ports.clear();
        assert!(provision(&bad).is_err());
    }
}
