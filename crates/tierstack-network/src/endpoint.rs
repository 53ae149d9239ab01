//! Private connectivity endpoints to managed services.
//!
//! Isolated tiers have no route to the internet, so image pulls, log
//! delivery, secret retrieval and object storage all go through endpoints
//! inside the VPC.

use serde_json::{Value, json};
use tracing::debug;

use tierstack_core::template::{ResourceDecl, reference};
use tierstack_core::{ComposeResult, LogicalId, Template};

/// Managed services reached through a private endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointService {
    /// Container registry API (auth, manifests).
    EcrApi,
    /// Container registry image layer pulls.
    EcrDocker,
    CloudWatchLogs,
    SecretsManager,
    S3,
}

/// Interface endpoints get ENIs in the subnets; gateway endpoints are
/// route-table entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Interface,
    Gateway,
}

impl EndpointService {
    /// Everything an isolated container workload needs to start.
    pub const REQUIRED: [EndpointService; 5] = [
        EndpointService::EcrApi,
        EndpointService::EcrDocker,
        EndpointService::CloudWatchLogs,
        EndpointService::SecretsManager,
        EndpointService::S3,
    ];

    pub fn kind(&self) -> EndpointKind {
        match self {
            EndpointService::S3 => EndpointKind::Gateway,
            _ => EndpointKind::Interface,
        }
    }

    fn service_suffix(&self) -> &'static str {
        match self {
            EndpointService::EcrApi => "ecr.api",
            EndpointService::EcrDocker => "ecr.dkr",
            EndpointService::CloudWatchLogs => "logs",
            EndpointService::SecretsManager => "secretsmanager",
            EndpointService::S3 => "s3",
        }
    }

    fn construct_name(&self) -> &'static str {
        match self {
            EndpointService::EcrApi => "EcrEndpoint",
            EndpointService::EcrDocker => "EcrDkrEndpoint",
            EndpointService::CloudWatchLogs => "CwLogsEndpoint",
            EndpointService::SecretsManager => "SecretsManagerEndpoint",
            EndpointService::S3 => "S3Endpoint",
        }
    }

    /// Regional service name, e.g. `com.amazonaws.ap-northeast-1.ecr.dkr`.
    pub fn service_name(&self, region: &str) -> String {
        format!("com.amazonaws.{region}.{}", self.service_suffix())
    }
}

/// A declared private endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PrivateEndpoint {
    pub id: LogicalId,
    pub service: EndpointService,
}

impl PrivateEndpoint {
    pub fn kind(&self) -> EndpointKind {
        self.service.kind()
    }
}

/// Where endpoints attach inside the VPC.
pub(crate) struct EndpointPlacement<'a> {
    pub vpc: &'a LogicalId,
    pub vpc_cidr: &'a str,
    pub region: &'a str,
    /// Subnets that receive interface endpoint ENIs.
    pub subnets: &'a [LogicalId],
    /// Route tables that receive gateway endpoint routes.
    pub route_tables: &'a [LogicalId],
}

/// Declare the endpoint security group and every required endpoint.
pub(crate) fn declare_endpoints(
    template: &mut Template,
    resource_name: &str,
    placement: &EndpointPlacement<'_>,
) -> ComposeResult<(LogicalId, Vec<PrivateEndpoint>)> {
    let sg = template.add(
        ResourceDecl::new(&["Vpc", "EndpointSecurityGroup"], "AWS::EC2::SecurityGroup")
            .property(
                "GroupDescription",
                format!("{resource_name} private endpoints"),
            )
            .property("VpcId", reference(placement.vpc))
            .property(
                "SecurityGroupIngress",
                json!([{
                    "IpProtocol": "tcp",
                    "FromPort": 443,
                    "ToPort": 443,
                    "CidrIp": placement.vpc_cidr,
                    "Description": "HTTPS from inside the VPC",
                }]),
            ),
    )?;

    let subnet_refs: Vec<Value> = placement.subnets.iter().map(reference).collect();
    let route_table_refs: Vec<Value> = placement.route_tables.iter().map(reference).collect();

    let mut endpoints = Vec::with_capacity(EndpointService::REQUIRED.len());
    for service in EndpointService::REQUIRED {
        let decl = ResourceDecl::new(&["Vpc", service.construct_name()], "AWS::EC2::VPCEndpoint")
            .property("VpcId", reference(placement.vpc))
            .property("ServiceName", service.service_name(placement.region));
        let decl = match service.kind() {
            EndpointKind::Interface => decl
                .property("VpcEndpointType", "Interface")
                .property("PrivateDnsEnabled", true)
                .property("SubnetIds", Value::Array(subnet_refs.clone()))
                .property("SecurityGroupIds", json!([reference(&sg)])),
            EndpointKind::Gateway => decl
                .property("VpcEndpointType", "Gateway")
                .property("RouteTableIds", Value::Array(route_table_refs.clone())),
        };
        let id = template.add(decl)?;
        debug!(%id, service = ?service, "private endpoint declared");
        endpoints.push(PrivateEndpoint { id, service });
    }

    Ok((sg, endpoints))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_object_storage_is_a_gateway() {
        let gateways: Vec<_> = EndpointService::REQUIRED
            .iter()
            .filter(|s| s.kind() == EndpointKind::Gateway)
            .collect();
        assert_eq!(gateways, vec![&EndpointService::S3]);
    }

    #[test]
    fn regional_service_names() {
        assert_eq!(
            EndpointService::EcrDocker.service_name("ap-northeast-1"),
            "com.amazonaws.ap-northeast-1.ecr.dkr"
        );
        assert_eq!(
            EndpointService::SecretsManager.service_name("us-east-1"),
            "com.amazonaws.us-east-1.secretsmanager"
        );
    }
}
