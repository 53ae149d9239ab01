//! Address space allocation.
//!
//! Subnets are carved sequentially out of the VPC block: group by group, and
//! within a group one subnet per availability zone, each aligned to its own
//! mask. Sequential aligned allocation never overlaps, so the only failure
//! mode is running out of addresses.
//!
//! ```text
//! 192.168.0.0/24, mask /27, zones [a, c]
//!   public   a 192.168.0.0/27   c 192.168.0.32/27
//!   isolated a 192.168.0.64/27  c 192.168.0.96/27
//! ```

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde_json::{Value, json};
use tracing::{debug, info};

use tierstack_core::config::{NetworkConfig, SubnetGroupConfig};
use tierstack_core::template::{ResourceDecl, reference};
use tierstack_core::{ComposeError, ComposeResult, LogicalId, SubnetKind, Template, TierRole};

use crate::endpoint::{EndpointPlacement, PrivateEndpoint, declare_endpoints};

/// Smallest and largest VPC / subnet prefixes the platform accepts.
const MIN_PREFIX: u8 = 16;
const MAX_PREFIX: u8 = 28;

const RESOURCE: &str = "Vpc";

/// Default route of a subnet, if any.
#[derive(Debug, Clone, PartialEq)]
pub enum Egress {
    InternetGateway(LogicalId),
    Nat(LogicalId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subnet {
    pub id: LogicalId,
    pub route_table: LogicalId,
    pub cidr: Ipv4Net,
    pub availability_zone: String,
    pub egress: Option<Egress>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubnetGroup {
    pub name: String,
    pub kind: SubnetKind,
    pub subnets: Vec<Subnet>,
}

impl SubnetGroup {
    pub fn availability_zones(&self) -> Vec<&str> {
        self.subnets.iter().map(|s| s.availability_zone.as_str()).collect()
    }

    /// Number of subnets in this group with a default route out of the VPC.
    pub fn egress_paths(&self) -> usize {
        self.subnets.iter().filter(|s| s.egress.is_some()).count()
    }
}

/// The subnets a tier is placed into.
#[derive(Debug, Clone, PartialEq)]
pub struct SubnetSelection {
    pub group: String,
    pub kind: SubnetKind,
    pub subnet_ids: Vec<LogicalId>,
    pub availability_zones: Vec<String>,
}

impl SubnetSelection {
    /// `[{"Ref": subnet}, ...]` for a `SubnetIds` property.
    pub fn subnet_refs(&self) -> Value {
        Value::Array(self.subnet_ids.iter().map(reference).collect())
    }
}

/// The deployment's isolated network.
#[derive(Debug, Clone)]
pub struct AddressSpace {
    vpc: LogicalId,
    cidr: Ipv4Net,
    availability_zones: Vec<String>,
    groups: Vec<SubnetGroup>,
    nat_gateways: Vec<LogicalId>,
    endpoints: Vec<PrivateEndpoint>,
    tiers: [(TierRole, String); 3],
}

impl AddressSpace {
    /// Validate the network block, then declare the VPC, its subnets,
    /// routing, and the private endpoints isolated tiers depend on.
    pub fn provision(
        template: &mut Template,
        resource_name: &str,
        region: &str,
        config: &NetworkConfig,
    ) -> ComposeResult<Self> {
        let cidr = parse_block(&config.cidr)?;
        let zones = validate_zones(&config.availability_zones)?;
        validate_groups(config, &cidr, &zones)?;
        let plan = allocate(&cidr, &config.subnets, &zones)?;

        let vpc = template.add(
            ResourceDecl::new(&["Vpc"], "AWS::EC2::VPC")
                .property("CidrBlock", cidr.to_string())
                .property("EnableDnsHostnames", true)
                .property("EnableDnsSupport", true)
                .property("Tags", name_tag(&format!("{resource_name}-vpc"))),
        )?;

        let has_public = config.subnets.iter().any(|g| g.kind == SubnetKind::Public);
        let igw = if has_public {
            let igw = template.add(
                ResourceDecl::new(&["Vpc", "IGW"], "AWS::EC2::InternetGateway")
                    .property("Tags", name_tag(&format!("{resource_name}-igw"))),
            )?;
            let attachment = template.add(
                ResourceDecl::new(&["Vpc", "VPCGW"], "AWS::EC2::VPCGatewayAttachment")
                    .property("VpcId", reference(&vpc))
                    .property("InternetGatewayId", reference(&igw)),
            )?;
            Some((igw, attachment))
        } else {
            None
        };

        let mut groups = Vec::with_capacity(plan.len());
        let mut nat_gateways = Vec::new();

        // Public groups first so NAT gateways exist before private routes use them.
        let mut ordered: Vec<&PlannedGroup> = plan.iter().collect();
        ordered.sort_by_key(|g| g.kind != SubnetKind::Public);

        for group in ordered {
            let mut subnets = Vec::with_capacity(group.subnets.len());
            for (index, (zone, block)) in group.subnets.iter().enumerate() {
                let construct = format!("{}Subnet{}", pascal(&group.name), index + 1);
                let subnet_name = format!("{resource_name}-{}-{zone}", group.name);
                let subnet = template.add(
                    ResourceDecl::new(&["Vpc", construct.as_str()], "AWS::EC2::Subnet")
                        .property("VpcId", reference(&vpc))
                        .property("CidrBlock", block.to_string())
                        .property("AvailabilityZone", zone.as_str())
                        .property("MapPublicIpOnLaunch", group.kind == SubnetKind::Public)
                        .property(
                            "Tags",
                            json!([
                                { "Key": "Name", "Value": subnet_name },
                                { "Key": "subnet-name", "Value": group.name },
                                { "Key": "subnet-type", "Value": group.kind.label() },
                            ]),
                        ),
                )?;
                let route_table = template.add(
                    ResourceDecl::new(&["Vpc", construct.as_str(), "RouteTable"], "AWS::EC2::RouteTable")
                        .property("VpcId", reference(&vpc))
                        .property("Tags", name_tag(&subnet_name)),
                )?;
                template.add(
                    ResourceDecl::new(
                        &["Vpc", construct.as_str(), "RouteTableAssociation"],
                        "AWS::EC2::SubnetRouteTableAssociation",
                    )
                    .property("SubnetId", reference(&subnet))
                    .property("RouteTableId", reference(&route_table)),
                )?;

                let egress = match group.kind {
                    SubnetKind::Public => {
                        // validate_groups guarantees a gateway whenever a public group exists.
                        let (igw, attachment) = igw.as_ref().ok_or_else(|| {
                            ComposeError::resource(RESOURCE, "public subnet without internet gateway")
                        })?;
                        template.add(
                            ResourceDecl::new(&["Vpc", construct.as_str(), "DefaultRoute"], "AWS::EC2::Route")
                                .property("RouteTableId", reference(&route_table))
                                .property("DestinationCidrBlock", "0.0.0.0/0")
                                .property("GatewayId", reference(igw))
                                .depends_on(attachment),
                        )?;
                        if (nat_gateways.len() as u32) < config.nat_gateways {
                            let eip = template.add(
                                ResourceDecl::new(&["Vpc", construct.as_str(), "EIP"], "AWS::EC2::EIP")
                                    .property("Domain", "vpc"),
                            )?;
                            let nat = template.add(
                                ResourceDecl::new(&["Vpc", construct.as_str(), "NATGateway"], "AWS::EC2::NatGateway")
                                    .property("SubnetId", reference(&subnet))
                                    .property("AllocationId", json!({ "Fn::GetAtt": [eip.as_str(), "AllocationId"] }))
                                    .depends_on(attachment),
                            )?;
                            nat_gateways.push(nat);
                        }
                        Some(Egress::InternetGateway(igw.clone()))
                    }
                    SubnetKind::PrivateWithEgress => {
                        let nat = nat_gateways[index % nat_gateways.len()].clone();
                        template.add(
                            ResourceDecl::new(&["Vpc", construct.as_str(), "DefaultRoute"], "AWS::EC2::Route")
                                .property("RouteTableId", reference(&route_table))
                                .property("DestinationCidrBlock", "0.0.0.0/0")
                                .property("NatGatewayId", reference(&nat)),
                        )?;
                        Some(Egress::Nat(nat))
                    }
                    SubnetKind::Isolated => None,
                };

                subnets.push(Subnet {
                    id: subnet,
                    route_table,
                    cidr: *block,
                    availability_zone: zone.clone(),
                    egress,
                });
            }
            groups.push(SubnetGroup {
                name: group.name.clone(),
                kind: group.kind,
                subnets,
            });
        }
        // Keep the configured group order for callers.
        groups.sort_by_key(|g| {
            config
                .subnets
                .iter()
                .position(|c| c.name == g.name)
                .unwrap_or(usize::MAX)
        });

        let private: Vec<&Subnet> = groups
            .iter()
            .filter(|g| g.kind != SubnetKind::Public)
            .flat_map(|g| g.subnets.iter())
            .collect();
        let endpoints = if private.is_empty() {
            Vec::new()
        } else {
            // Interface endpoints take one ENI per zone; use the first private subnet in each.
            let mut seen = HashSet::new();
            let endpoint_subnets: Vec<LogicalId> = private
                .iter()
                .filter(|s| seen.insert(s.availability_zone.clone()))
                .map(|s| s.id.clone())
                .collect();
            let private_tables: Vec<LogicalId> =
                private.iter().map(|s| s.route_table.clone()).collect();
            let cidr_text = cidr.to_string();
            let placement = EndpointPlacement {
                vpc: &vpc,
                vpc_cidr: &cidr_text,
                region,
                subnets: &endpoint_subnets,
                route_tables: &private_tables,
            };
            let (_, endpoints) = declare_endpoints(template, resource_name, &placement)?;
            endpoints
        };

        let tiers = [
            (TierRole::Edge, config.tiers.edge.clone()),
            (TierRole::Compute, config.tiers.compute.clone()),
            (TierRole::Data, config.tiers.data.clone()),
        ];

        info!(
            %cidr,
            zones = zones.len(),
            groups = groups.len(),
            nat_gateways = nat_gateways.len(),
            endpoints = endpoints.len(),
            "address space provisioned"
        );

        Ok(Self {
            vpc,
            cidr,
            availability_zones: zones,
            groups,
            nat_gateways,
            endpoints,
            tiers,
        })
    }

    pub fn vpc_id(&self) -> &LogicalId {
        &self.vpc
    }

    pub fn cidr(&self) -> Ipv4Net {
        self.cidr
    }

    pub fn availability_zones(&self) -> &[String] {
        &self.availability_zones
    }

    pub fn groups(&self) -> &[SubnetGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&SubnetGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn nat_gateways(&self) -> &[LogicalId] {
        &self.nat_gateways
    }

    pub fn endpoints(&self) -> &[PrivateEndpoint] {
        &self.endpoints
    }

    /// Select subnets by group name.
    pub fn select(&self, name: &str) -> ComposeResult<SubnetSelection> {
        let group = self.group(name).ok_or_else(|| {
            ComposeError::configuration(
                RESOURCE,
                "subnets",
                format!("no subnet group named {name:?}"),
            )
        })?;
        Ok(selection(group))
    }

    /// Select every subnet of a kind across groups.
    pub fn select_kind(&self, kind: SubnetKind) -> ComposeResult<SubnetSelection> {
        let matching: Vec<&SubnetGroup> = self.groups.iter().filter(|g| g.kind == kind).collect();
        if matching.is_empty() {
            return Err(ComposeError::configuration(
                RESOURCE,
                "subnets",
                format!("no {} subnet group", kind.label().to_lowercase()),
            ));
        }
        let mut zones = Vec::new();
        let mut ids = Vec::new();
        for group in &matching {
            for subnet in &group.subnets {
                ids.push(subnet.id.clone());
                if !zones.contains(&subnet.availability_zone) {
                    zones.push(subnet.availability_zone.clone());
                }
            }
        }
        Ok(SubnetSelection {
            group: matching
                .iter()
                .map(|g| g.name.as_str())
                .collect::<Vec<_>>()
                .join(","),
            kind,
            subnet_ids: ids,
            availability_zones: zones,
        })
    }

    /// Subnets of the group mapped to a tier.
    pub fn select_tier(&self, role: TierRole) -> ComposeResult<SubnetSelection> {
        let name = self
            .tiers
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, name)| name.as_str())
            .unwrap_or_default();
        self.select(name)
    }
}

fn selection(group: &SubnetGroup) -> SubnetSelection {
    SubnetSelection {
        group: group.name.clone(),
        kind: group.kind,
        subnet_ids: group.subnets.iter().map(|s| s.id.clone()).collect(),
        availability_zones: group
            .subnets
            .iter()
            .map(|s| s.availability_zone.clone())
            .collect(),
    }
}

// ── Validation ────────────────────────────────────────────────────

fn parse_block(cidr: &str) -> ComposeResult<Ipv4Net> {
    let net: Ipv4Net = cidr.parse().map_err(|_| {
        ComposeError::configuration(RESOURCE, "cidr", format!("{cidr:?} is not an IPv4 CIDR block"))
    })?;
    if net.network() != net.addr() {
        return Err(ComposeError::configuration(
            RESOURCE,
            "cidr",
            format!("{cidr} has host bits set (did you mean {}?)", net.trunc()),
        ));
    }
    if !(MIN_PREFIX..=MAX_PREFIX).contains(&net.prefix_len()) {
        return Err(ComposeError::configuration(
            RESOURCE,
            "cidr",
            format!("prefix /{} must be between /{MIN_PREFIX} and /{MAX_PREFIX}", net.prefix_len()),
        ));
    }
    Ok(net)
}

fn validate_zones(zones: &[String]) -> ComposeResult<Vec<String>> {
    if zones.is_empty() {
        return Err(ComposeError::configuration(
            RESOURCE,
            "availability_zones",
            "at least one availability zone is required",
        ));
    }
    let mut seen = HashSet::new();
    for zone in zones {
        if zone.trim().is_empty() {
            return Err(ComposeError::configuration(
                RESOURCE,
                "availability_zones",
                "zone names must not be empty",
            ));
        }
        if !seen.insert(zone.as_str()) {
            return Err(ComposeError::configuration(
                RESOURCE,
                "availability_zones",
                format!("{zone} is listed twice"),
            ));
        }
    }
    Ok(zones.to_vec())
}

fn validate_groups(config: &NetworkConfig, cidr: &Ipv4Net, zones: &[String]) -> ComposeResult<()> {
    if config.subnets.is_empty() {
        return Err(ComposeError::configuration(
            RESOURCE,
            "subnets",
            "at least one subnet group is required",
        ));
    }

    let mut names = HashSet::new();
    for group in &config.subnets {
        if !names.insert(group.name.as_str()) {
            return Err(ComposeError::configuration(
                RESOURCE,
                "subnets",
                format!("subnet group {:?} is defined twice", group.name),
            ));
        }
        if group.mask < cidr.prefix_len() || group.mask > MAX_PREFIX {
            return Err(ComposeError::configuration(
                RESOURCE,
                format!("subnets.{}.mask", group.name),
                format!(
                    "/{} does not fit in {cidr} (allowed /{}../{MAX_PREFIX})",
                    group.mask,
                    cidr.prefix_len()
                ),
            ));
        }
        if let Some(group_zones) = &group.availability_zones {
            if group_zones.is_empty() {
                return Err(ComposeError::configuration(
                    RESOURCE,
                    format!("subnets.{}.availability_zones", group.name),
                    "must list at least one zone when set",
                ));
            }
            if let Some(stray) = group_zones.iter().find(|z| !zones.contains(z)) {
                return Err(ComposeError::configuration(
                    RESOURCE,
                    format!("subnets.{}.availability_zones", group.name),
                    format!("{stray} is not one of the deployment's zones"),
                ));
            }
        }
    }

    let publics = config.subnets.iter().filter(|g| g.kind == SubnetKind::Public).count();
    let wants_nat = config
        .subnets
        .iter()
        .any(|g| g.kind == SubnetKind::PrivateWithEgress);
    if wants_nat && config.nat_gateways == 0 {
        return Err(ComposeError::configuration(
            RESOURCE,
            "nat_gateways",
            "private_with_egress subnets need at least one NAT gateway; use kind = \"isolated\" for tiers without egress",
        ));
    }
    if config.nat_gateways > 0 && publics == 0 {
        return Err(ComposeError::configuration(
            RESOURCE,
            "nat_gateways",
            "NAT gateways need a public subnet group to live in",
        ));
    }
    if config.nat_gateways as usize > zones.len() {
        return Err(ComposeError::configuration(
            RESOURCE,
            "nat_gateways",
            format!(
                "{} NAT gateways requested but only {} availability zones",
                config.nat_gateways,
                zones.len()
            ),
        ));
    }

    for (role, name) in [
        (TierRole::Edge, &config.tiers.edge),
        (TierRole::Compute, &config.tiers.compute),
        (TierRole::Data, &config.tiers.data),
    ] {
        let group = config.subnets.iter().find(|g| &g.name == name).ok_or_else(|| {
            ComposeError::configuration(
                RESOURCE,
                format!("tiers.{role}"),
                format!("no subnet group named {name:?}"),
            )
        })?;
        if role == TierRole::Edge && group.kind != SubnetKind::Public {
            return Err(ComposeError::configuration(
                RESOURCE,
                "tiers.edge",
                format!("edge tier must be placed in a public group, {name:?} is not"),
            ));
        }
    }
    Ok(())
}

// ── Allocation ────────────────────────────────────────────────────

struct PlannedGroup {
    name: String,
    kind: SubnetKind,
    subnets: Vec<(String, Ipv4Net)>,
}

fn allocate(
    parent: &Ipv4Net,
    groups: &[SubnetGroupConfig],
    zones: &[String],
) -> ComposeResult<Vec<PlannedGroup>> {
    let base = u32::from(parent.network()) as u64;
    let end = base + (1u64 << (32 - parent.prefix_len()));
    let mut cursor = base;

    let mut planned = Vec::with_capacity(groups.len());
    for group in groups {
        let size = 1u64 << (32 - group.mask);
        let group_zones: Vec<String> = match &group.availability_zones {
            Some(z) => zones.iter().filter(|zone| z.contains(zone)).cloned().collect(),
            None => zones.to_vec(),
        };

        let mut subnets = Vec::with_capacity(group_zones.len());
        for zone in group_zones {
            // Align up to the subnet's own boundary.
            cursor = cursor.div_ceil(size) * size;
            if cursor + size > end {
                return Err(ComposeError::configuration(
                    RESOURCE,
                    format!("subnets.{}.mask", group.name),
                    format!("subnets need more addresses than {parent} provides"),
                ));
            }
            let network = Ipv4Net::new(Ipv4Addr::from(cursor as u32), group.mask).map_err(|_| {
                ComposeError::configuration(
                    RESOURCE,
                    format!("subnets.{}.mask", group.name),
                    format!("/{} is not a valid prefix", group.mask),
                )
            })?;
            debug!(group = %group.name, %zone, %network, "subnet allocated");
            subnets.push((zone, network));
            cursor += size;
        }
        planned.push(PlannedGroup {
            name: group.name.clone(),
            kind: group.kind,
            subnets,
        });
    }
    Ok(planned)
}

fn name_tag(name: &str) -> Value {
    json!([{ "Key": "Name", "Value": name }])
}

/// `ecs-isolated` → `EcsIsolated`.
fn pascal(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
