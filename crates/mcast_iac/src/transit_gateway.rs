//! Transit Gateway with a multicast domain spanning two private subnets.

use tracing::{info, warn};

use crate::cidr::Ipv4Cidr;
use crate::config::{DeploymentConfig, Tag};
use crate::error::{IacError, IacResult};
use crate::network::NetworkDescriptor;
use crate::rules::{AclEntry, AclTraffic, PortRange, TrafficDirection};
use crate::stack::StackDescriptor;
use crate::tags::DECLARED_TAG_PRIORITY;
use crate::template::{Expr, Output, Resource, ResourceAddr};

const DESCRIPTION: &str = "Miztiik Automation: Transit Gateway Stack";

/// Number of subnets associated with the multicast domain.
pub const MULTICAST_SUBNETS: usize = 2;

/// Whether `asn` is usable as a Transit Gateway Amazon-side ASN.
pub fn is_private_asn(asn: u32) -> bool {
    (64512..=65534).contains(&asn) || (4_200_000_000..=4_294_967_294).contains(&asn)
}

/// VPC attachment of the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentDescriptor {
    pub addr: ResourceAddr,
    pub subnets: Vec<ResourceAddr>,
}

/// Association of one subnet with the multicast domain.
#[derive(Debug, Clone, PartialEq)]
pub struct MulticastAssociation {
    pub addr: ResourceAddr,
    pub subnet: ResourceAddr,
    pub attachment: ResourceAddr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MulticastDomainDescriptor {
    pub addr: ResourceAddr,
    pub igmpv2_support: bool,
    pub associations: Vec<MulticastAssociation>,
}

/// Network ACL applied to one private subnet.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkAclDescriptor {
    pub addr: ResourceAddr,
    pub subnet: ResourceAddr,
    pub entries: Vec<AclEntry>,
}

impl NetworkAclDescriptor {
    pub fn entries(&self, direction: TrafficDirection) -> impl Iterator<Item = &AclEntry> {
        self.entries.iter().filter(move |e| e.direction == direction)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitGatewayDescriptor {
    pub stack: StackDescriptor,
    pub gateway: ResourceAddr,
    pub asn: u32,
    pub multicast_support: bool,
    pub attachment: AttachmentDescriptor,
    pub multicast_domain: MulticastDomainDescriptor,
    pub nacl: NetworkAclDescriptor,
}

impl TransitGatewayDescriptor {
    pub fn gateway_id(&self) -> Expr {
        self.gateway.attr("Id")
    }
}

/// Multicast NACL rule set.
///
/// Rule 100 allows everything in both directions and is evaluated first, so
/// the narrower rules behind it never decide anything. They are kept with
/// their numbers for compatibility with existing deployments.
pub fn multicast_acl_entries(vpc_cidr: Ipv4Cidr) -> IacResult<Vec<AclEntry>> {
    use TrafficDirection::{Egress, Ingress};

    let igmp_general_query: Ipv4Cidr = "224.0.0.1/32".parse()?;
    let igmp_leave_group: Ipv4Cidr = "224.0.0.2/32".parse()?;
    let udp = AclTraffic::Udp(PortRange::all());

    Ok(vec![
        AclEntry::allow(100, Ingress, Ipv4Cidr::any(), AclTraffic::All),
        AclEntry::allow(200, Ingress, igmp_general_query, AclTraffic::any_icmp()),
        AclEntry::allow(300, Ingress, vpc_cidr, udp),
        AclEntry::allow(100, Egress, Ipv4Cidr::any(), AclTraffic::All),
        AclEntry::allow(200, Egress, vpc_cidr, udp),
        AclEntry::allow(300, Egress, igmp_leave_group, AclTraffic::any_icmp()),
        AclEntry::allow(400, Egress, vpc_cidr, AclTraffic::any_icmp()),
    ])
}

/// Declare the Transit Gateway stack on top of `network`.
pub fn build_transit_gateway(
    config: &DeploymentConfig,
    network: &NetworkDescriptor,
) -> IacResult<TransitGatewayDescriptor> {
    let asn = config.transit_gateway.asn;
    if !is_private_asn(asn) {
        return Err(IacError::InvalidAsn(asn));
    }
    let private = &network.private_subnets;
    if private.len() < MULTICAST_SUBNETS {
        return Err(IacError::InsufficientSubnets {
            required: MULTICAST_SUBNETS,
            found: private.len(),
        });
    }
    info!("Declaring Transit Gateway (ASN {}) in {}", asn, config.stacks.transit_gateway);

    let mut stack = StackDescriptor::new(&config.stacks.transit_gateway, DESCRIPTION)?;
    let name = |value: &str| Tag::new("Name", value);

    let gateway = stack.add(
        Resource::new("tgwForMulticast1", "AWS::EC2::TransitGateway")
            .prop("AmazonSideAsn", i64::from(asn))
            .prop("AutoAcceptSharedAttachments", "enable")
            .prop("DefaultRouteTableAssociation", "enable")
            .prop("DefaultRouteTablePropagation", "enable")
            .prop("DnsSupport", "enable")
            .prop("MulticastSupport", "enable")
            .prop("Description", "Transit Gateway for Multicast")
            .tag(name("tgwForMulticast1"), DECLARED_TAG_PRIORITY),
    )?;

    let subnet_ids: Vec<Expr> = private.iter().map(|s| s.subnet_id()).collect();
    let attachment = stack.add(
        Resource::new("tgwForMulticastAttach1", "AWS::EC2::TransitGatewayAttachment")
            .prop("TransitGatewayId", gateway.reference())
            .prop("VpcId", network.vpc_id())
            .prop("SubnetIds", Expr::List(subnet_ids))
            .tag(name("tgwForMulticastAttach1"), DECLARED_TAG_PRIORITY),
    )?;

    let domain = stack.add(
        Resource::new("tgwMulticastDomain1", "AWS::EC2::TransitGatewayMulticastDomain")
            .prop("TransitGatewayId", gateway.attr("Id"))
            .prop("Options", Expr::map([("Igmpv2Support", Expr::str("enable"))]))
            .tag(name("tgwMulticastDomain1"), DECLARED_TAG_PRIORITY),
    )?;

    let mut associations = Vec::with_capacity(MULTICAST_SUBNETS);
    for (index, subnet) in private.iter().take(MULTICAST_SUBNETS).enumerate() {
        let addr = stack.add(
            Resource::new(
                format!("tgwMulticastDomainAssn{}", index + 1),
                "AWS::EC2::TransitGatewayMulticastDomainAssociation",
            )
            .prop("SubnetId", subnet.subnet_id())
            .prop("TransitGatewayAttachmentId", attachment.reference())
            .prop("TransitGatewayMulticastDomainId", domain.reference()),
        )?;
        associations.push(MulticastAssociation {
            addr,
            subnet: subnet.addr.clone(),
            attachment: attachment.clone(),
        });
    }

    let nacl = declare_multicast_nacl(&mut stack, network)?;

    stack.add_output(Output::automation_from(&config.project.source_info))?;
    stack.add_output(
        Output::new("TransitGatewayId", gateway.attr("Id")).with_description("Transit Gateway Id."),
    )?;

    Ok(TransitGatewayDescriptor {
        stack,
        gateway,
        asn,
        multicast_support: true,
        attachment: AttachmentDescriptor {
            addr: attachment,
            subnets: private.iter().map(|s| s.addr.clone()).collect(),
        },
        multicast_domain: MulticastDomainDescriptor {
            addr: domain,
            igmpv2_support: true,
            associations,
        },
        nacl,
    })
}

fn declare_multicast_nacl(
    stack: &mut StackDescriptor,
    network: &NetworkDescriptor,
) -> IacResult<NetworkAclDescriptor> {
    // One representative subnet: the last private subnet.
    let subnet = network
        .private_subnets
        .last()
        .ok_or(IacError::InsufficientSubnets {
            required: MULTICAST_SUBNETS,
            found: 0,
        })?;

    let acl = stack.add(
        Resource::new("multicastNacl", "AWS::EC2::NetworkAcl")
            .prop("VpcId", network.vpc_id())
            .tag(Tag::new("Name", "multicastNacl"), DECLARED_TAG_PRIORITY),
    )?;
    stack.add(
        Resource::new("multicastNaclDefaultAssociation", "AWS::EC2::SubnetNetworkAclAssociation")
            .prop("NetworkAclId", acl.reference())
            .prop("SubnetId", subnet.subnet_id()),
    )?;

    let entries = multicast_acl_entries(network.cidr_block)?;
    for entry in &entries {
        let mut resource = Resource::new(
            format!("multicastNacl{}", entry.id_suffix()),
            "AWS::EC2::NetworkAclEntry",
        )
        .prop("NetworkAclId", acl.reference());
        for (key, value) in entry.properties() {
            resource = resource.prop(key, value);
        }
        stack.add(resource)?;
    }
    warn!(
        "multicastNacl rule 100 allows all traffic; rules 200+ on {} are not restrictive",
        subnet.addr.logical_id
    );

    Ok(NetworkAclDescriptor {
        addr: acl,
        subnet: subnet.addr.clone(),
        entries,
    })
}
