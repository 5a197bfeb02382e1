//! Network foundation: a multi-AZ VPC with public and private subnets.

use tracing::{debug, info};

use crate::cidr::Ipv4Cidr;
use crate::config::{DeploymentConfig, Tag};
use crate::error::{IacError, IacResult};
use crate::stack::StackDescriptor;
use crate::tags::DEFAULT_TAG_PRIORITY;
use crate::template::{Expr, Output, Resource, ResourceAddr};

const DESCRIPTION: &str = "Miztiik Automation: Custom Multi-AZ VPC";

/// Subnet placement class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubnetKind {
    Public,
    /// Private subnet with egress through a NAT gateway.
    PrivateWithNat,
}

impl SubnetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubnetKind::Public => "Public",
            SubnetKind::PrivateWithNat => "Private",
        }
    }
}

/// A declared subnet.
#[derive(Debug, Clone, PartialEq)]
pub struct SubnetDescriptor {
    pub addr: ResourceAddr,
    pub kind: SubnetKind,
    pub cidr: Ipv4Cidr,
    pub az_index: usize,
}

impl SubnetDescriptor {
    pub fn subnet_id(&self) -> Expr {
        self.addr.reference()
    }
}

/// The network every other stack is placed into. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkDescriptor {
    pub stack: StackDescriptor,
    pub vpc: ResourceAddr,
    pub cidr_block: Ipv4Cidr,
    pub public_subnets: Vec<SubnetDescriptor>,
    pub private_subnets: Vec<SubnetDescriptor>,
}

impl NetworkDescriptor {
    pub fn vpc_id(&self) -> Expr {
        self.vpc.reference()
    }

    pub fn stack_name(&self) -> &str {
        self.stack.name()
    }

    pub fn is_private_subnet(&self, subnet: &ResourceAddr) -> bool {
        self.private_subnets.iter().any(|s| &s.addr == subnet)
    }

    /// Private subnets the way a `PRIVATE_WITH_NAT` selection returns them.
    pub fn select_subnets(&self, kind: SubnetKind) -> &[SubnetDescriptor] {
        match kind {
            SubnetKind::Public => &self.public_subnets,
            SubnetKind::PrivateWithNat => &self.private_subnets,
        }
    }
}

/// Declare the VPC stack.
pub fn build_network(config: &DeploymentConfig) -> IacResult<NetworkDescriptor> {
    let settings = &config.network;
    let cidr_block: Ipv4Cidr = settings.cidr.parse()?;
    info!("Declaring network {} in {}", cidr_block, config.stacks.network);

    if settings.max_azs == 0 {
        return Err(IacError::Config("network.max_azs must be at least 1".to_string()));
    }
    if settings.nat_gateways == 0 {
        return Err(IacError::Config(
            "private subnets route through NAT: network.nat_gateways must be at least 1"
                .to_string(),
        ));
    }
    let nat_count = settings.nat_gateways.min(settings.max_azs);
    let subnet_count = settings.max_azs.checked_mul(2).ok_or_else(|| {
        IacError::Config(format!("network.max_azs is too large: {}", settings.max_azs))
    })?;

    let blocks = cidr_block
        .subdivide(settings.subnet_prefix, subnet_count)
        .ok_or_else(|| IacError::AddressSpaceExhausted {
            cidr: cidr_block.to_string(),
            prefix: settings.subnet_prefix,
            count: subnet_count,
        })?;
    let (public_blocks, private_blocks) = blocks.split_at(settings.max_azs);

    let mut stack = StackDescriptor::new(&config.stacks.network, DESCRIPTION)?;
    let name_tag =
        |suffix: &str| Tag::new("Name", format!("{}/Vpc{}", config.stacks.network, suffix));

    let vpc = stack.add(
        Resource::new("Vpc", "AWS::EC2::VPC")
            .prop("CidrBlock", cidr_block.to_string())
            .prop("EnableDnsHostnames", true)
            .prop("EnableDnsSupport", true)
            .prop("InstanceTenancy", "default")
            .tag(name_tag(""), DEFAULT_TAG_PRIORITY),
    )?;

    let igw = stack.add(
        Resource::new("VpcIGW", "AWS::EC2::InternetGateway")
            .tag(name_tag(""), DEFAULT_TAG_PRIORITY),
    )?;
    stack.add(
        Resource::new("VpcVPCGW", "AWS::EC2::VPCGatewayAttachment")
            .prop("VpcId", vpc.reference())
            .prop("InternetGatewayId", igw.reference()),
    )?;

    let mut public_subnets = Vec::with_capacity(settings.max_azs);
    let mut nat_gateways = Vec::with_capacity(nat_count);
    for (index, block) in public_blocks.iter().enumerate() {
        let subnet =
            declare_subnet(&mut stack, &vpc, SubnetKind::Public, *block, index, &name_tag)?;
        let prefix = format!("VpcPublicSubnet{}", index + 1);

        stack.add(
            Resource::new(format!("{}DefaultRoute", prefix), "AWS::EC2::Route")
                .prop("RouteTableId", stack.addr(&format!("{}RouteTable", prefix)).reference())
                .prop("DestinationCidrBlock", Ipv4Cidr::any().to_string())
                .prop("GatewayId", igw.reference())
                .depends_on("VpcVPCGW"),
        )?;

        if index < nat_count {
            let eip = stack.add(
                Resource::new(format!("{}EIP", prefix), "AWS::EC2::EIP")
                    .prop("Domain", "vpc")
                    .tag(name_tag(&format!("/PublicSubnet{}", index + 1)), DEFAULT_TAG_PRIORITY),
            )?;
            let nat = stack.add(
                Resource::new(format!("{}NATGateway", prefix), "AWS::EC2::NatGateway")
                    .prop("SubnetId", subnet.subnet_id())
                    .prop("AllocationId", eip.attr("AllocationId"))
                    .depends_on(format!("{}DefaultRoute", prefix))
                    .depends_on(format!("{}RouteTableAssociation", prefix))
                    .tag(name_tag(&format!("/PublicSubnet{}", index + 1)), DEFAULT_TAG_PRIORITY),
            )?;
            nat_gateways.push(nat);
        }
        public_subnets.push(subnet);
    }

    let mut private_subnets = Vec::with_capacity(settings.max_azs);
    for (index, block) in private_blocks.iter().enumerate() {
        let subnet = declare_subnet(
            &mut stack,
            &vpc,
            SubnetKind::PrivateWithNat,
            *block,
            index,
            &name_tag,
        )?;
        let prefix = format!("VpcPrivateSubnet{}", index + 1);
        let nat = &nat_gateways[index % nat_gateways.len()];

        stack.add(
            Resource::new(format!("{}DefaultRoute", prefix), "AWS::EC2::Route")
                .prop("RouteTableId", stack.addr(&format!("{}RouteTable", prefix)).reference())
                .prop("DestinationCidrBlock", Ipv4Cidr::any().to_string())
                .prop("NatGatewayId", nat.reference()),
        )?;
        private_subnets.push(subnet);
    }

    stack.add_output(Output::automation_from(&config.project.source_info))?;
    stack.add_output(Output::new("VpcId", vpc.reference()).with_description("VPC Id."))?;

    debug!(
        "Network declared with {} public and {} private subnets",
        public_subnets.len(),
        private_subnets.len()
    );

    Ok(NetworkDescriptor {
        stack,
        vpc,
        cidr_block,
        public_subnets,
        private_subnets,
    })
}

fn declare_subnet(
    stack: &mut StackDescriptor,
    vpc: &ResourceAddr,
    kind: SubnetKind,
    cidr: Ipv4Cidr,
    index: usize,
    name_tag: &dyn Fn(&str) -> Tag,
) -> IacResult<SubnetDescriptor> {
    let prefix = format!("Vpc{}Subnet{}", kind.as_str(), index + 1);
    let name = name_tag(&format!("/{}Subnet{}", kind.as_str(), index + 1));

    let subnet = stack.add(
        Resource::new(format!("{}Subnet", prefix), "AWS::EC2::Subnet")
            .prop("VpcId", vpc.reference())
            .prop("CidrBlock", cidr.to_string())
            .prop("AvailabilityZone", Expr::availability_zone(index))
            .prop("MapPublicIpOnLaunch", kind == SubnetKind::Public)
            .tag(name.clone(), DEFAULT_TAG_PRIORITY)
            .tag(Tag::new("SubnetType", kind.as_str()), DEFAULT_TAG_PRIORITY),
    )?;
    let route_table = stack.add(
        Resource::new(format!("{}RouteTable", prefix), "AWS::EC2::RouteTable")
            .prop("VpcId", vpc.reference())
            .tag(name, DEFAULT_TAG_PRIORITY),
    )?;
    stack.add(
        Resource::new(
            format!("{}RouteTableAssociation", prefix),
            "AWS::EC2::SubnetRouteTableAssociation",
        )
        .prop("RouteTableId", route_table.reference())
        .prop("SubnetId", subnet.reference()),
    )?;

    Ok(SubnetDescriptor {
        addr: subnet,
        kind,
        cidr,
        az_index: index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_network_layout() {
        let network = build_network(&DeploymentConfig::default()).unwrap();

        assert_eq!(network.cidr_block.to_string(), "10.10.0.0/16");
        assert_eq!(network.public_subnets.len(), 2);
        assert_eq!(network.private_subnets.len(), 2);

        let private: Vec<String> = network
            .private_subnets
            .iter()
            .map(|s| s.cidr.to_string())
            .collect();
        assert_eq!(private, ["10.10.2.0/24", "10.10.3.0/24"]);
        assert!(network
            .private_subnets
            .iter()
            .all(|s| network.cidr_block.covers(&s.cidr) && s.kind == SubnetKind::PrivateWithNat));

        assert_eq!(network.stack.resources_of_type("AWS::EC2::VPC").count(), 1);
        assert_eq!(network.stack.resources_of_type("AWS::EC2::Subnet").count(), 4);
        assert_eq!(network.stack.resources_of_type("AWS::EC2::NatGateway").count(), 1);
        assert!(network.stack.check_local_references().is_ok());
    }

    #[test]
    fn test_private_routes_use_nat() {
        let network = build_network(&DeploymentConfig::default()).unwrap();
        let route = network.stack.resource("VpcPrivateSubnet2DefaultRoute").unwrap();
        assert_eq!(
            route.property("NatGatewayId"),
            Some(&network.stack.addr("VpcPublicSubnet1NATGateway").reference())
        );
    }

    #[test]
    fn test_exhausted_address_space() {
        let mut config = DeploymentConfig::default();
        config.network.cidr = "10.0.0.0/23".to_string();
        assert!(matches!(
            build_network(&config),
            Err(IacError::AddressSpaceExhausted { .. })
        ));
    }

    #[test]
    fn test_requires_nat_gateway() {
        let mut config = DeploymentConfig::default();
        config.network.nat_gateways = 0;
        assert!(matches!(build_network(&config), Err(IacError::Config(_))));
    }

    #[test]
    fn test_oversized_az_count_rejected() {
        let mut config = DeploymentConfig::default();
        config.network.max_azs = usize::MAX / 2 + 1;
        assert!(matches!(build_network(&config), Err(IacError::Config(_))));

        config.network.max_azs = usize::MAX / 2;
        assert!(matches!(
            build_network(&config),
            Err(IacError::AddressSpaceExhausted { .. })
        ));
    }

    #[test]
    fn test_outputs_declared() {
        let network = build_network(&DeploymentConfig::default()).unwrap();
        let automation = network.stack.output("AutomationFrom").unwrap();
        assert_eq!(
            automation.description.as_deref(),
            Some("To know more about this automation stack, check out our github page.")
        );
        assert_eq!(
            network.stack.output("VpcId").map(|o| &o.value),
            Some(&network.vpc_id())
        );
    }
}
