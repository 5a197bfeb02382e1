//! Multicast producer and consumer hosts.
//!
//! Each host is an EC2 instance in a private subnet with an SSM-managed
//! instance role, a web-ingress security group and a multicast security
//! group. The bootstrap script is read before anything is declared, so a
//! missing script never leaves a partial stack behind.

use std::fmt;
use std::fs;
use std::path::Path;

use tracing::{debug, error, info};

use crate::cidr::Ipv4Cidr;
use crate::config::{DeploymentConfig, Tag};
use crate::error::{IacError, IacResult};
use crate::network::{NetworkDescriptor, SubnetKind};
use crate::rules::{IpProtocol, PortRange, SecurityGroupRule};
use crate::stack::StackDescriptor;
use crate::tags::DEFAULT_TAG_PRIORITY;
use crate::template::{Expr, Output, Parameter, Pseudo, Resource, ResourceAddr};

const AMAZON_LINUX_2_PARAMETER: &str =
    "/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2";
const SSM_MANAGED_POLICY: &str = "AmazonSSMManagedInstanceCore";
const POLICY_VERSION: &str = "2012-10-17";

/// Which side of the multicast conversation a host plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostRole {
    Producer,
    Consumer,
}

impl HostRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostRole::Producer => "producer",
            HostRole::Consumer => "consumer",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            HostRole::Producer => "Producer",
            HostRole::Consumer => "Consumer",
        }
    }

    pub fn instance_name(&self) -> String {
        format!("multicast_{}_01", self.as_str())
    }

    /// Index into the network's private subnets.
    fn subnet_index(&self) -> usize {
        match self {
            HostRole::Producer => 0,
            HostRole::Consumer => 1,
        }
    }

    fn description(&self) -> String {
        format!(
            "Miztiik Automation: Deploy Multicast {} On EC2 instance",
            self.title()
        )
    }
}

impl fmt::Display for HostRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An IAM policy statement that allows `actions` on `resources`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub resources: Vec<String>,
}

impl PolicyStatement {
    pub fn allow<A: Into<String>, R: Into<String>>(
        actions: impl IntoIterator<Item = A>,
        resources: impl IntoIterator<Item = R>,
    ) -> Self {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
            resources: resources.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the statement grants `action`, honouring trailing `*` wildcards.
    pub fn grants(&self, action: &str) -> bool {
        self.actions.iter().any(|a| match a.strip_suffix('*') {
            Some(prefix) => action.starts_with(prefix),
            None => a == action,
        })
    }

    fn render(&self) -> Expr {
        let single_or_list = |items: &[String]| match items {
            [one] => Expr::str(one.clone()),
            many => Expr::list(many.iter().map(|s| Expr::str(s.clone()))),
        };
        Expr::map([
            ("Action", single_or_list(&self.actions)),
            ("Effect", Expr::str("Allow")),
            ("Resource", single_or_list(&self.resources)),
        ])
    }
}

/// The instance role with its inline default policy.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRoleDescriptor {
    pub addr: ResourceAddr,
    pub policy: ResourceAddr,
    pub instance_profile: ResourceAddr,
    pub managed_policies: Vec<String>,
    pub statements: Vec<PolicyStatement>,
}

impl InstanceRoleDescriptor {
    fn new(stack: &StackDescriptor) -> Self {
        Self {
            addr: stack.addr("webAppClientRole"),
            policy: stack.addr("webAppClientRoleDefaultPolicy"),
            instance_profile: stack.addr("appServerInstanceProfile"),
            managed_policies: vec![SSM_MANAGED_POLICY.to_string()],
            statements: Vec::new(),
        }
    }

    /// Add a statement to the default policy; identical statements collapse.
    pub fn add_to_policy(&mut self, statement: PolicyStatement) {
        if !self.statements.contains(&statement) {
            self.statements.push(statement);
        }
    }

    pub fn grants(&self, action: &str) -> bool {
        self.statements.iter().any(|s| s.grants(action))
    }

    fn declare(&self, stack: &mut StackDescriptor) -> IacResult<()> {
        let assume = Expr::map([
            (
                "Statement",
                Expr::list([Expr::map([
                    ("Action", Expr::str("sts:AssumeRole")),
                    ("Effect", Expr::str("Allow")),
                    ("Principal", Expr::map([("Service", Expr::str("ec2.amazonaws.com"))])),
                ])]),
            ),
            ("Version", Expr::str(POLICY_VERSION)),
        ]);
        let managed = self.managed_policies.iter().map(|name| {
            Expr::join([
                Expr::str("arn:"),
                Pseudo::Partition.into(),
                Expr::str(format!(":iam::aws:policy/{}", name)),
            ])
        });

        stack.add(
            Resource::new(&self.addr.logical_id, "AWS::IAM::Role")
                .prop("AssumeRolePolicyDocument", assume)
                .prop("ManagedPolicyArns", Expr::list(managed)),
        )?;

        if !self.statements.is_empty() {
            let document = Expr::map([
                ("Statement", Expr::list(self.statements.iter().map(|s| s.render()))),
                ("Version", Expr::str(POLICY_VERSION)),
            ]);
            stack.add(
                Resource::new(&self.policy.logical_id, "AWS::IAM::Policy")
                    .prop("PolicyDocument", document)
                    .prop("PolicyName", self.policy.logical_id.as_str())
                    .prop("Roles", Expr::list([self.addr.reference()])),
            )?;
        }

        stack.add(
            Resource::new(&self.instance_profile.logical_id, "AWS::IAM::InstanceProfile")
                .prop("Roles", Expr::list([self.addr.reference()])),
        )?;
        Ok(())
    }
}

/// A security group and its rules.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityGroupDescriptor {
    pub addr: ResourceAddr,
    pub group_name: Option<String>,
    pub description: String,
    pub ingress: Vec<SecurityGroupRule>,
    pub egress: Vec<SecurityGroupRule>,
}

impl SecurityGroupDescriptor {
    pub fn group_id(&self) -> Expr {
        self.addr.attr("GroupId")
    }

    pub fn allows_ingress(&self, protocol: IpProtocol, cidr: &Ipv4Cidr) -> bool {
        self.ingress.iter().any(|r| r.matches(protocol, cidr))
    }

    pub fn allows_egress(&self, protocol: IpProtocol, cidr: &Ipv4Cidr) -> bool {
        self.egress.iter().any(|r| r.matches(protocol, cidr))
    }

    fn declare(
        &self,
        stack: &mut StackDescriptor,
        vpc_id: Expr,
        name_tag: Option<Tag>,
    ) -> IacResult<()> {
        let mut resource = Resource::new(&self.addr.logical_id, "AWS::EC2::SecurityGroup")
            .prop("GroupDescription", self.description.as_str())
            .prop("VpcId", vpc_id)
            .prop("SecurityGroupIngress", Expr::list(self.ingress.iter().map(|r| r.render())))
            .prop("SecurityGroupEgress", Expr::list(self.egress.iter().map(|r| r.render())));
        if let Some(name) = &self.group_name {
            resource = resource.prop("GroupName", name.as_str());
        }
        if let Some(tag) = name_tag {
            resource = resource.tag(tag, DEFAULT_TAG_PRIORITY);
        }
        stack.add(resource)?;
        Ok(())
    }
}

/// Rules of the multicast security group for a role.
///
/// Consumers receive multicast UDP and answer IGMP queries; producers send
/// to the multicast range and still see the gateway's IGMP queries.
pub fn multicast_rules(
    role: HostRole,
    vpc_cidr: Ipv4Cidr,
) -> IacResult<(Vec<SecurityGroupRule>, Vec<SecurityGroupRule>)> {
    let igmp_querier: Ipv4Cidr = "0.0.0.0/32".parse()?;
    let all = PortRange::all();

    let egress_multicast = SecurityGroupRule::new(
        IpProtocol::All,
        Ipv4Cidr::MULTICAST,
        all,
        "Egress multicast traffic (UDP)",
    );

    let rules = match role {
        HostRole::Consumer => (
            vec![
                SecurityGroupRule::new(IpProtocol::Igmp, vpc_cidr, all, "IGMP Receivers"),
                SecurityGroupRule::new(
                    IpProtocol::Udp,
                    vpc_cidr,
                    all,
                    "Allow Multicast UDP Ingress",
                ),
                SecurityGroupRule::new(IpProtocol::Igmp, igmp_querier, all, "IGMP Querier"),
            ],
            vec![egress_multicast],
        ),
        HostRole::Producer => (
            vec![SecurityGroupRule::new(IpProtocol::Igmp, igmp_querier, all, "IGMP Querier")],
            vec![
                SecurityGroupRule::new(
                    IpProtocol::Udp,
                    vpc_cidr,
                    all,
                    "Allow Multicast UDP Egress",
                ),
                egress_multicast,
            ],
        ),
    };
    Ok(rules)
}

/// A declared multicast host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostDescriptor {
    pub stack: StackDescriptor,
    pub role: HostRole,
    pub instance: ResourceAddr,
    pub instance_type: String,
    pub subnet: ResourceAddr,
    pub instance_role: InstanceRoleDescriptor,
    pub web_security_group: SecurityGroupDescriptor,
    pub multicast_security_group: SecurityGroupDescriptor,
    pub image_parameter: ResourceAddr,
    pub user_data: String,
}

impl HostDescriptor {
    pub fn security_groups(&self) -> [&SecurityGroupDescriptor; 2] {
        [&self.web_security_group, &self.multicast_security_group]
    }
}

/// Read a bootstrap script. The handle is closed before returning.
pub fn read_bootstrap(path: &Path) -> IacResult<String> {
    fs::read_to_string(path).map_err(|source| {
        error!("Unable to read UserData script {:?}: {}", path, source);
        IacError::Bootstrap {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Declare a producer or consumer host stack.
pub fn build_host(
    config: &DeploymentConfig,
    network: &NetworkDescriptor,
    role: HostRole,
) -> IacResult<HostDescriptor> {
    let user_data = read_bootstrap(&config.bootstrap_path(role))?;

    let stack_name = config.host_stack_name(role);
    let settings = config.host(role);
    info!("Declaring {} host ({}) in {}", role, settings.instance_type, stack_name);

    let private = network.select_subnets(SubnetKind::PrivateWithNat);
    let subnet = private
        .get(role.subnet_index())
        .or_else(|| private.last())
        .ok_or(IacError::InsufficientSubnets { required: 1, found: 0 })?;

    let mut stack = StackDescriptor::new(stack_name, role.description())?;

    let image_parameter = stack.add_parameter(
        Parameter::new(
            "SsmParameterValueawsserviceamiamazonlinuxlatestamzn2amihvmx8664gp2Parameter",
            "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>",
        )
        .with_default(AMAZON_LINUX_2_PARAMETER),
    )?;

    let mut instance_role = InstanceRoleDescriptor::new(&stack);
    instance_role.add_to_policy(PolicyStatement::allow(
        ["logs:Create*", "logs:PutLogEvents"],
        ["arn:aws:logs:*:*:*"],
    ));
    instance_role.declare(&mut stack)?;

    let web_security_group = SecurityGroupDescriptor {
        addr: stack.addr("appServerInstanceSecurityGroup"),
        group_name: None,
        description: format!("{}/appServer/InstanceSecurityGroup", stack_name),
        ingress: vec![
            SecurityGroupRule::new(
                IpProtocol::Tcp,
                Ipv4Cidr::any(),
                PortRange::single(80),
                "Allow Incoming HTTP Traffic",
            ),
            SecurityGroupRule::new(
                IpProtocol::Tcp,
                network.cidr_block,
                PortRange::single(80),
                "Allow Incoming Web Traffic",
            ),
        ],
        egress: vec![SecurityGroupRule::new(
            IpProtocol::All,
            Ipv4Cidr::any(),
            PortRange::all(),
            "Allow all outbound traffic by default",
        )],
    };
    web_security_group.declare(
        &mut stack,
        network.vpc_id(),
        Some(Tag::new("Name", format!("{}/appServer", stack_name))),
    )?;

    let (ingress, egress) = multicast_rules(role, network.cidr_block)?;
    let group_name = format!("multicast{}SG", role.title());
    let multicast_security_group = SecurityGroupDescriptor {
        addr: stack.addr(&group_name),
        group_name: Some(group_name),
        description: "Allow Multicast Traffic".to_string(),
        ingress,
        egress,
    };
    multicast_security_group.declare(&mut stack, network.vpc_id(), None)?;

    let mut instance = Resource::new("appServer", "AWS::EC2::Instance")
        .prop("InstanceType", settings.instance_type.as_str())
        .prop("ImageId", image_parameter.reference())
        .prop("IamInstanceProfile", instance_role.instance_profile.reference())
        .prop("SubnetId", subnet.subnet_id())
        .prop(
            "SecurityGroupIds",
            Expr::list([web_security_group.group_id(), multicast_security_group.group_id()]),
        )
        .prop("UserData", Expr::base64(Expr::str(user_data.clone())))
        .depends_on(instance_role.addr.logical_id.clone())
        .tag(Tag::new("Name", role.instance_name()), DEFAULT_TAG_PRIORITY);
    if !instance_role.statements.is_empty() {
        instance = instance.depends_on(instance_role.policy.logical_id.clone());
    }
    let instance = stack.add(instance)?;

    declare_outputs(&mut stack, config, role, &instance)?;
    debug!("{} host declared with {} resources", role, stack.resources().count());

    Ok(HostDescriptor {
        stack,
        role,
        instance,
        instance_type: settings.instance_type.clone(),
        subnet: subnet.addr.clone(),
        instance_role,
        web_security_group,
        multicast_security_group,
        image_parameter,
        user_data,
    })
}

fn declare_outputs(
    stack: &mut StackDescriptor,
    config: &DeploymentConfig,
    role: HostRole,
    instance: &ResourceAddr,
) -> IacResult<()> {
    stack.add_output(Output::automation_from(&config.project.source_info))?;
    stack.add_output(
        Output::new(
            format!("{}PrivateIp", role.title()),
            Expr::join([Expr::str("http://"), instance.attr("PrivateIp")]),
        )
        .with_description("Private IP of App on EC2"),
    )?;
    stack.add_output(
        Output::new(
            format!("Ec2{}Instance", role.title()),
            Expr::join([
                Expr::str("https://console.aws.amazon.com/ec2/v2/home?region="),
                Pseudo::Region.into(),
                Expr::str("#Instances:search="),
                instance.reference(),
                Expr::str(";sort=instanceId"),
            ]),
        )
        .with_description(
            "Login to the instance using Systems Manager and use curl to access Urls",
        ),
    )?;
    Ok(())
}
