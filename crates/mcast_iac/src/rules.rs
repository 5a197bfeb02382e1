//! Traffic rules shared by network ACLs and security groups.

use crate::cidr::Ipv4Cidr;
use crate::template::Expr;

/// IP protocols used by the multicast rule sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpProtocol {
    All,
    Icmp,
    Igmp,
    Tcp,
    Udp,
}

impl IpProtocol {
    /// IANA protocol number, `-1` for all.
    pub fn number(&self) -> i64 {
        match self {
            IpProtocol::All => -1,
            IpProtocol::Icmp => 1,
            IpProtocol::Igmp => 2,
            IpProtocol::Tcp => 6,
            IpProtocol::Udp => 17,
        }
    }

    /// Value of a security group rule's `IpProtocol`.
    pub fn sg_value(&self) -> &'static str {
        match self {
            IpProtocol::All => "-1",
            IpProtocol::Icmp => "icmp",
            IpProtocol::Igmp => "2",
            IpProtocol::Tcp => "tcp",
            IpProtocol::Udp => "udp",
        }
    }
}

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self { from: port, to: port }
    }

    pub fn all() -> Self {
        Self { from: 0, to: 65535 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficDirection {
    Ingress,
    Egress,
}

/// Traffic matched by a network ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AclTraffic {
    All,
    /// ICMP with type and code, `-1` matching any.
    Icmp { icmp_type: i32, code: i32 },
    Udp(PortRange),
}

impl AclTraffic {
    pub fn any_icmp() -> Self {
        AclTraffic::Icmp { icmp_type: -1, code: -1 }
    }

    pub fn protocol(&self) -> IpProtocol {
        match self {
            AclTraffic::All => IpProtocol::All,
            AclTraffic::Icmp { .. } => IpProtocol::Icmp,
            AclTraffic::Udp(_) => IpProtocol::Udp,
        }
    }
}

/// One numbered network ACL entry. Every entry allows the traffic it matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub rule_number: u16,
    pub direction: TrafficDirection,
    pub cidr: Ipv4Cidr,
    pub traffic: AclTraffic,
}

impl AclEntry {
    pub fn allow(
        rule_number: u16,
        direction: TrafficDirection,
        cidr: Ipv4Cidr,
        traffic: AclTraffic,
    ) -> Self {
        Self {
            rule_number,
            direction,
            cidr,
            traffic,
        }
    }

    /// Logical ID suffix, e.g. `Ingress100`.
    pub fn id_suffix(&self) -> String {
        match self.direction {
            TrafficDirection::Ingress => format!("Ingress{}", self.rule_number),
            TrafficDirection::Egress => format!("Egress{}", self.rule_number),
        }
    }

    /// Properties of an `AWS::EC2::NetworkAclEntry`, minus the ACL ID.
    pub fn properties(&self) -> Vec<(&'static str, Expr)> {
        let mut props = vec![
            ("RuleNumber", Expr::Int(i64::from(self.rule_number))),
            ("Protocol", Expr::Int(self.traffic.protocol().number())),
            ("RuleAction", Expr::str("allow")),
            ("Egress", Expr::Bool(self.direction == TrafficDirection::Egress)),
            ("CidrBlock", Expr::str(self.cidr.to_string())),
        ];
        match self.traffic {
            AclTraffic::All => {}
            AclTraffic::Icmp { icmp_type, code } => props.push((
                "Icmp",
                Expr::map([
                    ("Type", Expr::Int(i64::from(icmp_type))),
                    ("Code", Expr::Int(i64::from(code))),
                ]),
            )),
            AclTraffic::Udp(range) => props.push((
                "PortRange",
                Expr::map([
                    ("From", Expr::Int(i64::from(range.from))),
                    ("To", Expr::Int(i64::from(range.to))),
                ]),
            )),
        }
        props
    }
}

/// One security group ingress or egress rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupRule {
    pub protocol: IpProtocol,
    pub cidr: Ipv4Cidr,
    pub ports: PortRange,
    pub description: String,
}

impl SecurityGroupRule {
    pub fn new(
        protocol: IpProtocol,
        cidr: Ipv4Cidr,
        ports: PortRange,
        description: impl Into<String>,
    ) -> Self {
        Self {
            protocol,
            cidr,
            ports,
            description: description.into(),
        }
    }

    pub fn render(&self) -> Expr {
        Expr::map([
            ("IpProtocol", Expr::str(self.protocol.sg_value())),
            ("CidrIp", Expr::str(self.cidr.to_string())),
            ("Description", Expr::str(self.description.clone())),
            ("FromPort", Expr::Int(i64::from(self.ports.from))),
            ("ToPort", Expr::Int(i64::from(self.ports.to))),
        ])
    }

    /// Whether this rule matches a protocol from exactly `cidr`.
    pub fn matches(&self, protocol: IpProtocol, cidr: &Ipv4Cidr) -> bool {
        self.protocol == protocol && &self.cidr == cidr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cidr(s: &str) -> Ipv4Cidr {
        s.parse().unwrap()
    }

    #[test]
    fn test_icmp_entry_render() {
        let entry = AclEntry::allow(
            200,
            TrafficDirection::Ingress,
            cidr("224.0.0.1/32"),
            AclTraffic::any_icmp(),
        );
        let rendered = Expr::map(entry.properties()).render("s");

        assert_eq!(entry.id_suffix(), "Ingress200");
        assert_eq!(
            rendered,
            json!({
                "RuleNumber": 200,
                "Protocol": 1,
                "RuleAction": "allow",
                "Egress": false,
                "CidrBlock": "224.0.0.1/32",
                "Icmp": { "Type": -1, "Code": -1 }
            })
        );
    }

    #[test]
    fn test_udp_entry_render() {
        let entry = AclEntry::allow(
            200,
            TrafficDirection::Egress,
            cidr("10.10.0.0/16"),
            AclTraffic::Udp(PortRange::all()),
        );
        let rendered = Expr::map(entry.properties()).render("s");

        assert_eq!(rendered["Protocol"], 17);
        assert_eq!(rendered["Egress"], true);
        assert_eq!(rendered["PortRange"], json!({ "From": 0, "To": 65535 }));
    }

    #[test]
    fn test_security_group_rule_render() {
        let rule = SecurityGroupRule::new(
            IpProtocol::Igmp,
            cidr("0.0.0.0/32"),
            PortRange::all(),
            "IGMP Querier",
        );
        assert_eq!(
            rule.render().render("s"),
            json!({
                "IpProtocol": "2",
                "CidrIp": "0.0.0.0/32",
                "Description": "IGMP Querier",
                "FromPort": 0,
                "ToPort": 65535
            })
        );
        assert!(rule.matches(IpProtocol::Igmp, &cidr("0.0.0.0/32")));
        assert!(!rule.matches(IpProtocol::Udp, &cidr("0.0.0.0/32")));
    }
}
