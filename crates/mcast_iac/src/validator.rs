//! Structural validation of a declared multicast deployment.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::app::MulticastDeployment;
use crate::cidr::Ipv4Cidr;
use crate::error::{IacError, IacResult};
use crate::host::HostRole;
use crate::rules::{IpProtocol, TrafficDirection};
use crate::transit_gateway::{is_private_asn, MULTICAST_SUBNETS};

const LOG_ACTIONS: [&str; 3] = [
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:PutLogEvents",
];

/// Validation report for a deployment.
#[derive(Debug)]
pub struct ValidationReport {
    pub checks: Vec<ValidationCheck>,
    pub passed: bool,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            passed: true,
        }
    }

    pub fn add_check(&mut self, name: &str, passed: bool, message: &str) {
        if !passed {
            self.passed = false;
        }
        self.checks.push(ValidationCheck {
            name: name.to_string(),
            passed,
            message: message.to_string(),
        });
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// Turn a failed report into an error naming the failed checks.
    pub fn into_result(self) -> IacResult<Self> {
        if self.passed {
            return Ok(self);
        }
        let failed: Vec<String> = self
            .failures()
            .map(|c| format!("{}: {}", c.name, c.message))
            .collect();
        Err(IacError::ValidationFailed(failed.join("; ")))
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

/// Checks a deployment for the properties multicast delivery relies on.
#[derive(Debug, Default)]
pub struct DeploymentValidator;

impl DeploymentValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, deployment: &MulticastDeployment) -> ValidationReport {
        let mut report = ValidationReport::new();

        self.check_transit_gateway(deployment, &mut report);
        self.check_associations(deployment, &mut report);
        self.check_hosts(deployment, &mut report);
        self.check_nacl(deployment, &mut report);
        self.check_references(deployment, &mut report);

        if report.passed {
            info!("Deployment validation passed ({} checks)", report.checks.len());
        } else {
            warn!(
                "Deployment validation failed: {} of {} checks",
                report.failures().count(),
                report.checks.len()
            );
        }
        report
    }

    fn check_transit_gateway(
        &self,
        deployment: &MulticastDeployment,
        report: &mut ValidationReport,
    ) {
        let tgw = &deployment.transit_gateway;
        report.add_check(
            "asn",
            is_private_asn(tgw.asn),
            &format!("Amazon-side ASN {}", tgw.asn),
        );
        report.add_check(
            "multicast_support",
            tgw.multicast_support && tgw.multicast_domain.igmpv2_support,
            "Transit Gateway multicast with IGMPv2",
        );

        let all_private = tgw
            .attachment
            .subnets
            .iter()
            .all(|s| deployment.network.is_private_subnet(s));
        report.add_check(
            "attachment_subnets",
            all_private && !tgw.attachment.subnets.is_empty(),
            &format!("{} attachment subnets, all private", tgw.attachment.subnets.len()),
        );
    }

    fn check_associations(&self, deployment: &MulticastDeployment, report: &mut ValidationReport) {
        let associations = &deployment.transit_gateway.multicast_domain.associations;
        let subnets: BTreeSet<&str> = associations
            .iter()
            .map(|a| a.subnet.logical_id.as_str())
            .collect();
        let private = associations
            .iter()
            .all(|a| deployment.network.is_private_subnet(&a.subnet));

        report.add_check(
            "domain_associations",
            associations.len() == MULTICAST_SUBNETS
                && subnets.len() == MULTICAST_SUBNETS
                && private,
            &format!(
                "{} associations over {} distinct private subnets (expected {})",
                associations.len(),
                subnets.len(),
                MULTICAST_SUBNETS
            ),
        );
    }

    fn check_hosts(&self, deployment: &MulticastDeployment, report: &mut ValidationReport) {
        let associated: BTreeSet<&str> = deployment
            .transit_gateway
            .multicast_domain
            .associations
            .iter()
            .map(|a| a.subnet.logical_id.as_str())
            .collect();
        let vpc_cidr = deployment.network.cidr_block;

        for role in [HostRole::Producer, HostRole::Consumer] {
            let host = deployment.host(role);
            report.add_check(
                &format!("{}_placement", role),
                associated.contains(host.subnet.logical_id.as_str()),
                &format!("{} runs in {}", host.instance.logical_id, host.subnet.logical_id),
            );

            let missing: Vec<&str> = LOG_ACTIONS
                .iter()
                .copied()
                .filter(|action| !host.instance_role.grants(action))
                .collect();
            report.add_check(
                &format!("{}_log_permissions", role),
                missing.is_empty(),
                &if missing.is_empty() {
                    "Instance role can write logs".to_string()
                } else {
                    format!("Instance role lacks {}", missing.join(", "))
                },
            );

            report.add_check(
                &format!("{}_bootstrap", role),
                !host.user_data.trim().is_empty(),
                "UserData script is not empty",
            );
        }

        let consumer = &deployment.consumer.multicast_security_group;
        report.add_check(
            "consumer_igmp_ingress",
            consumer.allows_ingress(IpProtocol::Igmp, &vpc_cidr),
            &format!("IGMP from {}", vpc_cidr),
        );
        report.add_check(
            "consumer_udp_ingress",
            consumer.allows_ingress(IpProtocol::Udp, &vpc_cidr),
            &format!("UDP from {}", vpc_cidr),
        );

        let producer = &deployment.producer.multicast_security_group;
        report.add_check(
            "producer_multicast_egress",
            producer.allows_egress(IpProtocol::All, &Ipv4Cidr::MULTICAST)
                || producer.allows_egress(IpProtocol::Udp, &Ipv4Cidr::MULTICAST),
            &format!("Traffic to {}", Ipv4Cidr::MULTICAST),
        );
    }

    fn check_nacl(&self, deployment: &MulticastDeployment, report: &mut ValidationReport) {
        let nacl = &deployment.transit_gateway.nacl;
        for (name, direction) in [
            ("nacl_ingress_rules", TrafficDirection::Ingress),
            ("nacl_egress_rules", TrafficDirection::Egress),
        ] {
            let numbers: Vec<u16> = nacl.entries(direction).map(|e| e.rule_number).collect();
            let unique: BTreeSet<u16> = numbers.iter().copied().collect();
            let in_range = numbers.iter().all(|n| (1..=32766).contains(n));
            report.add_check(
                name,
                unique.len() == numbers.len() && in_range,
                &format!("rule numbers {:?}", numbers),
            );
        }
    }

    fn check_references(&self, deployment: &MulticastDeployment, report: &mut ValidationReport) {
        for stack in deployment.stacks() {
            let result = stack.check_local_references();
            report.add_check(
                &format!("{}_references", stack.name()),
                result.is_ok(),
                &match result {
                    Ok(()) => "All local references resolve".to_string(),
                    Err(e) => e.to_string(),
                },
            );
        }
    }
}
