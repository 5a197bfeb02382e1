//! Composition root: the four stacks of a multicast deployment.

use tracing::info;

use crate::assembly::CloudAssembly;
use crate::config::{DeploymentConfig, Tag};
use crate::error::IacResult;
use crate::host::{build_host, HostDescriptor, HostRole};
use crate::network::{build_network, NetworkDescriptor};
use crate::stack::StackDescriptor;
use crate::transit_gateway::{build_transit_gateway, TransitGatewayDescriptor};

/// Everything declared for one deployment, before assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct MulticastDeployment {
    pub network: NetworkDescriptor,
    pub transit_gateway: TransitGatewayDescriptor,
    pub producer: HostDescriptor,
    pub consumer: HostDescriptor,
}

impl MulticastDeployment {
    pub fn host(&self, role: HostRole) -> &HostDescriptor {
        match role {
            HostRole::Producer => &self.producer,
            HostRole::Consumer => &self.consumer,
        }
    }

    /// Stack descriptors in declaration order.
    pub fn stacks(&self) -> [&StackDescriptor; 4] {
        [
            &self.network.stack,
            &self.transit_gateway.stack,
            &self.producer.stack,
            &self.consumer.stack,
        ]
    }

    /// Wire the stacks together and apply `tags` to every taggable resource.
    pub fn assemble(&self, tags: &[Tag]) -> IacResult<CloudAssembly> {
        CloudAssembly::assemble(self.stacks().into_iter().cloned().collect(), tags)
    }
}

/// Declare the network, the Transit Gateway and both hosts.
///
/// Fails without declaring anything further as soon as one stack fails,
/// e.g. when a bootstrap script cannot be read.
pub fn build_deployment(config: &DeploymentConfig) -> IacResult<MulticastDeployment> {
    let network = build_network(config)?;
    let transit_gateway = build_transit_gateway(config, &network)?;
    let producer = build_host(config, &network, HostRole::Producer)?;
    let consumer = build_host(config, &network, HostRole::Consumer)?;

    info!(
        "Declared multicast deployment: {} private subnets, TGW ASN {}",
        network.private_subnets.len(),
        transit_gateway.asn
    );

    Ok(MulticastDeployment {
        network,
        transit_gateway,
        producer,
        consumer,
    })
}

/// Declare and assemble a deployment, tagged with the configured tags.
pub fn synthesize_assembly(config: &DeploymentConfig) -> IacResult<CloudAssembly> {
    build_deployment(config)?.assemble(&config.tags)
}
