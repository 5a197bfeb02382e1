//! # mcast_iac
//!
//! Declarative AWS infrastructure for IP multicast across a Transit Gateway.
//!
//! This crate declares a VPC, a multicast-enabled Transit Gateway and a
//! producer and consumer EC2 host as plain descriptors, wires the stacks
//! together and synthesizes them into CloudFormation templates.
//!
//! ## Features
//!
//! - VPC with public and NAT-routed private subnets across availability zones
//! - Transit Gateway with an IGMPv2 multicast domain over two private subnets
//! - Producer and consumer hosts with multicast security groups and log-writing roles
//! - Cross-stack exports, deployment ordering and deployment-wide tagging
//! - JSON or YAML template synthesis into a pluggable sink
//!
//! ## Example
//!
//! ```rust,no_run
//! use mcast_iac::{
//!     build_deployment, DeploymentConfig, DeploymentValidator, DirectorySink, Synthesizer,
//! };
//! use std::path::Path;
//!
//! let config = DeploymentConfig::from_file(Path::new("deploy.yaml")).unwrap();
//! let deployment = build_deployment(&config).unwrap();
//! DeploymentValidator::new().validate(&deployment).into_result().unwrap();
//!
//! let assembly = deployment.assemble(&config.tags).unwrap();
//! let mut sink = DirectorySink::create("cdk.out").unwrap();
//! Synthesizer::default().synth_to(&assembly, &mut sink).unwrap();
//! ```

pub mod app;
pub mod assembly;
pub mod cidr;
pub mod config;
pub mod error;
pub mod host;
pub mod network;
pub mod rules;
pub mod stack;
pub mod synth;
pub mod tags;
pub mod template;
pub mod transit_gateway;
pub mod validator;

pub use app::{build_deployment, synthesize_assembly, MulticastDeployment};
pub use assembly::CloudAssembly;
pub use cidr::Ipv4Cidr;
pub use config::{DeploymentConfig, Tag};
pub use error::{IacError, IacResult};
pub use host::{HostDescriptor, HostRole};
pub use network::{NetworkDescriptor, SubnetKind};
pub use stack::StackDescriptor;
pub use synth::{
    DirectorySink, Manifest, SynthesizedTemplate, Synthesizer, TemplateFormat, TemplateSink,
};
pub use tags::{TagAspect, TagManager};
pub use transit_gateway::TransitGatewayDescriptor;
pub use validator::{DeploymentValidator, ValidationCheck, ValidationReport};
