//! Resource tagging.
//!
//! Each resource carries a [`TagManager`] holding at most one value per key.
//! A tag replaces an existing one with the same key only when its priority is
//! greater than or equal to the existing priority. [`TagAspect`] applies a
//! tag list to every taggable resource of a stack.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::debug;

use crate::config::Tag;
use crate::stack::StackDescriptor;

/// Priority of tags declared directly on a resource.
pub const DECLARED_TAG_PRIORITY: u32 = 0;

/// Priority of tags a construct adds to itself (e.g. an instance Name).
pub const DEFAULT_TAG_PRIORITY: u32 = 100;

/// Priority of deployment-wide configured tags.
pub const DEPLOYMENT_TAG_PRIORITY: u32 = 300;

/// Resource types that accept a `Tags` property.
const TAGGABLE_TYPES: &[&str] = &[
    "AWS::EC2::VPC",
    "AWS::EC2::Subnet",
    "AWS::EC2::RouteTable",
    "AWS::EC2::InternetGateway",
    "AWS::EC2::EIP",
    "AWS::EC2::NatGateway",
    "AWS::EC2::NetworkAcl",
    "AWS::EC2::SecurityGroup",
    "AWS::EC2::Instance",
    "AWS::EC2::TransitGateway",
    "AWS::EC2::TransitGatewayAttachment",
    "AWS::EC2::TransitGatewayMulticastDomain",
    "AWS::IAM::Role",
];

pub fn is_taggable(resource_type: &str) -> bool {
    TAGGABLE_TYPES.contains(&resource_type)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TagEntry {
    value: String,
    priority: u32,
}

/// Per-resource tag set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagManager {
    entries: BTreeMap<String, TagEntry>,
}

impl TagManager {
    /// Set a tag, returning whether it took effect.
    pub fn set(&mut self, tag: Tag, priority: u32) -> bool {
        if let Some(existing) = self.entries.get(&tag.key) {
            if existing.priority > priority {
                return false;
            }
        }
        self.entries.insert(
            tag.key,
            TagEntry {
                value: tag.value,
                priority,
            },
        );
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|e| e.value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Render as a CloudFormation `Tags` list, sorted by key.
    pub fn render(&self) -> Value {
        Value::Array(
            self.entries
                .iter()
                .map(|(k, e)| json!({ "Key": k, "Value": e.value }))
                .collect(),
        )
    }
}

/// Applies deployment-wide tags to every taggable resource of a stack.
#[derive(Debug, Clone)]
pub struct TagAspect {
    tags: Vec<Tag>,
}

impl TagAspect {
    pub fn new(tags: Vec<Tag>) -> Self {
        Self { tags }
    }

    /// Tag every taggable resource in the stack. Returns the number of
    /// resources touched.
    pub fn apply(&self, stack: &mut StackDescriptor) -> usize {
        if self.tags.is_empty() {
            return 0;
        }

        let mut touched = 0;
        for resource in stack.resources_mut() {
            if !is_taggable(&resource.resource_type) {
                continue;
            }
            for tag in &self.tags {
                resource.tags.set(tag.clone(), DEPLOYMENT_TAG_PRIORITY);
            }
            // Instance tags also land on the volumes created at launch.
            if resource.is_type("AWS::EC2::Instance") {
                resource
                    .properties
                    .insert("PropagateTagsToVolumeOnCreation".to_string(), true.into());
            }
            touched += 1;
        }

        debug!("Tagged {} resources in {}", touched, stack.name());
        touched
    }
}
