//! Cloud assembly: stacks wired together and ready for synthesis.
//!
//! Assembling does three things to a set of stack descriptors:
//! - every reference that crosses a stack boundary gets an export output in
//!   the owning stack (the consumer renders it as `Fn::ImportValue`),
//! - the consumer stack is recorded as depending on the owner,
//! - configured tags are applied to every taggable resource.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::config::Tag;
use crate::error::{IacError, IacResult};
use crate::stack::StackDescriptor;
use crate::tags::TagAspect;
use crate::template::{CrossStackRef, Output};

#[derive(Debug, Clone, PartialEq)]
pub struct CloudAssembly {
    stacks: Vec<StackDescriptor>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl CloudAssembly {
    /// Wire and tag `stacks`. Declaration order is kept and used to break
    /// ties when ordering deployment.
    pub fn assemble(mut stacks: Vec<StackDescriptor>, tags: &[Tag]) -> IacResult<Self> {
        let mut names = BTreeSet::new();
        for stack in &stacks {
            if !names.insert(stack.name().to_string()) {
                return Err(IacError::Config(format!("duplicate stack name: {}", stack.name())));
            }
            stack.check_local_references()?;
        }

        let mut dependencies: BTreeMap<String, BTreeSet<String>> = stacks
            .iter()
            .map(|s| (s.name().to_string(), BTreeSet::new()))
            .collect();

        let wiring: Vec<(String, CrossStackRef)> = stacks
            .iter()
            .flat_map(|s| {
                s.foreign_references()
                    .into_iter()
                    .map(move |r| (s.name().to_string(), r))
            })
            .collect();

        for (consumer, cross) in wiring {
            let owner = stacks
                .iter_mut()
                .find(|s| s.name() == cross.target.stack)
                .ok_or_else(|| IacError::UnknownStack(cross.target.stack.clone()))?;
            if !owner.contains(&cross.target.logical_id) {
                return Err(IacError::DanglingReference {
                    stack: cross.target.stack.clone(),
                    logical_id: cross.target.logical_id.clone(),
                });
            }

            let output_id = cross.output_id();
            if owner.output(&output_id).is_none() {
                debug!("Exporting {} from {} for {}", output_id, owner.name(), consumer);
                owner.add_output(
                    Output::new(output_id, cross.local_value()).with_export(cross.export_name()),
                )?;
            }
            dependencies
                .entry(consumer)
                .or_default()
                .insert(cross.target.stack.clone());
        }

        if tags.is_empty() {
            debug!("No tags configured, skipping tagging");
        } else {
            let aspect = TagAspect::new(tags.to_vec());
            let touched: usize = stacks.iter_mut().map(|s| aspect.apply(s)).sum();
            info!("Applied {} tags to {} resources", tags.len(), touched);
        }

        Ok(Self { stacks, dependencies })
    }

    pub fn stacks(&self) -> &[StackDescriptor] {
        &self.stacks
    }

    pub fn stack(&self, name: &str) -> Option<&StackDescriptor> {
        self.stacks.iter().find(|s| s.name() == name)
    }

    /// Stacks that `name` imports from.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.dependencies
            .get(name)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Stacks in an order where every stack follows its dependencies.
    pub fn deployment_order(&self) -> IacResult<Vec<&str>> {
        let mut placed: BTreeSet<&str> = BTreeSet::new();
        let mut order = Vec::with_capacity(self.stacks.len());

        while order.len() < self.stacks.len() {
            let next = self.stacks.iter().map(|s| s.name()).find(|name| {
                !placed.contains(name) && self.dependencies(name).iter().all(|d| placed.contains(d))
            });

            match next {
                Some(name) => {
                    placed.insert(name);
                    order.push(name);
                }
                None => {
                    let stuck: Vec<&str> = self
                        .stacks
                        .iter()
                        .map(|s| s.name())
                        .filter(|name| !placed.contains(name))
                        .collect();
                    return Err(IacError::DependencyCycle(stuck.join(", ")));
                }
            }
        }

        Ok(order)
    }

    /// Reverse of the deployment order.
    pub fn teardown_order(&self) -> IacResult<Vec<&str>> {
        let mut order = self.deployment_order()?;
        order.reverse();
        Ok(order)
    }
}
