//! Stack descriptors.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{IacError, IacResult};
use crate::template::{CrossStackRef, Output, Parameter, Resource, ResourceAddr};

const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

fn logical_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]{0,254}$").expect("valid regex"))
}

fn stack_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,127}$").expect("valid regex"))
}

/// The declared content of one CloudFormation stack.
///
/// Resources, parameters and outputs share one logical ID namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct StackDescriptor {
    name: String,
    description: String,
    parameters: BTreeMap<String, Parameter>,
    resources: BTreeMap<String, Resource>,
    outputs: BTreeMap<String, Output>,
}

impl StackDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> IacResult<Self> {
        let name = name.into();
        if !stack_name_pattern().is_match(&name) {
            return Err(IacError::InvalidStackName(name));
        }

        Ok(Self {
            name,
            description: description.into(),
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Address of a logical ID in this stack.
    pub fn addr(&self, logical_id: &str) -> ResourceAddr {
        ResourceAddr::new(self.name.clone(), logical_id)
    }

    fn claim(&self, logical_id: &str) -> IacResult<()> {
        if !logical_id_pattern().is_match(logical_id) {
            return Err(IacError::InvalidLogicalId(logical_id.to_string()));
        }
        if self.contains(logical_id) || self.outputs.contains_key(logical_id) {
            return Err(IacError::DuplicateResource {
                stack: self.name.clone(),
                logical_id: logical_id.to_string(),
            });
        }
        Ok(())
    }

    /// Declare a resource and return its address.
    pub fn add(&mut self, resource: Resource) -> IacResult<ResourceAddr> {
        self.claim(&resource.logical_id)?;
        let addr = self.addr(&resource.logical_id);
        self.resources.insert(resource.logical_id.clone(), resource);
        Ok(addr)
    }

    pub fn add_parameter(&mut self, parameter: Parameter) -> IacResult<ResourceAddr> {
        self.claim(&parameter.logical_id)?;
        let addr = self.addr(&parameter.logical_id);
        self.parameters.insert(parameter.logical_id.clone(), parameter);
        Ok(addr)
    }

    pub fn add_output(&mut self, output: Output) -> IacResult<()> {
        self.claim(&output.logical_id)?;
        self.outputs.insert(output.logical_id.clone(), output);
        Ok(())
    }

    /// Whether a resource or parameter with this logical ID exists.
    pub fn contains(&self, logical_id: &str) -> bool {
        self.resources.contains_key(logical_id) || self.parameters.contains_key(logical_id)
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn resources_mut(&mut self) -> impl Iterator<Item = &mut Resource> {
        self.resources.values_mut()
    }

    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a Resource> {
        self.resources.values().filter(move |r| r.is_type(resource_type))
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values()
    }

    pub fn output(&self, logical_id: &str) -> Option<&Output> {
        self.outputs.get(logical_id)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    /// Every reference made by resources and outputs of this stack.
    pub fn references(&self) -> Vec<CrossStackRef> {
        self.resources
            .values()
            .flat_map(|r| r.references())
            .chain(self.outputs.values().flat_map(|o| o.value.references()))
            .collect()
    }

    /// References whose target lives in another stack.
    pub fn foreign_references(&self) -> Vec<CrossStackRef> {
        let mut refs: Vec<CrossStackRef> = self
            .references()
            .into_iter()
            .filter(|r| r.target.stack != self.name)
            .collect();
        refs.sort();
        refs.dedup();
        refs
    }

    /// Check that local references and `DependsOn` entries point at declared IDs.
    pub fn check_local_references(&self) -> IacResult<()> {
        let dangling = |logical_id: &str| IacError::DanglingReference {
            stack: self.name.clone(),
            logical_id: logical_id.to_string(),
        };

        for reference in self.references() {
            if reference.target.stack == self.name && !self.contains(&reference.target.logical_id) {
                return Err(dangling(&reference.target.logical_id));
            }
        }
        for resource in self.resources.values() {
            let mut missing = resource
                .depends_on
                .iter()
                .filter(|d| !self.resources.contains_key(*d));
            if let Some(missing) = missing.next() {
                return Err(dangling(missing));
            }
        }
        Ok(())
    }

    /// Render the CloudFormation template body.
    pub fn to_template(&self) -> Value {
        let mut template = Map::new();
        template.insert(
            "AWSTemplateFormatVersion".to_string(),
            Value::String(TEMPLATE_FORMAT_VERSION.to_string()),
        );
        if !self.description.is_empty() {
            template.insert("Description".to_string(), Value::String(self.description.clone()));
        }
        if !self.parameters.is_empty() {
            let params = self
                .parameters
                .iter()
                .map(|(id, p)| (id.clone(), p.render()))
                .collect();
            template.insert("Parameters".to_string(), Value::Object(params));
        }
        let resources = self
            .resources
            .iter()
            .map(|(id, r)| (id.clone(), r.render(&self.name)))
            .collect();
        template.insert("Resources".to_string(), Value::Object(resources));
        if !self.outputs.is_empty() {
            let outputs = self
                .outputs
                .iter()
                .map(|(id, o)| (id.clone(), o.render(&self.name)))
                .collect();
            template.insert("Outputs".to_string(), Value::Object(outputs));
        }
        Value::Object(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Expr;

    #[test]
    fn test_rejects_bad_names() {
        assert!(matches!(
            StackDescriptor::new("bad_name", ""),
            Err(IacError::InvalidStackName(_))
        ));

        let mut stack = StackDescriptor::new("good-name", "").unwrap();
        assert!(matches!(
            stack.add(Resource::new("not-alnum", "AWS::EC2::VPC")),
            Err(IacError::InvalidLogicalId(_))
        ));
    }

    #[test]
    fn test_duplicate_logical_ids_rejected() {
        let mut stack = StackDescriptor::new("s", "").unwrap();
        stack.add(Resource::new("Vpc", "AWS::EC2::VPC")).unwrap();

        assert!(matches!(
            stack.add(Resource::new("Vpc", "AWS::EC2::VPC")),
            Err(IacError::DuplicateResource { .. })
        ));
        assert!(stack.add_output(Output::new("Vpc", "x")).is_err());
        assert!(stack
            .add_parameter(Parameter::new("Vpc", "String"))
            .is_err());
    }

    #[test]
    fn test_foreign_references_are_deduplicated() {
        let mut stack = StackDescriptor::new("tgw", "").unwrap();
        let vpc = ResourceAddr::new("net", "Vpc");
        stack
            .add(Resource::new("A", "AWS::EC2::NetworkAcl").prop("VpcId", vpc.reference()))
            .unwrap();
        stack
            .add(Resource::new("B", "AWS::EC2::SecurityGroup").prop("VpcId", vpc.reference()))
            .unwrap();

        let refs = stack.foreign_references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].target, vpc);
    }

    #[test]
    fn test_dangling_reference_detected() {
        let mut stack = StackDescriptor::new("s", "").unwrap();
        let ghost = stack.addr("Ghost");
        stack
            .add(Resource::new("A", "AWS::EC2::Subnet").prop("VpcId", ghost.reference()))
            .unwrap();
        assert!(matches!(
            stack.check_local_references(),
            Err(IacError::DanglingReference { .. })
        ));

        let mut stack = StackDescriptor::new("s", "").unwrap();
        stack
            .add(Resource::new("A", "AWS::EC2::Subnet").depends_on("Ghost"))
            .unwrap();
        assert!(stack.check_local_references().is_err());
    }

    #[test]
    fn test_template_layout() {
        let mut stack = StackDescriptor::new("s", "demo").unwrap();
        let vpc = stack
            .add(Resource::new("Vpc", "AWS::EC2::VPC").prop("CidrBlock", "10.0.0.0/16"))
            .unwrap();
        stack
            .add_output(Output::new("VpcId", Expr::Ref(vpc)))
            .unwrap();

        let template = stack.to_template();
        assert_eq!(template["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(template["Description"], "demo");
        assert!(template.get("Parameters").is_none());
        assert_eq!(template["Resources"]["Vpc"]["Type"], "AWS::EC2::VPC");
        assert_eq!(template["Outputs"]["VpcId"]["Value"]["Ref"], "Vpc");
    }
}
