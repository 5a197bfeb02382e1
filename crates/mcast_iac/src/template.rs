//! CloudFormation template model.
//!
//! Property values are [`Expr`] trees. References carry the name of the
//! stack that owns their target, so rendering can turn a reference that
//! crosses a stack boundary into `Fn::ImportValue` of a generated export.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value};

use crate::config::Tag;
use crate::tags::TagManager;

const AUTOMATION_FROM_DESCRIPTION: &str =
    "To know more about this automation stack, check out our github page.";

/// CloudFormation pseudo parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pseudo {
    Region,
    Partition,
}

impl Pseudo {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pseudo::Region => "AWS::Region",
            Pseudo::Partition => "AWS::Partition",
        }
    }
}

/// Address of a declared resource or parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceAddr {
    pub stack: String,
    pub logical_id: String,
}

impl ResourceAddr {
    pub fn new(stack: impl Into<String>, logical_id: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            logical_id: logical_id.into(),
        }
    }

    pub fn reference(&self) -> Expr {
        Expr::Ref(self.clone())
    }

    pub fn attr(&self, attribute: impl Into<String>) -> Expr {
        Expr::GetAtt(self.clone(), attribute.into())
    }
}

/// A reference that leaves its owning stack and must be exported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CrossStackRef {
    pub target: ResourceAddr,
    pub attribute: Option<String>,
}

impl CrossStackRef {
    /// Logical ID of the export output in the owning stack.
    pub fn output_id(&self) -> String {
        match &self.attribute {
            None => format!("ExportsOutputRef{}", self.target.logical_id),
            Some(attr) => {
                let attr: String = attr.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
                format!("ExportsOutputFnGetAtt{}{}", self.target.logical_id, attr)
            }
        }
    }

    /// Export name, unique per region and account.
    pub fn export_name(&self) -> String {
        format!("{}:{}", self.target.stack, self.output_id())
    }

    /// The expression the export output publishes, seen from the owning stack.
    pub fn local_value(&self) -> Expr {
        match &self.attribute {
            None => Expr::Ref(self.target.clone()),
            Some(attr) => Expr::GetAtt(self.target.clone(), attr.clone()),
        }
    }
}

/// Template value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<Expr>),
    Map(BTreeMap<String, Expr>),
    Ref(ResourceAddr),
    GetAtt(ResourceAddr, String),
    Pseudo(Pseudo),
    Join(String, Vec<Expr>),
    Base64(Box<Expr>),
    Select(usize, Box<Expr>),
    GetAzs,
    ImportValue(String),
}

impl Expr {
    pub fn str(s: impl Into<String>) -> Self {
        Expr::Str(s.into())
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Expr)>) -> Self {
        Expr::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list(items: impl IntoIterator<Item = Expr>) -> Self {
        Expr::List(items.into_iter().collect())
    }

    pub fn join(parts: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Join(String::new(), parts.into_iter().collect())
    }

    pub fn base64(inner: Expr) -> Self {
        Expr::Base64(Box::new(inner))
    }

    /// `Fn::Select [index, Fn::GetAZs ""]`
    pub fn availability_zone(index: usize) -> Self {
        Expr::Select(index, Box::new(Expr::GetAzs))
    }

    /// Look up a key of a map expression.
    pub fn get(&self, key: &str) -> Option<&Expr> {
        match self {
            Expr::Map(m) => m.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Expr::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Expr]> {
        match self {
            Expr::List(items) => Some(items),
            _ => None,
        }
    }

    /// All resource references inside this expression.
    pub fn references(&self) -> Vec<CrossStackRef> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references(&self, found: &mut Vec<CrossStackRef>) {
        match self {
            Expr::Ref(addr) => found.push(CrossStackRef {
                target: addr.clone(),
                attribute: None,
            }),
            Expr::GetAtt(addr, attr) => found.push(CrossStackRef {
                target: addr.clone(),
                attribute: Some(attr.clone()),
            }),
            Expr::List(items) | Expr::Join(_, items) => {
                items.iter().for_each(|e| e.collect_references(found))
            }
            Expr::Map(entries) => entries.values().for_each(|e| e.collect_references(found)),
            Expr::Base64(inner) | Expr::Select(_, inner) => inner.collect_references(found),
            Expr::Str(_)
            | Expr::Int(_)
            | Expr::Bool(_)
            | Expr::Pseudo(_)
            | Expr::GetAzs
            | Expr::ImportValue(_) => {}
        }
    }

    /// Render as template JSON from inside stack `scope`.
    pub fn render(&self, scope: &str) -> Value {
        match self {
            Expr::Str(s) => Value::String(s.clone()),
            Expr::Int(i) => json!(i),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::List(items) => Value::Array(items.iter().map(|e| e.render(scope)).collect()),
            Expr::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.render(scope)))
                    .collect::<Map<String, Value>>(),
            ),
            Expr::Ref(addr) if addr.stack != scope => import(addr, None),
            Expr::Ref(addr) => json!({ "Ref": addr.logical_id }),
            Expr::GetAtt(addr, attr) if addr.stack != scope => import(addr, Some(attr)),
            Expr::GetAtt(addr, attr) => json!({ "Fn::GetAtt": [addr.logical_id, attr] }),
            Expr::Pseudo(p) => json!({ "Ref": p.as_str() }),
            Expr::Join(sep, parts) => {
                let parts: Vec<Value> = parts.iter().map(|e| e.render(scope)).collect();
                json!({ "Fn::Join": [sep, parts] })
            }
            Expr::Base64(inner) => json!({ "Fn::Base64": inner.render(scope) }),
            Expr::Select(index, inner) => json!({ "Fn::Select": [index, inner.render(scope)] }),
            Expr::GetAzs => json!({ "Fn::GetAZs": "" }),
            Expr::ImportValue(name) => json!({ "Fn::ImportValue": name }),
        }
    }
}

fn import(addr: &ResourceAddr, attribute: Option<&String>) -> Value {
    let cross = CrossStackRef {
        target: addr.clone(),
        attribute: attribute.cloned(),
    };
    json!({ "Fn::ImportValue": cross.export_name() })
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Str(s.to_string())
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Str(s)
    }
}

impl From<i64> for Expr {
    fn from(i: i64) -> Self {
        Expr::Int(i)
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Bool(b)
    }
}

impl From<Pseudo> for Expr {
    fn from(p: Pseudo) -> Self {
        Expr::Pseudo(p)
    }
}

/// A declared CloudFormation resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub logical_id: String,
    pub resource_type: String,
    pub properties: BTreeMap<String, Expr>,
    pub depends_on: BTreeSet<String>,
    pub tags: TagManager,
}

impl Resource {
    pub fn new(logical_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
            properties: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            tags: TagManager::default(),
        }
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.insert(logical_id.into());
        self
    }

    /// Declare a tag at the given priority.
    pub fn tag(mut self, tag: Tag, priority: u32) -> Self {
        self.tags.set(tag, priority);
        self
    }

    pub fn property(&self, key: &str) -> Option<&Expr> {
        self.properties.get(key)
    }

    pub fn is_type(&self, resource_type: &str) -> bool {
        self.resource_type == resource_type
    }

    pub fn references(&self) -> Vec<CrossStackRef> {
        self.properties.values().flat_map(|e| e.references()).collect()
    }

    pub fn render(&self, scope: &str) -> Value {
        let mut properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.render(scope)))
            .collect();
        if !self.tags.is_empty() {
            properties.insert("Tags".to_string(), self.tags.render());
        }

        let mut body = Map::new();
        body.insert("Type".to_string(), Value::String(self.resource_type.clone()));
        if !properties.is_empty() {
            body.insert("Properties".to_string(), Value::Object(properties));
        }
        if !self.depends_on.is_empty() {
            body.insert("DependsOn".to_string(), json!(self.depends_on));
        }
        Value::Object(body)
    }
}

/// A template parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub logical_id: String,
    pub param_type: String,
    pub default: Option<String>,
    pub description: Option<String>,
}

impl Parameter {
    pub fn new(logical_id: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            param_type: param_type.into(),
            default: None,
            description: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn render(&self) -> Value {
        let mut body = Map::new();
        body.insert("Type".to_string(), Value::String(self.param_type.clone()));
        if let Some(default) = &self.default {
            body.insert("Default".to_string(), Value::String(default.clone()));
        }
        if let Some(description) = &self.description {
            body.insert("Description".to_string(), Value::String(description.clone()));
        }
        Value::Object(body)
    }
}

/// A stack output, optionally exported.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub logical_id: String,
    pub value: Expr,
    pub description: Option<String>,
    pub export_name: Option<String>,
}

impl Output {
    pub fn new(logical_id: impl Into<String>, value: impl Into<Expr>) -> Self {
        Self {
            logical_id: logical_id.into(),
            value: value.into(),
            description: None,
            export_name: None,
        }
    }

    /// The `AutomationFrom` output every stack carries.
    pub fn automation_from(source_info: &str) -> Self {
        Self::new("AutomationFrom", source_info).with_description(AUTOMATION_FROM_DESCRIPTION)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_export(mut self, name: impl Into<String>) -> Self {
        self.export_name = Some(name.into());
        self
    }

    pub fn render(&self, scope: &str) -> Value {
        let mut body = Map::new();
        body.insert("Value".to_string(), self.value.render(scope));
        if let Some(description) = &self.description {
            body.insert("Description".to_string(), Value::String(description.clone()));
        }
        if let Some(name) = &self.export_name {
            body.insert("Export".to_string(), json!({ "Name": name }));
        }
        Value::Object(body)
    }
}
