//! Deployment configuration.
//!
//! A single immutable [`DeploymentConfig`] is loaded once at startup and
//! passed by reference to every stack builder.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::error::{IacError, IacResult};
use crate::host::HostRole;

/// A resource tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse a `KEY=VALUE` pair.
    pub fn parse(pair: &str) -> IacResult<Self> {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => Ok(Self::new(key.trim(), value.trim())),
            _ => Err(IacError::Config(format!("tag must be KEY=VALUE, got '{}'", pair))),
        }
    }
}

/// Project metadata shared by every stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectInfo {
    pub owner: String,
    pub environment: String,
    pub repo_name: String,
    pub source_info: String,
    pub version: NaiveDate,
    pub support_emails: Vec<String>,
}

impl Default for ProjectInfo {
    fn default() -> Self {
        let repo_name = "multicast-with-tgw".to_string();
        Self {
            owner: "MystiqueAutomation".to_string(),
            environment: "production".to_string(),
            source_info: format!("https://github.com/miztiik/{}", repo_name),
            repo_name,
            version: NaiveDate::from_ymd_opt(2022, 4, 13).unwrap_or(NaiveDate::MIN),
            support_emails: vec!["mystique@example.com".to_string()],
        }
    }
}

/// Names of the four stacks in the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackNames {
    pub network: String,
    pub transit_gateway: String,
    pub producer: String,
    pub consumer: String,
}

impl Default for StackNames {
    fn default() -> Self {
        Self {
            network: "multicast-vpc-stack".to_string(),
            transit_gateway: "multicast-tgw-stack".to_string(),
            producer: "multicast-producer-stack".to_string(),
            consumer: "multicast-consumer-stack".to_string(),
        }
    }
}

/// VPC layout settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub cidr: String,
    pub max_azs: usize,
    pub nat_gateways: usize,
    pub subnet_prefix: u8,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            cidr: "10.10.0.0/16".to_string(),
            max_azs: 2,
            nat_gateways: 1,
            subnet_prefix: 24,
        }
    }
}

/// Transit Gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitGatewaySettings {
    pub asn: u32,
}

impl Default for TransitGatewaySettings {
    fn default() -> Self {
        Self { asn: 64512 }
    }
}

/// Settings for one multicast host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub instance_type: String,
    /// Bootstrap script, relative to the asset root.
    pub bootstrap_script: PathBuf,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            instance_type: "t2.micro".to_string(),
            bootstrap_script: PathBuf::from("bootstrap_scripts/deploy_app.sh"),
        }
    }
}

/// Immutable deployment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub project: ProjectInfo,
    pub stacks: StackNames,
    pub network: NetworkSettings,
    pub transit_gateway: TransitGatewaySettings,
    pub producer: HostSettings,
    pub consumer: HostSettings,
    pub stack_log_level: String,
    /// Directory bootstrap scripts are resolved against.
    pub asset_root: PathBuf,
    #[serde(serialize_with = "serialize_tags", deserialize_with = "deserialize_tags")]
    pub tags: Vec<Tag>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            project: ProjectInfo::default(),
            stacks: StackNames::default(),
            network: NetworkSettings::default(),
            transit_gateway: TransitGatewaySettings::default(),
            producer: HostSettings::default(),
            consumer: HostSettings::default(),
            stack_log_level: "INFO".to_string(),
            asset_root: PathBuf::from("."),
            tags: Vec::new(),
        }
    }
}

impl DeploymentConfig {
    /// Load configuration from a YAML, TOML or JSON file.
    pub fn from_file(path: &Path) -> IacResult<Self> {
        debug!("Reading deployment config from {:?}", path);
        let content = fs::read_to_string(path)?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => {
                return Err(IacError::Config(format!(
                    "unsupported config format: {}",
                    path.display()
                )))
            }
        };

        Ok(config)
    }

    /// Save configuration as YAML.
    pub fn to_file(&self, path: &Path) -> IacResult<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = root.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_asn(mut self, asn: u32) -> Self {
        self.transit_gateway.asn = asn;
        self
    }

    /// Apply tag overrides: existing keys are replaced in place, new keys appended.
    pub fn with_tag_overrides(mut self, overrides: Vec<Tag>) -> Self {
        for tag in overrides {
            match self.tags.iter_mut().find(|t| t.key == tag.key) {
                Some(existing) => existing.value = tag.value,
                None => self.tags.push(tag),
            }
        }
        self
    }

    pub fn host(&self, role: HostRole) -> &HostSettings {
        match role {
            HostRole::Producer => &self.producer,
            HostRole::Consumer => &self.consumer,
        }
    }

    pub fn host_stack_name(&self, role: HostRole) -> &str {
        match role {
            HostRole::Producer => &self.stacks.producer,
            HostRole::Consumer => &self.stacks.consumer,
        }
    }

    /// Absolute-or-relative path of the bootstrap script for a host.
    pub fn bootstrap_path(&self, role: HostRole) -> PathBuf {
        self.asset_root.join(&self.host(role).bootstrap_script)
    }
}

// Tags are written as a list of single-pair maps: `[{Owner: x}, {Env: y}]`.
fn serialize_tags<S: Serializer>(tags: &[Tag], serializer: S) -> Result<S::Ok, S::Error> {
    let entries: Vec<BTreeMap<&str, &str>> = tags
        .iter()
        .map(|t| BTreeMap::from([(t.key.as_str(), t.value.as_str())]))
        .collect();
    entries.serialize(serializer)
}

fn deserialize_tags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Tag>, D::Error> {
    let entries: Option<Vec<BTreeMap<String, String>>> = Option::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .flat_map(|entry| entry.into_iter().map(|(k, v)| Tag::new(k, v)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = DeploymentConfig::default();
        assert_eq!(config.transit_gateway.asn, 64512);
        assert_eq!(config.producer.instance_type, "t2.micro");
        assert_eq!(config.network.cidr, "10.10.0.0/16");
        assert_eq!(config.project.source_info, "https://github.com/miztiik/multicast-with-tgw");
        assert!(config.tags.is_empty());
    }

    #[test]
    fn test_tag_parse() {
        assert_eq!(Tag::parse("Owner=ops").unwrap(), Tag::new("Owner", "ops"));
        assert_eq!(Tag::parse("Empty=").unwrap(), Tag::new("Empty", ""));
        assert!(Tag::parse("novalue").is_err());
        assert!(Tag::parse("=x").is_err());
    }

    #[test]
    fn test_yaml_tags_list_of_maps() {
        let yaml = r#"
tags:
  - Owner: ops
  - CostCenter: "42"
transit_gateway:
  asn: 64600
"#;
        let config: DeploymentConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.tags, vec![Tag::new("Owner", "ops"), Tag::new("CostCenter", "42")]);
        assert_eq!(config.transit_gateway.asn, 64600);
        // untouched sections keep their defaults
        assert_eq!(config.stacks, StackNames::default());
    }

    #[test]
    fn test_tag_overrides() {
        let config = DeploymentConfig::default()
            .with_tags(vec![Tag::new("Owner", "ops"), Tag::new("Env", "dev")])
            .with_tag_overrides(vec![Tag::new("Env", "prod"), Tag::new("Team", "net")]);

        assert_eq!(
            config.tags,
            vec![Tag::new("Owner", "ops"), Tag::new("Env", "prod"), Tag::new("Team", "net")]
        );
    }

    #[test]
    fn test_from_file_formats() {
        let dir = tempdir().unwrap();

        let toml_path = dir.path().join("deploy.toml");
        fs::write(&toml_path, "stack_log_level = \"DEBUG\"\n[network]\nmax_azs = 3\n").unwrap();
        let config = DeploymentConfig::from_file(&toml_path).unwrap();
        assert_eq!(config.stack_log_level, "DEBUG");
        assert_eq!(config.network.max_azs, 3);

        let json_path = dir.path().join("deploy.json");
        fs::write(&json_path, r#"{"tags": [{"Owner": "ops"}]}"#).unwrap();
        let config = DeploymentConfig::from_file(&json_path).unwrap();
        assert_eq!(config.tags, vec![Tag::new("Owner", "ops")]);

        let bad_path = dir.path().join("deploy.ini");
        fs::write(&bad_path, "").unwrap();
        assert!(matches!(DeploymentConfig::from_file(&bad_path), Err(IacError::Config(_))));
    }

    #[test]
    fn test_yaml_round_trip_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deploy.yaml");
        let config = DeploymentConfig::default().with_tags(vec![Tag::new("Owner", "ops")]);

        config.to_file(&path).unwrap();
        assert_eq!(DeploymentConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_bootstrap_path_uses_asset_root() {
        let config = DeploymentConfig::default().with_asset_root("/srv/app");
        assert_eq!(
            config.bootstrap_path(HostRole::Consumer),
            PathBuf::from("/srv/app/bootstrap_scripts/deploy_app.sh")
        );
    }
}
