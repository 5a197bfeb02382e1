//! CLI command definitions.
//!
//! Every subcommand works on the same deployment: the config file (or the
//! built-in defaults), adjusted by the global flags.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

use mcast_iac::{DeploymentConfig, IacError, Tag};

pub mod list;
pub mod synth;
pub mod validate;

/// mcast - Transit Gateway multicast deployment synthesizer
#[derive(Parser)]
#[command(name = "mcast")]
#[command(version, about = "mcast - Transit Gateway multicast deployment synthesizer")]
#[command(long_about = r#"
mcast declares a VPC, a multicast-enabled Transit Gateway and a producer and
consumer EC2 host, and synthesizes them into CloudFormation templates.

COMMANDS:
  synth     → Write stack templates and a manifest to an output directory
  validate  → Check the deployment for multicast readiness
  list      → Show stacks in deployment (or teardown) order

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments or configuration
  3 - Validation failure
  5 - IaC error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Deployment config file (YAML, TOML or JSON)
    #[arg(short, long, global = true, env = "MCAST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory bootstrap scripts are resolved against
    #[arg(long, global = true, env = "MCAST_ASSET_ROOT")]
    pub asset_root: Option<PathBuf>,

    /// Add or override a deployment tag (KEY=VALUE, repeatable)
    #[arg(short, long = "tag", global = true, value_name = "KEY=VALUE")]
    pub tags: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synthesize CloudFormation templates
    Synth(synth::SynthArgs),

    /// Validate the deployment
    Validate(validate::ValidateArgs),

    /// List stacks in deployment order
    List(list::ListArgs),
}

impl Cli {
    /// Resolve the deployment config from the file and global flags.
    pub fn load_config(&self) -> Result<DeploymentConfig> {
        let mut config = match &self.config {
            Some(path) => DeploymentConfig::from_file(path).map_err(|e| {
                IacError::Config(format!("Failed to load config {}: {}", path.display(), e))
            })?,
            None => DeploymentConfig::default(),
        };

        if let Some(root) = &self.asset_root {
            config = config.with_asset_root(root);
        }

        let overrides = self
            .tags
            .iter()
            .map(String::as_str)
            .map(Tag::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if !overrides.is_empty() {
            debug!("Applying {} tag overrides", overrides.len());
            config = config.with_tag_overrides(overrides);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_config() {
        let cli = Cli::parse_from(["mcast", "list"]);
        let config = cli.load_config().unwrap();
        assert_eq!(config, DeploymentConfig::default());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deploy.yaml");
        fs::write(&path, "tags:\n  - Owner: Mystique\n  - Env: dev\n").unwrap();

        let cli = Cli::parse_from([
            "mcast",
            "--config",
            path.to_str().unwrap(),
            "--asset-root",
            "/srv/assets",
            "--tag",
            "Env=prod",
            "--tag",
            "Team=net",
            "list",
        ]);
        let config = cli.load_config().unwrap();

        assert_eq!(config.asset_root, PathBuf::from("/srv/assets"));
        assert_eq!(
            config.tags,
            [
                Tag::new("Owner", "Mystique"),
                Tag::new("Env", "prod"),
                Tag::new("Team", "net"),
            ]
        );
    }

    #[test]
    fn test_malformed_tag_rejected() {
        let cli = Cli::parse_from(["mcast", "--tag", "novalue", "list"]);
        assert!(cli.load_config().is_err());
    }
}
