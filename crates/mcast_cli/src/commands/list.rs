//! List command - Show stacks in deployment order.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use mcast_iac::{synthesize_assembly, DeploymentConfig};

#[derive(Args)]
pub struct ListArgs {
    /// List in teardown order instead
    #[arg(long)]
    teardown: bool,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

pub fn execute(args: &ListArgs, config: &DeploymentConfig) -> Result<()> {
    let assembly = synthesize_assembly(config).context("Failed to build deployment")?;
    let order = if args.teardown {
        assembly.teardown_order()?
    } else {
        assembly.deployment_order()?
    };

    if args.json {
        let stacks: Vec<_> = order
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "dependencies": assembly.dependencies(name),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&stacks)?);
        return Ok(());
    }

    for name in order {
        let deps = assembly.dependencies(name);
        if deps.is_empty() {
            println!("{}", name);
        } else {
            println!("{} (after {})", name, deps.join(", "));
        }
    }

    Ok(())
}
