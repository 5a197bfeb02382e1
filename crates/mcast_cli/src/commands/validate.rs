//! Validate command - Check the deployment for multicast readiness.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use mcast_iac::{build_deployment, DeploymentConfig, DeploymentValidator};

#[derive(Args)]
pub struct ValidateArgs {
    /// Print every check, not only failures
    #[arg(long)]
    all: bool,
}

pub fn execute(args: &ValidateArgs, config: &DeploymentConfig) -> Result<()> {
    info!("Validating deployment");

    let deployment = build_deployment(config).context("Failed to build deployment")?;
    let report = DeploymentValidator::new().validate(&deployment);

    println!("🔍 Validating multicast deployment...");
    for check in &report.checks {
        if check.passed {
            if args.all {
                println!("   ✅ {}: {}", check.name, check.message);
            }
        } else {
            println!("   ❌ {}: {}", check.name, check.message);
        }
    }

    println!();
    if report.passed {
        println!("✅ All {} checks passed!", report.checks.len());
    }
    report.into_result()?;

    Ok(())
}
