//! Synth command - Write CloudFormation templates for the deployment.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::info;

use mcast_iac::{
    build_deployment, DeploymentConfig, DeploymentValidator, DirectorySink, Synthesizer,
    TemplateFormat,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Json,
    Yaml,
}

impl From<FormatArg> for TemplateFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Json => TemplateFormat::Json,
            FormatArg::Yaml => TemplateFormat::Yaml,
        }
    }
}

#[derive(Args)]
pub struct SynthArgs {
    /// Output directory for templates and the manifest
    #[arg(short, long, default_value = "cdk.out")]
    out: PathBuf,

    /// Template format
    #[arg(short, long, value_enum, default_value_t = FormatArg::Json)]
    format: FormatArg,

    /// Skip deployment validation before synthesizing
    #[arg(long)]
    skip_validation: bool,
}

pub fn execute(args: &SynthArgs, config: &DeploymentConfig) -> Result<()> {
    info!("Synthesizing deployment into {}", args.out.display());

    let deployment = build_deployment(config).context("Failed to build deployment")?;

    if !args.skip_validation {
        DeploymentValidator::new().validate(&deployment).into_result()?;
    }

    let assembly = deployment.assemble(&config.tags)?;
    let mut sink = DirectorySink::create(&args.out)
        .with_context(|| format!("Failed to create output directory {}", args.out.display()))?;
    let manifest = Synthesizer::new(args.format.into()).synth_to(&assembly, &mut sink)?;

    println!("📦 Synthesized {} stacks to {}", manifest.stacks.len(), args.out.display());
    for name in &manifest.deployment_order {
        println!("   ✅ {}", manifest.stacks[name].template_file);
    }

    Ok(())
}
