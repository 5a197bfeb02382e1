//! Template synthesis and the deployment-engine seam.
//!
//! The synthesizer renders every stack of a [`CloudAssembly`] into a
//! template body and hands the results to a [`TemplateSink`]. The bundled
//! [`DirectorySink`] writes them to an output directory together with a
//! `manifest.json` that a deployment tool can follow.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::assembly::CloudAssembly;
use crate::error::IacResult;

pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: &str = "1.0";

/// Output format of template bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateFormat {
    #[default]
    Json,
    Yaml,
}

impl TemplateFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TemplateFormat::Json => "json",
            TemplateFormat::Yaml => "yaml",
        }
    }
}

/// One rendered stack template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedTemplate {
    pub stack_name: String,
    pub file_name: String,
    pub body: String,
}

/// Manifest entry for one stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub template_file: String,
    pub description: String,
    pub dependencies: Vec<String>,
    pub exports: Vec<String>,
}

/// Describes a synthesized assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub stacks: BTreeMap<String, ManifestEntry>,
    pub deployment_order: Vec<String>,
}

impl Manifest {
    /// Load a manifest from a synthesis output directory.
    pub fn load(out_dir: &Path) -> IacResult<Self> {
        let content = fs::read_to_string(out_dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Receives synthesized templates; implemented by deployment-engine adapters.
#[cfg_attr(test, mockall::automock)]
pub trait TemplateSink {
    fn write_template(&mut self, template: &SynthesizedTemplate) -> IacResult<()>;

    fn write_manifest(&mut self, manifest: &Manifest) -> IacResult<()>;
}

/// Renders assemblies into template bodies.
#[derive(Debug, Clone, Default)]
pub struct Synthesizer {
    format: TemplateFormat,
}

impl Synthesizer {
    pub fn new(format: TemplateFormat) -> Self {
        Self { format }
    }

    /// Render every stack, in deployment order.
    pub fn synthesize(&self, assembly: &CloudAssembly) -> IacResult<Vec<SynthesizedTemplate>> {
        let mut templates = Vec::with_capacity(assembly.stacks().len());

        for name in assembly.deployment_order()? {
            let Some(stack) = assembly.stack(name) else {
                continue;
            };
            let template = stack.to_template();
            let body = match self.format {
                TemplateFormat::Json => {
                    let mut body = serde_json::to_string_pretty(&template)?;
                    body.push('\n');
                    body
                }
                TemplateFormat::Yaml => serde_yaml::to_string(&template)?,
            };
            debug!("Synthesized {} ({} bytes)", name, body.len());

            templates.push(SynthesizedTemplate {
                stack_name: name.to_string(),
                file_name: format!("{}.template.{}", name, self.format.extension()),
                body,
            });
        }

        Ok(templates)
    }

    /// Describe the assembly for a deployment tool.
    pub fn manifest(&self, assembly: &CloudAssembly) -> IacResult<Manifest> {
        let deployment_order: Vec<String> = assembly
            .deployment_order()?
            .into_iter()
            .map(str::to_string)
            .collect();

        let stacks = assembly
            .stacks()
            .iter()
            .map(|stack| {
                let entry = ManifestEntry {
                    template_file: format!("{}.template.{}", stack.name(), self.format.extension()),
                    description: stack.description().to_string(),
                    dependencies: assembly
                        .dependencies(stack.name())
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                    exports: stack.outputs().filter_map(|o| o.export_name.clone()).collect(),
                };
                (stack.name().to_string(), entry)
            })
            .collect();

        Ok(Manifest {
            version: MANIFEST_VERSION.to_string(),
            stacks,
            deployment_order,
        })
    }

    /// Synthesize the assembly into `sink`: templates first, manifest last.
    pub fn synth_to(
        &self,
        assembly: &CloudAssembly,
        sink: &mut dyn TemplateSink,
    ) -> IacResult<Manifest> {
        let manifest = self.manifest(assembly)?;
        for template in self.synthesize(assembly)? {
            sink.write_template(&template)?;
        }
        sink.write_manifest(&manifest)?;
        info!("Synthesized {} stacks", manifest.stacks.len());
        Ok(manifest)
    }
}

/// Writes templates into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    out_dir: PathBuf,
}

impl DirectorySink {
    /// Create the sink, creating `out_dir` if needed.
    pub fn create(out_dir: impl Into<PathBuf>) -> IacResult<Self> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir)?;
        Ok(Self { out_dir })
    }
}

impl TemplateSink for DirectorySink {
    fn write_template(&mut self, template: &SynthesizedTemplate) -> IacResult<()> {
        let path = self.out_dir.join(&template.file_name);
        fs::write(&path, &template.body)?;
        debug!("Wrote {:?}", path);
        Ok(())
    }

    fn write_manifest(&mut self, manifest: &Manifest) -> IacResult<()> {
        let mut content = serde_json::to_string_pretty(manifest)?;
        content.push('\n');
        fs::write(self.out_dir.join(MANIFEST_FILE), content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackDescriptor;
    use crate::template::Resource;
    use mockall::Sequence;
    use tempfile::tempdir;

    fn assembly() -> CloudAssembly {
        let mut net = StackDescriptor::new("net", "network").unwrap();
        let vpc = net.add(Resource::new("Vpc", "AWS::EC2::VPC")).unwrap();
        let mut app = StackDescriptor::new("app", "application").unwrap();
        app.add(Resource::new("Sg", "AWS::EC2::SecurityGroup").prop("VpcId", vpc.reference()))
            .unwrap();
        CloudAssembly::assemble(vec![app, net], &[]).unwrap()
    }

    #[test]
    fn test_templates_in_deployment_order() {
        let templates = Synthesizer::default().synthesize(&assembly()).unwrap();
        let names: Vec<&str> = templates.iter().map(|t| t.stack_name.as_str()).collect();
        assert_eq!(names, ["net", "app"]);
        assert_eq!(templates[0].file_name, "net.template.json");
        assert!(templates[0].body.ends_with('\n'));
    }

    #[test]
    fn test_yaml_format() {
        let templates = Synthesizer::new(TemplateFormat::Yaml).synthesize(&assembly()).unwrap();
        assert_eq!(templates[1].file_name, "app.template.yaml");
        let parsed: serde_json::Value = serde_yaml::from_str(&templates[1].body).unwrap();
        assert_eq!(parsed["Resources"]["Sg"]["Type"], "AWS::EC2::SecurityGroup");
    }

    #[test]
    fn test_manifest_lists_dependencies_and_exports() {
        let manifest = Synthesizer::default().manifest(&assembly()).unwrap();
        assert_eq!(manifest.deployment_order, ["net", "app"]);
        assert_eq!(manifest.stacks["app"].dependencies, ["net"]);
        assert_eq!(manifest.stacks["net"].exports, ["net:ExportsOutputRefVpc"]);
        assert!(manifest.stacks["net"].dependencies.is_empty());
    }

    #[test]
    fn test_sink_receives_templates_then_manifest() {
        let mut sink = MockTemplateSink::new();
        let mut seq = Sequence::new();
        sink.expect_write_template()
            .withf(|t| t.stack_name == "net")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        sink.expect_write_template()
            .withf(|t| t.stack_name == "app")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        sink.expect_write_manifest()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        Synthesizer::default().synth_to(&assembly(), &mut sink).unwrap();
    }

    #[test]
    fn test_directory_sink_writes_files() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let mut sink = DirectorySink::create(&out).unwrap();

        let manifest = Synthesizer::default().synth_to(&assembly(), &mut sink).unwrap();

        assert!(out.join("net.template.json").exists());
        assert!(out.join("app.template.json").exists());
        assert_eq!(Manifest::load(&out).unwrap(), manifest);
    }
}
