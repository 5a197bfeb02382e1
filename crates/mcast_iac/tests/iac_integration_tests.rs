//! Integration tests for the multicast deployment.

use std::fs;
use std::path::Path;

use mcast_iac::tags::is_taggable;
use mcast_iac::{
    build_deployment, synthesize_assembly, DeploymentConfig, DeploymentValidator, DirectorySink,
    HostRole, IacError, Manifest, Synthesizer, Tag, TemplateFormat,
};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};

const BOOTSTRAP: &str = "#!/bin/bash\n\
    yum -y install httpd\n\
    sysctl -w net.ipv4.conf.eth0.force_igmp_version=2\n";

fn workspace() -> (TempDir, DeploymentConfig) {
    let dir = tempdir().unwrap();
    let scripts = dir.path().join("bootstrap_scripts");
    fs::create_dir_all(&scripts).unwrap();
    fs::write(scripts.join("deploy_app.sh"), BOOTSTRAP).unwrap();
    let config = DeploymentConfig::default().with_asset_root(dir.path());
    (dir, config)
}

fn templates(out: &Path) -> Vec<(String, Value)> {
    let manifest = Manifest::load(out).unwrap();
    manifest
        .deployment_order
        .iter()
        .map(|name| {
            let file = &manifest.stacks[name].template_file;
            let body = fs::read_to_string(out.join(file)).unwrap();
            (name.clone(), serde_json::from_str(&body).unwrap())
        })
        .collect()
}

fn resources_of_type<'a>(templates: &'a [(String, Value)], resource_type: &str) -> Vec<&'a Value> {
    templates
        .iter()
        .flat_map(|(_, t)| t["Resources"].as_object().unwrap().values())
        .filter(|r| r["Type"] == resource_type)
        .collect()
}

#[test]
fn test_end_to_end_resource_counts() {
    let (_dir, config) = workspace();
    let out = tempdir().unwrap();
    let assembly = synthesize_assembly(&config).unwrap();
    let mut sink = DirectorySink::create(out.path()).unwrap();
    Synthesizer::default().synth_to(&assembly, &mut sink).unwrap();

    let templates = templates(out.path());
    assert_eq!(templates.len(), 4);
    assert_eq!(resources_of_type(&templates, "AWS::EC2::TransitGateway").len(), 1);
    assert_eq!(resources_of_type(&templates, "AWS::EC2::TransitGatewayAttachment").len(), 1);
    assert_eq!(resources_of_type(&templates, "AWS::EC2::TransitGatewayMulticastDomain").len(), 1);
    assert_eq!(
        resources_of_type(&templates, "AWS::EC2::TransitGatewayMulticastDomainAssociation").len(),
        2
    );
    assert_eq!(resources_of_type(&templates, "AWS::EC2::NetworkAclEntry").len(), 7);

    let instances = resources_of_type(&templates, "AWS::EC2::Instance");
    assert_eq!(instances.len(), 2);
    for instance in instances {
        assert_eq!(instance["Properties"]["SecurityGroupIds"].as_array().unwrap().len(), 2);
        assert_eq!(instance["Properties"]["UserData"], json!({ "Fn::Base64": BOOTSTRAP }));
    }

    let policies = resources_of_type(&templates, "AWS::IAM::Policy");
    assert_eq!(policies.len(), 2);
    for policy in policies {
        let statement = &policy["Properties"]["PolicyDocument"]["Statement"][0];
        assert_eq!(statement["Action"], json!(["logs:Create*", "logs:PutLogEvents"]));
    }
}

#[test]
fn test_transit_gateway_properties() {
    let (_dir, config) = workspace();
    let assembly = synthesize_assembly(&config.with_asn(65000)).unwrap();
    let tgw = assembly.stack("multicast-tgw-stack").unwrap().to_template();

    let gateway = &tgw["Resources"]["tgwForMulticast1"]["Properties"];
    assert_eq!(gateway["AmazonSideAsn"], 65000);
    assert_eq!(gateway["MulticastSupport"], "enable");
    assert_eq!(
        tgw["Resources"]["tgwMulticastDomain1"]["Properties"]["Options"],
        json!({ "Igmpv2Support": "enable" })
    );

    // subnets come from the network stack as imports
    let subnets = tgw["Resources"]["tgwForMulticastAttach1"]["Properties"]["SubnetIds"]
        .as_array()
        .unwrap();
    assert_eq!(subnets.len(), 2);
    assert!(subnets[0]["Fn::ImportValue"]
        .as_str()
        .unwrap()
        .starts_with("multicast-vpc-stack:ExportsOutputRefVpcPrivateSubnet1Subnet"));
}

#[test]
fn test_exact_nacl_rules() {
    let (_dir, config) = workspace();
    let assembly = synthesize_assembly(&config).unwrap();
    let tgw = assembly.stack("multicast-tgw-stack").unwrap().to_template();

    let mut rules: Vec<(bool, i64, i64, String)> = tgw["Resources"]
        .as_object()
        .unwrap()
        .values()
        .filter(|r| r["Type"] == "AWS::EC2::NetworkAclEntry")
        .map(|r| {
            let p = &r["Properties"];
            (
                p["Egress"].as_bool().unwrap(),
                p["RuleNumber"].as_i64().unwrap(),
                p["Protocol"].as_i64().unwrap(),
                p["CidrBlock"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    rules.sort();

    let expected = [
        (false, 100, -1, "0.0.0.0/0"),
        (false, 200, 1, "224.0.0.1/32"),
        (false, 300, 17, "10.10.0.0/16"),
        (true, 100, -1, "0.0.0.0/0"),
        (true, 200, 17, "10.10.0.0/16"),
        (true, 300, 1, "224.0.0.2/32"),
        (true, 400, 1, "10.10.0.0/16"),
    ];
    let expected: Vec<(bool, i64, i64, String)> = expected
        .iter()
        .map(|(e, n, p, c)| (*e, *n, *p, c.to_string()))
        .collect();
    assert_eq!(rules, expected);
}

#[test]
fn test_tags_reach_every_taggable_resource() {
    let (_dir, config) = workspace();
    let config =
        config.with_tags(vec![Tag::new("Owner", "Mystique"), Tag::new("Name", "override")]);
    let assembly = synthesize_assembly(&config).unwrap();

    let mut tagged = 0;
    for stack in assembly.stacks() {
        for resource in stack.resources() {
            if is_taggable(&resource.resource_type) {
                assert_eq!(resource.tags.get("Owner"), Some("Mystique"), "{}", resource.logical_id);
                // deployment tags outrank construct Name tags
                assert_eq!(resource.tags.get("Name"), Some("override"));
                tagged += 1;
            } else {
                assert!(resource.tags.is_empty(), "{}", resource.logical_id);
            }
        }
    }
    assert!(tagged > 0);

    let consumer = assembly.stack("multicast-consumer-stack").unwrap().to_template();
    assert_eq!(
        consumer["Resources"]["appServer"]["Properties"]["PropagateTagsToVolumeOnCreation"],
        true
    );
}

#[test]
fn test_no_tags_configured() {
    let (_dir, config) = workspace();
    let assembly = synthesize_assembly(&config).unwrap();

    let consumer = assembly.stack("multicast-consumer-stack").unwrap();
    let instance = consumer.resource("appServer").unwrap();
    assert_eq!(instance.tags.get("Name"), Some("multicast_consumer_01"));
    assert!(instance.property("PropagateTagsToVolumeOnCreation").is_none());
    assert!(consumer
        .resource("webAppClientRole")
        .map(|r| r.tags.is_empty())
        .unwrap());
}

#[test]
fn test_synthesis_is_deterministic() {
    let (_dir, config) = workspace();
    let config = config.with_tags(vec![Tag::new("Project", "multicast")]);

    for format in [TemplateFormat::Json, TemplateFormat::Yaml] {
        let synth = Synthesizer::new(format);
        let first = synth.synthesize(&synthesize_assembly(&config).unwrap()).unwrap();
        let second = synth.synthesize(&synthesize_assembly(&config).unwrap()).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn test_missing_bootstrap_aborts_synthesis() {
    let dir = tempdir().unwrap();
    let config = DeploymentConfig::default().with_asset_root(dir.path());

    let err = synthesize_assembly(&config).unwrap_err();
    assert!(matches!(err, IacError::Bootstrap { .. }));
    assert!(err.to_string().contains("deploy_app.sh"));
}

#[test]
fn test_invalid_asn_rejected() {
    let (_dir, config) = workspace();
    let err = build_deployment(&config.with_asn(65535)).unwrap_err();
    assert!(matches!(err, IacError::InvalidAsn(65535)));
}

#[test]
fn test_single_az_cannot_host_multicast_domain() {
    let (_dir, mut config) = workspace();
    config.network.max_azs = 1;
    let err = build_deployment(&config).unwrap_err();
    assert!(matches!(err, IacError::InsufficientSubnets { required: 2, found: 1 }));
}

#[test]
fn test_deployment_order() {
    let (_dir, config) = workspace();
    let assembly = synthesize_assembly(&config).unwrap();

    assert_eq!(
        assembly.deployment_order().unwrap(),
        [
            "multicast-vpc-stack",
            "multicast-tgw-stack",
            "multicast-producer-stack",
            "multicast-consumer-stack",
        ]
    );
    assert_eq!(assembly.dependencies("multicast-consumer-stack"), ["multicast-vpc-stack"]);
    assert_eq!(assembly.teardown_order().unwrap()[3], "multicast-vpc-stack");
}

#[test]
fn test_default_deployment_validates() {
    let (_dir, config) = workspace();
    let deployment = build_deployment(&config).unwrap();
    let report = DeploymentValidator::new().validate(&deployment);
    assert!(report.passed);

    let consumer = deployment.host(HostRole::Consumer);
    let producer = deployment.host(HostRole::Producer);
    assert_ne!(consumer.subnet, producer.subnet);
}

#[test]
fn test_config_file_round_trip() {
    let (dir, config) = workspace();
    let path = dir.path().join("deploy.yaml");
    config
        .clone()
        .with_tags(vec![Tag::new("Owner", "Mystique")])
        .to_file(&path)
        .unwrap();

    let loaded = DeploymentConfig::from_file(&path).unwrap();
    assert_eq!(loaded.tags, [Tag::new("Owner", "Mystique")]);
    assert_eq!(loaded.transit_gateway.asn, 64512);
}
