//! Integration tests for the discovery pipeline
//!
//! Drives `discovery::discover` end to end against scripted providers:
//! snapshot fetch, resource extraction, network classification,
//! workgroup resolution, and state classification, plus the menu the
//! classified state leads to.

use std::collections::BTreeMap;

use benchlink::discovery::{discover, workgroup, IntegrationState, SubnetKind};
use benchlink::engine::{menu_for, ActionPlan};
use benchlink::error::SetupError;
use benchlink::profile::{merge, CliOverrides, EnvOverrides, MergeInputs, ValueSource};
use benchlink::provider::{
    RawRoute, RawRouteTable, RawSubnet, RouteTarget, StackHealth, StackSnapshot, VpcNetwork,
};
use benchlink::testing::{
    sample_snapshot, ScriptedProviderBuilder, SAMPLE_SECRET_ARN, SAMPLE_STACK, SAMPLE_VPC,
};

const STANDALONE: &str = "quilt-prod-benchling";

fn snapshot(name: &str, parameters: &[(&str, &str)], outputs: &[(&str, &str)]) -> StackSnapshot {
    let collect = |pairs: &[(&str, &str)]| {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<String, String>>()
    };
    StackSnapshot {
        stack_name: name.to_string(),
        stack_id: format!("arn:aws:cloudformation:us-east-1:123456789012:stack/{name}/1a2b"),
        region: Some("us-east-1".to_string()),
        account: Some("123456789012".to_string()),
        raw_status: "CREATE_COMPLETE".to_string(),
        health: StackHealth::Stable,
        parameters: collect(parameters),
        outputs: collect(outputs),
    }
}

fn subnet(id: &str, az: &str) -> RawSubnet {
    RawSubnet {
        subnet_id: id.to_string(),
        vpc_id: SAMPLE_VPC.to_string(),
        availability_zone: az.to_string(),
        cidr_block: "10.0.1.0/24".to_string(),
    }
}

fn nat_table(id: &str, subnets: &[&str]) -> RawRouteTable {
    RawRouteTable {
        route_table_id: id.to_string(),
        vpc_id: SAMPLE_VPC.to_string(),
        routes: vec![RawRoute {
            destination: "0.0.0.0/0".to_string(),
            target: RouteTarget::from_raw("nat-0f00"),
        }],
        associated_subnet_ids: subnets.iter().map(|s| s.to_string()).collect(),
        is_main: false,
    }
}

fn empty_table(id: &str, subnets: &[&str]) -> RawRouteTable {
    RawRouteTable {
        route_table_id: id.to_string(),
        vpc_id: SAMPLE_VPC.to_string(),
        routes: vec![],
        associated_subnet_ids: subnets.iter().map(|s| s.to_string()).collect(),
        is_main: false,
    }
}

#[tokio::test]
async fn integrated_running_stack_defaults_to_secret_rotation() {
    let provider = ScriptedProviderBuilder::integrated_stack().build();

    let report = discover(&provider, SAMPLE_STACK, STANDALONE, false)
        .await
        .unwrap();

    assert_eq!(report.state, IntegrationState::IntegratedRunning);
    assert!(report.secret_present);
    assert_eq!(
        report.resources.secret_reference.as_deref(),
        Some(SAMPLE_SECRET_ARN)
    );
    assert!(report.resources.network.as_ref().unwrap().valid);

    let menu = menu_for(report.state, report.resources.integration_parameter);
    assert_eq!(menu.default, ActionPlan::UpdateSecretOnly);
}

#[tokio::test]
async fn a_dangling_secret_reference_never_counts_as_running() {
    // The output references a secret, but nothing answers in the store.
    let provider = ScriptedProviderBuilder::new()
        .with_snapshot(sample_snapshot())
        .build();

    let report = discover(&provider, SAMPLE_STACK, STANDALONE, false)
        .await
        .unwrap();

    assert!(!report.secret_present);
    assert_ne!(report.state, IntegrationState::IntegratedRunning);
}

#[tokio::test]
async fn disabled_parameter_wins_regardless_of_secret() {
    let mut shared = sample_snapshot();
    shared
        .parameters
        .insert("BenchlingIntegration".to_string(), "Disabled".to_string());
    let provider = ScriptedProviderBuilder::new()
        .with_snapshot(shared)
        .with_secret(SAMPLE_SECRET_ARN)
        .build();

    let report = discover(&provider, SAMPLE_STACK, STANDALONE, false)
        .await
        .unwrap();

    assert_eq!(report.state, IntegrationState::IntegratedDisabled);
    let menu = menu_for(report.state, report.resources.integration_parameter);
    assert_eq!(menu.default, ActionPlan::EnableIntegration);
}

#[tokio::test]
async fn absent_parameter_with_a_missing_standalone_is_legacy() {
    let mut shared = sample_snapshot();
    shared.parameters.clear();
    let provider = ScriptedProviderBuilder::new()
        .with_snapshot(shared)
        .with_secret(SAMPLE_SECRET_ARN)
        .build();

    // A prior profile exists, so the absent standalone stack is a known
    // deployment that is gone, not an unknown.
    let report = discover(&provider, SAMPLE_STACK, STANDALONE, true)
        .await
        .unwrap();

    assert_eq!(report.state, IntegrationState::Legacy);
    let menu = menu_for(report.state, report.resources.integration_parameter);
    assert_eq!(menu.default, ActionPlan::DeployStandalone);
}

#[tokio::test]
async fn absent_parameter_with_no_history_is_first_time() {
    let mut shared = sample_snapshot();
    shared.parameters.clear();
    let provider = ScriptedProviderBuilder::new()
        .with_snapshot(shared)
        .with_secret(SAMPLE_SECRET_ARN)
        .build();

    let report = discover(&provider, SAMPLE_STACK, STANDALONE, false)
        .await
        .unwrap();

    assert_eq!(report.state, IntegrationState::FirstTime);

    // The stack cannot toggle an integration parameter it does not
    // have, so the first-time menu leads with a standalone deploy.
    let menu = menu_for(report.state, report.resources.integration_parameter);
    assert_eq!(menu.state, IntegrationState::FirstTime);
    assert_eq!(menu.default, ActionPlan::DeployStandalone);
}

#[tokio::test]
async fn an_existing_standalone_stack_is_detected() {
    let mut shared = sample_snapshot();
    shared.parameters.clear();
    let standalone = snapshot(
        STANDALONE,
        &[("QuiltStackName", SAMPLE_STACK)],
        &[("WebhookEndpoint", "https://hooks.example.com/benchling")],
    );
    let provider = ScriptedProviderBuilder::new()
        .with_snapshot(shared)
        .with_snapshot(standalone)
        .with_secret(SAMPLE_SECRET_ARN)
        .build();

    let report = discover(&provider, SAMPLE_STACK, STANDALONE, false)
        .await
        .unwrap();

    assert_eq!(report.state, IntegrationState::StandaloneExisting);
    let menu = menu_for(report.state, report.resources.integration_parameter);
    assert_eq!(menu.default, ActionPlan::UpdateStandalone);
}

#[tokio::test]
async fn subnets_classify_by_routing_and_reject_with_reasons() {
    let vpc = VpcNetwork {
        vpc_id: SAMPLE_VPC.to_string(),
        cidr_block: Some("10.0.0.0/16".to_string()),
        subnets: vec![
            subnet("subnet-one", "us-east-1a"),
            subnet("subnet-dead", "us-east-1a"),
            subnet("subnet-two", "us-east-1b"),
        ],
        route_tables: vec![
            nat_table("rtb-one", &["subnet-one"]),
            empty_table("rtb-dead", &["subnet-dead"]),
            nat_table("rtb-two", &["subnet-two"]),
        ],
    };
    let provider = ScriptedProviderBuilder::new()
        .with_snapshot(sample_snapshot())
        .with_network(vpc)
        .with_secret(SAMPLE_SECRET_ARN)
        .build();

    let report = discover(&provider, SAMPLE_STACK, STANDALONE, false)
        .await
        .unwrap();

    let network = report.resources.network.unwrap();
    assert!(network.valid);

    let usable = network.private_routable();
    assert_eq!(usable.len(), 2);
    let zones: Vec<&str> = usable
        .iter()
        .map(|s| s.availability_zone.as_str())
        .collect();
    assert!(zones.contains(&"us-east-1a") && zones.contains(&"us-east-1b"));

    assert_eq!(network.rejections.len(), 1);
    assert_eq!(network.rejections[0].subnet_id, "subnet-dead");
    assert_eq!(network.rejections[0].reason, "no NAT default route");

    let dead = network
        .subnets
        .iter()
        .find(|s| s.subnet_id == "subnet-dead")
        .unwrap();
    assert_eq!(dead.kind(), SubnetKind::Isolated);
}

#[tokio::test]
async fn single_zone_network_is_discovered_but_not_used() {
    let vpc = VpcNetwork {
        vpc_id: SAMPLE_VPC.to_string(),
        cidr_block: Some("10.0.0.0/16".to_string()),
        subnets: vec![
            subnet("subnet-one", "us-east-1a"),
            subnet("subnet-two", "us-east-1a"),
        ],
        route_tables: vec![
            nat_table("rtb-one", &["subnet-one"]),
            nat_table("rtb-two", &["subnet-two"]),
        ],
    };
    let provider = ScriptedProviderBuilder::new()
        .with_snapshot(sample_snapshot())
        .with_network(vpc)
        .with_secret(SAMPLE_SECRET_ARN)
        .build();

    let report = discover(&provider, SAMPLE_STACK, STANDALONE, false)
        .await
        .unwrap();

    let network = report.resources.network.as_ref().unwrap();
    assert!(!network.valid);
    assert!(network
        .rejections
        .iter()
        .any(|r| r.reason == "only one availability zone represented"));

    // The merge treats the unusable network like no network at all, so
    // a later deploy auto-provisions placement.
    let cli = CliOverrides::default();
    let env = EnvOverrides::default();
    let resolution = workgroup::resolve(&report.resources, STANDALONE);
    let resolved = merge(MergeInputs {
        cli: &cli,
        env: &env,
        prior: None,
        report: &report,
        workgroup: &resolution,
    });
    assert_eq!(resolved.document.deployment.network, None);
    assert_eq!(
        resolved.provenance.get("deployment.network"),
        Some(&ValueSource::Default)
    );
}

#[tokio::test]
async fn missing_workgroup_output_resolves_to_managed_name() {
    let mut shared = sample_snapshot();
    shared.outputs.remove("QueryWorkgroup");
    let provider = ScriptedProviderBuilder::new()
        .with_snapshot(shared)
        .with_secret(SAMPLE_SECRET_ARN)
        .build();

    let report = discover(&provider, SAMPLE_STACK, STANDALONE, false)
        .await
        .unwrap();

    assert_eq!(report.resources.workgroup_reference, None);

    let resolution = workgroup::resolve(&report.resources, STANDALONE);
    assert_eq!(resolution.name, format!("{STANDALONE}-workgroup"));
    assert_eq!(
        resolution.source,
        benchlink::discovery::WorkgroupSource::SelfManaged
    );
    assert!(resolution.requires_creation);

    // Deterministic on identical input.
    assert_eq!(resolution, workgroup::resolve(&report.resources, STANDALONE));
}

#[tokio::test]
async fn missing_shared_stack_is_a_provider_error() {
    let provider = ScriptedProviderBuilder::new().build();

    let err = discover(&provider, "quilt-gone", STANDALONE, false)
        .await
        .unwrap_err();

    assert!(matches!(err, SetupError::Provider(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("quilt-gone"));
}
