//! End-to-end tests for the setup, resume, and status flows
//!
//! Everything runs against scripted providers and a profile store in a
//! temp directory; each test drives the same public entry points the
//! binary does.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;

use benchlink::engine::{
    marker, ActionPlan, AutoChoices, PendingStep, PollSettings, ResumabilityMarker,
};
use benchlink::profile::{CliOverrides, EnvOverrides, ProfileStore, ValueSource};
use benchlink::provider::{OperationHandle, OperationKind, SecretMaterial};
use benchlink::setup::{self, ResumeRequest, SetupContext, SetupRequest, StatusRequest};
use benchlink::testing::{
    sample_profile_document, sample_snapshot, sample_vpc_network, AlwaysValidCredentials,
    ScriptedProvider, ScriptedProviderBuilder, SAMPLE_SECRET_ARN, SAMPLE_STACK,
};

fn fast_settings() -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(1),
        timeout: Duration::from_millis(250),
    }
}

fn context<'a>(
    provider: &'a ScriptedProvider,
    store: &'a ProfileStore,
) -> SetupContext<'a> {
    SetupContext {
        provider,
        credentials: &AlwaysValidCredentials,
        store,
        settings: fast_settings(),
    }
}

/// A request carrying the operator-supplied identity flags.
fn request(material: Option<SecretMaterial>) -> SetupRequest {
    SetupRequest {
        profile: "default".to_string(),
        cli: CliOverrides {
            stack_name: Some(SAMPLE_STACK.to_string()),
            tenant: Some("acme".to_string()),
            client_id: Some("client-9f8e7d6c".to_string()),
            app_definition_id: Some("appdef_h74kW9bq".to_string()),
            allow_list: Some(vec!["svc-benchling@acme.example".to_string()]),
            ..Default::default()
        },
        env: EnvOverrides::default(),
        material,
    }
}

fn count_calls(provider: &ScriptedProvider, prefix: &str) -> usize {
    provider
        .journal()
        .iter()
        .filter(|entry| entry.starts_with(prefix))
        .count()
}

#[tokio::test]
async fn cli_values_override_the_persisted_profile() {
    let provider = ScriptedProviderBuilder::integrated_stack().build();
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::at(dir.path());

    let mut prior = sample_profile_document();
    prior.integration.tenant = "oldcorp".to_string();
    store.save("default", &prior).unwrap();

    // Only the tenant comes from the command line; the stack name must
    // fall through to the persisted profile.
    let mut req = request(None);
    req.cli = CliOverrides {
        tenant: Some("acme".to_string()),
        ..Default::default()
    };
    let mut choices = AutoChoices {
        requested: Some(ActionPlan::ReviewOnly),
        ..Default::default()
    };
    let (_tx, mut cancel) = watch::channel(false);

    let ctx = context(&provider, &store);
    let outcome = setup::run_setup(&ctx, &req, &mut choices, &mut cancel)
        .await
        .unwrap();

    assert_eq!(outcome.document.integration.tenant, "acme");
    assert_eq!(
        outcome.provenance.get("integration.tenant"),
        Some(&ValueSource::Cli)
    );
    assert_eq!(
        outcome.provenance.get("stack.name"),
        Some(&ValueSource::PersistedProfile)
    );

    let saved = store.load("default").unwrap().unwrap();
    assert_eq!(saved.integration.tenant, "acme");
}

#[tokio::test]
async fn nothing_secret_shaped_ever_reaches_disk() {
    let provider = ScriptedProviderBuilder::integrated_stack().build();
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::at(dir.path());

    // Deliberately credential-shaped so a leak would also trip the
    // schema's shape check.
    let secret = "bsk0123456789abcdefghijklmnopqrstuvwxyz0123456789";
    let req = request(Some(SecretMaterial::new(secret)));
    let mut choices = AutoChoices {
        accept_defaults: true,
        ..Default::default()
    };
    let (_tx, mut cancel) = watch::channel(false);

    let ctx = context(&provider, &store);
    let outcome = setup::run_setup(&ctx, &req, &mut choices, &mut cancel)
        .await
        .unwrap();
    assert_eq!(outcome.plan, Some(ActionPlan::UpdateSecretOnly));

    for file in files_under(dir.path()) {
        let raw = fs::read_to_string(&file).unwrap_or_default();
        assert!(
            !raw.contains(secret),
            "secret material leaked into {}",
            file.display()
        );
    }

    let raw_profile = fs::read_to_string(store.profile_path("default")).unwrap();
    assert!(raw_profile.contains(SAMPLE_SECRET_ARN));
    assert!(!store.marker_path("default").exists());
}

#[tokio::test]
async fn interrupted_runs_resume_without_reissuing() {
    let mut shared = sample_snapshot();
    shared
        .parameters
        .insert("BenchlingIntegration".to_string(), "Disabled".to_string());
    let provider = ScriptedProviderBuilder::new()
        .with_snapshot(shared)
        .with_network(sample_vpc_network())
        .with_secret(SAMPLE_SECRET_ARN)
        .build();
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::at(dir.path());
    let ctx = context(&provider, &store);

    // The interrupt lands before the first poll, right after the
    // parameter flip went out.
    let (tx, mut cancel) = watch::channel(false);
    tx.send(true).unwrap();
    let req = request(Some(SecretMaterial::new("piped-in-secret")));
    let mut choices = AutoChoices {
        accept_defaults: true,
        ..Default::default()
    };
    let err = setup::run_setup(&ctx, &req, &mut choices, &mut cancel)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 130);

    assert_eq!(count_calls(&provider, "update_stack_parameter"), 1);
    let pending = marker::load(&store, "default").unwrap().unwrap();
    assert_eq!(pending.handle.operation_id, "op-update-1");
    assert!(pending.needs_secret());

    // Resume re-attaches to the recorded operation instead of issuing a
    // second parameter update.
    let (_tx2, mut cancel2) = watch::channel(false);
    let resume_req = ResumeRequest {
        profile: "default".to_string(),
        material: Some(SecretMaterial::new("piped-in-secret")),
    };
    let document = setup::run_resume(&ctx, &resume_req, &mut cancel2)
        .await
        .unwrap();

    assert_eq!(count_calls(&provider, "update_stack_parameter"), 1);
    assert!(provider
        .journal()
        .iter()
        .any(|e| e == "poll_operation op-update-1"));
    assert_eq!(count_calls(&provider, "put_secret"), 1);
    assert!(document.last_completed_at.is_some());
    assert!(marker::load(&store, "default").unwrap().is_none());
}

#[tokio::test]
async fn yes_alone_cannot_execute_a_destructive_plan() {
    let provider = ScriptedProviderBuilder::integrated_stack().build();
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::at(dir.path());
    let ctx = context(&provider, &store);

    let req = request(None);
    let mut choices = AutoChoices {
        requested: Some(ActionPlan::DisableIntegration),
        accept_defaults: true,
        confirmed_destructive: false,
    };
    let (_tx, mut cancel) = watch::channel(false);

    let err = setup::run_setup(&ctx, &req, &mut choices, &mut cancel)
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 130);
    assert!(err.to_string().contains("--confirm-destructive"));
    assert_eq!(count_calls(&provider, "update_stack_parameter"), 0);
    assert!(store.load("default").unwrap().is_none());
}

#[tokio::test]
async fn confirm_destructive_flag_unlocks_the_plan() {
    let provider = ScriptedProviderBuilder::integrated_stack().build();
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::at(dir.path());
    let ctx = context(&provider, &store);

    let req = request(None);
    let mut choices = AutoChoices {
        requested: Some(ActionPlan::DisableIntegration),
        accept_defaults: false,
        confirmed_destructive: true,
    };
    let (_tx, mut cancel) = watch::channel(false);

    let outcome = setup::run_setup(&ctx, &req, &mut choices, &mut cancel)
        .await
        .unwrap();

    assert_eq!(outcome.plan, Some(ActionPlan::DisableIntegration));
    let expected = format!("update_stack_parameter {SAMPLE_STACK} BenchlingIntegration=Disabled");
    assert!(provider.journal().iter().any(|e| *e == expected));
    assert!(store
        .load("default")
        .unwrap()
        .unwrap()
        .last_completed_at
        .is_some());
}

#[tokio::test]
async fn repeated_standalone_deploys_send_identical_parameters() {
    let mut shared = sample_snapshot();
    shared.parameters.clear();
    let provider = ScriptedProviderBuilder::new()
        .with_snapshot(shared)
        .with_network(sample_vpc_network())
        .with_secret(SAMPLE_SECRET_ARN)
        .build();
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::at(dir.path());
    let ctx = context(&provider, &store);

    for _ in 0..2 {
        let req = request(Some(SecretMaterial::new("piped-in-secret")));
        let mut choices = AutoChoices {
            requested: Some(ActionPlan::DeployStandalone),
            ..Default::default()
        };
        let (_tx, mut cancel) = watch::channel(false);
        setup::run_setup(&ctx, &req, &mut choices, &mut cancel)
            .await
            .unwrap();
    }

    let deployments = provider.deployments();
    assert_eq!(deployments.len(), 2);
    assert_eq!(deployments[0].stack_name, format!("{SAMPLE_STACK}-benchling"));
    assert_eq!(deployments[0].parameters, deployments[1].parameters);

    let params = &deployments[0].parameters;
    assert_eq!(
        params.get("QuiltStackName").map(String::as_str),
        Some(SAMPLE_STACK)
    );
    // The shared stack publishes a workgroup, so nothing is created.
    assert_eq!(
        params.get("WorkgroupName").map(String::as_str),
        Some("quilt-prod-workgroup")
    );
    assert_eq!(
        params.get("CreateWorkgroup").map(String::as_str),
        Some("false")
    );
    // Two private subnets in two zones go in as placement.
    assert!(params.get("SubnetIds").unwrap().contains(','));
}

#[tokio::test]
async fn review_only_carries_the_completion_stamp_forward() {
    let provider = ScriptedProviderBuilder::integrated_stack().build();
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::at(dir.path());
    let ctx = context(&provider, &store);

    let req = request(Some(SecretMaterial::new("piped-in-secret")));
    let mut choices = AutoChoices {
        accept_defaults: true,
        ..Default::default()
    };
    let (_tx, mut cancel) = watch::channel(false);
    setup::run_setup(&ctx, &req, &mut choices, &mut cancel)
        .await
        .unwrap();
    let stamped = store
        .load("default")
        .unwrap()
        .unwrap()
        .last_completed_at
        .unwrap();

    let review = request(None);
    let mut choices = AutoChoices {
        requested: Some(ActionPlan::ReviewOnly),
        ..Default::default()
    };
    let (_tx, mut cancel) = watch::channel(false);
    setup::run_setup(&ctx, &review, &mut choices, &mut cancel)
        .await
        .unwrap();

    let document = store.load("default").unwrap().unwrap();
    assert_eq!(document.last_completed_at, Some(stamped));
}

#[tokio::test]
async fn status_shows_pending_work_and_leaves_it_alone() {
    let provider = ScriptedProviderBuilder::integrated_stack().build();
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::at(dir.path());
    let ctx = context(&provider, &store);

    store.save("default", &sample_profile_document()).unwrap();
    let pending = ResumabilityMarker::new(
        "default",
        OperationHandle {
            operation_id: "op-old-7".to_string(),
            kind: OperationKind::ParameterUpdate,
            stack_name: SAMPLE_STACK.to_string(),
        },
    )
    .with_pending(vec![PendingStep::PutSecret {
        reference_hint: SAMPLE_SECRET_ARN.to_string(),
    }]);
    marker::write(&store, "default", &pending).unwrap();

    let report = setup::run_status(
        &ctx,
        &StatusRequest {
            profile: "default".to_string(),
            stack: None,
        },
    )
    .await
    .unwrap();

    assert!(report.pending.is_some());
    let rendered = report.render();
    assert!(rendered.contains("benchlink resume"));
    assert!(marker::load(&store, "default").unwrap().is_some());
}

fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files
}
