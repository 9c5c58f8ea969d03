//! Setup orchestration
//!
//! The full flow behind `benchlink setup`: load the prior profile,
//! discover the stack, merge configuration from every source, let the
//! wizard pick a plan, then persist and execute. `status` runs the
//! read-only half of the same pipeline; `resume` re-attaches to an
//! operation an earlier run left in flight.
//!
//! Ordering is deliberate: nothing is persisted until the operator has
//! decided on a plan, and nothing is executed until the merged
//! configuration has passed validation and the profile lock is held.

use tokio::sync::watch;
use tracing::{info, warn};

use crate::discovery::{
    self, workgroup, DiscoveryReport, IntegrationState, NetworkDescriptor, WorkgroupResolution,
};
use crate::engine::{
    machine, marker, steps_for, ActionPlan, ChoiceSource, Executor, PendingStep, PollSettings,
    ResumabilityMarker,
};
use crate::error::SetupError;
use crate::profile::schema::{self, derive_standalone_name};
use crate::profile::{
    merge, resolve_stack_name, CliOverrides, EnvOverrides, MergeInputs, ProfileDocument,
    ProfileStore, ProvenanceMap,
};
use crate::provider::{
    CredentialValidator, InfraProvider, ProviderError, SecretMaterial, StackHealth,
};

/// Long-lived dependencies the commands share.
pub struct SetupContext<'a> {
    pub provider: &'a dyn InfraProvider,
    pub credentials: &'a dyn CredentialValidator,
    pub store: &'a ProfileStore,
    pub settings: PollSettings,
}

/// One `setup` invocation's inputs.
pub struct SetupRequest {
    pub profile: String,
    pub cli: CliOverrides,
    pub env: EnvOverrides,
    /// Secret material piped in for this run, if any. Never stored.
    pub material: Option<SecretMaterial>,
}

/// What a completed run decided and left behind.
pub struct SetupOutcome {
    /// The executed plan; `None` when the run resumed an earlier
    /// operation instead of deciding a new one.
    pub plan: Option<ActionPlan>,
    pub state: IntegrationState,
    pub document: ProfileDocument,
    pub provenance: ProvenanceMap,
}

/// Run the full setup flow.
pub async fn run_setup(
    ctx: &SetupContext<'_>,
    request: &SetupRequest,
    choices: &mut dyn ChoiceSource,
    cancel: &mut watch::Receiver<bool>,
) -> Result<SetupOutcome, SetupError> {
    let profile = request.profile.as_str();
    let prior = ctx.store.load(profile)?;

    let (stack_name, stack_source) =
        resolve_stack_name(&request.cli, &request.env, prior.as_ref()).ok_or_else(|| {
            SetupError::invalid_field(
                "stack",
                "no stack name available; pass --stack, set BENCHLINK_STACK, \
                 or run against a profile that has one",
            )
        })?;
    info!("Target stack: {stack_name} (from {stack_source})");

    let standalone_candidate = prior
        .as_ref()
        .map(|p| p.stack.standalone_stack_name())
        .unwrap_or_else(|| derive_standalone_name(&stack_name));

    let report =
        discovery::discover(ctx.provider, &stack_name, &standalone_candidate, prior.is_some())
            .await?;
    gate_on_stack_health(profile, &report)?;

    let resolution = workgroup::resolve(&report.resources, &standalone_candidate);
    let merged = merge(MergeInputs {
        cli: &request.cli,
        env: &request.env,
        prior: prior.as_ref(),
        report: &report,
        workgroup: &resolution,
    });

    let violations = schema::validate(&merged.document);
    if !violations.is_empty() {
        return Err(SetupError::validation(violations));
    }

    let _lock = ctx.store.acquire_lock(profile)?;

    // An unfinished operation blocks new plans. Offer to re-attach.
    if let Some(pending) = marker::load(ctx.store, profile)? {
        return resume_from_setup(ctx, request, prior, pending, choices, cancel, &report).await;
    }

    let menu = machine::menu_for(report.state, report.resources.integration_parameter);
    let plan = machine::run_wizard(menu, choices)?;
    info!("Decided plan: {plan}");

    let mut document = merged.document;
    let steps = steps_for(plan, &document);
    if steps.iter().any(PendingStep::needs_secret) {
        let material = request.material.as_ref().ok_or_else(|| {
            SetupError::invalid_field(
                "client-secret",
                "this plan stores a new Benchling client secret; \
                 pipe it in via --client-secret-stdin or set BENCHLINK_CLIENT_SECRET",
            )
        })?;
        check_credentials(ctx.credentials, &document, material).await?;
    }

    // Persist the decided configuration before mutating infrastructure;
    // the completion stamp comes only after execution succeeds.
    ctx.store.save(profile, &document)?;

    if plan != ActionPlan::ReviewOnly {
        let executor = Executor {
            provider: ctx.provider,
            store: ctx.store,
            profile,
            settings: ctx.settings,
        };
        executor
            .execute_plan(plan, &mut document, request.material.as_ref(), cancel)
            .await?;
    }

    Ok(SetupOutcome {
        plan: Some(plan),
        state: report.state,
        document,
        provenance: merged.provenance,
    })
}

/// The setup-time resume path: the operator accepted (or declined)
/// re-attaching to the operation a marker records.
async fn resume_from_setup(
    ctx: &SetupContext<'_>,
    request: &SetupRequest,
    prior: Option<ProfileDocument>,
    pending: ResumabilityMarker,
    choices: &mut dyn ChoiceSource,
    cancel: &mut watch::Receiver<bool>,
    report: &DiscoveryReport,
) -> Result<SetupOutcome, SetupError> {
    let profile = request.profile.as_str();
    let accepted = choices.confirm(&format!(
        "operation {} (started {}) is still pending for this profile; \
         resume polling it now?",
        pending.handle.operation_id, pending.started_at
    ))?;
    if !accepted {
        return Err(SetupError::conflict(
            profile,
            "an unfinished operation is recorded for this profile; \
             run `benchlink resume` to re-attach, or wait for it to finish",
        ));
    }

    // The interrupted run persisted its configuration before executing,
    // so the profile on disk is the one the marker belongs to.
    let mut document = prior.ok_or_else(|| {
        SetupError::conflict(
            profile,
            "a pending operation is recorded but the profile is gone; \
             remove the marker file if the operation is known to be settled",
        )
    })?;

    let executor = Executor {
        provider: ctx.provider,
        store: ctx.store,
        profile,
        settings: ctx.settings,
    };
    executor
        .resume(pending, &mut document, request.material.as_ref(), cancel)
        .await?;

    Ok(SetupOutcome {
        plan: None,
        state: report.state,
        document,
        provenance: ProvenanceMap::new(),
    })
}

/// A stack mid-mutation cannot take new plans. A failed stack can: the
/// operator may well be here to repair it.
fn gate_on_stack_health(profile: &str, report: &DiscoveryReport) -> Result<(), SetupError> {
    match report.snapshot.health {
        StackHealth::InProgress => Err(SetupError::conflict(
            profile,
            format!(
                "stack {} has an operation in progress ({}); wait for it to settle and re-run",
                report.snapshot.stack_name, report.snapshot.raw_status
            ),
        )),
        StackHealth::Failed => {
            warn!(
                "Stack {} is in a failed state ({}); proceeding",
                report.snapshot.stack_name, report.snapshot.raw_status
            );
            Ok(())
        }
        StackHealth::Stable => Ok(()),
    }
}

async fn check_credentials(
    validator: &dyn CredentialValidator,
    document: &ProfileDocument,
    material: &SecretMaterial,
) -> Result<(), SetupError> {
    info!(
        "Validating Benchling credentials for tenant '{}'",
        document.integration.tenant
    );
    match validator
        .validate(
            &document.integration.tenant,
            &document.integration.client_id,
            material,
        )
        .await
    {
        Ok(()) => Ok(()),
        Err(ProviderError::CredentialRejected { detail }) => {
            Err(SetupError::InvalidCredential { detail })
        }
        Err(other) => Err(other.into()),
    }
}

/// Inputs for the read-only `status` command.
pub struct StatusRequest {
    pub profile: String,
    pub stack: Option<String>,
}

/// Everything `status` reports. Rendering stays out of the core so
/// tests can assert on fields.
pub struct StatusReport {
    pub profile: String,
    pub profile_exists: bool,
    pub state: IntegrationState,
    pub stack_name: String,
    pub stack_status: String,
    pub secret_present: bool,
    pub network: Option<NetworkDescriptor>,
    pub workgroup: WorkgroupResolution,
    pub pending: Option<ResumabilityMarker>,
}

impl StatusReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("profile:     {}", self.profile));
        if !self.profile_exists {
            out.push_str(" (not yet saved)");
        }
        out.push('\n');
        out.push_str(&format!(
            "stack:       {} ({})\n",
            self.stack_name, self.stack_status
        ));
        out.push_str(&format!("state:       {}\n", self.state));
        out.push_str(&format!(
            "secret:      {}\n",
            if self.secret_present {
                "present"
            } else {
                "missing"
            }
        ));
        match &self.network {
            Some(network) if network.valid => {
                out.push_str(&format!(
                    "network:     {} ({} usable subnets)\n",
                    network.vpc_id,
                    network.private_routable().len()
                ));
            }
            Some(network) => {
                out.push_str(&format!(
                    "network:     {} unusable for deployment\n",
                    network.vpc_id
                ));
                for rejection in &network.rejections {
                    out.push_str(&format!(
                        "             {}: {}\n",
                        rejection.subnet_id, rejection.reason
                    ));
                }
            }
            None => out.push_str("network:     none discovered\n"),
        }
        out.push_str(&format!(
            "workgroup:   {}{}\n",
            self.workgroup.name,
            if self.workgroup.requires_creation {
                " (will be created)"
            } else {
                ""
            }
        ));
        if let Some(pending) = &self.pending {
            out.push_str(&format!(
                "pending:     operation {} started {}; run `benchlink resume`\n",
                pending.handle.operation_id, pending.started_at
            ));
        }
        out
    }
}

/// Run discovery and report, mutating nothing.
pub async fn run_status(
    ctx: &SetupContext<'_>,
    request: &StatusRequest,
) -> Result<StatusReport, SetupError> {
    let profile = request.profile.as_str();
    let prior = ctx.store.load(profile)?;

    let stack_name = request
        .stack
        .clone()
        .or_else(|| prior.as_ref().map(|p| p.stack.name.clone()))
        .ok_or_else(|| {
            SetupError::invalid_field(
                "stack",
                "no stack name available; pass --stack or run `benchlink setup` first",
            )
        })?;

    let standalone_candidate = prior
        .as_ref()
        .map(|p| p.stack.standalone_stack_name())
        .unwrap_or_else(|| derive_standalone_name(&stack_name));

    let report =
        discovery::discover(ctx.provider, &stack_name, &standalone_candidate, prior.is_some())
            .await?;
    let resolution = workgroup::resolve(&report.resources, &standalone_candidate);
    let pending = marker::load(ctx.store, profile)?;

    Ok(StatusReport {
        profile: profile.to_string(),
        profile_exists: prior.is_some(),
        state: report.state,
        stack_name: report.snapshot.stack_name.clone(),
        stack_status: report.snapshot.raw_status.clone(),
        secret_present: report.secret_present,
        network: report.resources.network,
        workgroup: resolution,
        pending,
    })
}

/// Inputs for the `resume` command.
pub struct ResumeRequest {
    pub profile: String,
    pub material: Option<SecretMaterial>,
}

/// Re-attach to the operation recorded for a profile and finish the
/// steps it still owes.
pub async fn run_resume(
    ctx: &SetupContext<'_>,
    request: &ResumeRequest,
    cancel: &mut watch::Receiver<bool>,
) -> Result<ProfileDocument, SetupError> {
    let profile = request.profile.as_str();
    let mut document = ctx.store.load(profile)?.ok_or_else(|| {
        SetupError::invalid_field(
            "profile",
            format!("profile '{profile}' does not exist; run `benchlink setup` first"),
        )
    })?;
    let pending = marker::load(ctx.store, profile)?.ok_or_else(|| {
        SetupError::invalid_field(
            "resume",
            format!("nothing to resume for profile '{profile}'"),
        )
    })?;

    let _lock = ctx.store.acquire_lock(profile)?;
    let executor = Executor {
        provider: ctx.provider,
        store: ctx.store,
        profile,
        settings: ctx.settings,
    };
    executor
        .resume(pending, &mut document, request.material.as_ref(), cancel)
        .await?;
    Ok(document)
}
