//! Plan execution
//!
//! Expands a decided [`ActionPlan`] into ordered steps, issues them
//! against the provider, and polls long-running operations to a
//! terminal state. A resumability marker is written before every
//! long-running step and cleared only on full success or a confirmed
//! terminal failure; a timeout or interrupt leaves it behind so
//! `benchlink resume` can re-attach to the in-flight operation instead
//! of issuing a duplicate.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use super::machine::ActionPlan;
use super::marker::{self, PendingStep, ResumabilityMarker};
use crate::error::SetupError;
use crate::profile::schema::default_secret_hint;
use crate::profile::{ProfileDocument, ProfileStore};
use crate::provider::{
    InfraProvider, OperationHandle, OperationStatus, SecretMaterial, StandaloneDeployment,
};

/// Shared-stack parameter that toggles the integration.
pub const INTEGRATION_PARAMETER: &str = "BenchlingIntegration";

/// Polling cadence for long-running operations.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(15 * 60),
        }
    }
}

/// How a polling loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded,
    Failed { reason: String },
    TimedOut { last_status: String },
    Cancelled { last_status: String },
}

/// Poll an operation until it is terminal, the budget runs out, or the
/// run is cancelled. Each observed status is passed to `on_status`.
pub async fn poll_until_terminal(
    provider: &dyn InfraProvider,
    handle: &OperationHandle,
    settings: &PollSettings,
    cancel: &mut watch::Receiver<bool>,
    mut on_status: impl FnMut(&OperationStatus),
) -> Result<PollOutcome, SetupError> {
    let started = Instant::now();
    let mut last_status = "unknown".to_string();

    loop {
        if *cancel.borrow_and_update() {
            return Ok(PollOutcome::Cancelled { last_status });
        }
        if started.elapsed() >= settings.timeout {
            return Ok(PollOutcome::TimedOut { last_status });
        }

        let status = provider.poll_operation(handle).await?;
        on_status(&status);
        match status {
            OperationStatus::Succeeded => return Ok(PollOutcome::Succeeded),
            OperationStatus::Failed { reason } => return Ok(PollOutcome::Failed { reason }),
            OperationStatus::InProgress { detail } => {
                last_status = detail;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(settings.interval) => {}
            changed = cancel.changed() => {
                match changed {
                    Ok(()) if *cancel.borrow() => {
                        return Ok(PollOutcome::Cancelled { last_status });
                    }
                    Ok(()) => {}
                    // No cancellation source remains; fall back to a
                    // plain sleep so the loop keeps its cadence.
                    Err(_) => tokio::time::sleep(settings.interval).await,
                }
            }
        }
    }
}

/// Expand a plan into ordered steps against the given configuration.
///
/// Destructive ordering matters: a switch to standalone disables the
/// shared integration before the new stack goes up, so the tenant never
/// sees two receivers at once.
pub fn steps_for(plan: ActionPlan, document: &ProfileDocument) -> Vec<PendingStep> {
    let shared = document.stack.name.clone();
    let secret_hint = document
        .integration
        .secret_reference
        .clone()
        .unwrap_or_else(|| default_secret_hint(&document.stack.name));

    match plan {
        ActionPlan::UpdateSecretOnly => vec![PendingStep::PutSecret {
            reference_hint: secret_hint,
        }],
        ActionPlan::EnableIntegration => vec![
            PendingStep::SetParameter {
                stack_name: shared,
                key: INTEGRATION_PARAMETER.to_string(),
                value: "Enabled".to_string(),
            },
            PendingStep::PutSecret {
                reference_hint: secret_hint,
            },
        ],
        ActionPlan::DisableIntegration => vec![PendingStep::SetParameter {
            stack_name: shared,
            key: INTEGRATION_PARAMETER.to_string(),
            value: "Disabled".to_string(),
        }],
        ActionPlan::DeployStandalone | ActionPlan::UpdateStandalone => vec![
            PendingStep::DeployStack {
                stack_name: document.stack.standalone_stack_name(),
                parameters: standalone_parameters(document, &secret_hint),
            },
            PendingStep::PutSecret {
                reference_hint: secret_hint,
            },
        ],
        ActionPlan::SwitchToStandalone => vec![
            PendingStep::SetParameter {
                stack_name: shared,
                key: INTEGRATION_PARAMETER.to_string(),
                value: "Disabled".to_string(),
            },
            PendingStep::DeployStack {
                stack_name: document.stack.standalone_stack_name(),
                parameters: standalone_parameters(document, &secret_hint),
            },
            PendingStep::PutSecret {
                reference_hint: secret_hint,
            },
        ],
        ActionPlan::ReviewOnly | ActionPlan::Abort => vec![],
    }
}

/// Template parameters for a standalone deploy, derived entirely from
/// the merged configuration.
fn standalone_parameters(document: &ProfileDocument, secret_hint: &str) -> BTreeMap<String, String> {
    let mut parameters = BTreeMap::new();
    parameters.insert("QuiltStackName".to_string(), document.stack.name.clone());
    parameters.insert(
        "BenchlingTenant".to_string(),
        document.integration.tenant.clone(),
    );
    parameters.insert(
        "AppDefinitionId".to_string(),
        document.integration.app_definition_id.clone(),
    );
    parameters.insert(
        "AllowList".to_string(),
        document.integration.allow_list.join(","),
    );
    parameters.insert("WorkgroupName".to_string(), document.workgroup.name.clone());
    parameters.insert(
        "CreateWorkgroup".to_string(),
        document.workgroup.requires_creation().to_string(),
    );
    parameters.insert("SecretName".to_string(), secret_hint.to_string());

    if let Some(network) = document.deployment.network.as_ref().filter(|n| n.valid) {
        parameters.insert("VpcId".to_string(), network.vpc_id.clone());
        let subnet_ids: Vec<&str> = network
            .private_routable()
            .iter()
            .map(|s| s.subnet_id.as_str())
            .collect();
        parameters.insert("SubnetIds".to_string(), subnet_ids.join(","));
    }

    parameters
}

/// Executes decided plans and resumes interrupted ones.
pub struct Executor<'a> {
    pub provider: &'a dyn InfraProvider,
    pub store: &'a ProfileStore,
    pub profile: &'a str,
    pub settings: PollSettings,
}

impl Executor<'_> {
    /// Run a decided plan to completion. The profile document is
    /// updated in place (canonical secret reference, completion stamp)
    /// and re-persisted once everything has succeeded.
    pub async fn execute_plan(
        &self,
        plan: ActionPlan,
        document: &mut ProfileDocument,
        material: Option<&SecretMaterial>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), SetupError> {
        let steps = steps_for(plan, document);
        if steps.is_empty() {
            debug!("Plan '{plan}' has no infrastructure steps");
            return Ok(());
        }
        require_material_for(&steps, material)?;
        info!("Executing plan '{plan}' ({} steps)", steps.len());

        self.run_steps(&steps, document, material, cancel).await?;
        self.finish(document)
    }

    /// Re-attach to the operation an earlier run left in flight, then
    /// run the steps it still owes. The recorded operation is polled,
    /// never re-issued.
    pub async fn resume(
        &self,
        marker: ResumabilityMarker,
        document: &mut ProfileDocument,
        material: Option<&SecretMaterial>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), SetupError> {
        require_material_for(&marker.pending, material)?;
        info!(
            "Resuming operation {} on stack {} ({} steps pending after it)",
            marker.handle.operation_id,
            marker.handle.stack_name,
            marker.pending.len()
        );

        let mut marker = marker;
        self.await_operation(&mut marker, cancel).await?;

        let pending = std::mem::take(&mut marker.pending);
        self.run_steps(&pending, document, material, cancel).await?;
        self.finish(document)
    }

    async fn run_steps(
        &self,
        steps: &[PendingStep],
        document: &mut ProfileDocument,
        material: Option<&SecretMaterial>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), SetupError> {
        for (index, step) in steps.iter().enumerate() {
            match step {
                PendingStep::SetParameter {
                    stack_name,
                    key,
                    value,
                } => {
                    info!("Setting {key}={value} on stack {stack_name}");
                    let handle = self
                        .provider
                        .update_stack_parameter(stack_name, key, value)
                        .await?;
                    let mut marker = ResumabilityMarker::new(self.profile, handle)
                        .with_pending(steps[index + 1..].to_vec());
                    marker::write(self.store, self.profile, &marker)?;
                    self.await_operation(&mut marker, cancel).await?;
                }
                PendingStep::DeployStack {
                    stack_name,
                    parameters,
                } => {
                    info!("Deploying stack {stack_name}");
                    let deployment = StandaloneDeployment {
                        stack_name: stack_name.clone(),
                        parameters: parameters.clone(),
                    };
                    let handle = self.provider.deploy_standalone(&deployment).await?;
                    let mut marker = ResumabilityMarker::new(self.profile, handle)
                        .with_pending(steps[index + 1..].to_vec());
                    marker::write(self.store, self.profile, &marker)?;
                    self.await_operation(&mut marker, cancel).await?;
                }
                PendingStep::PutSecret { reference_hint } => {
                    let material = material.ok_or_else(missing_material)?;
                    info!("Storing client secret under '{reference_hint}'");
                    let reference = self.provider.put_secret(reference_hint, material).await?;
                    document.integration.secret_reference =
                        Some(reference.as_str().to_string());
                }
            }
        }
        Ok(())
    }

    /// Poll the marker's operation to a terminal state, maintaining the
    /// marker according to the outcome.
    async fn await_operation(
        &self,
        marker: &mut ResumabilityMarker,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), SetupError> {
        let operation_id = marker.handle.operation_id.clone();
        let started = Instant::now();
        let outcome = poll_until_terminal(
            self.provider,
            &marker.handle,
            &self.settings,
            cancel,
            |status| info!("Operation {operation_id}: {status}"),
        )
        .await?;

        match outcome {
            PollOutcome::Succeeded => Ok(()),
            PollOutcome::Failed { reason } => {
                // Terminal failure confirmed: the operation will never
                // finish, so there is nothing left to resume.
                marker::clear(self.store, self.profile)?;
                Err(SetupError::OperationFailed {
                    operation_id: marker.handle.operation_id.clone(),
                    last_status: reason,
                })
            }
            PollOutcome::TimedOut { last_status } => {
                marker.last_status = Some(last_status.clone());
                marker::write(self.store, self.profile, marker)?;
                Err(SetupError::OperationTimeout {
                    operation_id: marker.handle.operation_id.clone(),
                    last_status,
                    waited_secs: started.elapsed().as_secs(),
                })
            }
            PollOutcome::Cancelled { last_status } => {
                marker.last_status = Some(last_status.clone());
                marker::write(self.store, self.profile, marker)?;
                Err(SetupError::user_abort(format!(
                    "interrupted while operation {} was in flight; \
                     run `benchlink resume` to re-attach",
                    marker.handle.operation_id
                )))
            }
        }
    }

    /// Everything succeeded: drop the marker, stamp the document, and
    /// persist the final configuration.
    fn finish(&self, document: &mut ProfileDocument) -> Result<(), SetupError> {
        marker::clear(self.store, self.profile)?;
        document.last_completed_at = Some(chrono::Utc::now());
        self.store.save(self.profile, document)?;
        info!("Setup completed for profile '{}'", self.profile);
        Ok(())
    }
}

fn require_material_for(
    steps: &[PendingStep],
    material: Option<&SecretMaterial>,
) -> Result<(), SetupError> {
    if steps.iter().any(PendingStep::needs_secret) && material.is_none() {
        Err(missing_material())
    } else {
        Ok(())
    }
}

fn missing_material() -> SetupError {
    SetupError::invalid_field(
        "client-secret",
        "this plan stores a new Benchling client secret; \
         pipe it in via --client-secret-stdin or set BENCHLINK_CLIENT_SECRET",
    )
}
