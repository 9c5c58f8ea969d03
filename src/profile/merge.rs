//! Multi-source configuration merge
//!
//! One field at a time, in fixed priority: command line beats
//! environment beats the persisted profile beats discovery beats the
//! built-in default. Every resolution records which source won so the
//! operator can see exactly where a value came from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::discovery::workgroup::{WorkgroupResolution, WorkgroupSource};
use crate::discovery::{DiscoveryReport, IntegrationState};
use crate::profile::schema::{
    default_secret_hint, DeploymentSection, IntegrationSection, ProfileDocument, StackMode,
    StackSection, WorkgroupSection, SCHEMA_VERSION,
};

/// Where a resolved field came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Cli,
    Environment,
    PersistedProfile,
    Discovered,
    Default,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Cli => write!(f, "command line"),
            ValueSource::Environment => write!(f, "environment"),
            ValueSource::PersistedProfile => write!(f, "persisted profile"),
            ValueSource::Discovered => write!(f, "discovered"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// Provenance per dotted field path. Diagnostic only; never persisted.
pub type ProvenanceMap = BTreeMap<String, ValueSource>;

/// The merge result: the document that will be validated and persisted,
/// plus the provenance that explains it.
#[derive(Debug, Clone)]
pub struct ResolvedConfiguration {
    pub document: ProfileDocument,
    pub provenance: ProvenanceMap,
}

/// Configuration values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub stack_name: Option<String>,
    pub region: Option<String>,
    pub tenant: Option<String>,
    pub client_id: Option<String>,
    pub app_definition_id: Option<String>,
    pub allow_list: Option<Vec<String>>,
}

/// Configuration values supplied through `BENCHLINK_*` variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub stack_name: Option<String>,
    pub region: Option<String>,
    pub tenant: Option<String>,
    pub client_id: Option<String>,
    pub app_definition_id: Option<String>,
    pub allow_list: Option<Vec<String>>,
}

impl EnvOverrides {
    /// Read the `BENCHLINK_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self {
            stack_name: non_empty_var("BENCHLINK_STACK"),
            region: non_empty_var("BENCHLINK_REGION"),
            tenant: non_empty_var("BENCHLINK_TENANT"),
            client_id: non_empty_var("BENCHLINK_CLIENT_ID"),
            app_definition_id: non_empty_var("BENCHLINK_APP_DEFINITION_ID"),
            allow_list: non_empty_var("BENCHLINK_ALLOW").map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Everything the merge consumes.
pub struct MergeInputs<'a> {
    pub cli: &'a CliOverrides,
    pub env: &'a EnvOverrides,
    pub prior: Option<&'a ProfileDocument>,
    pub report: &'a DiscoveryReport,
    pub workgroup: &'a WorkgroupResolution,
}

/// Resolve the target stack name from the non-discovery sources.
///
/// Discovery needs the stack name before the merge can run, so this
/// small pre-pass applies the same priority order to just that field.
/// The full merge re-derives it identically.
pub fn resolve_stack_name(
    cli: &CliOverrides,
    env: &EnvOverrides,
    prior: Option<&ProfileDocument>,
) -> Option<(String, ValueSource)> {
    if let Some(name) = cli.stack_name.clone() {
        return Some((name, ValueSource::Cli));
    }
    if let Some(name) = env.stack_name.clone() {
        return Some((name, ValueSource::Environment));
    }
    prior.map(|p| (p.stack.name.clone(), ValueSource::PersistedProfile))
}

/// Merge all sources into one provenance-tracked configuration.
///
/// The output still has to pass schema validation; merging never fails
/// on its own, it just records what it could resolve.
pub fn merge(inputs: MergeInputs<'_>) -> ResolvedConfiguration {
    let MergeInputs {
        cli,
        env,
        prior,
        report,
        workgroup,
    } = inputs;
    let mut provenance = ProvenanceMap::new();

    let stack_name = pick(
        &mut provenance,
        "stack.name",
        vec![
            (cli.stack_name.clone(), ValueSource::Cli),
            (env.stack_name.clone(), ValueSource::Environment),
            (
                prior.map(|p| p.stack.name.clone()),
                ValueSource::PersistedProfile,
            ),
            (
                Some(report.snapshot.stack_name.clone()),
                ValueSource::Discovered,
            ),
        ],
    )
    .unwrap_or_default();

    let arn = pick(
        &mut provenance,
        "stack.arn",
        vec![
            (
                non_empty(report.snapshot.stack_id.clone()),
                ValueSource::Discovered,
            ),
            (
                prior.map(|p| p.stack.arn.clone()).and_then(non_empty),
                ValueSource::PersistedProfile,
            ),
        ],
    )
    .unwrap_or_default();

    let discovered_mode = match report.state {
        IntegrationState::StandaloneExisting => StackMode::Standalone,
        _ => StackMode::Integrated,
    };
    let mode = pick(
        &mut provenance,
        "stack.mode",
        vec![
            (prior.map(|p| p.stack.mode), ValueSource::PersistedProfile),
            (Some(discovered_mode), ValueSource::Discovered),
        ],
    )
    .unwrap_or(StackMode::Integrated);

    let region = pick(
        &mut provenance,
        "deployment.region",
        vec![
            (cli.region.clone(), ValueSource::Cli),
            (env.region.clone(), ValueSource::Environment),
            (
                prior
                    .map(|p| p.deployment.region.clone())
                    .and_then(non_empty),
                ValueSource::PersistedProfile,
            ),
            (report.snapshot.region.clone(), ValueSource::Discovered),
        ],
    )
    .unwrap_or_default();

    let account = pick(
        &mut provenance,
        "deployment.account",
        vec![
            (
                prior.and_then(|p| p.deployment.account.clone()),
                ValueSource::PersistedProfile,
            ),
            (report.snapshot.account.clone(), ValueSource::Discovered),
        ],
    );

    // Only a usable discovered network participates; an invalid one
    // falls through to the auto-provision path.
    let discovered_network = report
        .resources
        .network
        .clone()
        .filter(|network| network.valid);
    let network = pick(
        &mut provenance,
        "deployment.network",
        vec![
            (
                prior.and_then(|p| p.deployment.network.clone()),
                ValueSource::PersistedProfile,
            ),
            (discovered_network, ValueSource::Discovered),
        ],
    );

    let workgroup_fallback_source = match workgroup.source {
        WorkgroupSource::Quilt => ValueSource::Discovered,
        WorkgroupSource::SelfManaged => ValueSource::Default,
    };
    let workgroup_section = match prior.map(|p| p.workgroup.clone()) {
        Some(section) => {
            provenance.insert("workgroup.name".to_string(), ValueSource::PersistedProfile);
            section
        }
        None => {
            provenance.insert("workgroup.name".to_string(), workgroup_fallback_source);
            WorkgroupSection {
                name: workgroup.name.clone(),
                source: workgroup.source,
            }
        }
    };

    let tenant = pick(
        &mut provenance,
        "integration.tenant",
        vec![
            (cli.tenant.clone(), ValueSource::Cli),
            (env.tenant.clone(), ValueSource::Environment),
            (
                prior
                    .map(|p| p.integration.tenant.clone())
                    .and_then(non_empty),
                ValueSource::PersistedProfile,
            ),
        ],
    )
    .unwrap_or_default();

    let client_id = pick(
        &mut provenance,
        "integration.client_id",
        vec![
            (cli.client_id.clone(), ValueSource::Cli),
            (env.client_id.clone(), ValueSource::Environment),
            (
                prior
                    .map(|p| p.integration.client_id.clone())
                    .and_then(non_empty),
                ValueSource::PersistedProfile,
            ),
        ],
    )
    .unwrap_or_default();

    let app_definition_id = pick(
        &mut provenance,
        "integration.app_definition_id",
        vec![
            (cli.app_definition_id.clone(), ValueSource::Cli),
            (env.app_definition_id.clone(), ValueSource::Environment),
            (
                prior
                    .map(|p| p.integration.app_definition_id.clone())
                    .and_then(non_empty),
                ValueSource::PersistedProfile,
            ),
        ],
    )
    .unwrap_or_default();

    let secret_reference = pick(
        &mut provenance,
        "integration.secret_reference",
        vec![
            (
                prior
                    .and_then(|p| p.integration.secret_reference.clone())
                    .and_then(non_empty),
                ValueSource::PersistedProfile,
            ),
            (
                report.resources.secret_reference.clone(),
                ValueSource::Discovered,
            ),
            (Some(default_secret_hint(&stack_name)), ValueSource::Default),
        ],
    );

    let allow_list = pick(
        &mut provenance,
        "integration.allow_list",
        vec![
            (cli.allow_list.clone(), ValueSource::Cli),
            (env.allow_list.clone(), ValueSource::Environment),
            (
                prior.map(|p| p.integration.allow_list.clone()),
                ValueSource::PersistedProfile,
            ),
        ],
    )
    .unwrap_or_default();

    let document = ProfileDocument {
        schema_version: SCHEMA_VERSION,
        deployment: DeploymentSection {
            region,
            account,
            network,
        },
        workgroup: workgroup_section,
        integration: IntegrationSection {
            tenant,
            client_id,
            secret_reference,
            app_definition_id,
            allow_list,
        },
        stack: StackSection {
            arn,
            name: stack_name,
            mode,
        },
        last_completed_at: prior.and_then(|p| p.last_completed_at),
    };

    ResolvedConfiguration {
        document,
        provenance,
    }
}

/// First present candidate wins and its source is recorded; a complete
/// miss is recorded as `Default`.
fn pick<T>(
    provenance: &mut ProvenanceMap,
    field: &str,
    candidates: Vec<(Option<T>, ValueSource)>,
) -> Option<T> {
    for (candidate, source) in candidates {
        if let Some(value) = candidate {
            provenance.insert(field.to_string(), source);
            return Some(value);
        }
    }
    provenance.insert(field.to_string(), ValueSource::Default);
    None
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
