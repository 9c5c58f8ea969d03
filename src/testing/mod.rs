//! Testing utilities and fixtures
//!
//! Scripted doubles for the provider seams plus canonical fixtures for
//! a healthy shared stack. Lives in the library (not behind
//! `cfg(test)`) so integration tests can drive the full setup flow
//! without touching real infrastructure.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::discovery::{
    self, network, DiscoveredResources, DiscoveryReport, IntegrationParameter, IntegrationState,
    StandalonePresence,
};
use crate::engine::{ActionPlan, ChoiceSource, Menu, WizardEvent};
use crate::error::SetupError;
use crate::profile::schema::{
    DeploymentSection, IntegrationSection, ProfileDocument, StackMode, StackSection,
    WorkgroupSection, SCHEMA_VERSION,
};
use crate::provider::{
    CredentialValidator, InfraProvider, OperationHandle, OperationKind, OperationStatus,
    ProviderError, RawRoute, RawRouteTable, RawSubnet, RouteTarget, SecretMaterial,
    SecretReference, StackHealth, StackSnapshot, StandaloneDeployment, VpcNetwork,
};

pub const SAMPLE_STACK: &str = "quilt-prod";
pub const SAMPLE_VPC: &str = "vpc-0a1b2c3d";
pub const SAMPLE_SECRET_ARN: &str =
    "arn:aws:secretsmanager:us-east-1:123456789012:secret:quilt-prod-benchling-secret-Ab1XyZ";

/// A raw VPC with two NAT-routed private subnets in different zones and
/// one public subnet, the layout a healthy shared stack provisions.
pub fn sample_vpc_network() -> VpcNetwork {
    VpcNetwork {
        vpc_id: SAMPLE_VPC.to_string(),
        cidr_block: Some("10.0.0.0/16".to_string()),
        subnets: vec![
            RawSubnet {
                subnet_id: "subnet-aaa1".to_string(),
                vpc_id: SAMPLE_VPC.to_string(),
                availability_zone: "us-east-1a".to_string(),
                cidr_block: "10.0.1.0/24".to_string(),
            },
            RawSubnet {
                subnet_id: "subnet-bbb2".to_string(),
                vpc_id: SAMPLE_VPC.to_string(),
                availability_zone: "us-east-1b".to_string(),
                cidr_block: "10.0.2.0/24".to_string(),
            },
            RawSubnet {
                subnet_id: "subnet-pub3".to_string(),
                vpc_id: SAMPLE_VPC.to_string(),
                availability_zone: "us-east-1a".to_string(),
                cidr_block: "10.0.3.0/24".to_string(),
            },
        ],
        route_tables: vec![
            RawRouteTable {
                route_table_id: "rtb-private".to_string(),
                vpc_id: SAMPLE_VPC.to_string(),
                routes: vec![
                    RawRoute {
                        destination: "10.0.0.0/16".to_string(),
                        target: RouteTarget::Local,
                    },
                    RawRoute {
                        destination: "0.0.0.0/0".to_string(),
                        target: RouteTarget::NatGateway {
                            id: "nat-0f00".to_string(),
                        },
                    },
                ],
                associated_subnet_ids: vec!["subnet-aaa1".to_string(), "subnet-bbb2".to_string()],
                is_main: false,
            },
            RawRouteTable {
                route_table_id: "rtb-public".to_string(),
                vpc_id: SAMPLE_VPC.to_string(),
                routes: vec![RawRoute {
                    destination: "0.0.0.0/0".to_string(),
                    target: RouteTarget::InternetGateway {
                        id: "igw-0b00".to_string(),
                    },
                }],
                associated_subnet_ids: vec!["subnet-pub3".to_string()],
                is_main: false,
            },
        ],
    }
}

/// Snapshot of a healthy shared stack with the integration enabled and
/// the full output surface populated.
pub fn sample_snapshot() -> StackSnapshot {
    let mut parameters = BTreeMap::new();
    parameters.insert("BenchlingIntegration".to_string(), "Enabled".to_string());

    let mut outputs = BTreeMap::new();
    outputs.insert("BenchlingSecret".to_string(), SAMPLE_SECRET_ARN.to_string());
    outputs.insert(
        "QueryWorkgroup".to_string(),
        "quilt-prod-workgroup".to_string(),
    );
    outputs.insert("VpcId".to_string(), SAMPLE_VPC.to_string());
    outputs.insert("VpcCidr".to_string(), "10.0.0.0/16".to_string());
    outputs.insert(
        "SearchPolicyArn".to_string(),
        "arn:aws:iam::123456789012:policy/quilt-prod-search".to_string(),
    );

    StackSnapshot {
        stack_name: SAMPLE_STACK.to_string(),
        stack_id: format!(
            "arn:aws:cloudformation:us-east-1:123456789012:stack/{SAMPLE_STACK}/1a2b3c4d"
        ),
        region: Some("us-east-1".to_string()),
        account: Some("123456789012".to_string()),
        raw_status: "UPDATE_COMPLETE".to_string(),
        health: StackHealth::Stable,
        parameters,
        outputs,
    }
}

/// A discovery report for the healthy shared stack: integration running,
/// secret present, usable network, no standalone deployment known.
pub fn discovery_report() -> DiscoveryReport {
    let snapshot = sample_snapshot();
    let resources = DiscoveredResources {
        network: Some(network::classify(&sample_vpc_network())),
        workgroup_reference: Some("quilt-prod-workgroup".to_string()),
        secret_reference: Some(SAMPLE_SECRET_ARN.to_string()),
        integration_parameter: IntegrationParameter::Enabled,
        supporting_policy_references: vec![
            "arn:aws:iam::123456789012:policy/quilt-prod-search".to_string()
        ],
    };
    DiscoveryReport {
        snapshot,
        resources,
        secret_present: true,
        standalone: StandalonePresence::Unknown,
        state: IntegrationState::IntegratedRunning,
    }
}

/// A complete, schema-valid profile as a prior setup would have left it.
pub fn sample_profile_document() -> ProfileDocument {
    ProfileDocument {
        schema_version: SCHEMA_VERSION,
        deployment: DeploymentSection {
            region: "us-east-1".to_string(),
            account: Some("123456789012".to_string()),
            network: Some(network::classify(&sample_vpc_network())),
        },
        workgroup: WorkgroupSection {
            name: "quilt-prod-workgroup".to_string(),
            source: discovery::WorkgroupSource::Quilt,
        },
        integration: IntegrationSection {
            tenant: "acme".to_string(),
            client_id: "client-9f8e7d6c".to_string(),
            secret_reference: Some(SAMPLE_SECRET_ARN.to_string()),
            app_definition_id: "appdef_h74kW9bq".to_string(),
            allow_list: vec!["svc-benchling@acme.example".to_string()],
        },
        stack: StackSection {
            arn: format!(
                "arn:aws:cloudformation:us-east-1:123456789012:stack/{SAMPLE_STACK}/1a2b3c4d"
            ),
            name: SAMPLE_STACK.to_string(),
            mode: StackMode::Integrated,
        },
        last_completed_at: None,
    }
}

/// In-memory [`InfraProvider`] driven entirely by scripted state.
///
/// Every call is appended to a journal so tests can assert exactly what
/// was issued (and, just as importantly, what was not).
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    snapshots: Arc<Mutex<BTreeMap<String, StackSnapshot>>>,
    networks: Arc<Mutex<BTreeMap<String, VpcNetwork>>>,
    secrets: Arc<Mutex<BTreeSet<String>>>,
    poll_sequences: Arc<Mutex<BTreeMap<String, VecDeque<OperationStatus>>>>,
    /// Keyed by journal-entry prefix, e.g. `fetch_snapshot quilt-prod`.
    failures: Arc<Mutex<BTreeMap<String, ProviderError>>>,
    deployments: Arc<Mutex<Vec<StandaloneDeployment>>>,
    journal: Arc<Mutex<Vec<String>>>,
    op_counter: Arc<AtomicU32>,
}

impl ScriptedProvider {
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    /// Standalone deployments issued, in order, with full parameters.
    pub fn deployments(&self) -> Vec<StandaloneDeployment> {
        self.deployments.lock().unwrap().clone()
    }

    pub fn secret_exists(&self, reference: &str) -> bool {
        self.secrets.lock().unwrap().contains(reference)
    }

    fn record(&self, entry: String) -> Result<(), ProviderError> {
        let failure = self.failures.lock().unwrap().get(&entry).cloned();
        self.journal.lock().unwrap().push(entry);
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_operation(&self, prefix: &str) -> String {
        let n = self.op_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("op-{prefix}-{n}")
    }
}

#[async_trait]
impl InfraProvider for ScriptedProvider {
    async fn fetch_snapshot(
        &self,
        stack_name: &str,
    ) -> Result<Option<StackSnapshot>, ProviderError> {
        self.record(format!("fetch_snapshot {stack_name}"))?;
        Ok(self.snapshots.lock().unwrap().get(stack_name).cloned())
    }

    async fn describe_network(&self, vpc_id: &str) -> Result<VpcNetwork, ProviderError> {
        self.record(format!("describe_network {vpc_id}"))?;
        let scripted = self.networks.lock().unwrap().get(vpc_id).cloned();
        // An unscripted vpc resolves to an empty network, which later
        // classifies as unusable; failures are opt-in through `fail`.
        Ok(scripted.unwrap_or_else(|| VpcNetwork {
            vpc_id: vpc_id.to_string(),
            cidr_block: None,
            subnets: Vec::new(),
            route_tables: Vec::new(),
        }))
    }

    async fn update_stack_parameter(
        &self,
        stack_name: &str,
        key: &str,
        value: &str,
    ) -> Result<OperationHandle, ProviderError> {
        self.record(format!("update_stack_parameter {stack_name} {key}={value}"))?;
        Ok(OperationHandle {
            operation_id: self.next_operation("update"),
            kind: OperationKind::ParameterUpdate,
            stack_name: stack_name.to_string(),
        })
    }

    async fn deploy_standalone(
        &self,
        deployment: &StandaloneDeployment,
    ) -> Result<OperationHandle, ProviderError> {
        self.record(format!("deploy_standalone {}", deployment.stack_name))?;
        self.deployments.lock().unwrap().push(deployment.clone());
        Ok(OperationHandle {
            operation_id: self.next_operation("deploy"),
            kind: OperationKind::StackDeploy,
            stack_name: deployment.stack_name.clone(),
        })
    }

    async fn poll_operation(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationStatus, ProviderError> {
        self.record(format!("poll_operation {}", handle.operation_id))?;
        let mut sequences = self.poll_sequences.lock().unwrap();
        match sequences.get_mut(&handle.operation_id) {
            // The last scripted status repeats so slow pollers see a
            // stable terminal (or stuck) state.
            Some(sequence) if sequence.len() > 1 => Ok(sequence
                .pop_front()
                .unwrap_or(OperationStatus::Succeeded)),
            Some(sequence) => Ok(sequence
                .front()
                .cloned()
                .unwrap_or(OperationStatus::Succeeded)),
            None => Ok(OperationStatus::Succeeded),
        }
    }

    async fn get_secret(&self, reference: &str) -> Result<Option<SecretReference>, ProviderError> {
        self.record(format!("get_secret {reference}"))?;
        if self.secrets.lock().unwrap().contains(reference) {
            Ok(Some(SecretReference::new(reference)))
        } else {
            Ok(None)
        }
    }

    async fn put_secret(
        &self,
        reference_hint: &str,
        _material: &SecretMaterial,
    ) -> Result<SecretReference, ProviderError> {
        self.record(format!("put_secret {reference_hint}"))?;
        let canonical = if reference_hint.starts_with("arn:") {
            reference_hint.to_string()
        } else {
            format!("arn:aws:secretsmanager:us-east-1:123456789012:secret:{reference_hint}")
        };
        let mut secrets = self.secrets.lock().unwrap();
        secrets.insert(reference_hint.to_string());
        secrets.insert(canonical.clone());
        Ok(SecretReference::new(canonical))
    }
}

/// Fluent construction for [`ScriptedProvider`].
#[derive(Default)]
pub struct ScriptedProviderBuilder {
    provider: ScriptedProvider,
}

impl ScriptedProviderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider preloaded with the healthy shared stack: snapshot,
    /// network, and stored secret all in place.
    pub fn integrated_stack() -> Self {
        Self::new()
            .with_snapshot(sample_snapshot())
            .with_network(sample_vpc_network())
            .with_secret(SAMPLE_SECRET_ARN)
    }

    /// Register a snapshot under its own stack name.
    pub fn with_snapshot(self, snapshot: StackSnapshot) -> Self {
        self.provider
            .snapshots
            .lock()
            .unwrap()
            .insert(snapshot.stack_name.clone(), snapshot);
        self
    }

    pub fn with_network(self, network: VpcNetwork) -> Self {
        self.provider
            .networks
            .lock()
            .unwrap()
            .insert(network.vpc_id.clone(), network);
        self
    }

    /// Mark a secret as existing behind the given reference.
    pub fn with_secret(self, reference: &str) -> Self {
        self.provider
            .secrets
            .lock()
            .unwrap()
            .insert(reference.to_string());
        self
    }

    /// Script the statuses an operation reports, in order. The last one
    /// repeats for any further polls.
    pub fn poll_sequence(self, operation_id: &str, statuses: Vec<OperationStatus>) -> Self {
        self.provider
            .poll_sequences
            .lock()
            .unwrap()
            .insert(operation_id.to_string(), statuses.into());
        self
    }

    /// Fail a specific call. The key is the journal entry the call
    /// would produce, e.g. `fetch_snapshot quilt-prod`.
    pub fn fail(self, call: &str, error: ProviderError) -> Self {
        self.provider
            .failures
            .lock()
            .unwrap()
            .insert(call.to_string(), error);
        self
    }

    pub fn build(self) -> ScriptedProvider {
        self.provider
    }
}

/// Scripted [`ChoiceSource`]: pops pre-recorded events instead of
/// prompting, and records every confirmation prompt it was shown.
#[derive(Debug, Default)]
pub struct ScriptedChoices {
    events: VecDeque<WizardEvent>,
    confirmations: VecDeque<bool>,
    pub prompts: Vec<String>,
}

impl ScriptedChoices {
    pub fn new(events: Vec<WizardEvent>) -> Self {
        Self {
            events: events.into(),
            confirmations: VecDeque::new(),
            prompts: Vec::new(),
        }
    }

    pub fn with_confirmations(mut self, answers: Vec<bool>) -> Self {
        self.confirmations = answers.into();
        self
    }
}

impl ChoiceSource for ScriptedChoices {
    fn choose(&mut self, _menu: &Menu) -> Result<WizardEvent, SetupError> {
        self.events.pop_front().ok_or_else(|| {
            SetupError::invalid_field("action", "no scripted selection left")
        })
    }

    fn confirm_destructive(&mut self, _plan: ActionPlan) -> Result<WizardEvent, SetupError> {
        self.events.pop_front().ok_or_else(|| {
            SetupError::invalid_field("action", "no scripted confirmation left")
        })
    }

    fn confirm(&mut self, prompt: &str) -> Result<bool, SetupError> {
        self.prompts.push(prompt.to_string());
        Ok(self.confirmations.pop_front().unwrap_or(false))
    }
}

/// Credential validator that accepts everything.
pub struct AlwaysValidCredentials;

#[async_trait]
impl CredentialValidator for AlwaysValidCredentials {
    async fn validate(
        &self,
        _tenant: &str,
        _client_id: &str,
        _material: &SecretMaterial,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Credential validator that rejects everything.
pub struct RejectingCredentials;

#[async_trait]
impl CredentialValidator for RejectingCredentials {
    async fn validate(
        &self,
        _tenant: &str,
        _client_id: &str,
        _material: &SecretMaterial,
    ) -> Result<(), ProviderError> {
        Err(ProviderError::credential_rejected(
            "token endpoint returned 401",
        ))
    }
}
