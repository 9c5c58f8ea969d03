//! Stack discovery pipeline
//!
//! Fetches a fresh snapshot of the shared stack plus a probe for a
//! prior standalone deployment, extracts typed resources, classifies
//! the network, and derives the canonical integration state. All
//! provider reads are issued concurrently where independent; the
//! classifiers only run once every read has completed.

pub mod extract;
pub mod integration;
pub mod network;
pub mod workgroup;

use tracing::{debug, info};

pub use extract::{ExtractedResources, IntegrationParameter};
pub use integration::{IntegrationState, StandalonePresence};
pub use network::{NetworkDescriptor, SubnetDescriptor, SubnetKind, SubnetRejection};
pub use workgroup::{WorkgroupResolution, WorkgroupSource};

use crate::error::SetupError;
use crate::provider::types::StackSnapshot;
use crate::provider::{InfraProvider, ProviderError};

/// Everything discovery could find. Fields are independently optional;
/// partial discovery is a normal outcome and the merge step fills the
/// gaps from other sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredResources {
    pub network: Option<NetworkDescriptor>,
    pub workgroup_reference: Option<String>,
    pub secret_reference: Option<String>,
    pub integration_parameter: IntegrationParameter,
    pub supporting_policy_references: Vec<String>,
}

/// One session's complete discovery result. Snapshots are fetched fresh
/// on every run; nothing here survives the process.
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    pub snapshot: StackSnapshot,
    pub resources: DiscoveredResources,
    /// The referenced secret actually exists in the secret store, not
    /// merely in the stack outputs.
    pub secret_present: bool,
    pub standalone: StandalonePresence,
    pub state: IntegrationState,
}

/// Run the full discovery pipeline against a provider.
///
/// `standalone_candidate` is the stack name a standalone deployment
/// would live under (from the prior profile, or the default derived
/// name). `had_prior_profile` disambiguates a missing standalone stack:
/// with a profile it is a known deployment that is gone, without one it
/// proves nothing.
pub async fn discover(
    provider: &dyn InfraProvider,
    shared_stack_name: &str,
    standalone_candidate: &str,
    had_prior_profile: bool,
) -> Result<DiscoveryReport, SetupError> {
    info!("Discovering stack {shared_stack_name}");

    // Independent reads go out together.
    let (shared, standalone_snapshot) = tokio::try_join!(
        provider.fetch_snapshot(shared_stack_name),
        provider.fetch_snapshot(standalone_candidate),
    )?;

    let snapshot = shared.ok_or_else(|| {
        SetupError::Provider(ProviderError::stack_not_found(shared_stack_name))
    })?;
    debug!(
        "Snapshot of {shared_stack_name}: status {}, {} outputs",
        snapshot.raw_status,
        snapshot.outputs.len()
    );

    let extracted = extract::extract(&snapshot);

    // Second wave of reads, driven by what the snapshot referenced.
    let vpc_id = extracted.vpc_id.clone();
    let secret_reference = extracted.secret_reference.clone();
    let (vpc, secret_probe) = tokio::try_join!(
        async {
            match vpc_id.as_deref() {
                Some(vpc_id) => provider.describe_network(vpc_id).await.map(Some),
                None => Ok(None),
            }
        },
        async {
            match secret_reference.as_deref() {
                Some(reference) => provider.get_secret(reference).await,
                None => Ok(None),
            }
        },
    )?;

    // All reads have joined; classification is pure from here on.
    let network = vpc.map(|mut vpc| {
        if vpc.cidr_block.is_none() {
            vpc.cidr_block = extracted.vpc_cidr.clone();
        }
        network::classify(&vpc)
    });

    let standalone = standalone_presence(standalone_snapshot.is_some(), had_prior_profile);
    let secret_present = extracted.secret_reference.is_some() && secret_probe.is_some();

    let resources = DiscoveredResources {
        network,
        workgroup_reference: extracted.workgroup_reference,
        secret_reference: extracted.secret_reference,
        integration_parameter: extracted.integration_parameter(),
        supporting_policy_references: extracted.supporting_policy_references,
    };

    let state =
        integration::classify(resources.integration_parameter, secret_present, standalone);
    info!("Integration state: {state}");

    Ok(DiscoveryReport {
        snapshot,
        resources,
        secret_present,
        standalone,
        state,
    })
}

fn standalone_presence(stack_found: bool, had_prior_profile: bool) -> StandalonePresence {
    match (stack_found, had_prior_profile) {
        (true, _) => StandalonePresence::Exists,
        (false, true) => StandalonePresence::Missing,
        (false, false) => StandalonePresence::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_standalone_means_unknown_only_without_a_profile() {
        assert_eq!(standalone_presence(true, true), StandalonePresence::Exists);
        assert_eq!(standalone_presence(true, false), StandalonePresence::Exists);
        assert_eq!(standalone_presence(false, true), StandalonePresence::Missing);
        assert_eq!(standalone_presence(false, false), StandalonePresence::Unknown);
    }
}
