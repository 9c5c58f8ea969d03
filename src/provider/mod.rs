//! Infrastructure provider abstraction
//!
//! All cloud access goes through the [`InfraProvider`] trait so the
//! discovery and execution layers never touch an SDK directly. The AWS
//! backend lives behind the `aws` feature; tests use the scripted
//! provider from [`crate::testing`].

pub mod benchling;
pub mod retry;
pub mod types;

#[cfg(feature = "aws")]
pub mod aws;

use async_trait::async_trait;
use thiserror::Error;

pub use types::{
    OperationHandle, OperationKind, OperationStatus, RawRoute, RawRouteTable, RawSubnet,
    RouteTarget, SecretMaterial, SecretReference, StackHealth, StackSnapshot,
    StandaloneDeployment, VpcNetwork,
};

/// Errors surfaced by infrastructure providers.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("stack '{name}' not found")]
    StackNotFound { name: String },

    #[error("access denied: {detail}")]
    AccessDenied { detail: String },

    #[error("throttled: {detail}")]
    Throttled { detail: String },

    #[error("provider request failed: {detail}")]
    Api { detail: String, retryable: bool },

    #[error("credential rejected: {detail}")]
    CredentialRejected { detail: String },

    #[error("operation '{operation_id}' is unknown to the provider")]
    UnknownOperation { operation_id: String },
}

impl ProviderError {
    pub fn stack_not_found(name: impl Into<String>) -> Self {
        Self::StackNotFound { name: name.into() }
    }

    pub fn access_denied(detail: impl Into<String>) -> Self {
        Self::AccessDenied {
            detail: detail.into(),
        }
    }

    pub fn throttled(detail: impl Into<String>) -> Self {
        Self::Throttled {
            detail: detail.into(),
        }
    }

    pub fn api(detail: impl Into<String>, retryable: bool) -> Self {
        Self::Api {
            detail: detail.into(),
            retryable,
        }
    }

    pub fn credential_rejected(detail: impl Into<String>) -> Self {
        Self::CredentialRejected {
            detail: detail.into(),
        }
    }

    /// Whether retrying the same call can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Throttled { .. } => true,
            ProviderError::Api { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

/// Read and mutate cloud infrastructure on behalf of the setup flow.
///
/// Reads are side-effect free. Mutations return an [`OperationHandle`]
/// when the provider completes them asynchronously; callers poll via
/// [`InfraProvider::poll_operation`] until terminal.
#[async_trait]
pub trait InfraProvider: Send + Sync {
    /// Fetch a full snapshot of a stack. `Ok(None)` means the stack does
    /// not exist, which is a normal outcome when probing for optional
    /// stacks.
    async fn fetch_snapshot(&self, stack_name: &str)
        -> Result<Option<StackSnapshot>, ProviderError>;

    /// Fetch the subnets and route tables of a VPC in one consistent
    /// view.
    async fn describe_network(&self, vpc_id: &str) -> Result<VpcNetwork, ProviderError>;

    /// Set a single stack parameter, keeping every other parameter at
    /// its previous value.
    async fn update_stack_parameter(
        &self,
        stack_name: &str,
        key: &str,
        value: &str,
    ) -> Result<OperationHandle, ProviderError>;

    /// Create or update the dedicated standalone stack. Replaying the
    /// same request against an existing stack is an update, not an
    /// error.
    async fn deploy_standalone(
        &self,
        deployment: &StandaloneDeployment,
    ) -> Result<OperationHandle, ProviderError>;

    /// Observe the current status of a previously returned handle. The
    /// handle may come from an earlier process via a resumability
    /// marker.
    async fn poll_operation(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationStatus, ProviderError>;

    /// Probe whether stored secret material exists behind a reference.
    /// Returns the canonical reference when present, `None` when the
    /// secret is missing or empty. Never returns the material itself.
    async fn get_secret(
        &self,
        reference: &str,
    ) -> Result<Option<SecretReference>, ProviderError>;

    /// Write secret material to managed storage and return the opaque
    /// reference to persist. The material never travels further than
    /// this call.
    async fn put_secret(
        &self,
        reference_hint: &str,
        material: &SecretMaterial,
    ) -> Result<SecretReference, ProviderError>;
}

/// Validate third-party credentials against the external service before
/// any infrastructure is mutated.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Check that the tenant, client id, and secret form a working
    /// credential. `Err(CredentialRejected)` means the service refused
    /// them; other errors mean the check itself could not run.
    async fn validate(
        &self,
        tenant: &str,
        client_id: &str,
        material: &SecretMaterial,
    ) -> Result<(), ProviderError>;
}
