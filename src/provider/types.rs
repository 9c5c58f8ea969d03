//! Wire-level types returned by infrastructure providers
//!
//! These mirror what the cloud APIs hand back, trimmed to the fields the
//! setup flow actually consumes. Everything here is provider-agnostic;
//! the AWS backend translates SDK output into these shapes and the test
//! doubles construct them directly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Point-in-time view of a deployed stack: identity, health, and its
/// full parameter/output key-value surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSnapshot {
    pub stack_name: String,
    pub stack_id: String,
    /// Region the stack lives in, when the provider reports it.
    pub region: Option<String>,
    /// Owning account, when the provider reports it.
    pub account: Option<String>,
    /// Raw status string as reported by the provider, e.g.
    /// `UPDATE_COMPLETE`.
    pub raw_status: String,
    pub health: StackHealth,
    pub parameters: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
}

impl StackSnapshot {
    /// Case-sensitive parameter lookup.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Case-sensitive output lookup.
    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs.get(key).map(String::as_str)
    }
}

/// Coarse health classification derived from the raw stack status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackHealth {
    /// A terminal `*_COMPLETE` state. Safe to reconfigure.
    Stable,
    /// An `*_IN_PROGRESS` state. Mutations must wait.
    InProgress,
    /// A terminal `*_FAILED` or rollback state.
    Failed,
}

impl StackHealth {
    /// Classify a raw provider status string. Any rollback state counts
    /// as failed once it settles: `UPDATE_ROLLBACK_COMPLETE` means the
    /// requested change was undone, not applied.
    pub fn from_raw(raw: &str) -> Self {
        if raw.ends_with("_IN_PROGRESS") {
            StackHealth::InProgress
        } else if raw.ends_with("_FAILED") || raw.contains("ROLLBACK") {
            StackHealth::Failed
        } else {
            StackHealth::Stable
        }
    }
}

/// A VPC's subnets and routing, fetched in one call so classification
/// always sees a consistent view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcNetwork {
    pub vpc_id: String,
    pub cidr_block: Option<String>,
    pub subnets: Vec<RawSubnet>,
    pub route_tables: Vec<RawRouteTable>,
}

/// A subnet exactly as the provider reports it, before reachability
/// classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSubnet {
    pub subnet_id: String,
    pub vpc_id: String,
    pub availability_zone: String,
    pub cidr_block: String,
}

/// A route table with its explicit subnet associations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRouteTable {
    pub route_table_id: String,
    pub vpc_id: String,
    pub routes: Vec<RawRoute>,
    /// Subnet ids explicitly associated with this table.
    pub associated_subnet_ids: Vec<String>,
    /// The VPC main table applies to every subnet without an explicit
    /// association.
    pub is_main: bool,
}

/// A single routing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRoute {
    /// Destination CIDR, e.g. `0.0.0.0/0` or `10.0.0.0/16`.
    pub destination: String,
    pub target: RouteTarget,
}

impl RawRoute {
    /// True for the IPv4 or IPv6 default route.
    pub fn is_default(&self) -> bool {
        self.destination == "0.0.0.0/0" || self.destination == "::/0"
    }
}

/// Where a route points, classified from the target identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    InternetGateway { id: String },
    NatGateway { id: String },
    TransitGateway { id: String },
    VpcPeering { id: String },
    NetworkInterface { id: String },
    Instance { id: String },
    /// Intra-VPC local route.
    Local,
    Other { id: String },
}

impl RouteTarget {
    /// Classify a raw target identifier by its provider prefix.
    pub fn from_raw(id: &str) -> Self {
        let owned = id.to_string();
        if id == "local" {
            RouteTarget::Local
        } else if id.starts_with("igw-") {
            RouteTarget::InternetGateway { id: owned }
        } else if id.starts_with("nat-") {
            RouteTarget::NatGateway { id: owned }
        } else if id.starts_with("tgw-") {
            RouteTarget::TransitGateway { id: owned }
        } else if id.starts_with("pcx-") {
            RouteTarget::VpcPeering { id: owned }
        } else if id.starts_with("eni-") {
            RouteTarget::NetworkInterface { id: owned }
        } else if id.starts_with("i-") {
            RouteTarget::Instance { id: owned }
        } else {
            RouteTarget::Other { id: owned }
        }
    }
}

/// Handle to a long-running provider operation, durable enough to be
/// persisted in a resumability marker and polled by a later process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub operation_id: String,
    pub kind: OperationKind,
    /// The stack the operation mutates.
    pub stack_name: String,
}

/// What kind of mutation an operation handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ParameterUpdate,
    StackDeploy,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::ParameterUpdate => write!(f, "parameter update"),
            OperationKind::StackDeploy => write!(f, "stack deploy"),
        }
    }
}

/// Observed state of a long-running operation at one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress { detail: String },
    Succeeded,
    Failed { reason: String },
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::InProgress { .. })
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::InProgress { detail } => write!(f, "in progress ({detail})"),
            OperationStatus::Succeeded => write!(f, "succeeded"),
            OperationStatus::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}

/// Opaque pointer to stored secret material (an ARN or name). Safe to
/// persist and log; the material it points to is not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretReference(String);

impl SecretReference {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Secret material held in memory only. Deliberately implements neither
/// `Serialize` nor `Display`, and its `Debug` output is redacted, so the
/// raw value cannot reach a profile, a log line, or an error message by
/// accident.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretMaterial(String);

impl SecretMaterial {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value. Call sites are the only audit surface for
    /// where material travels, so keep them few.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretMaterial(<redacted>)")
    }
}

/// Request to create or update the dedicated standalone stack. The
/// provider treats deployment as create-or-update, so replaying the same
/// request is safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandaloneDeployment {
    pub stack_name: String,
    pub parameters: BTreeMap<String, String>,
}
