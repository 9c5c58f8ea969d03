//! Persisted profile schema and validation
//!
//! The profile is the only durable state this tool owns. Every read and
//! every write validates against this schema; a document that fails
//! validation never reaches disk, and a disk file that fails it is a
//! hard error rather than something to silently discard.
//!
//! Secrets never appear here. The integration section stores an opaque
//! reference into the secret store, and validation scans every string
//! field for anything shaped like raw credential material.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::discovery::network::NetworkDescriptor;
use crate::discovery::workgroup::WorkgroupSource;
use crate::error::FieldViolation;

pub const SCHEMA_VERSION: u32 = 1;

static TENANT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("tenant regex"));
static REGION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").expect("region regex"));

/// The persisted profile. Serialized as schema-versioned JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDocument {
    pub schema_version: u32,
    pub deployment: DeploymentSection,
    pub workgroup: WorkgroupSection,
    pub integration: IntegrationSection,
    pub stack: StackSection,
    /// Set only after an action plan ran to completion, follow-up steps
    /// included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSection {
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Usable network discovered from the shared stack, or `None` when
    /// deployment should auto-provision its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkgroupSection {
    pub name: String,
    pub source: WorkgroupSource,
}

impl WorkgroupSection {
    /// Self-managed workgroups are created as part of a standalone
    /// deploy; reused ones already exist.
    pub fn requires_creation(&self) -> bool {
        self.source == WorkgroupSource::SelfManaged
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationSection {
    pub tenant: String,
    pub client_id: String,
    /// Opaque reference into the secret store. Never the material.
    pub secret_reference: Option<String>,
    pub app_definition_id: String,
    #[serde(default)]
    pub allow_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackSection {
    /// Identifier of the shared stack, when known.
    #[serde(default)]
    pub arn: String,
    /// Name of the shared stack discovery anchors on.
    pub name: String,
    pub mode: StackMode,
}

/// How the integration runs: inside the shared stack, or as a dedicated
/// deployment next to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackMode {
    Integrated,
    Standalone,
}

impl StackSection {
    /// Name the dedicated standalone stack derives from the shared one.
    pub fn standalone_stack_name(&self) -> String {
        derive_standalone_name(&self.name)
    }
}

/// The standalone stack name is always derived, never chosen, so every
/// machine probing for it arrives at the same answer.
pub fn derive_standalone_name(shared_stack_name: &str) -> String {
    format!("{shared_stack_name}-benchling")
}

/// Default name hint for the secret created on first setup.
pub fn default_secret_hint(shared_stack_name: &str) -> String {
    format!("{shared_stack_name}-benchling-secret")
}

/// Validate a document against the schema. Returns every violation so
/// the operator fixes them in one pass.
pub fn validate(document: &ProfileDocument) -> Vec<FieldViolation> {
    let mut violations = Vec::new();

    if document.schema_version != SCHEMA_VERSION {
        violations.push(FieldViolation::new(
            "schema_version",
            format!(
                "unsupported version {} (expected {SCHEMA_VERSION})",
                document.schema_version
            ),
        ));
    }

    require(&mut violations, "stack.name", &document.stack.name);
    require(&mut violations, "deployment.region", &document.deployment.region);
    require(&mut violations, "workgroup.name", &document.workgroup.name);
    require(&mut violations, "integration.tenant", &document.integration.tenant);
    require(
        &mut violations,
        "integration.client_id",
        &document.integration.client_id,
    );
    require(
        &mut violations,
        "integration.app_definition_id",
        &document.integration.app_definition_id,
    );

    match document.integration.secret_reference.as_deref() {
        None | Some("") => violations.push(FieldViolation::new(
            "integration.secret_reference",
            "required field is missing",
        )),
        Some(_) => {}
    }

    if !document.integration.tenant.is_empty()
        && !TENANT_RE.is_match(&document.integration.tenant)
    {
        violations.push(FieldViolation::new(
            "integration.tenant",
            "must be a lowercase tenant subdomain (letters, digits, hyphens)",
        ));
    }
    if !document.deployment.region.is_empty() && !REGION_RE.is_match(&document.deployment.region)
    {
        violations.push(FieldViolation::new(
            "deployment.region",
            "not a plausible region identifier",
        ));
    }
    for (index, entry) in document.integration.allow_list.iter().enumerate() {
        if entry.trim().is_empty() {
            violations.push(FieldViolation::new(
                format!("integration.allow_list[{index}]"),
                "empty entry",
            ));
        }
    }

    scan_for_credentials(document, &mut violations);
    violations
}

fn require(violations: &mut Vec<FieldViolation>, field: &str, value: &str) {
    if value.trim().is_empty() {
        violations.push(FieldViolation::new(field, "required field is missing"));
    }
}

/// Walk every string leaf of the serialized document and flag anything
/// shaped like raw credential material. References and ARNs contain
/// separators the credential alphabet lacks, so they pass.
fn scan_for_credentials(document: &ProfileDocument, violations: &mut Vec<FieldViolation>) {
    let value = match serde_json::to_value(document) {
        Ok(value) => value,
        Err(_) => return,
    };
    walk_strings(&value, "", &mut |path, leaf| {
        if looks_like_credential(leaf) {
            violations.push(FieldViolation::new(
                path,
                "value matches the shape of raw credential material; only references may be persisted",
            ));
        }
    });
}

fn walk_strings(value: &serde_json::Value, path: &str, visit: &mut impl FnMut(&str, &str)) {
    match value {
        serde_json::Value::String(s) => visit(path, s),
        serde_json::Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                walk_strings(item, &format!("{path}[{index}]"), visit);
            }
        }
        serde_json::Value::Object(map) => {
            for (key, item) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                walk_strings(item, &child, visit);
            }
        }
        _ => {}
    }
}

/// Heuristic for raw credential material: long, no structural
/// separators, and drawn entirely from the base64/url-safe alphabet.
pub fn looks_like_credential(value: &str) -> bool {
    value.len() >= 40
        && !value.contains(':')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '_' | '-'))
}
