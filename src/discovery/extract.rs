//! Typed resource extraction from a stack snapshot
//!
//! Pure lookups against a fixed key table. A missing key leaves the
//! field absent; downstream code tolerates partial discovery instead of
//! failing here.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::provider::types::StackSnapshot;

/// Key table for the shared stack's surface. Parameters and outputs are
/// matched case-sensitively; fallbacks cover older template revisions.
const INTEGRATION_KEYS: &[&str] = &["BenchlingIntegration"];
const SECRET_KEYS: &[&str] = &["BenchlingSecret", "BenchlingSecretArn"];
const WORKGROUP_KEYS: &[&str] = &["QueryWorkgroup", "AthenaWorkgroup"];
const VPC_KEYS: &[&str] = &["VpcId", "VPC"];
const VPC_CIDR_KEYS: &[&str] = &["VpcCidr", "VpcCidrBlock"];
const POLICY_SUFFIX: &str = "PolicyArn";

/// The shared stack's integration toggle as discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationParameter {
    Enabled,
    Disabled,
    /// The stack exposes no integration parameter at all.
    Absent,
}

impl IntegrationParameter {
    /// Whether the stack can host the integration. Legacy stacks
    /// predate the parameter entirely.
    pub fn is_supported(&self) -> bool {
        !matches!(self, IntegrationParameter::Absent)
    }
}

/// Resources pulled straight out of stack outputs and parameters,
/// before any network fetch or classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedResources {
    pub vpc_id: Option<String>,
    pub vpc_cidr: Option<String>,
    pub workgroup_reference: Option<String>,
    pub secret_reference: Option<String>,
    pub integration_parameter: Option<IntegrationParameter>,
    pub supporting_policy_references: Vec<String>,
}

impl ExtractedResources {
    pub fn integration_parameter(&self) -> IntegrationParameter {
        self.integration_parameter
            .unwrap_or(IntegrationParameter::Absent)
    }
}

/// Extract typed resources from a snapshot. Pure; no provider calls.
pub fn extract(snapshot: &StackSnapshot) -> ExtractedResources {
    let integration_parameter = first_present(snapshot, INTEGRATION_KEYS, Lookup::ParameterFirst)
        .map(|raw| parse_integration_parameter(&raw));

    let mut supporting_policy_references: Vec<String> = snapshot
        .outputs
        .iter()
        .filter(|(key, value)| key.ends_with(POLICY_SUFFIX) && !value.is_empty())
        .map(|(_, value)| value.clone())
        .collect();
    supporting_policy_references.sort();

    ExtractedResources {
        vpc_id: first_present(snapshot, VPC_KEYS, Lookup::OutputFirst),
        vpc_cidr: first_present(snapshot, VPC_CIDR_KEYS, Lookup::OutputFirst),
        workgroup_reference: first_present(snapshot, WORKGROUP_KEYS, Lookup::OutputFirst),
        secret_reference: first_present(snapshot, SECRET_KEYS, Lookup::OutputFirst),
        integration_parameter,
        supporting_policy_references,
    }
}

enum Lookup {
    /// Parameters first, outputs as fallback. Used for the integration
    /// toggle, which newer templates expose as a parameter.
    ParameterFirst,
    /// Outputs first, parameters as fallback.
    OutputFirst,
}

/// First non-empty value for any key in the table.
fn first_present(snapshot: &StackSnapshot, keys: &[&str], order: Lookup) -> Option<String> {
    for key in keys {
        let value = match order {
            Lookup::ParameterFirst => snapshot.parameter(key).or_else(|| snapshot.output(key)),
            Lookup::OutputFirst => snapshot.output(key).or_else(|| snapshot.parameter(key)),
        };
        if let Some(value) = value {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn parse_integration_parameter(raw: &str) -> IntegrationParameter {
    if raw.eq_ignore_ascii_case("enabled") {
        IntegrationParameter::Enabled
    } else if raw.eq_ignore_ascii_case("disabled") {
        IntegrationParameter::Disabled
    } else {
        // The parameter exists, so the stack supports the integration;
        // an unrecognized value is treated as not currently active.
        warn!("unrecognized integration parameter value '{raw}', treating as disabled");
        IntegrationParameter::Disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::StackHealth;
    use std::collections::BTreeMap;

    fn snapshot(
        parameters: &[(&str, &str)],
        outputs: &[(&str, &str)],
    ) -> StackSnapshot {
        StackSnapshot {
            stack_name: "quilt-prod".to_string(),
            stack_id: "arn:aws:cloudformation:us-east-1:123456789012:stack/quilt-prod/abc"
                .to_string(),
            region: Some("us-east-1".to_string()),
            account: Some("123456789012".to_string()),
            raw_status: "UPDATE_COMPLETE".to_string(),
            health: StackHealth::Stable,
            parameters: parameters
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            outputs: outputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn extracts_the_full_key_table() {
        let snap = snapshot(
            &[("BenchlingIntegration", "Enabled")],
            &[
                ("BenchlingSecret", "arn:aws:secretsmanager:us-east-1:1:secret:x"),
                ("QueryWorkgroup", "quilt-prod-workgroup"),
                ("VpcId", "vpc-0a1b"),
                ("VpcCidr", "10.0.0.0/16"),
                ("SearchPolicyArn", "arn:aws:iam::1:policy/search"),
                ("WritePolicyArn", "arn:aws:iam::1:policy/write"),
                ("BucketName", "quilt-data"),
            ],
        );
        let extracted = extract(&snap);
        assert_eq!(
            extracted.integration_parameter(),
            IntegrationParameter::Enabled
        );
        assert_eq!(
            extracted.secret_reference.as_deref(),
            Some("arn:aws:secretsmanager:us-east-1:1:secret:x")
        );
        assert_eq!(
            extracted.workgroup_reference.as_deref(),
            Some("quilt-prod-workgroup")
        );
        assert_eq!(extracted.vpc_id.as_deref(), Some("vpc-0a1b"));
        assert_eq!(extracted.vpc_cidr.as_deref(), Some("10.0.0.0/16"));
        assert_eq!(extracted.supporting_policy_references.len(), 2);
    }

    #[test]
    fn missing_keys_become_absent_not_errors() {
        let extracted = extract(&snapshot(&[], &[]));
        assert_eq!(extracted.vpc_id, None);
        assert_eq!(extracted.workgroup_reference, None);
        assert_eq!(extracted.secret_reference, None);
        assert_eq!(
            extracted.integration_parameter(),
            IntegrationParameter::Absent
        );
        assert!(extracted.supporting_policy_references.is_empty());
    }

    #[test]
    fn empty_values_count_as_absent() {
        let snap = snapshot(&[], &[("QueryWorkgroup", ""), ("BenchlingSecret", "")]);
        let extracted = extract(&snap);
        assert_eq!(extracted.workgroup_reference, None);
        assert_eq!(extracted.secret_reference, None);
    }

    #[test]
    fn integration_toggle_prefers_parameter_over_output() {
        let snap = snapshot(
            &[("BenchlingIntegration", "Disabled")],
            &[("BenchlingIntegration", "Enabled")],
        );
        assert_eq!(
            extract(&snap).integration_parameter(),
            IntegrationParameter::Disabled
        );
    }

    #[test]
    fn integration_toggle_falls_back_to_output() {
        let snap = snapshot(&[], &[("BenchlingIntegration", "Enabled")]);
        assert_eq!(
            extract(&snap).integration_parameter(),
            IntegrationParameter::Enabled
        );
    }

    #[test]
    fn secret_arn_alias_is_recognized() {
        let snap = snapshot(&[], &[("BenchlingSecretArn", "arn:...:secret:y")]);
        assert_eq!(
            extract(&snap).secret_reference.as_deref(),
            Some("arn:...:secret:y")
        );
    }
}
