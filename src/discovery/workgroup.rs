//! Managed query workgroup resolution
//!
//! Reuse wins: a workgroup published by the shared stack is always
//! taken as-is. Only when the stack exposes none do we fall back to a
//! self-managed name, and the caller gets an explicit creation flag so
//! the deploy step can pass it through as a parameter instead of
//! relying on template-side conditionals.

use serde::{Deserialize, Serialize};

use super::DiscoveredResources;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkgroupSource {
    /// Published by the shared stack.
    Quilt,
    /// Named and owned by this tool.
    SelfManaged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkgroupResolution {
    pub name: String,
    pub source: WorkgroupSource,
    /// True when the executor must ask the provider to create the
    /// workgroup as part of a standalone deploy.
    pub requires_creation: bool,
}

/// Deterministic: the same discovery input always yields the same
/// resolution, and a discovered reference is never shadowed by the
/// fallback.
pub fn resolve(discovered: &DiscoveredResources, self_managed_stack_name: &str) -> WorkgroupResolution {
    match discovered.workgroup_reference.as_deref() {
        Some(reference) if !reference.is_empty() => WorkgroupResolution {
            name: reference.to_string(),
            source: WorkgroupSource::Quilt,
            requires_creation: false,
        },
        _ => WorkgroupResolution {
            name: format!("{self_managed_stack_name}-workgroup"),
            source: WorkgroupSource::SelfManaged,
            requires_creation: true,
        },
    }
}
