//! Integration state classification
//!
//! One canonical state per session, recomputed from live discovery
//! every run. Another operator may have toggled the integration since
//! the last invocation, so nothing here is ever cached or persisted.

use std::fmt;

use super::extract::IntegrationParameter;

/// Whether a standalone deployment already exists.
///
/// `Unknown` is only possible on a machine with no prior profile: there
/// is a candidate stack name to probe, but a missing stack proves
/// nothing was ever set up here, while with a prior profile the same
/// missing stack means a known deployment is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandalonePresence {
    Exists,
    Missing,
    Unknown,
}

/// The mutually exclusive integration modes the decision engine starts
/// from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationState {
    /// Shared stack integration enabled with a secret in place.
    IntegratedRunning,
    /// Shared stack supports the integration but it is switched off.
    IntegratedDisabled,
    /// The shared stack predates integration support entirely.
    Legacy,
    /// A dedicated standalone deployment is already present.
    StandaloneExisting,
    /// Nothing set up yet on a stack that may or may not support it.
    FirstTime,
}

impl fmt::Display for IntegrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrationState::IntegratedRunning => write!(f, "integrated (running)"),
            IntegrationState::IntegratedDisabled => write!(f, "integrated (disabled)"),
            IntegrationState::Legacy => write!(f, "legacy stack"),
            IntegrationState::StandaloneExisting => write!(f, "standalone (existing)"),
            IntegrationState::FirstTime => write!(f, "first-time setup"),
        }
    }
}

/// Classify the current integration mode.
///
/// Decision table, first match wins:
/// an enabled toggle with a secret is running; a disabled toggle is
/// disabled regardless of anything else; an existing standalone
/// deployment claims the remaining cases; after that a missing
/// deployment on an unsupporting stack is legacy, and an unknown one is
/// a first-time setup. An enabled toggle without a secret is
/// half-configured and lands in first-time so the flow completes it.
pub fn classify(
    parameter: IntegrationParameter,
    secret_reference_present: bool,
    standalone: StandalonePresence,
) -> IntegrationState {
    use IntegrationParameter::{Absent, Disabled, Enabled};
    use StandalonePresence::{Exists, Missing, Unknown};

    match (parameter, secret_reference_present, standalone) {
        (Enabled, true, _) => IntegrationState::IntegratedRunning,
        (Disabled, _, _) => IntegrationState::IntegratedDisabled,
        (Enabled | Absent, _, Exists) => IntegrationState::StandaloneExisting,
        (Absent, _, Missing) => IntegrationState::Legacy,
        (Absent, _, Unknown) => IntegrationState::FirstTime,
        (Enabled, false, Missing | Unknown) => IntegrationState::FirstTime,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IntegrationParameter::{Absent, Disabled, Enabled};
    use StandalonePresence::{Exists, Missing, Unknown};

    #[test]
    fn enabled_with_secret_is_running() {
        assert_eq!(
            classify(Enabled, true, Missing),
            IntegrationState::IntegratedRunning
        );
        // A leftover standalone stack does not demote a running
        // integration.
        assert_eq!(
            classify(Enabled, true, Exists),
            IntegrationState::IntegratedRunning
        );
    }

    #[test]
    fn disabled_wins_over_standalone_leftovers() {
        assert_eq!(
            classify(Disabled, false, Missing),
            IntegrationState::IntegratedDisabled
        );
        assert_eq!(
            classify(Disabled, true, Exists),
            IntegrationState::IntegratedDisabled
        );
    }

    #[test]
    fn absent_parameter_without_standalone_is_legacy() {
        assert_eq!(classify(Absent, false, Missing), IntegrationState::Legacy);
        assert_eq!(classify(Absent, true, Missing), IntegrationState::Legacy);
    }

    #[test]
    fn existing_standalone_claims_non_integrated_states() {
        assert_eq!(
            classify(Absent, false, Exists),
            IntegrationState::StandaloneExisting
        );
        assert_eq!(
            classify(Enabled, false, Exists),
            IntegrationState::StandaloneExisting
        );
    }

    #[test]
    fn fresh_machine_with_bare_stack_is_first_time() {
        assert_eq!(classify(Absent, false, Unknown), IntegrationState::FirstTime);
    }

    #[test]
    fn enabled_without_secret_is_half_configured() {
        assert_eq!(classify(Enabled, false, Missing), IntegrationState::FirstTime);
        assert_eq!(classify(Enabled, false, Unknown), IntegrationState::FirstTime);
    }
}
