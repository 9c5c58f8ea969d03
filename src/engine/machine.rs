//! Wizard decision state machine
//!
//! The original flow here is naturally a chain of nested prompts; it is
//! modeled instead as an explicit state machine so tests can drive it
//! with synthetic selections and no terminal. Selections arrive as
//! events through a [`ChoiceSource`], the machine validates them
//! against the menu for the classified state, and destructive plans
//! force a confirmation state that no auto-accept mode can skip.

use std::fmt;

use crate::discovery::{IntegrationParameter, IntegrationState};
use crate::error::SetupError;

/// The actions the engine can decide on. Consumed exactly once by the
/// execution phase; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPlan {
    UpdateSecretOnly,
    EnableIntegration,
    DeployStandalone,
    UpdateStandalone,
    DisableIntegration,
    SwitchToStandalone,
    ReviewOnly,
    Abort,
}

impl ActionPlan {
    /// Destructive or architecture-changing plans always require an
    /// explicit confirmation, even under accept-defaults mode.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            ActionPlan::DisableIntegration | ActionPlan::SwitchToStandalone
        )
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ActionPlan::UpdateSecretOnly => "update the stored secret only",
            ActionPlan::EnableIntegration => "enable the shared-stack integration",
            ActionPlan::DeployStandalone => "deploy a dedicated standalone stack",
            ActionPlan::UpdateStandalone => "update the existing standalone stack",
            ActionPlan::DisableIntegration => "disable the shared-stack integration",
            ActionPlan::SwitchToStandalone => {
                "disable the shared integration and deploy standalone"
            }
            ActionPlan::ReviewOnly => "review and persist configuration without changes",
            ActionPlan::Abort => "abort without changes",
        }
    }
}

impl fmt::Display for ActionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionPlan::UpdateSecretOnly => "update-secret",
            ActionPlan::EnableIntegration => "enable-integration",
            ActionPlan::DeployStandalone => "deploy-standalone",
            ActionPlan::UpdateStandalone => "update-standalone",
            ActionPlan::DisableIntegration => "disable-integration",
            ActionPlan::SwitchToStandalone => "switch-to-standalone",
            ActionPlan::ReviewOnly => "review-only",
            ActionPlan::Abort => "abort",
        };
        write!(f, "{name}")
    }
}

/// The permissible plans for one classified state: a documented default
/// plus the alternates an operator may pick instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    pub state: IntegrationState,
    pub default: ActionPlan,
    pub alternates: Vec<ActionPlan>,
}

impl Menu {
    pub fn permits(&self, plan: ActionPlan) -> bool {
        plan == ActionPlan::Abort || plan == self.default || self.alternates.contains(&plan)
    }

    /// Default first, then the alternates in documented order.
    pub fn choices(&self) -> Vec<ActionPlan> {
        let mut all = vec![self.default];
        all.extend(self.alternates.iter().copied());
        all
    }
}

/// The menu for a classified state.
///
/// A first-time setup borrows the disabled-integration menu when the
/// stack exposes the integration toggle and the legacy menu when it
/// does not.
pub fn menu_for(state: IntegrationState, parameter: IntegrationParameter) -> Menu {
    match state {
        IntegrationState::IntegratedRunning => Menu {
            state,
            default: ActionPlan::UpdateSecretOnly,
            alternates: vec![
                ActionPlan::ReviewOnly,
                ActionPlan::DisableIntegration,
                ActionPlan::SwitchToStandalone,
            ],
        },
        IntegrationState::IntegratedDisabled => Menu {
            state,
            default: ActionPlan::EnableIntegration,
            alternates: vec![ActionPlan::DeployStandalone],
        },
        IntegrationState::Legacy => Menu {
            state,
            default: ActionPlan::DeployStandalone,
            alternates: vec![],
        },
        IntegrationState::StandaloneExisting => Menu {
            state,
            default: ActionPlan::UpdateStandalone,
            alternates: vec![ActionPlan::UpdateSecretOnly, ActionPlan::ReviewOnly],
        },
        IntegrationState::FirstTime => {
            let borrowed = if parameter.is_supported() {
                menu_for(IntegrationState::IntegratedDisabled, parameter)
            } else {
                menu_for(IntegrationState::Legacy, parameter)
            };
            Menu { state, ..borrowed }
        }
    }
}

/// Wizard states. `Decided` and `Aborted` are terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum WizardState {
    Choosing { menu: Menu },
    AwaitingConfirmation { plan: ActionPlan },
    Decided { plan: ActionPlan },
    Aborted { reason: String },
}

/// Synthetic or operator-supplied inputs the machine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardEvent {
    SelectDefault,
    Select(ActionPlan),
    Confirm,
    Decline,
}

/// One transition. Invalid selections and out-of-place events are
/// errors, not silent no-ops.
pub fn step(state: WizardState, event: WizardEvent) -> Result<WizardState, SetupError> {
    match (state, event) {
        (WizardState::Choosing { menu }, WizardEvent::SelectDefault) => Ok(WizardState::Decided {
            plan: menu.default,
        }),
        (WizardState::Choosing { .. }, WizardEvent::Select(ActionPlan::Abort)) => {
            Ok(WizardState::Aborted {
                reason: "operator chose to abort".to_string(),
            })
        }
        (WizardState::Choosing { menu }, WizardEvent::Select(plan)) => {
            if !menu.permits(plan) {
                return Err(SetupError::invalid_field(
                    "action",
                    format!("'{plan}' is not available while {}", menu.state),
                ));
            }
            if plan.is_destructive() {
                Ok(WizardState::AwaitingConfirmation { plan })
            } else {
                Ok(WizardState::Decided { plan })
            }
        }
        (WizardState::AwaitingConfirmation { plan }, WizardEvent::Confirm) => {
            Ok(WizardState::Decided { plan })
        }
        (WizardState::AwaitingConfirmation { plan }, WizardEvent::Decline) => {
            Ok(WizardState::Aborted {
                reason: format!("destructive plan '{plan}' was not confirmed"),
            })
        }
        (state, event) => Err(SetupError::invalid_field(
            "action",
            format!("event {event:?} is not valid in state {state:?}"),
        )),
    }
}

/// Where selections come from: command-line flags or an interactive
/// terminal. The engine itself never touches a prompt.
pub trait ChoiceSource {
    /// Pick a plan from the menu.
    fn choose(&mut self, menu: &Menu) -> Result<WizardEvent, SetupError>;

    /// Confirm or decline a destructive plan. Must never confirm
    /// implicitly.
    fn confirm_destructive(&mut self, plan: ActionPlan) -> Result<WizardEvent, SetupError>;

    /// Yes/no question outside the plan menu (e.g. resuming an
    /// unfinished operation).
    fn confirm(&mut self, prompt: &str) -> Result<bool, SetupError>;
}

/// Drive the machine from `Choosing` to a decision.
pub fn run_wizard(menu: Menu, choices: &mut dyn ChoiceSource) -> Result<ActionPlan, SetupError> {
    let mut state = WizardState::Choosing { menu };
    loop {
        let event = match &state {
            WizardState::Choosing { menu } => choices.choose(menu)?,
            WizardState::AwaitingConfirmation { plan } => choices.confirm_destructive(*plan)?,
            WizardState::Decided { plan } => return Ok(*plan),
            WizardState::Aborted { reason } => {
                return Err(SetupError::user_abort(reason.clone()))
            }
        };
        state = step(state, event)?;
    }
}

/// Flag-driven selections for non-interactive runs.
///
/// `--yes` accepts the documented default; a requested plan is selected
/// as if typed. Destructive confirmation only ever comes from the
/// dedicated flag, so accept-defaults mode cannot slip past it.
#[derive(Debug, Clone, Default)]
pub struct AutoChoices {
    pub requested: Option<ActionPlan>,
    pub accept_defaults: bool,
    pub confirmed_destructive: bool,
}

impl ChoiceSource for AutoChoices {
    fn choose(&mut self, _menu: &Menu) -> Result<WizardEvent, SetupError> {
        match self.requested {
            Some(plan) => Ok(WizardEvent::Select(plan)),
            None if self.accept_defaults => Ok(WizardEvent::SelectDefault),
            None => Err(SetupError::invalid_field(
                "action",
                "not running on a terminal; pass --action, or --yes to accept the default",
            )),
        }
    }

    fn confirm_destructive(&mut self, plan: ActionPlan) -> Result<WizardEvent, SetupError> {
        if self.confirmed_destructive {
            Ok(WizardEvent::Confirm)
        } else {
            Err(SetupError::user_abort(format!(
                "plan '{plan}' is destructive and was not confirmed; \
                 re-run with --confirm-destructive to proceed"
            )))
        }
    }

    fn confirm(&mut self, _prompt: &str) -> Result<bool, SetupError> {
        Ok(self.accept_defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IntegrationParameter as Param;
    use IntegrationState as State;

    #[test]
    fn menus_match_the_documented_golden_paths() {
        let running = menu_for(State::IntegratedRunning, Param::Enabled);
        assert_eq!(running.default, ActionPlan::UpdateSecretOnly);
        assert!(running.permits(ActionPlan::SwitchToStandalone));

        let disabled = menu_for(State::IntegratedDisabled, Param::Disabled);
        assert_eq!(disabled.default, ActionPlan::EnableIntegration);
        assert_eq!(disabled.alternates, vec![ActionPlan::DeployStandalone]);

        let legacy = menu_for(State::Legacy, Param::Absent);
        assert_eq!(legacy.default, ActionPlan::DeployStandalone);
        assert!(legacy.alternates.is_empty());

        let standalone = menu_for(State::StandaloneExisting, Param::Absent);
        assert_eq!(standalone.default, ActionPlan::UpdateStandalone);
        assert!(standalone.permits(ActionPlan::UpdateSecretOnly));
        assert!(!standalone.permits(ActionPlan::SwitchToStandalone));
    }

    #[test]
    fn first_time_borrows_a_menu_by_stack_support() {
        let supported = menu_for(State::FirstTime, Param::Enabled);
        assert_eq!(supported.default, ActionPlan::EnableIntegration);
        assert_eq!(supported.state, State::FirstTime);

        let unsupported = menu_for(State::FirstTime, Param::Absent);
        assert_eq!(unsupported.default, ActionPlan::DeployStandalone);
    }

    #[test]
    fn default_selection_decides_immediately() {
        let menu = menu_for(State::IntegratedRunning, Param::Enabled);
        let next = step(WizardState::Choosing { menu }, WizardEvent::SelectDefault).unwrap();
        assert_eq!(
            next,
            WizardState::Decided {
                plan: ActionPlan::UpdateSecretOnly
            }
        );
    }

    #[test]
    fn destructive_selection_requires_confirmation() {
        let menu = menu_for(State::IntegratedRunning, Param::Enabled);
        let next = step(
            WizardState::Choosing { menu },
            WizardEvent::Select(ActionPlan::DisableIntegration),
        )
        .unwrap();
        assert_eq!(
            next,
            WizardState::AwaitingConfirmation {
                plan: ActionPlan::DisableIntegration
            }
        );

        let confirmed = step(next.clone(), WizardEvent::Confirm).unwrap();
        assert_eq!(
            confirmed,
            WizardState::Decided {
                plan: ActionPlan::DisableIntegration
            }
        );

        let declined = step(next, WizardEvent::Decline).unwrap();
        assert!(matches!(declined, WizardState::Aborted { .. }));
    }

    #[test]
    fn off_menu_selections_are_rejected() {
        let menu = menu_for(State::Legacy, Param::Absent);
        let err = step(
            WizardState::Choosing { menu },
            WizardEvent::Select(ActionPlan::EnableIntegration),
        )
        .unwrap_err();
        assert!(matches!(err, SetupError::Validation { .. }));
    }

    #[test]
    fn accept_defaults_never_confirms_a_destructive_plan() {
        // Even with --yes, an explicitly requested destructive plan
        // stops at confirmation unless the dedicated flag is present.
        let menu = menu_for(State::IntegratedRunning, Param::Enabled);
        let mut choices = AutoChoices {
            requested: Some(ActionPlan::DisableIntegration),
            accept_defaults: true,
            confirmed_destructive: false,
        };
        let err = run_wizard(menu, &mut choices).unwrap_err();
        assert!(matches!(err, SetupError::UserAbort { .. }));
        assert_eq!(err.exit_code(), 130);
    }

    #[test]
    fn confirmed_destructive_flag_reaches_a_decision() {
        let menu = menu_for(State::IntegratedRunning, Param::Enabled);
        let mut choices = AutoChoices {
            requested: Some(ActionPlan::SwitchToStandalone),
            accept_defaults: false,
            confirmed_destructive: true,
        };
        assert_eq!(
            run_wizard(menu, &mut choices).unwrap(),
            ActionPlan::SwitchToStandalone
        );
    }

    #[test]
    fn defaults_are_never_destructive() {
        for (state, param) in [
            (State::IntegratedRunning, Param::Enabled),
            (State::IntegratedDisabled, Param::Disabled),
            (State::Legacy, Param::Absent),
            (State::StandaloneExisting, Param::Absent),
            (State::FirstTime, Param::Enabled),
            (State::FirstTime, Param::Absent),
        ] {
            assert!(!menu_for(state, param).default.is_destructive());
        }
    }

    #[test]
    fn abort_is_always_available() {
        let menu = menu_for(State::Legacy, Param::Absent);
        let next = step(
            WizardState::Choosing { menu },
            WizardEvent::Select(ActionPlan::Abort),
        )
        .unwrap();
        assert!(matches!(next, WizardState::Aborted { .. }));
    }
}
