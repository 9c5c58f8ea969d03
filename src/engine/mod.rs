//! Decision and execution engine: wizard state machine, plan
//! expansion, operation polling, and resumability markers.

pub mod executor;
pub mod machine;
pub mod marker;

pub use executor::{
    poll_until_terminal, steps_for, Executor, PollOutcome, PollSettings, INTEGRATION_PARAMETER,
};
pub use machine::{
    menu_for, run_wizard, step, ActionPlan, AutoChoices, ChoiceSource, Menu, WizardEvent,
    WizardState,
};
pub use marker::{PendingStep, ResumabilityMarker};
