//! Terminal-facing wizard glue
//!
//! Keeps the interactive pieces (menu prompts, confirmations, secret
//! entry) out of the decision engine so the engine stays fully
//! scriptable in tests. Formatting and input parsing are plain
//! functions; only the thin `ChoiceSource` impl touches stdin.

use std::io::{self, IsTerminal, Read, Write};

use crate::engine::{ActionPlan, AutoChoices, ChoiceSource, Menu, WizardEvent};
use crate::error::SetupError;
use crate::profile::ProvenanceMap;
use crate::provider::SecretMaterial;

/// Answers the wizard by prompting on the controlling terminal.
pub struct TerminalChoices {
    pre_confirmed: bool,
}

impl TerminalChoices {
    /// `pre_confirmed` carries `--confirm-destructive`, which stands in
    /// for the interactive destructive prompt.
    pub fn new(pre_confirmed: bool) -> Self {
        Self { pre_confirmed }
    }

    fn read_line() -> Result<String, SetupError> {
        let mut input = String::new();
        let bytes = io::stdin().read_line(&mut input).map_err(|e| {
            SetupError::user_abort(format!("could not read from the terminal: {e}"))
        })?;
        if bytes == 0 {
            return Err(SetupError::user_abort(
                "input closed before a choice was made",
            ));
        }
        Ok(input.trim().to_string())
    }

    fn prompt(text: &str) -> Result<(), SetupError> {
        print!("{text}");
        io::stdout()
            .flush()
            .map_err(|e| SetupError::user_abort(format!("could not write the prompt: {e}")))
    }
}

impl ChoiceSource for TerminalChoices {
    fn choose(&mut self, menu: &Menu) -> Result<WizardEvent, SetupError> {
        let choices = menu.choices();
        print!("{}", format_menu(menu));
        loop {
            Self::prompt(&format!(
                "Enter choice (1-{}, 0 aborts, blank takes the default): ",
                choices.len()
            ))?;
            let input = Self::read_line()?;
            if let Some(event) = parse_choice(&input, &choices) {
                return Ok(event);
            }
            println!(
                "Invalid choice. Enter a number between 0 and {}.",
                choices.len()
            );
        }
    }

    fn confirm_destructive(&mut self, plan: ActionPlan) -> Result<WizardEvent, SetupError> {
        if self.pre_confirmed {
            return Ok(WizardEvent::Confirm);
        }
        let accepted = self.confirm(&format!(
            "'{plan}' will {}. This cannot be undone by this tool. Continue?",
            plan.describe()
        ))?;
        Ok(if accepted {
            WizardEvent::Confirm
        } else {
            WizardEvent::Decline
        })
    }

    fn confirm(&mut self, question: &str) -> Result<bool, SetupError> {
        Self::prompt(&format!("{question} [y/N]: "))?;
        let input = Self::read_line()?.to_lowercase();
        Ok(input == "y" || input == "yes")
    }
}

/// Maps raw menu input to a wizard event. Blank input takes the
/// default, `0` aborts, any listed number picks that plan.
pub fn parse_choice(input: &str, choices: &[ActionPlan]) -> Option<WizardEvent> {
    if input.is_empty() {
        return Some(WizardEvent::SelectDefault);
    }
    if input == "0" {
        return Some(WizardEvent::Select(ActionPlan::Abort));
    }
    input.parse::<usize>().ok().and_then(|n| {
        if n >= 1 && n <= choices.len() {
            Some(WizardEvent::Select(choices[n - 1]))
        } else {
            None
        }
    })
}

/// Renders the numbered plan menu for a classified state.
pub fn format_menu(menu: &Menu) -> String {
    let mut out = String::new();
    out.push_str(&format!("Current state: {}\n", menu.state));
    for (index, plan) in menu.choices().iter().enumerate() {
        let default = if index == 0 { " (default)" } else { "" };
        out.push_str(&format!(
            "  {}. {}{} - {}\n",
            index + 1,
            plan,
            default,
            plan.describe()
        ));
    }
    out.push_str(&format!("  0. abort - {}\n", ActionPlan::Abort.describe()));
    out
}

/// Renders the per-field provenance table shown after a merge.
pub fn format_provenance(provenance: &ProvenanceMap) -> String {
    let width = provenance.keys().map(|k| k.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (field, source) in provenance {
        out.push_str(&format!("  {field:<width$}  <- {source}\n"));
    }
    out
}

/// Picks how wizard choices get answered for this invocation.
///
/// An explicit `--action`, `--yes`, or a secret arriving on stdin all
/// mean the run is flag-driven; prompting only happens when none of
/// those apply and stdin is a real terminal.
pub fn choice_source(
    action: Option<ActionPlan>,
    yes: bool,
    confirm_destructive: bool,
    secret_on_stdin: bool,
) -> Box<dyn ChoiceSource> {
    let interactive =
        action.is_none() && !yes && !secret_on_stdin && io::stdin().is_terminal();
    if interactive {
        Box::new(TerminalChoices::new(confirm_destructive))
    } else {
        Box::new(AutoChoices {
            requested: action,
            accept_defaults: yes,
            confirmed_destructive: confirm_destructive,
        })
    }
}

/// Consumes stdin and returns the piped client secret.
///
/// The whole stream is read so a trailing newline from `echo` or a
/// password manager does not end up inside the secret.
pub fn read_secret_from_stdin() -> Result<SecretMaterial, SetupError> {
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer).map_err(|e| {
        SetupError::invalid_field("client-secret", format!("could not read stdin: {e}"))
    })?;
    let secret = buffer.trim();
    if secret.is_empty() {
        return Err(SetupError::invalid_field(
            "client-secret",
            "stdin was empty; pipe the Benchling client secret in when using --client-secret-stdin",
        ));
    }
    Ok(SecretMaterial::new(secret))
}

/// Resolves the transient client secret for this invocation.
///
/// `--client-secret-stdin` wins; otherwise `BENCHLINK_CLIENT_SECRET`
/// supplies it for non-interactive runs. The material only ever travels
/// to the credential validator and the secret store, never to disk.
pub fn resolve_secret_material(from_stdin: bool) -> Result<Option<SecretMaterial>, SetupError> {
    if from_stdin {
        return read_secret_from_stdin().map(Some);
    }
    Ok(material_from_env(
        std::env::var("BENCHLINK_CLIENT_SECRET").ok(),
    ))
}

fn material_from_env(value: Option<String>) -> Option<SecretMaterial> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(SecretMaterial::new)
}
