//! Operator prompts.

use anyhow::Result;
use dialoguer::{Confirm, Error as DialoguerError, Input, Password, theme::ColorfulTheme};
use escprov::Credentials;
use std::io::IsTerminal;

use crate::CliError;

/// What the operator wants done with the connected unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnitAction {
    /// Flash, then sign.
    Flash,
    /// Reboot the unit and sign it with the firmware it already has.
    SkipFlash,
}

/// Interpret the answer to the per-unit prompt; `None` means quit.
pub(crate) fn parse_unit_answer(answer: &str) -> Option<UnitAction> {
    let answer = answer
        .trim()
        .to_lowercase();
    match answer.as_str() {
        "q" | "quit" | "exit" => None,
        _ if answer.contains('f') => Some(UnitAction::SkipFlash),
        _ => Some(UnitAction::Flash),
    }
}

/// Ask the operator to connect the next unit.
pub(crate) fn next_unit(count: usize) -> Result<Option<UnitAction>> {
    ensure_interactive_terminal()?;
    eprintln!();
    eprintln!("Unit #{count}:");
    eprintln!("  1. Connect the debug probe to the debug connector.");
    eprintln!("  2. Connect CAN to the first CAN connector; terminate the other one.");
    eprintln!("  3. Power the unit. Make sure the motor leads are NOT CONNECTED.");
    let answer: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Press ENTER to flash and sign (F skips flashing, Q quits)")
        .allow_empty(true)
        .interact_text()
        .map_err(map_prompt_error)?;
    Ok(parse_unit_answer(&answer))
}

/// Yes/no question.
pub(crate) fn confirm(prompt: &str, default: bool) -> Result<bool> {
    ensure_interactive_terminal()?;
    Ok(Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(default)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false))
}

/// Complete licensing credentials, prompting for whatever is missing.
pub(crate) fn credentials(
    user: Option<String>,
    password: Option<String>,
    non_interactive: bool,
) -> Result<Credentials> {
    if non_interactive && (user.is_none() || password.is_none()) {
        return Err(CliError::Usage(
            "licensing credentials are required: set ESCPROV_LICENSING_USER and \
             ESCPROV_LICENSING_PASSWORD, or use --offline"
                .to_string(),
        )
        .into());
    }

    let user = match user {
        Some(user) => user,
        None => {
            ensure_interactive_terminal()?;
            Input::with_theme(&ColorfulTheme::default())
                .with_prompt("Licensing user")
                .interact_text()
                .map_err(map_prompt_error)?
        },
    };
    let password = match password {
        Some(password) => password,
        None => {
            ensure_interactive_terminal()?;
            Password::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("Password for {user}"))
                .interact()
                .map_err(map_prompt_error)?
        },
    };
    Ok(Credentials { user, password })
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(
            "interactive prompts require a terminal; use --non-interactive".to_string(),
        )
        .into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("cancelled by the operator".to_string()).into()
            } else {
                CliError::Usage(format!("prompt failed: {io_err}")).into()
            }
        },
    }
}
