//! User interaction operations (confirmation and reboot prompts).

use anyhow::Result;

use super::RealRuntime;

use std::io::{self, BufRead, Write};

/// How the user wants to restart after a relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootChoice {
    /// Restart the UI and runtime services only.
    Soft,
    /// Full device reboot.
    Full,
    /// Leave the device running.
    Skip,
}

/// Free-standing so tests can drive it with in-memory readers and writers.
pub(crate) fn confirm_with_io<R: BufRead, W: Write>(
    prompt: &str,
    input: &mut R,
    output: &mut W,
) -> Result<bool> {
    write!(output, "{} [y/N] ", prompt)?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    let response = line.trim().to_lowercase();
    Ok(response == "y" || response == "yes")
}

pub(crate) fn choose_reboot_with_io<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
) -> Result<RebootChoice> {
    write!(
        output,
        "Reboot now for the changes to take effect? [s]oft / [f]ull / [N]o "
    )?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    let choice = match line.trim().to_lowercase().as_str() {
        "s" | "soft" => RebootChoice::Soft,
        "f" | "full" | "r" | "reboot" => RebootChoice::Full,
        _ => RebootChoice::Skip,
    };
    Ok(choice)
}

impl RealRuntime {
    pub(crate) fn confirm_impl(&self, prompt: &str) -> Result<bool> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        confirm_with_io(prompt, &mut stdin.lock(), &mut stdout)
    }

    pub(crate) fn choose_reboot_impl(&self) -> Result<RebootChoice> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        choose_reboot_with_io(&mut stdin.lock(), &mut stdout)
    }
}
