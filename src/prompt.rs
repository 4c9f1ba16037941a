//! Interactive prompts: yes/no confirmation, plain and hidden line input.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, bail};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;

/// Ask `question` on stderr and read a yes/no answer from stdin.
///
/// Only `y` / `yes` (any case) count as yes; end of input is no.
///
/// # Errors
/// Returns an error if the terminal cannot be read or written.
pub fn confirm(question: &str) -> Result<bool> {
    confirm_from(&mut io::stdin().lock(), &mut io::stderr(), question)
}

/// [`confirm`] over arbitrary streams.
///
/// # Errors
/// Returns an error if `input` or `output` fail.
pub fn confirm_from(input: &mut impl BufRead, output: &mut impl Write, question: &str) -> Result<bool> {
    write!(output, "{question} [y/N] ")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer).context("Failed to read answer")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Read one non-empty line after `label`.
///
/// # Errors
/// Returns an error on end of input or if the terminal fails.
pub fn line(label: &str) -> Result<String> {
    line_from(&mut io::stdin().lock(), &mut io::stderr(), label)
}

fn line_from(input: &mut impl BufRead, output: &mut impl Write, label: &str) -> Result<String> {
    write!(output, "{label}: ")?;
    output.flush()?;
    let mut value = String::new();
    if input.read_line(&mut value).context("Failed to read input")? == 0 {
        bail!("No input for {label}");
    }
    let value = value.trim().to_owned();
    if value.is_empty() {
        bail!("{label} must not be empty");
    }
    Ok(value)
}

/// Read a line after `label` without echoing it.
///
/// # Errors
/// Returns an error if raw mode cannot be enabled, on Ctrl-C / Esc, or if
/// the value is empty.
pub fn secret(label: &str) -> Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{label}: ")?;
    stderr.flush()?;

    terminal::enable_raw_mode().context("Failed to enable raw mode")?;
    let result = read_hidden();
    // Always restore terminal state
    terminal::disable_raw_mode().ok();
    writeln!(stderr)?;

    let value = result?;
    if value.is_empty() {
        bail!("{label} must not be empty");
    }
    Ok(value)
}

fn read_hidden() -> Result<String> {
    let mut value = String::new();
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind == KeyEventKind::Release {
            continue;
        }
        match key.code {
            KeyCode::Enter => return Ok(value),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => bail!("Interrupted"),
            KeyCode::Esc => bail!("Cancelled"),
            KeyCode::Backspace => {
                value.pop();
            }
            KeyCode::Char(c) => value.push(c),
            _ => {}
        }
    }
}
