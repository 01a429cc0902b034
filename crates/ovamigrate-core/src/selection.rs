//! Operator selection of VMs and of the import step.

use std::io::{BufRead, Write};

use crate::config::MigrationConfig;
use crate::discovery::discover;
use crate::error::{Error, Result};

/// How the VMs to migrate are chosen. Resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionMode {
    /// Names given up front (e.g. `--vms a,b`); no prompt.
    Named(Vec<String>),
    /// Show the numbered candidate menu and read one line.
    Interactive,
}

impl SelectionMode {
    /// Build from an optional comma-separated list of names.
    pub fn from_list(list: Option<&str>) -> Self {
        match list {
            Some(list) if !list.trim().is_empty() => Self::Named(
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => Self::Interactive,
        }
    }
}

/// Whether, and how, the REST import runs after a VM is staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Never import (always the case in dry-run mode).
    Skip,
    /// Ask the operator for each VM.
    Prompt,
    /// Import without asking.
    Auto,
}

impl ImportMode {
    pub fn resolve(dry_run: bool, auto_import: bool) -> Self {
        match (dry_run, auto_import) {
            (true, _) => Self::Skip,
            (false, true) => Self::Auto,
            (false, false) => Self::Prompt,
        }
    }
}

/// Parse a menu answer: `all`, or comma-separated 1-based indices.
///
/// # Errors
///
/// Returns [`Error::Selection`] for any token that is not an index into
/// `candidates`.
pub fn parse_selection(line: &str, candidates: &[String]) -> Result<Vec<String>> {
    let line = line.trim();
    if line.eq_ignore_ascii_case("all") {
        return Ok(candidates.to_vec());
    }
    if line.is_empty() {
        return Ok(Vec::new());
    }

    line.split(',')
        .map(|token| {
            let token = token.trim();
            token
                .parse::<usize>()
                .ok()
                .filter(|i| (1..=candidates.len()).contains(i))
                .map(|i| candidates[i - 1].clone())
                .ok_or_else(|| Error::selection(format!("invalid selection {:?}", token)))
        })
        .collect()
}

/// Print the candidate menu to `output` and parse one line from `input`.
pub fn prompt_selection<R, W>(candidates: &[String], input: &mut R, output: &mut W) -> Result<Vec<String>>
where
    R: BufRead,
    W: Write,
{
    writeln!(output, "Select VM(s) to update:")?;
    for (i, vm) in candidates.iter().enumerate() {
        writeln!(output, "  {:2}) {}", i + 1, vm)?;
    }
    write!(output, "Enter number(s) separated by comma (or 'all'): ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    parse_selection(&line, candidates)
}

/// Discover candidates, then resolve `mode` into the VMs to migrate.
///
/// Discovery always runs, so an empty export root is fatal even when names
/// were given up front. An empty result means there is nothing to do.
///
/// # Errors
///
/// Returns [`Error::Discovery`] when no candidate exists and
/// [`Error::Selection`] for a malformed menu answer.
pub fn select_vms<R, W>(
    config: &MigrationConfig,
    mode: SelectionMode,
    input: &mut R,
    output: &mut W,
) -> Result<Vec<String>>
where
    R: BufRead,
    W: Write,
{
    let candidates = discover(config)?;
    match mode {
        SelectionMode::Named(names) => Ok(names),
        SelectionMode::Interactive => prompt_selection(&candidates, input, output),
    }
}

/// Ask a yes/no question; only an answer starting with `y` counts as yes.
pub fn confirm<R, W>(question: &str, input: &mut R, output: &mut W) -> Result<bool>
where
    R: BufRead,
    W: Write,
{
    write!(output, "{} (y/N): ", question)?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_ascii_lowercase().starts_with('y'))
}
