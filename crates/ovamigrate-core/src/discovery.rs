//! Candidate discovery.
//!
//! A VM is a migration candidate when its export directory holds an OVF
//! descriptor and its staging directory already holds `<vm>.xml`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::MigrationConfig;
use crate::error::{Error, Result};

/// List candidate VM names in ascending order.
///
/// # Errors
///
/// Returns [`Error::Discovery`] if the export root cannot be read or no
/// candidate is found.
pub fn discover(config: &MigrationConfig) -> Result<Vec<String>> {
    let root = &config.export_root;
    let entries = fs::read_dir(root).map_err(|e| {
        Error::discovery(format!("cannot read export root '{}': {}", root.display(), e))
    })?;

    let mut candidates = Vec::new();
    for entry in entries.flatten() {
        if !entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let Some(vm) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };

        let layout = config.layout(&vm);
        match find_ovf(&layout.source_dir) {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(vm = %vm, "skipping: no OVF descriptor");
                continue;
            }
            Err(e) => {
                tracing::debug!(vm = %vm, error = %e, "skipping: unreadable export directory");
                continue;
            }
        }
        if !layout.descriptor.is_file() {
            tracing::debug!(vm = %vm, descriptor = %layout.descriptor.display(), "skipping: no destination descriptor");
            continue;
        }
        candidates.push(vm);
    }

    if candidates.is_empty() {
        return Err(Error::discovery(format!(
            "no valid VM directories beneath '{}'",
            root.display()
        )));
    }

    candidates.sort();
    Ok(candidates)
}

/// The first `*.ovf` file of `dir` in name order, if any.
pub fn find_ovf(dir: &Path) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(e, dir)),
    };

    let mut found: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "ovf"))
        .collect();
    found.sort();
    Ok(found.into_iter().next())
}
