//! Disk materialization: executing a [`CopyPlan`].
//!
//! Each source disk is copied byte for byte to its destination image. A copy
//! that fails partway never leaves a partial image behind.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::config::RunMode;
use crate::error::{Error, Result};
use crate::plan::{CopyPlan, DiskPair};

/// Size of the buffer used for each read/write step.
pub const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Progress information for one disk copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyProgress {
    /// Index of the pair being copied (0-indexed).
    pub pair_index: usize,
    /// Number of pairs in the plan.
    pub pair_count: usize,
    /// Bytes written so far for this pair.
    pub bytes_copied: u64,
    /// Size of the source file.
    pub bytes_total: u64,
}

/// Type alias for the progress callback function.
pub type ProgressCallback = Box<dyn Fn(CopyProgress) + Send>;

/// Result of one executed (or simulated) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedDisk {
    pub pair: DiskPair,
    /// Bytes written, or `None` in dry-run mode.
    pub bytes: Option<u64>,
}

/// Remove existing `*.<extension>` images from `dir`.
///
/// Returns the affected paths in sorted order. A missing directory has
/// nothing to remove. In dry-run mode nothing is deleted.
pub fn remove_stale_images(dir: &Path, extension: &str, mode: RunMode) -> Result<Vec<PathBuf>> {
    let stale = list_images(dir, extension)?;

    for path in &stale {
        if mode.is_dry_run() {
            tracing::info!(path = %path.display(), "[dry-run] delete");
            continue;
        }
        fs::remove_file(path).map_err(|e| Error::io(e, path))?;
        tracing::info!(path = %path.display(), "removed stale image");
    }

    Ok(stale)
}

fn list_images(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(e, dir)),
    };

    let mut images = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(e, dir))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// Execute every pair of `plan` in order.
///
/// Stops at the first failing pair; pairs already copied stay in place.
pub fn materialize(
    plan: &CopyPlan,
    mode: RunMode,
    progress_callback: Option<&ProgressCallback>,
) -> Result<Vec<MaterializedDisk>> {
    let pair_count = plan.len();
    let mut done = Vec::with_capacity(pair_count);

    for (pair_index, pair) in plan.pairs.iter().enumerate() {
        if mode.is_dry_run() {
            tracing::info!(
                source = %pair.source.display(),
                destination = %pair.destination.display(),
                "[dry-run] copy"
            );
            done.push(MaterializedDisk {
                pair: pair.clone(),
                bytes: None,
            });
            continue;
        }

        let report = |bytes_copied: u64, bytes_total: u64| {
            if let Some(callback) = progress_callback {
                callback(CopyProgress {
                    pair_index,
                    pair_count,
                    bytes_copied,
                    bytes_total,
                });
            }
        };

        let bytes = copy_disk(&pair.source, &pair.destination, report)?;
        tracing::info!(
            source = %pair.source.display(),
            destination = %pair.destination.display(),
            bytes,
            "copied disk"
        );
        done.push(MaterializedDisk {
            pair: pair.clone(),
            bytes: Some(bytes),
        });
    }

    Ok(done)
}

/// Copy `source` to `destination`, creating the destination directory.
///
/// `on_progress` receives `(bytes_copied, bytes_total)` after every write.
pub fn copy_disk<F>(source: &Path, destination: &Path, on_progress: F) -> Result<u64>
where
    F: FnMut(u64, u64),
{
    let input = File::open(source).map_err(|e| Error::copy(source, destination, e))?;
    let total = input
        .metadata()
        .map_err(|e| Error::copy(source, destination, e))?
        .len();

    copy_from_reader(input, total, destination, on_progress)
        .map_err(|e| Error::copy(source, destination, e))
}

/// Write everything `input` yields to a new file at `destination`.
///
/// On any error the destination file is removed before returning.
pub fn copy_from_reader<R, F>(
    mut input: R,
    total: u64,
    destination: &Path,
    mut on_progress: F,
) -> io::Result<u64>
where
    R: Read,
    F: FnMut(u64, u64),
{
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut output = File::create(destination)?;
    let result = pump(&mut input, &mut output, total, &mut on_progress);

    if result.is_err() {
        drop(output);
        if let Err(e) = fs::remove_file(destination) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %destination.display(),
                    error = %e,
                    "failed to remove partial image"
                );
            }
        }
    }

    result
}

fn pump<R, F>(input: &mut R, output: &mut File, total: u64, on_progress: &mut F) -> io::Result<u64>
where
    R: Read,
    F: FnMut(u64, u64),
{
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied = 0u64;
    loop {
        let n = match input.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        output.write_all(&buffer[..n])?;
        copied += n as u64;
        on_progress(copied, total.max(copied));
    }
    output.sync_all()?;
    Ok(copied)
}
