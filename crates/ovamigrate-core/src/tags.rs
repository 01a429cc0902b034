//! Provenance tagging of the destination descriptor.
//!
//! The descriptor is patched as text, not as an XML tree: every existing
//! `<tags>` block is stripped, then one fixed block is inserted in front of
//! the closing `</scale-metadata>` marker. Content outside those two spots is
//! preserved byte for byte, stray NULs included.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use regex::bytes::Regex;
use tempfile::NamedTempFile;

use crate::config::RunMode;
use crate::error::{Error, Result};

/// Closing marker of the root metadata element; the insertion anchor.
pub const METADATA_CLOSE: &str = "</scale-metadata>";

/// Name of the provenance tag.
pub const PROVENANCE_TAG: &str = "imported_by_script";

/// The exact block written in front of [`METADATA_CLOSE`].
pub const TAG_BLOCK: &str =
    "      <tags>\n        <tag name=\"imported_by_script\"/>\n      </tags>\n";

fn tags_pattern() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    // Leading indentation and one trailing line break belong to the block.
    TAGS.get_or_init(|| {
        Regex::new(r"(?s)[ \t]*<tags[^>]*>.*?</tags>[ \t]*(?:\r?\n)?").expect("valid regex")
    })
}

/// Result of patching one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPatch {
    /// The patched document.
    pub document: Vec<u8>,
    /// Number of `<tags>` blocks removed by the strip step.
    pub stripped: usize,
    /// Whether `document` differs from the input.
    pub changed: bool,
}

/// Remove every `<tags>…</tags>` block. Returns the text and the count.
pub fn strip_tag_blocks(document: &[u8]) -> (Vec<u8>, usize) {
    let re = tags_pattern();
    let stripped = re.find_iter(document).count();
    if stripped == 0 {
        return (document.to_vec(), 0);
    }
    (re.replace_all(document, &b""[..]).into_owned(), stripped)
}

/// Insert [`TAG_BLOCK`] in front of the first [`METADATA_CLOSE`] and the
/// indentation that precedes it on its line.
///
/// Returns `None` when the anchor is absent.
pub fn insert_tag_block(document: &[u8]) -> Option<Vec<u8>> {
    let anchor = find(document, METADATA_CLOSE.as_bytes())?;
    let line_start = document[..anchor]
        .iter()
        .rposition(|b| *b != b' ' && *b != b'\t')
        .map_or(0, |i| i + 1);

    let mut out = Vec::with_capacity(document.len() + TAG_BLOCK.len());
    out.extend_from_slice(&document[..line_start]);
    out.extend_from_slice(TAG_BLOCK.as_bytes());
    out.extend_from_slice(&document[line_start..]);
    Some(out)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Strip, then insert.
///
/// `path` only labels the error.
///
/// # Errors
///
/// Returns [`Error::Structure`] if the document has no [`METADATA_CLOSE`].
pub fn rewrite_tags(path: &Path, document: &[u8]) -> Result<TagPatch> {
    let (stripped_doc, stripped) = strip_tag_blocks(document);
    let patched = insert_tag_block(&stripped_doc)
        .ok_or_else(|| Error::structure(path, format!("no {} found", METADATA_CLOSE)))?;

    Ok(TagPatch {
        changed: patched != document,
        document: patched,
        stripped,
    })
}

/// Patch the descriptor at `path` in place.
///
/// The new content is written to a temporary file next to `path` and renamed
/// over it, so the descriptor is either fully replaced or left untouched. In
/// dry-run mode the patch is computed and validated but not written.
pub fn patch_descriptor(path: &Path, mode: RunMode) -> Result<TagPatch> {
    let original = fs::read(path).map_err(|e| Error::io(e, path))?;
    let patch = rewrite_tags(path, &original)?;

    if mode.is_dry_run() {
        tracing::info!(path = %path.display(), stripped = patch.stripped, "[dry-run] would update tags");
        return Ok(patch);
    }

    persist_atomically(path, &patch.document)?;
    tracing::info!(path = %path.display(), stripped = patch.stripped, "updated tags");
    Ok(patch)
}

/// Replace `path` with `contents` via a same-directory temporary file.
pub fn persist_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::patch(path, e))?;
    tmp.write_all(contents).map_err(|e| Error::patch(path, e))?;
    tmp.as_file().sync_all().map_err(|e| Error::patch(path, e))?;

    // Keep the descriptor's permissions rather than the 0600 of a temp file.
    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), metadata.permissions())
            .map_err(|e| Error::patch(path, e))?;
    }

    tmp.persist(path).map_err(|e| Error::patch(path, e.error))?;
    Ok(())
}
