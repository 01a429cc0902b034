//! OVF descriptor reading.
//!
//! Extracts the `<File>` references of an OVF envelope and orders them by the
//! ordinal encoded in their `id` (`file0`, `file1`, ...).

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use crate::error::{Error, Result};

/// A `<File>` entry of an OVF descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskReference {
    /// The `ovf:id` attribute, e.g. `file1`.
    pub id: String,
    /// The `ovf:href` attribute: a file name relative to the OVF's directory.
    pub href: String,
}

impl DiskReference {
    /// The numeric suffix of `file<digits>` within the id, if present.
    pub fn ordinal(&self) -> Option<u64> {
        static ORDINAL: OnceLock<Regex> = OnceLock::new();
        let re = ORDINAL.get_or_init(|| Regex::new(r"file(\d+)").expect("valid regex"));
        re.captures(&self.id)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

/// Read an OVF descriptor and return its disk file names in ordinal order.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the file cannot be opened or is not
/// well-formed XML.
pub fn read_disk_files(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|e| Error::parse(path, e.to_string()))?;
    let mut refs = parse_disk_references(BufReader::new(file))
        .map_err(|message| Error::parse(path, message))?;
    sort_disk_references(&mut refs);

    tracing::debug!(path = %path.display(), count = refs.len(), "read OVF file references");
    Ok(refs.into_iter().map(|r| r.href).collect())
}

/// Collect every `File` element in document order.
///
/// Errors are returned as messages; callers attach the path.
pub fn parse_disk_references<R: BufRead>(input: R) -> std::result::Result<Vec<DiskReference>, String> {
    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();
    let mut refs = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                depth += 1;
                if e.local_name().as_ref() == b"File" {
                    refs.push(file_reference(e)?);
                }
            }
            Ok(Event::Empty(ref e)) => {
                if e.local_name().as_ref() == b"File" {
                    refs.push(file_reference(e)?);
                }
            }
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) if depth > 0 => {
                return Err(format!(
                    "unexpected end of document: {} element(s) unclosed",
                    depth
                ))
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "error at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(refs)
}

fn file_reference(e: &BytesStart<'_>) -> std::result::Result<DiskReference, String> {
    let mut id = String::new();
    let mut href = String::new();

    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let value = || attr.unescape_value().map(|v| v.into_owned());
        match attr.key.local_name().as_ref() {
            b"id" => id = value().map_err(|e| e.to_string())?,
            b"href" => href = value().map_err(|e| e.to_string())?,
            _ => {}
        }
    }

    Ok(DiskReference { id, href })
}

/// Order two references: numerically when both ids carry an ordinal,
/// lexicographically by id otherwise.
pub fn compare_disk_references(a: &DiskReference, b: &DiskReference) -> Ordering {
    match (a.ordinal(), b.ordinal()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.id.cmp(&b.id),
    }
}

/// Stable sort by [`compare_disk_references`].
///
/// Insertion sort: the mixed numeric/lexicographic rule is not transitive,
/// which `slice::sort_by` requires.
pub fn sort_disk_references(refs: &mut [DiskReference]) {
    for i in 1..refs.len() {
        let mut j = i;
        while j > 0 && compare_disk_references(&refs[j - 1], &refs[j]) == Ordering::Greater {
            refs.swap(j - 1, j);
            j -= 1;
        }
    }
}
