//! Destination descriptor reading.
//!
//! The destination hypervisor describes each VM with a libvirt-style domain
//! XML. Network-backed disks carry their image UUID as the last path segment
//! of `<source name="...">`; those UUIDs name the files the migrated disks
//! are written to.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};

/// Read a destination descriptor and return the identifiers of its
/// network-backed disks in document order.
///
/// NUL bytes in the file are ignored.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the file cannot be opened or is not
/// well-formed XML.
pub fn read_disk_ids(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|e| Error::parse(path, e.to_string()))?;
    let ids = parse_disk_ids(BufReader::new(NulStripper::new(file)))
        .map_err(|message| Error::parse(path, message))?;

    tracing::debug!(path = %path.display(), count = ids.len(), "read destination disk ids");
    Ok(ids)
}

/// Collect the trailing `source/@name` segment of every `<disk
/// type="network" device="disk">` element.
pub fn parse_disk_ids<R: BufRead>(input: R) -> std::result::Result<Vec<String>, String> {
    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();
    let mut ids = Vec::new();
    let mut in_disk = false;
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                depth += 1;
                match e.local_name().as_ref() {
                    b"disk" => in_disk = is_network_disk(e)?,
                    b"source" if in_disk => ids.extend(source_id(e)?),
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                // <disk .../> opens and closes immediately.
                b"disk" => in_disk = false,
                b"source" if in_disk => ids.extend(source_id(e)?),
                _ => {}
            },
            Ok(Event::End(ref e)) => {
                depth = depth.saturating_sub(1);
                if e.local_name().as_ref() == b"disk" {
                    in_disk = false;
                }
            }
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

    Ok(ids)
}

/// The value of attribute `name`, matched by local name. The last match wins
/// when prefixed and unprefixed forms both appear.
fn attribute(e: &BytesStart<'_>, name: &[u8]) -> std::result::Result<Option<String>, String> {
    let mut found = None;
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.local_name().as_ref() == name {
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            found = Some(value.into_owned());
        }
    }
    Ok(found)
}

fn is_network_disk(e: &BytesStart<'_>) -> std::result::Result<bool, String> {
    Ok(attribute(e, b"type")?.as_deref() == Some("network")
        && attribute(e, b"device")?.as_deref() == Some("disk"))
}

fn source_id(e: &BytesStart<'_>) -> std::result::Result<Option<String>, String> {
    Ok(attribute(e, b"name")?.map(|name| match name.rsplit_once('/') {
        Some((_, last)) => last.to_string(),
        None => name,
    }))
}

/// A reader adapter that drops every `0x00` byte of the inner stream.
pub struct NulStripper<R> {
    inner: R,
}

impl<R: Read> NulStripper<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> Read for NulStripper<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        // A chunk made only of NULs must not surface as Ok(0), which means EOF.
        loop {
            let n = self.inner.read(buf)?;
            if n == 0 {
                return Ok(0);
            }
            let mut kept = 0;
            for i in 0..n {
                if buf[i] != 0 {
                    buf[kept] = buf[i];
                    kept += 1;
                }
            }
            if kept > 0 {
                return Ok(kept);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nul_stripper_removes_nuls() {
        let data = b"<a>\0\0x\0</a>\0";
        let mut out = String::new();
        NulStripper::new(&data[..]).read_to_string(&mut out).unwrap();
        assert_eq!(out, "<a>x</a>");
    }

    #[test]
    fn test_nul_stripper_all_nul_chunk_is_not_eof() {
        // A chained reader yields the NUL run and the payload as separate reads.
        let data = [0u8; 64];
        let inner = (&data[..]).chain(&b"<a/>"[..]);
        let mut out = String::new();
        NulStripper::new(inner).read_to_string(&mut out).unwrap();
        assert_eq!(out, "<a/>");
    }

    #[test]
    fn test_source_without_slash() {
        let xml = r#"<domain><devices>
            <disk type="network" device="disk"><source name="plain-id"/></disk>
        </devices></domain>"#;
        assert_eq!(parse_disk_ids(xml.as_bytes()).unwrap(), vec!["plain-id"]);
    }

    #[test]
    fn test_source_outside_disk_ignored() {
        let xml = r#"<domain><devices>
            <interface type="network"><source name="net/ignored"/></interface>
            <disk type="network" device="disk"><source name="pool/aaa"/></disk>
        </devices></domain>"#;
        assert_eq!(parse_disk_ids(xml.as_bytes()).unwrap(), vec!["aaa"]);
    }

    #[test]
    fn test_cdrom_and_file_disks_ignored() {
        let xml = r#"<domain><devices>
            <disk type="network" device="cdrom"><source name="pool/iso"/></disk>
            <disk type="file" device="disk"><source name="pool/file"/></disk>
            <disk type="network" device="disk"><source name="pool/bbb"/></disk>
        </devices></domain>"#;
        assert_eq!(parse_disk_ids(xml.as_bytes()).unwrap(), vec!["bbb"]);
    }

    #[test]
    fn test_malformed_is_error() {
        let xml = r#"<domain><devices></domain>"#;
        assert!(parse_disk_ids(xml.as_bytes()).is_err());
    }

    #[test]
    fn test_truncated_document_is_error() {
        let xml = "<domain><devices><disk type='network' device='disk'><source name='p/aaa'/></disk>";
        assert!(parse_disk_ids(xml.as_bytes()).is_err());
    }

    #[test]
    fn test_last_duplicate_attribute_wins() {
        let xml = r#"<domain xmlns:x="urn:x"><disk type="file" x:type="network" device="disk">
            <source name="p/aaa"/>
        </disk></domain>"#;
        assert_eq!(parse_disk_ids(xml.as_bytes()).unwrap(), vec!["aaa"]);
    }
}
