//! Destination and job uri handling.

use crate::error::{ProtoError, Result};
use crate::ids::JobId;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestKind {
    Printer,
    Class,
}

impl DestKind {
    pub fn path_segment(self) -> &'static str {
        match self {
            DestKind::Printer => "printers",
            DestKind::Class => "classes",
        }
    }
}

/// A destination reference parsed from a `printer-uri`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestRef {
    pub name: String,
    pub kind: DestKind,
}

const DEST_SCHEMES: &[&str] = &["ipp", "ipps", "http", "https"];

fn bad(uri: &str, reason: &str) -> ProtoError {
    ProtoError::BadDestUri {
        uri: uri.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse `ipp[s]://host[:port]/(printers|classes)/NAME`.
pub fn parse_dest_uri(uri: &str) -> Result<DestRef> {
    let parsed = Url::parse(uri).map_err(|e| bad(uri, &e.to_string()))?;
    if !DEST_SCHEMES.contains(&parsed.scheme()) {
        return Err(bad(uri, "unsupported scheme"));
    }
    let mut segments = parsed
        .path_segments()
        .ok_or_else(|| bad(uri, "missing resource path"))?
        .filter(|s| !s.is_empty());
    let kind = match segments.next() {
        Some("printers") => DestKind::Printer,
        Some("classes") => DestKind::Class,
        _ => return Err(bad(uri, "resource is not /printers or /classes")),
    };
    let name = segments
        .next()
        .ok_or_else(|| bad(uri, "missing destination name"))?;
    if segments.next().is_some() {
        return Err(bad(uri, "trailing path segments"));
    }
    let name = percent_decode(name);
    validate_dest_name(&name)?;
    Ok(DestRef { name, kind })
}

/// Parse `.../jobs/NNN` from a `job-uri`.
pub fn parse_job_uri(uri: &str) -> Result<JobId> {
    let parsed = Url::parse(uri).map_err(|e| bad(uri, &e.to_string()))?;
    let mut segments = parsed
        .path_segments()
        .ok_or_else(|| bad(uri, "missing resource path"))?
        .filter(|s| !s.is_empty());
    match segments.next() {
        Some("jobs") => {}
        _ => return Err(bad(uri, "resource is not /jobs")),
    }
    let id: i32 = segments
        .next()
        .and_then(|s| s.parse().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| bad(uri, "missing or invalid job id"))?;
    Ok(JobId::new(id))
}

/// Destination names are 1..=127 octets of printable text without spaces,
/// `/`, or `#`.
pub fn validate_dest_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 127 {
        return Err(ProtoError::BadDestName(name.to_string()));
    }
    for c in name.chars() {
        if c <= ' ' || c == 0x7f as char || c == '/' || c == '#' {
            return Err(ProtoError::BadDestName(name.to_string()));
        }
    }
    Ok(())
}

fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_printer_uri() {
        let dest = parse_dest_uri("ipp://host:631/printers/press").unwrap();
        assert_eq!(dest.name, "press");
        assert_eq!(dest.kind, DestKind::Printer);
    }

    #[test]
    fn parse_class_uri() {
        let dest = parse_dest_uri("ipps://host/classes/floor-2").unwrap();
        assert_eq!(dest.kind, DestKind::Class);
    }

    #[test]
    fn reject_other_resources() {
        assert!(parse_dest_uri("ipp://host/jobs/3").is_err());
        assert!(parse_dest_uri("ftp://host/printers/p").is_err());
        assert!(parse_dest_uri("ipp://host/printers/a/b").is_err());
    }

    #[test]
    fn parse_job() {
        assert_eq!(
            parse_job_uri("ipp://host/jobs/17").unwrap(),
            JobId::new(17)
        );
        assert!(parse_job_uri("ipp://host/jobs/zero").is_err());
        assert!(parse_job_uri("ipp://host/jobs/-4").is_err());
    }

    #[test]
    fn name_validation() {
        assert!(validate_dest_name("press-1").is_ok());
        assert!(validate_dest_name("").is_err());
        assert!(validate_dest_name("a/b").is_err());
        assert!(validate_dest_name("a#b").is_err());
        assert!(validate_dest_name("has space").is_err());
        assert!(validate_dest_name(&"x".repeat(128)).is_err());
    }

    #[test]
    fn percent_encoded_names_decode() {
        let dest = parse_dest_uri("ipp://host/printers/caf%C3%A9").unwrap();
        assert_eq!(dest.name, "café");
    }
}
