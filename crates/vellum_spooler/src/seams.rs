//! Interfaces to the collaborators the scheduler consumes but does not own:
//! the MIME type database, the PPD catalog, device enumeration, and job
//! execution. Each ships a small default good enough for tests and for a
//! spooler running without filters.

use crate::job::Job;
use crate::registry::Destination;
use std::collections::BTreeSet;

/// File typing.
pub trait TypeDatabase: Send + Sync {
    /// Is `super/sub` a known media type?
    fn type_exists(&self, mime: &str) -> bool;

    /// Type a document from its magic bytes and, optionally, its name.
    fn auto_type(&self, data: &[u8], name: Option<&str>) -> Option<String>;
}

/// Built-in typing: magic numbers for the common print formats, extension
/// fallback, `text/plain` for anything that looks like text.
#[derive(Debug, Default)]
pub struct BuiltinTypes;

impl TypeDatabase for BuiltinTypes {
    fn type_exists(&self, mime: &str) -> bool {
        matches!(
            mime,
            "application/pdf"
                | "application/postscript"
                | "application/octet-stream"
                | "image/jpeg"
                | "image/png"
                | "image/pwg-raster"
                | "image/urf"
                | "text/plain"
        ) || mime.ends_with("/*")
    }

    fn auto_type(&self, data: &[u8], name: Option<&str>) -> Option<String> {
        if data.starts_with(b"%PDF") {
            return Some("application/pdf".to_string());
        }
        if data.starts_with(b"%!") {
            return Some("application/postscript".to_string());
        }
        if data.starts_with(&[0xff, 0xd8, 0xff]) {
            return Some("image/jpeg".to_string());
        }
        if data.starts_with(&[0x89, b'P', b'N', b'G']) {
            return Some("image/png".to_string());
        }
        if let Some(name) = name {
            let lower = name.to_lowercase();
            for (ext, mime) in [
                (".pdf", "application/pdf"),
                (".ps", "application/postscript"),
                (".jpg", "image/jpeg"),
                (".jpeg", "image/jpeg"),
                (".png", "image/png"),
                (".txt", "text/plain"),
            ] {
                if lower.ends_with(ext) {
                    return Some(mime.to_string());
                }
            }
        }
        if !data.is_empty() && data.iter().take(512).all(|b| *b == b'\n' || *b == b'\r' || *b == b'\t' || (0x20..0x7f).contains(b))
        {
            return Some("text/plain".to_string());
        }
        None
    }
}

/// One option inside an opened PPD.
#[derive(Debug, Clone)]
pub struct PpdOption {
    pub keyword: String,
    pub default_choice: String,
    pub choices: Vec<String>,
}

/// An opened PPD handle.
pub trait PpdHandle: Send {
    fn find_option(&self, keyword: &str) -> Option<PpdOption>;
    fn find_default(&self, keyword: &str) -> Option<String>;
    /// Page size name -> (width, length) in hundredths of millimeters.
    fn page_size(&self, name: &str) -> Option<(i32, i32)>;
}

/// The PPD catalog: open by pathname, close by drop.
pub trait PpdCatalog: Send + Sync {
    fn open(&self, path: &str) -> Option<Box<dyn PpdHandle>>;
}

/// Catalog with nothing installed.
#[derive(Debug, Default)]
pub struct EmptyPpdCatalog;

impl PpdCatalog for EmptyPpdCatalog {
    fn open(&self, _path: &str) -> Option<Box<dyn PpdHandle>> {
        None
    }
}

/// A discovered device, as reported by the enumeration helper.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub device_class: String,
    pub uri: String,
    pub info: String,
    pub make_model: String,
}

/// Device and driver enumeration, normally backed by child helpers.
pub trait DeviceEnumerator: Send + Sync {
    fn devices(&self) -> Vec<DiscoveredDevice>;
    /// Backend uri schemes with an installed executable.
    fn backend_schemes(&self) -> BTreeSet<String>;
}

#[derive(Debug, Default)]
pub struct NoDevices;

impl DeviceEnumerator for NoDevices {
    fn devices(&self) -> Vec<DiscoveredDevice> {
        Vec::new()
    }

    fn backend_schemes(&self) -> BTreeSet<String> {
        ["ipp", "ipps", "socket", "lpd", "usb"]
            .into_iter()
            .map(String::from)
            .collect()
    }
}

/// Outcome of handing a job to the print engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Finished; the page count goes to the quota ledger.
    Completed { impressions: i32 },
    /// Recoverable failure; the job re-enters `stopped` with this reason.
    Stopped { reason: String },
    /// Unrecoverable; the job aborts.
    Aborted { reason: String },
    /// Still running; a later report will finish it.
    Deferred,
}

/// The print engine seam. The scheduler never blocks on it while holding
/// locks; it is invoked with snapshots.
pub trait JobExec: Send + Sync {
    fn execute(&self, job: &Job, dest: &Destination) -> JobOutcome;
}

/// Engine that completes everything immediately, one impression per
/// document. Useful without filters installed and in tests.
#[derive(Debug, Default)]
pub struct ImmediateExec;

impl JobExec for ImmediateExec {
    fn execute(&self, job: &Job, _dest: &Destination) -> JobOutcome {
        JobOutcome::Completed {
            impressions: job.num_files().max(1) as i32,
        }
    }
}

/// Engine that leaves jobs printing until told otherwise.
#[derive(Debug, Default)]
pub struct ManualExec;

impl JobExec for ManualExec {
    fn execute(&self, _job: &Job, _dest: &Destination) -> JobOutcome {
        JobOutcome::Deferred
    }
}
