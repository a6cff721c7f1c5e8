//! On-disk spool: control files, document data, credentials, and state
//! snapshots.
//!
//! Layout under the spool root:
//!
//! ```text
//! c00042        control file for job 42 (json)
//! d00042-001    first document of job 42
//! a00042        cached credentials for job 42 (mode 0400)
//! dests.json    destinations snapshot
//! subs.json     subscriptions snapshot
//! job.cache     boot-time job summary
//! ```
//!
//! Control files and snapshots are written to a `.tmp` sibling and renamed
//! into place.

use crate::error::{Result, SchedError};
use crate::job::Job;
use crate::registry::Destination;
use crate::subs::Subscription;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vellum_proto::JobId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestSnapshot {
    pub default_dest: Option<String>,
    pub dests: Vec<Destination>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCacheEntry {
    pub id: JobId,
    pub dest: String,
    pub state: i32,
    pub priority: i32,
}

#[derive(Debug)]
pub struct Spool {
    root: PathBuf,
}

impl Spool {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn control_path(&self, id: JobId) -> PathBuf {
        self.root.join(format!("c{:05}", id.as_i32()))
    }

    pub fn document_path(&self, id: JobId, index: usize) -> PathBuf {
        self.root.join(format!("d{:05}-{:03}", id.as_i32(), index))
    }

    fn credential_path(&self, id: JobId) -> PathBuf {
        self.root.join(format!("a{:05}", id.as_i32()))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| SchedError::Internal(format!("serialize {}: {e}", path.display())))?;
        self.write_atomic(path, &bytes)
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| SchedError::Internal(format!("parse {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_job(&self, job: &Job) -> Result<()> {
        debug!(job = %job.id, "flushing control file");
        self.write_json(&self.control_path(job.id), job)
    }

    /// All jobs with a readable control file, in id order.
    pub fn load_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('c') || name.ends_with(".tmp") {
                continue;
            }
            match self.read_json::<Job>(&entry.path()) {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => warn!(file = %name, error = %e, "skipping unreadable control file"),
            }
        }
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    /// Store one document, returning its size in kilobytes (rounded up).
    pub fn write_document(&self, id: JobId, index: usize, bytes: &[u8]) -> Result<u64> {
        let path = self.document_path(id, index);
        self.write_atomic(&path, bytes)?;
        Ok((bytes.len() as u64 + 1023) / 1024)
    }

    pub fn read_document(&self, id: JobId, index: usize) -> Result<Vec<u8>> {
        fs::read(self.document_path(id, index)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SchedError::NotFound(format!("document {index} of job {id} is gone"))
            } else {
                e.into()
            }
        })
    }

    /// Cached credentials are owner-readable only and padded with a random
    /// run of trailing newlines to blur their length.
    pub fn write_credentials(&self, id: JobId, slots: &[Option<String>]) -> Result<()> {
        let mut body = String::new();
        for slot in slots {
            body.push_str(slot.as_deref().unwrap_or(""));
            body.push('\n');
        }
        let padding = rand::thread_rng().gen_range(1..=31);
        for _ in 0..padding {
            body.push('\n');
        }
        let path = self.credential_path(id);
        self.write_atomic(&path, body.as_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o400))?;
        }
        Ok(())
    }

    /// Drop a job's files. History keeps the control file; purge removes
    /// everything.
    pub fn remove_job(&self, job: &Job, keep_history: bool) -> Result<()> {
        for index in 0..job.num_files() {
            let _ = fs::remove_file(self.document_path(job.id, index + 1));
        }
        let _ = fs::remove_file(self.credential_path(job.id));
        if !keep_history {
            let _ = fs::remove_file(self.control_path(job.id));
        } else {
            self.write_job(job)?;
        }
        Ok(())
    }

    pub fn write_destinations(&self, snapshot: &DestSnapshot) -> Result<()> {
        self.write_json(&self.root.join("dests.json"), snapshot)
    }

    pub fn load_destinations(&self) -> Result<Option<DestSnapshot>> {
        self.read_json(&self.root.join("dests.json"))
    }

    pub fn write_subscriptions(&self, subs: &[Subscription]) -> Result<()> {
        self.write_json(&self.root.join("subs.json"), &subs.to_vec())
    }

    pub fn load_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self
            .read_json::<Vec<Subscription>>(&self.root.join("subs.json"))?
            .unwrap_or_default())
    }

    pub fn write_job_cache(&self, entries: &[JobCacheEntry]) -> Result<()> {
        self.write_json(&self.root.join("job.cache"), &entries.to_vec())
    }
}
