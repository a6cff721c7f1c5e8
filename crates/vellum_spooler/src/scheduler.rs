//! The scheduler aggregate: authoritative state plus the orchestration that
//! spans it.
//!
//! One reader-writer lock guards each long-lived aggregate (destinations,
//! jobs, subscriptions); the quota ledger sits behind a mutex. Lock order is
//! registry, then jobs, then subscriptions, then quotas. Nothing here holds a
//! lock across child-process waits: job execution and notifier delivery run
//! on snapshots.

use crate::config::ServerConfig;
use crate::error::{Result, SchedError};
use crate::job::{state_keyword, Job};
use crate::jobstore::JobStore;
use crate::notify::NotifierRunner;
use crate::policy::PolicyEngine;
use crate::quota::QuotaLedger;
use crate::registry::{Destination, Registry};
use crate::seams::{
    BuiltinTypes, DeviceEnumerator, ImmediateExec, JobExec, JobOutcome, NoDevices, PpdCatalog,
    TypeDatabase,
};
use crate::spool::{DestSnapshot, JobCacheEntry, Spool};
use crate::subs::{event_mask, EventSpec, SubEngine};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};
use vellum_proto::{AttrList, Attribute, GroupTag, JobId};

pub struct Scheduler {
    pub config: ServerConfig,
    pub policies: PolicyEngine,
    pub registry: RwLock<Registry>,
    pub jobs: RwLock<JobStore>,
    pub subs: RwLock<SubEngine>,
    pub quotas: Mutex<QuotaLedger>,
    pub spool: Spool,
    pub type_db: Box<dyn TypeDatabase>,
    pub ppds: Box<dyn PpdCatalog>,
    pub devices: Box<dyn DeviceEnumerator>,
    pub exec: Box<dyn JobExec>,
    pub notifier: NotifierRunner,
    started_at: DateTime<Utc>,
    /// Registry or subscription state needs a flush.
    dirty: AtomicBool,
    last_flush: Mutex<DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let spool = Spool::open(&config.spool_root)?;
        let policies = PolicyEngine::with_defaults(&config.default_policy);
        let notifier = NotifierRunner::new(
            config.cache_root.join("notifier"),
            Duration::from_secs(config.notifier_timeout_secs),
        );
        let sched = Self {
            policies,
            spool,
            notifier,
            registry: RwLock::new(Registry::new()),
            jobs: RwLock::new(JobStore::new()),
            subs: RwLock::new(SubEngine::new()),
            quotas: Mutex::new(QuotaLedger::new()),
            type_db: Box::new(BuiltinTypes),
            ppds: Box::new(crate::seams::EmptyPpdCatalog),
            devices: Box::new(NoDevices),
            exec: Box::new(ImmediateExec),
            started_at: Utc::now(),
            dirty: AtomicBool::new(false),
            last_flush: Mutex::new(Utc::now()),
            config,
        };
        sched.load()?;
        Ok(sched)
    }

    /// Seconds since boot, reported as `printer-up-time`.
    pub fn uptime(&self) -> i32 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds()
            .max(1) as i32
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    fn load(&self) -> Result<()> {
        if let Some(snapshot) = self.spool.load_destinations()? {
            let count = snapshot.dests.len();
            self.registry
                .write()
                .unwrap()
                .restore(snapshot.dests, snapshot.default_dest);
            info!(destinations = count, "restored destinations");
        }
        let jobs = self.spool.load_jobs()?;
        if !jobs.is_empty() {
            info!(jobs = jobs.len(), "restored jobs");
            let mut store = self.jobs.write().unwrap();
            for job in jobs {
                store.restore(job);
            }
        }
        let subs = self.spool.load_subscriptions()?;
        if !subs.is_empty() {
            info!(subscriptions = subs.len(), "restored subscriptions");
            self.subs.write().unwrap().restore(subs);
        }
        Ok(())
    }

    /// Flush dirty state. `force` ignores the cadence (shutdown path).
    pub fn flush(&self, force: bool) -> Result<()> {
        let due = {
            let mut last = self.last_flush.lock().unwrap();
            let elapsed = Utc::now().signed_duration_since(*last).num_seconds();
            if force || elapsed >= self.config.dirty_flush_secs as i64 {
                *last = Utc::now();
                true
            } else {
                false
            }
        };
        if !due {
            return Ok(());
        }

        {
            let mut store = self.jobs.write().unwrap();
            let dirty_ids: Vec<JobId> = store
                .iter()
                .filter(|j| j.dirty)
                .map(|j| j.id)
                .collect();
            for id in dirty_ids {
                let job = store.get(id)?.clone();
                self.spool.write_job(&job)?;
                store.with_job_mut(id, |j| {
                    j.dirty = false;
                    Ok(())
                })?;
            }
            let cache: Vec<JobCacheEntry> = store
                .iter()
                .map(|j| JobCacheEntry {
                    id: j.id,
                    dest: j.dest.clone(),
                    state: j.state.as_i32(),
                    priority: j.priority,
                })
                .collect();
            self.spool.write_job_cache(&cache)?;
        }

        if self.dirty.swap(false, Ordering::Relaxed) || force {
            let registry = self.registry.read().unwrap();
            let snapshot = DestSnapshot {
                default_dest: registry.default_dest().map(|d| d.name.clone()),
                dests: registry.iter().cloned().collect(),
            };
            drop(registry);
            self.spool.write_destinations(&snapshot)?;

            let subs: Vec<_> = self.subs.read().unwrap().iter().cloned().collect();
            self.spool.write_subscriptions(&subs)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn emit(&self, spec: EventSpec) {
        self.subs.write().unwrap().enqueue(&spec);
        self.mark_dirty();
    }

    pub fn printer_event(&self, kind: u32, dest: &Destination, text: impl Into<String>) {
        let mut snapshot = AttrList::new();
        let g = GroupTag::EventNotification;
        snapshot.append(g, Attribute::name_value("printer-name", dest.name.clone()));
        snapshot.append(
            g,
            Attribute::enum_value("printer-state", dest.state.as_i32()),
        );
        snapshot.append(
            g,
            Attribute::keywords("printer-state-reasons", dest.state_reasons.iter().cloned()),
        );
        snapshot.append(
            g,
            Attribute::boolean("printer-is-accepting-jobs", dest.accepting),
        );
        self.emit(EventSpec {
            kind,
            dest: Some(dest.name.clone()),
            job: None,
            text: text.into(),
            snapshot,
        });
    }

    pub fn job_event(&self, kind: u32, job: &Job, text: impl Into<String>) {
        let mut snapshot = AttrList::new();
        let g = GroupTag::EventNotification;
        snapshot.append(g, Attribute::integer("job-id", job.id.as_i32()));
        snapshot.append(g, Attribute::enum_value("job-state", job.state.as_i32()));
        snapshot.append(
            g,
            Attribute::keywords("job-state-reasons", job.state_reasons.iter().cloned()),
        );
        snapshot.append(g, Attribute::name_value("job-name", job_name(job)));
        snapshot.append(
            g,
            Attribute::name_value("printer-name", job.dest.clone()),
        );
        self.emit(EventSpec {
            kind,
            dest: Some(job.dest.clone()),
            job: Some(job.id),
            text: text.into(),
            snapshot,
        });
    }

    // ------------------------------------------------------------------
    // Destination orchestration
    // ------------------------------------------------------------------

    /// Delete a destination and everything hanging off it: jobs are canceled
    /// with purge, its subscriptions expire, quota history is dropped, and
    /// `printer-deleted` goes out.
    pub fn delete_destination(&self, name: &str) -> Result<Destination> {
        let removed = self.registry.write().unwrap().remove(name)?;

        let ids: Vec<JobId> = {
            let store = self.jobs.read().unwrap();
            store
                .iter()
                .filter(|j| j.dest.eq_ignore_ascii_case(name))
                .map(|j| j.id)
                .collect()
        };
        for id in ids {
            if let Err(e) = self.cancel_job(id, true, "printer deleted") {
                warn!(job = %id, error = %e, "cancel during destination delete failed");
            }
        }

        self.printer_event(
            event_mask::PRINTER_DELETED,
            &removed,
            format!("Printer {} deleted.", removed.name),
        );
        self.subs.write().unwrap().drop_for_dest(name);
        self.quotas.lock().unwrap().forget_dest(name);

        // cached data (generated ppds etc.) goes with the queue
        let _ = std::fs::remove_file(
            self.config
                .cache_root
                .join(format!("{}.ppd", removed.name.to_lowercase())),
        );

        self.mark_dirty();
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Job orchestration
    // ------------------------------------------------------------------

    /// Cancel one job; `purge` also removes its record and files.
    pub fn cancel_job(&self, id: JobId, purge: bool, why: &str) -> Result<()> {
        let (snapshot, was_active) = {
            let mut store = self.jobs.write().unwrap();
            let state = store.get(id)?.state;
            if state.is_terminal() && !purge {
                return Err(SchedError::NotPossible(format!(
                    "job {id} is already {}",
                    state_keyword(state)
                )));
            }
            if !state.is_terminal() {
                store.with_job_mut(id, |j| j.cancel())?;
            }
            (store.get(id)?.clone(), !state.is_terminal())
        };

        if was_active {
            self.job_event(
                event_mask::JOB_COMPLETED,
                &snapshot,
                format!("Job canceled: {why}."),
            );
        }

        if purge {
            let job = self.jobs.write().unwrap().purge(id)?;
            self.spool.remove_job(&job, false)?;
            self.subs.write().unwrap().drop_for_job(id);
        } else {
            self.retire(&snapshot)?;
        }
        self.release_destination(&snapshot.dest);
        Ok(())
    }

    /// Post-terminal bookkeeping: spool cleanup per retention policy.
    fn retire(&self, job: &Job) -> Result<()> {
        if !self.config.preserve_job_history {
            self.spool.remove_job(job, false)?;
            self.jobs.write().unwrap().discard_history(job.id);
            self.subs.write().unwrap().drop_for_job(job.id);
            return Ok(());
        }
        if !self.config.preserve_job_files {
            self.spool.remove_job(job, true)?;
            self.jobs.write().unwrap().with_job_mut(job.id, |j| {
                j.files.clear();
                Ok(())
            })?;
        }
        Ok(())
    }

    fn release_destination(&self, dest: &str) {
        let mut registry = self.registry.write().unwrap();
        let busy = {
            let jobs = self.jobs.read().unwrap();
            jobs.printing_jobs()
                .iter()
                .any(|id| jobs.get(*id).map(|j| j.dest.eq_ignore_ascii_case(dest)).unwrap_or(false))
        };
        if let Some(d) = registry.find_mut(dest) {
            d.set_processing(busy);
        }
    }

    /// Pull runnable jobs and hand them to the engine. Lock-free during the
    /// engine call; outcomes are applied afterwards.
    pub fn start_pending_jobs(&self) {
        let batch: Vec<(Job, Destination)> = {
            let registry = self.registry.read().unwrap();
            let mut store = self.jobs.write().unwrap();
            let runnable = store.next_runnable(&self.config, |name| {
                registry.resolve_for_job(name).cloned()
            });
            let mut batch = Vec::new();
            for id in runnable {
                if store.with_job_mut(id, |j| j.start_processing()).is_err() {
                    continue;
                }
                let job = store.get(id).expect("job just started").clone();
                if let Some(dest) = registry.resolve_for_job(&job.dest) {
                    batch.push((job, dest.clone()));
                }
            }
            batch
        };

        for (job, dest) in &batch {
            {
                let mut registry = self.registry.write().unwrap();
                if let Some(d) = registry.find_mut(&dest.name) {
                    d.set_processing(true);
                }
            }
            self.job_event(
                event_mask::JOB_STATE_CHANGED,
                job,
                format!("Job {} started printing.", job.id),
            );
            info!(job = %job.id, dest = %dest.name, "job started");
            let outcome = self.exec.execute(job, dest);
            if let Err(e) = self.apply_outcome(job.id, outcome) {
                error!(job = %job.id, error = %e, "applying engine outcome failed");
            }
        }
    }

    /// Report an engine outcome for a printing job.
    pub fn apply_outcome(&self, id: JobId, outcome: JobOutcome) -> Result<()> {
        match outcome {
            JobOutcome::Deferred => Ok(()),
            JobOutcome::Completed { impressions } => {
                let snapshot = {
                    let mut store = self.jobs.write().unwrap();
                    store.with_job_mut(id, |j| {
                        j.impressions_completed = impressions;
                        j.sheets_completed = impressions;
                        j.complete()
                    })?;
                    store.get(id)?.clone()
                };
                {
                    let registry = self.registry.read().unwrap();
                    if let Some(dest) = registry.find(&snapshot.dest) {
                        self.quotas.lock().unwrap().update(
                            dest,
                            &snapshot.user,
                            impressions.max(0) as u64,
                            snapshot.k_octets,
                        );
                    }
                }
                self.job_event(
                    event_mask::JOB_COMPLETED,
                    &snapshot,
                    format!("Job {} completed.", snapshot.id),
                );
                self.retire(&snapshot)?;
                self.release_destination(&snapshot.dest);
                Ok(())
            }
            JobOutcome::Stopped { reason } => {
                let snapshot = {
                    let mut store = self.jobs.write().unwrap();
                    store.with_job_mut(id, |j| j.stop(&reason))?;
                    store.get(id)?.clone()
                };
                let stop_printer = {
                    let registry = self.registry.read().unwrap();
                    registry
                        .find(&snapshot.dest)
                        .map(|d| d.error_policy == "stop-printer")
                        .unwrap_or(false)
                };
                let stopped = if stop_printer {
                    let mut registry = self.registry.write().unwrap();
                    registry.find_mut(&snapshot.dest).map(|d| {
                        d.stop();
                        d.clone()
                    })
                } else {
                    None
                };
                match stopped {
                    Some(dest) => self.printer_event(
                        event_mask::PRINTER_STOPPED,
                        &dest,
                        format!("Printer {} stopped.", dest.name),
                    ),
                    None => self.release_destination(&snapshot.dest),
                }
                self.job_event(
                    event_mask::JOB_STOPPED,
                    &snapshot,
                    format!("Job {} stopped: {reason}.", snapshot.id),
                );
                Ok(())
            }
            JobOutcome::Aborted { reason } => {
                let snapshot = {
                    let mut store = self.jobs.write().unwrap();
                    store.with_job_mut(id, |j| j.abort(&reason))?;
                    store.get(id)?.clone()
                };
                self.job_event(
                    event_mask::JOB_COMPLETED,
                    &snapshot,
                    format!("Job {} aborted: {reason}.", snapshot.id),
                );
                self.retire(&snapshot)?;
                self.release_destination(&snapshot.dest);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Local printer creation
    // ------------------------------------------------------------------

    /// Background probe for a freshly created local printer. Owns no locks
    /// while probing; re-acquires the registry to publish or condemn.
    pub async fn probe_local_printer(&self, name: String, device_uri: String) {
        let scheme = device_uri.split(':').next().unwrap_or("").to_string();
        let known = self.devices.backend_schemes().contains(&scheme)
            || (scheme == "file" && self.config.file_device);

        // modest settle delay so the queue exists before state flips
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut registry = self.registry.write().unwrap();
        let Some(dest) = registry.find_mut(&name) else {
            return;
        };
        if known {
            dest.make_model = "Local Raw Printer".to_string();
            dest.state_time = Utc::now();
            let dest = dest.clone();
            drop(registry);
            self.printer_event(
                event_mask::PRINTER_ADDED,
                &dest,
                format!("Printer {} is ready.", dest.name),
            );
        } else {
            // condemn: the next sweep collects it
            dest.temporary = true;
            dest.state_time = DateTime::<Utc>::MIN_UTC;
            dest.state_message = format!("device {device_uri:?} unreachable");
            warn!(printer = %name, device = %device_uri, "local printer probe failed");
        }
        self.mark_dirty();
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Periodic pass: hold promotion, intake timeouts, lease expiry,
    /// temporary-printer collection, scheduling, flush, push delivery.
    pub async fn sweep(&self, now: DateTime<Utc>) {
        let promoted = self.jobs.write().unwrap().promote_timed_holds(now);
        for id in promoted {
            let snapshot = self.jobs.read().unwrap().get(id).ok().cloned();
            if let Some(job) = snapshot {
                self.job_event(
                    event_mask::JOB_STATE_CHANGED,
                    &job,
                    format!("Job {} released by timer.", job.id),
                );
            }
        }

        let closed = self.jobs.write().unwrap().expire_intakes(now);
        for id in closed {
            let snapshot = self.jobs.read().unwrap().get(id).ok().cloned();
            if let Some(job) = snapshot {
                self.job_event(
                    event_mask::JOB_STATE_CHANGED,
                    &job,
                    format!("Job {} closed by intake timeout.", job.id),
                );
            }
        }

        self.subs.write().unwrap().expire_leases(now);

        // job subscriptions outlive their job only until this pass
        let terminal: Vec<JobId> = {
            let store = self.jobs.read().unwrap();
            let subs = self.subs.read().unwrap();
            subs.iter()
                .filter_map(|s| s.job)
                .filter(|id| {
                    store
                        .get(*id)
                        .map(|j| j.state.is_terminal())
                        .unwrap_or(true)
                })
                .collect()
        };
        for id in terminal {
            self.subs.write().unwrap().drop_for_job(id);
        }

        let expired = {
            let registry = self.registry.read().unwrap();
            registry.expired_temporaries(now, self.config.temp_printer_ttl_secs)
        };
        for name in expired {
            info!(printer = %name, "collecting expired temporary printer");
            if let Err(e) = self.delete_destination(&name) {
                warn!(printer = %name, error = %e, "temporary printer collection failed");
            }
        }

        self.start_pending_jobs();

        if let Err(e) = self.flush(false) {
            error!(error = %e, "state flush failed");
        }

        let backlog = self.subs.write().unwrap().take_push_backlog();
        for delivery in backlog {
            if let Err(e) = self.notifier.deliver(&delivery).await {
                warn!(
                    subscription = %delivery.subscription,
                    error = %e,
                    "push notification failed"
                );
            }
        }
    }
}

pub fn job_name(job: &Job) -> String {
    job.attrs
        .find("job-name")
        .and_then(|a| a.as_str())
        .unwrap_or("untitled")
        .to_string()
}
