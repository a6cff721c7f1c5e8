//! Job store: admission, ordered indices, and bulk selection.

use crate::client::ClientContext;
use crate::config::ServerConfig;
use crate::error::{Result, SchedError};
use crate::job::{HoldUntil, Job, JobState};
use crate::quota::{QuotaCheck, QuotaLedger};
use crate::registry::Destination;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::{info, warn};
use vellum_proto::{AttrList, Attribute, GroupTag, JobId};

/// Attributes the client may never supply on a write path.
pub const READ_ONLY_ATTRS: &[&str] = &[
    "date-time-at-completed",
    "date-time-at-creation",
    "date-time-at-processing",
    "document-format-detected",
    "job-detailed-status-messages",
    "job-id",
    "job-impressions-completed",
    "job-k-octets",
    "job-media-sheets-completed",
    "job-originating-host-name",
    "job-originating-user-name",
    "job-printer-up-time",
    "job-state",
    "job-state-message",
    "job-state-reasons",
    "job-uri",
    "job-uuid",
    "number-of-documents",
    "time-at-completed",
    "time-at-creation",
    "time-at-processing",
];

const NUMBER_UP_SUPPORTED: &[i32] = &[1, 2, 4, 6, 9, 16];

/// `which-jobs` selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhichJobs {
    NotCompleted,
    Completed,
    All,
}

impl WhichJobs {
    pub fn from_keyword(keyword: &str) -> Result<Self> {
        match keyword {
            "not-completed" => Ok(WhichJobs::NotCompleted),
            "completed" => Ok(WhichJobs::Completed),
            "all" => Ok(WhichJobs::All),
            other => Err(SchedError::AttributesNotSupported {
                reason: format!("which-jobs {other:?} is not supported"),
                attrs: vec![Attribute::keyword("which-jobs", other)],
            }),
        }
    }

    fn matches(self, state: JobState) -> bool {
        match self {
            WhichJobs::NotCompleted => state.is_active(),
            WhichJobs::Completed => state.is_terminal(),
            WhichJobs::All => true,
        }
    }
}

/// Job selection parameters shared by Get-Jobs and the bulk cancel family.
#[derive(Debug, Clone, Default)]
pub struct JobSelector {
    pub dest: Option<String>,
    pub which: Option<WhichJobs>,
    pub user: Option<String>,
    pub job_ids: Option<Vec<JobId>>,
    pub first_job_id: Option<JobId>,
    pub first_index: usize,
    pub limit: usize,
}

#[derive(Debug)]
pub struct JobStore {
    jobs: BTreeMap<JobId, Job>,
    /// Active jobs ordered (priority desc, id asc).
    active: Vec<JobId>,
    /// Jobs currently printing, same order.
    printing: Vec<JobId>,
    next_id: JobId,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
            active: Vec::new(),
            printing: Vec::new(),
            next_id: JobId::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn get(&self, id: JobId) -> Result<&Job> {
        self.jobs
            .get(&id)
            .ok_or_else(|| SchedError::NotFound(format!("job {id} does not exist")))
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Active-jobs index snapshot, (priority desc, id asc).
    pub fn active_jobs(&self) -> &[JobId] {
        &self.active
    }

    /// Printing-jobs index snapshot.
    pub fn printing_jobs(&self) -> &[JobId] {
        &self.printing
    }

    /// Mutate one job through `f`, then repair the ordered indices.
    pub fn with_job_mut<R>(
        &mut self,
        id: JobId,
        f: impl FnOnce(&mut Job) -> Result<R>,
    ) -> Result<R> {
        let job = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| SchedError::NotFound(format!("job {id} does not exist")))?;
        let result = f(job)?;
        self.rebuild_indices();
        Ok(result)
    }

    fn rebuild_indices(&mut self) {
        let mut active: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.state.is_active())
            .map(|j| j.id)
            .collect();
        active.sort_by(|a, b| {
            let ja = &self.jobs[a];
            let jb = &self.jobs[b];
            jb.priority.cmp(&ja.priority).then(ja.id.cmp(&jb.id))
        });
        self.printing = active
            .iter()
            .copied()
            .filter(|id| self.jobs[id].state == JobState::Processing)
            .collect();
        self.active = active;
    }

    /// Jobs on this destination counted by `queued-job-count`.
    pub fn queued_count(&self, dest: &str) -> usize {
        self.active
            .iter()
            .filter(|id| self.jobs[id].dest.eq_ignore_ascii_case(dest))
            .count()
    }

    fn active_count_for_user(&self, user: &str) -> usize {
        self.active
            .iter()
            .filter(|id| self.jobs[id].user == user)
            .count()
    }

    /// Admission: validate the request and create the job.
    ///
    /// The new job enters `held` while a multi-document intake is open and
    /// `pending` (or `held` when the client asked to hold) otherwise.
    #[allow(clippy::too_many_arguments)]
    pub fn add_job(
        &mut self,
        cfg: &ServerConfig,
        dest: &Destination,
        ctx: &ClientContext,
        ledger: &mut QuotaLedger,
        req: &AttrList,
        initial_format: Option<String>,
        multi_file: bool,
    ) -> Result<JobId> {
        if !dest.accepting {
            return Err(SchedError::NotAcceptingJobs(dest.name.clone()));
        }
        if !dest.shared && !ctx.local {
            return Err(SchedError::NotFound(format!(
                "destination {:?} does not exist",
                dest.name
            )));
        }
        if cfg.max_jobs > 0 && self.active.len() >= cfg.max_jobs {
            return Err(SchedError::NotPossible(format!(
                "too many jobs ({} active)",
                self.active.len()
            )));
        }
        if cfg.max_jobs_per_printer > 0 && self.queued_count(&dest.name) >= cfg.max_jobs_per_printer
        {
            return Err(SchedError::NotPossible(format!(
                "too many jobs queued on {:?}",
                dest.name
            )));
        }
        let user = effective_user(ctx);
        if cfg.max_jobs_per_user > 0 && self.active_count_for_user(&user) >= cfg.max_jobs_per_user {
            return Err(SchedError::NotPossible(format!(
                "too many active jobs for {user:?}"
            )));
        }
        match ledger.check(dest, ctx) {
            QuotaCheck::Allowed => {}
            QuotaCheck::DeniedByUsers => {
                return Err(SchedError::NotAuthorized(format!(
                    "{user:?} may not print to {:?}",
                    dest.name
                )))
            }
            QuotaCheck::OverPageLimit | QuotaCheck::OverKLimit => {
                return Err(SchedError::NotPossible(format!(
                    "quota for {user:?} on {:?} has been reached",
                    dest.name
                )))
            }
        }

        let mut job_attrs = collect_job_attrs(cfg, req)?;
        check_mandatory(dest, &job_attrs)?;
        validate_job_attrs(cfg, &job_attrs)?;

        if let Some(format) = &initial_format {
            if !dest.accepts_type(format) {
                return Err(SchedError::FormatNotSupported(format.clone()));
            }
        }

        apply_dest_defaults(dest, &mut job_attrs);

        let priority = job_attrs
            .find("job-priority")
            .and_then(|a| a.as_integer())
            .unwrap_or(50);

        let id = self.next_id;
        self.next_id = self.next_id.next();
        let mut job = Job::new(id, &user, &ctx.host, &dest.name, dest.kind, priority);
        job.attrs = job_attrs;

        let hold = job
            .attrs
            .find("job-hold-until")
            .and_then(|a| a.as_str())
            .map(|kw| HoldUntil::from_keyword(kw, Utc::now()))
            .unwrap_or(HoldUntil::NoHold);

        if multi_file {
            job.hold_until = hold;
            job.state = JobState::Held;
            job.set_reasons(&["job-incoming"]);
            job.intake_deadline = Some(
                Utc::now() + Duration::seconds(cfg.multiple_operation_timeout_secs as i64),
            );
        } else if hold.holds_at(Utc::now()) {
            job.hold_until = hold;
            job.state = JobState::Held;
            job.set_reasons(&["job-hold-until-specified"]);
        } else {
            job.state = JobState::Pending;
            job.set_reasons(&["none"]);
        }

        info!(job = %id, dest = %dest.name, user = %user, "job admitted");
        self.jobs.insert(id, job);
        self.rebuild_indices();
        Ok(id)
    }

    /// Run the admission checks without creating anything (Validate-Job).
    pub fn validate_job(
        &self,
        cfg: &ServerConfig,
        dest: &Destination,
        ctx: &ClientContext,
        ledger: &mut QuotaLedger,
        req: &AttrList,
        format: Option<&str>,
    ) -> Result<()> {
        if !dest.accepting {
            return Err(SchedError::NotAcceptingJobs(dest.name.clone()));
        }
        if !dest.shared && !ctx.local {
            return Err(SchedError::NotFound(format!(
                "destination {:?} does not exist",
                dest.name
            )));
        }
        if let QuotaCheck::DeniedByUsers = ledger.check(dest, ctx) {
            return Err(SchedError::NotAuthorized(format!(
                "{:?} may not print to {:?}",
                effective_user(ctx),
                dest.name
            )));
        }
        let attrs = collect_job_attrs(cfg, req)?;
        check_mandatory(dest, &attrs)?;
        validate_job_attrs(cfg, &attrs)?;
        if let Some(format) = format {
            if !dest.accepts_type(format) {
                return Err(SchedError::FormatNotSupported(format.to_string()));
            }
        }
        Ok(())
    }

    /// Close a multi-document intake: clear the deadline and promote.
    pub fn close_intake(&mut self, id: JobId) -> Result<JobState> {
        self.with_job_mut(id, |job| {
            job.intake_deadline = None;
            job.remove_reason("job-incoming");
            if job.state == JobState::Held || job.state == JobState::Stopped {
                job.resume_pending()?;
            }
            Ok(job.state)
        })
    }

    /// Held jobs whose timed hold has passed return to pending.
    pub fn promote_timed_holds(&mut self, now: DateTime<Utc>) -> Vec<JobId> {
        let due: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.state == JobState::Held && j.intake_deadline.is_none())
            .filter(|j| matches!(j.hold_until, HoldUntil::At(when) if when <= now))
            .map(|j| j.id)
            .collect();
        for id in &due {
            if let Some(job) = self.jobs.get_mut(id) {
                job.hold_until = HoldUntil::NoHold;
                job.state = JobState::Pending;
                job.set_reasons(&["none"]);
            }
        }
        if !due.is_empty() {
            self.rebuild_indices();
        }
        due
    }

    /// Force-close intakes idle past their deadline. Returns the closed jobs.
    pub fn expire_intakes(&mut self, now: DateTime<Utc>) -> Vec<JobId> {
        let stale: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| matches!(j.intake_deadline, Some(deadline) if deadline <= now))
            .map(|j| j.id)
            .collect();
        for id in &stale {
            warn!(job = %id, "multi-document intake timed out; closing job");
            let _ = self.close_intake(*id);
        }
        stale
    }

    /// Runnable jobs in (priority desc, id asc) order: pending, destination
    /// idle and ready, per-destination concurrency not exhausted.
    pub fn next_runnable(
        &self,
        cfg: &ServerConfig,
        resolve: impl Fn(&str) -> Option<Destination>,
    ) -> Vec<JobId> {
        let mut started_per_dest: BTreeMap<String, usize> = BTreeMap::new();
        for id in &self.printing {
            let dest = self.jobs[id].dest.to_lowercase();
            *started_per_dest.entry(dest).or_default() += 1;
        }
        let mut runnable = Vec::new();
        for id in &self.active {
            let job = &self.jobs[id];
            if job.state != JobState::Pending {
                continue;
            }
            let Some(dest) = resolve(&job.dest) else {
                continue;
            };
            if !dest.ready() {
                continue;
            }
            let slot = started_per_dest.entry(dest.name.to_lowercase()).or_default();
            if cfg.max_active_per_printer > 0 && *slot >= cfg.max_active_per_printer {
                continue;
            }
            *slot += 1;
            runnable.push(*id);
        }
        runnable
    }

    /// Apply a selector, returning ids in index order (active first by
    /// priority, then terminal jobs by id).
    pub fn select(&self, selector: &JobSelector) -> Vec<JobId> {
        let which = selector.which.unwrap_or(WhichJobs::NotCompleted);
        let mut ordered: Vec<JobId> = self.active.clone();
        ordered.extend(
            self.jobs
                .values()
                .filter(|j| j.state.is_terminal())
                .map(|j| j.id),
        );

        let selected: Vec<JobId> = ordered
            .into_iter()
            .filter(|id| {
                let job = &self.jobs[id];
                if !which.matches(job.state) {
                    return false;
                }
                if let Some(dest) = &selector.dest {
                    if !job.dest.eq_ignore_ascii_case(dest) {
                        return false;
                    }
                }
                if let Some(user) = &selector.user {
                    if job.user != *user {
                        return false;
                    }
                }
                if let Some(ids) = &selector.job_ids {
                    if !ids.contains(id) {
                        return false;
                    }
                }
                if let Some(first) = selector.first_job_id {
                    if *id < first {
                        return false;
                    }
                }
                true
            })
            .collect();

        let skipped: Vec<JobId> = selected.into_iter().skip(selector.first_index).collect();
        if selector.limit > 0 {
            skipped.into_iter().take(selector.limit).collect()
        } else {
            skipped
        }
    }

    /// Remove a job record entirely (purge). The caller owns file cleanup.
    pub fn purge(&mut self, id: JobId) -> Result<Job> {
        let job = self
            .jobs
            .remove(&id)
            .ok_or_else(|| SchedError::NotFound(format!("job {id} does not exist")))?;
        self.rebuild_indices();
        info!(job = %id, "job purged");
        Ok(job)
    }

    /// Drop terminal jobs that should not be retained.
    pub fn discard_history(&mut self, id: JobId) {
        if let Some(job) = self.jobs.get(&id) {
            if job.state.is_terminal() {
                self.jobs.remove(&id);
                self.rebuild_indices();
            }
        }
    }

    /// Restore a job loaded from the spool. Jobs that were printing when the
    /// server went down return to pending.
    pub fn restore(&mut self, mut job: Job) {
        if job.state == JobState::Processing {
            job.state = JobState::Pending;
            job.set_reasons(&["none"]);
        }
        if job.id >= self.next_id {
            self.next_id = job.id.next();
        }
        self.jobs.insert(job.id, job);
        self.rebuild_indices();
    }
}

pub fn effective_user(ctx: &ClientContext) -> String {
    if ctx.user.is_empty() {
        "anonymous".to_string()
    } else {
        ctx.user.clone()
    }
}

/// Pull the job-group attributes (plus job-name and fidelity from the
/// operation group) out of a request, rejecting or stripping read-only names.
fn collect_job_attrs(cfg: &ServerConfig, req: &AttrList) -> Result<AttrList> {
    let mut out = AttrList::new();
    let mut offenders = Vec::new();
    for (group, attr) in req.iter() {
        let wanted = match group {
            GroupTag::Job => true,
            GroupTag::Operation => matches!(
                attr.name.as_str(),
                "job-name" | "ipp-attribute-fidelity" | "job-k-octets" | "compression"
            ),
            _ => false,
        };
        if !wanted {
            continue;
        }
        if READ_ONLY_ATTRS.contains(&attr.name.as_str()) && group == GroupTag::Job {
            offenders.push(attr.clone());
            continue;
        }
        out.append(GroupTag::Job, attr.clone());
    }
    if !offenders.is_empty() {
        if cfg.strict_conformance {
            return Err(SchedError::BadRequest(format!(
                "read-only attribute {:?} in request",
                offenders[0].name
            )));
        }
        for attr in &offenders {
            warn!(attr = %attr.name, "dropping read-only attribute from request");
        }
    }
    Ok(out)
}

fn check_mandatory(dest: &Destination, attrs: &AttrList) -> Result<()> {
    let missing: Vec<Attribute> = dest
        .mandatory_attrs
        .iter()
        .filter(|name| attrs.find(name).is_none())
        .map(|name| Attribute::no_value(name.clone()))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SchedError::AttributesNotSupported {
            reason: format!(
                "missing required attributes: {}",
                missing
                    .iter()
                    .map(|a| a.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            attrs: missing,
        })
    }
}

fn validate_job_attrs(cfg: &ServerConfig, attrs: &AttrList) -> Result<()> {
    for (_, attr) in attrs.iter() {
        attr.validate()?;
    }

    if let Some(copies) = attrs.find("copies") {
        let value = copies.as_integer().unwrap_or(0);
        if value < 1 || value > cfg.max_copies {
            return Err(SchedError::AttributesNotSupported {
                reason: format!("copies {value} outside [1, {}]", cfg.max_copies),
                attrs: vec![copies.clone()],
            });
        }
    }

    if let Some(sheets) = attrs.find("job-sheets") {
        if sheets.values.len() > 2 {
            return Err(SchedError::AttributesNotSupported {
                reason: "job-sheets accepts at most two values".to_string(),
                attrs: vec![sheets.clone()],
            });
        }
        for banner in sheets.strings() {
            if !cfg.banners.contains(banner) {
                return Err(SchedError::AttributesNotSupported {
                    reason: format!("unknown banner {banner:?}"),
                    attrs: vec![sheets.clone()],
                });
            }
        }
    }

    if let Some(number_up) = attrs.find("number-up") {
        let value = number_up.as_integer().unwrap_or(0);
        if !NUMBER_UP_SUPPORTED.contains(&value) {
            return Err(SchedError::AttributesNotSupported {
                reason: format!("number-up {value} is not supported"),
                attrs: vec![number_up.clone()],
            });
        }
    }

    if let Some(priority) = attrs.find("job-priority") {
        let value = priority.as_integer().unwrap_or(0);
        if !(1..=100).contains(&value) {
            return Err(SchedError::AttributesNotSupported {
                reason: format!("job-priority {value} outside [1, 100]"),
                attrs: vec![priority.clone()],
            });
        }
    }

    if let Some(ranges) = attrs.find("page-ranges") {
        let mut last_upper = 0;
        for value in &ranges.values {
            let Some((lower, upper)) = value.as_range() else {
                return Err(SchedError::AttributesNotSupported {
                    reason: "page-ranges values must be rangeOfInteger".to_string(),
                    attrs: vec![ranges.clone()],
                });
            };
            if lower < 1 || upper < lower || lower <= last_upper {
                return Err(SchedError::AttributesNotSupported {
                    reason: "page-ranges must be increasing and non-overlapping".to_string(),
                    attrs: vec![ranges.clone()],
                });
            }
            last_upper = upper;
        }
    }

    Ok(())
}

/// Apply `*-default` options from the destination without overriding the
/// client's explicit choices.
fn apply_dest_defaults(dest: &Destination, attrs: &mut AttrList) {
    for (option, value) in &dest.option_defaults {
        if attrs.find(option).is_none() {
            let attr = if let Ok(number) = value.parse::<i32>() {
                Attribute::integer(option.clone(), number)
            } else if value == "true" || value == "false" {
                Attribute::boolean(option.clone(), value == "true")
            } else {
                Attribute::keyword(option.clone(), value.clone())
            };
            attrs.append(GroupTag::Job, attr);
        }
    }
    if attrs.find("job-sheets").is_none() && dest.job_sheets.0 != "none" {
        attrs.append(
            GroupTag::Job,
            Attribute::set_of(
                "job-sheets",
                vec![
                    vellum_proto::AttrValue::Keyword(dest.job_sheets.0.clone()),
                    vellum_proto::AttrValue::Keyword(dest.job_sheets.1.clone()),
                ],
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use vellum_proto::AttrValue;

    fn setup() -> (ServerConfig, Destination, ClientContext, QuotaLedger) {
        let cfg = ServerConfig::default();
        let mut reg = Registry::new();
        reg.add_printer("press").unwrap();
        let dest = reg.find("press").unwrap().clone();
        let ctx = ClientContext {
            user: "mei".into(),
            groups: vec![],
            host: "localhost".into(),
            local: true,
            tls: false,
        };
        (cfg, dest, ctx, QuotaLedger::new())
    }

    fn submit(store: &mut JobStore, multi: bool) -> JobId {
        let (cfg, dest, ctx, mut ledger) = setup();
        store
            .add_job(
                &cfg,
                &dest,
                &ctx,
                &mut ledger,
                &AttrList::new(),
                Some("application/pdf".into()),
                multi,
            )
            .unwrap()
    }

    #[test]
    fn single_file_jobs_enter_pending() {
        let mut store = JobStore::new();
        let id = submit(&mut store, false);
        assert_eq!(store.get(id).unwrap().state, JobState::Pending);
        assert_eq!(store.active_jobs(), &[id]);
    }

    #[test]
    fn multi_file_jobs_enter_held_with_deadline() {
        let mut store = JobStore::new();
        let id = submit(&mut store, true);
        let job = store.get(id).unwrap();
        assert_eq!(job.state, JobState::Held);
        assert!(job.intake_deadline.is_some());
        assert!(job.state_reasons.contains("job-incoming"));
    }

    #[test]
    fn rejects_when_not_accepting() {
        let (cfg, mut dest, ctx, mut ledger) = setup();
        dest.accepting = false;
        let mut store = JobStore::new();
        let err = store
            .add_job(&cfg, &dest, &ctx, &mut ledger, &AttrList::new(), None, false)
            .unwrap_err();
        assert!(matches!(err, SchedError::NotAcceptingJobs(_)));
    }

    #[test]
    fn rejects_remote_on_unshared() {
        let (cfg, mut dest, mut ctx, mut ledger) = setup();
        dest.shared = false;
        ctx.local = false;
        let mut store = JobStore::new();
        let err = store
            .add_job(&cfg, &dest, &ctx, &mut ledger, &AttrList::new(), None, false)
            .unwrap_err();
        assert!(matches!(err, SchedError::NotFound(_)));
    }

    #[test]
    fn quota_exhaustion_is_not_possible() {
        let (cfg, mut dest, ctx, mut ledger) = setup();
        dest.page_limit = 5;
        dest.quota_period_secs = 3600;
        ledger.update(&dest, "mei", 5, 1);
        let mut store = JobStore::new();
        let err = store
            .add_job(&cfg, &dest, &ctx, &mut ledger, &AttrList::new(), None, false)
            .unwrap_err();
        assert!(matches!(err, SchedError::NotPossible(_)));
    }

    #[test]
    fn read_only_attrs_stripped_when_lenient() {
        let (cfg, dest, ctx, mut ledger) = setup();
        let mut req = AttrList::new();
        req.append(GroupTag::Job, Attribute::integer("job-id", 99));
        req.append(GroupTag::Job, Attribute::integer("copies", 2));
        let mut store = JobStore::new();
        let id = store
            .add_job(&cfg, &dest, &ctx, &mut ledger, &req, None, false)
            .unwrap();
        let job = store.get(id).unwrap();
        assert!(job.attrs.find("job-id").is_none());
        assert_eq!(job.attrs.find("copies").unwrap().as_integer(), Some(2));
    }

    #[test]
    fn read_only_attrs_fail_when_strict() {
        let (mut cfg, dest, ctx, mut ledger) = setup();
        cfg.strict_conformance = true;
        let mut req = AttrList::new();
        req.append(GroupTag::Job, Attribute::enum_value("job-state", 9));
        let mut store = JobStore::new();
        let err = store
            .add_job(&cfg, &dest, &ctx, &mut ledger, &req, None, false)
            .unwrap_err();
        assert!(matches!(err, SchedError::BadRequest(_)));
    }

    #[test]
    fn copies_and_number_up_validated() {
        let (cfg, dest, ctx, mut ledger) = setup();
        let mut store = JobStore::new();

        let mut req = AttrList::new();
        req.append(GroupTag::Job, Attribute::integer("copies", 0));
        assert!(matches!(
            store.add_job(&cfg, &dest, &ctx, &mut ledger, &req, None, false),
            Err(SchedError::AttributesNotSupported { .. })
        ));

        let mut req = AttrList::new();
        req.append(GroupTag::Job, Attribute::integer("number-up", 3));
        assert!(matches!(
            store.add_job(&cfg, &dest, &ctx, &mut ledger, &req, None, false),
            Err(SchedError::AttributesNotSupported { .. })
        ));
    }

    #[test]
    fn page_ranges_must_increase() {
        let (cfg, dest, ctx, mut ledger) = setup();
        let mut store = JobStore::new();
        let mut req = AttrList::new();
        req.append(
            GroupTag::Job,
            Attribute::set_of(
                "page-ranges",
                vec![
                    AttrValue::Range { lower: 1, upper: 5 },
                    AttrValue::Range { lower: 4, upper: 9 },
                ],
            ),
        );
        assert!(matches!(
            store.add_job(&cfg, &dest, &ctx, &mut ledger, &req, None, false),
            Err(SchedError::AttributesNotSupported { .. })
        ));
    }

    #[test]
    fn defaults_do_not_override_choices() {
        let (cfg, mut dest, ctx, mut ledger) = setup();
        dest.option_defaults
            .insert("number-up".to_string(), "4".to_string());
        let mut req = AttrList::new();
        req.append(GroupTag::Job, Attribute::integer("number-up", 2));
        let mut store = JobStore::new();
        let id = store
            .add_job(&cfg, &dest, &ctx, &mut ledger, &req, None, false)
            .unwrap();
        assert_eq!(
            store.get(id).unwrap().attrs.find("number-up").unwrap().as_integer(),
            Some(2)
        );

        let id2 = store
            .add_job(&cfg, &dest, &ctx, &mut ledger, &AttrList::new(), None, false)
            .unwrap();
        assert_eq!(
            store
                .get(id2)
                .unwrap()
                .attrs
                .find("number-up")
                .unwrap()
                .as_integer(),
            Some(4)
        );
    }

    #[test]
    fn priority_orders_active_index() {
        let (cfg, dest, ctx, mut ledger) = setup();
        let mut store = JobStore::new();
        let low = store
            .add_job(&cfg, &dest, &ctx, &mut ledger, &AttrList::new(), None, false)
            .unwrap();
        let mut req = AttrList::new();
        req.append(GroupTag::Job, Attribute::integer("job-priority", 90));
        let high = store
            .add_job(&cfg, &dest, &ctx, &mut ledger, &req, None, false)
            .unwrap();
        assert_eq!(store.active_jobs(), &[high, low]);
    }

    #[test]
    fn selection_filters() {
        let (cfg, dest, ctx, mut ledger) = setup();
        let mut store = JobStore::new();
        let a = store
            .add_job(&cfg, &dest, &ctx, &mut ledger, &AttrList::new(), None, false)
            .unwrap();
        let b = store
            .add_job(&cfg, &dest, &ctx, &mut ledger, &AttrList::new(), None, false)
            .unwrap();
        store.with_job_mut(a, |j| j.cancel()).unwrap();

        let completed = store.select(&JobSelector {
            which: Some(WhichJobs::Completed),
            ..Default::default()
        });
        assert_eq!(completed, vec![a]);

        let active = store.select(&JobSelector::default());
        assert_eq!(active, vec![b]);

        let mine = store.select(&JobSelector {
            which: Some(WhichJobs::All),
            user: Some("mei".into()),
            ..Default::default()
        });
        assert_eq!(mine.len(), 2);

        let limited = store.select(&JobSelector {
            which: Some(WhichJobs::All),
            limit: 1,
            ..Default::default()
        });
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn timed_hold_promotion() {
        let mut store = JobStore::new();
        let id = submit(&mut store, false);
        store
            .with_job_mut(id, |j| {
                j.hold(
                    HoldUntil::At(Utc::now() - Duration::seconds(5)),
                    "job-hold-until-specified",
                )
            })
            .unwrap();
        let promoted = store.promote_timed_holds(Utc::now());
        assert_eq!(promoted, vec![id]);
        assert_eq!(store.get(id).unwrap().state, JobState::Pending);
    }

    #[test]
    fn intake_timeout_closes_job() {
        let mut store = JobStore::new();
        let id = submit(&mut store, true);
        store
            .with_job_mut(id, |j| {
                j.intake_deadline = Some(Utc::now() - Duration::seconds(1));
                Ok(())
            })
            .unwrap();
        let closed = store.expire_intakes(Utc::now());
        assert_eq!(closed, vec![id]);
        let job = store.get(id).unwrap();
        assert!(job.intake_deadline.is_none());
        assert_eq!(job.state, JobState::Pending);
    }

    #[test]
    fn next_runnable_respects_order_and_readiness() {
        let (cfg, dest, ctx, mut ledger) = setup();
        let mut store = JobStore::new();
        let a = store
            .add_job(&cfg, &dest, &ctx, &mut ledger, &AttrList::new(), None, false)
            .unwrap();
        let _b = store
            .add_job(&cfg, &dest, &ctx, &mut ledger, &AttrList::new(), None, false)
            .unwrap();
        let resolve = |name: &str| {
            if name.eq_ignore_ascii_case(&dest.name) {
                Some(dest.clone())
            } else {
                None
            }
        };
        // one slot per printer by default
        let runnable = store.next_runnable(&cfg, resolve);
        assert_eq!(runnable, vec![a]);

        let mut stopped = dest.clone();
        stopped.stop();
        let none = store.next_runnable(&cfg, |_| Some(stopped.clone()));
        assert!(none.is_empty());
    }
}
