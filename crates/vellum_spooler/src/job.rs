//! Print jobs and their state machine.

use crate::error::{Result, SchedError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;
use vellum_proto::{AttrList, DestKind, JobId};

/// `job-state` enum values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum JobState {
    Pending = 3,
    Held = 4,
    Processing = 5,
    Stopped = 6,
    Canceled = 7,
    Aborted = 8,
    Completed = 9,
}

impl JobState {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_terminal(self) -> bool {
        self >= JobState::Canceled
    }

    /// Active = counted against the destination queue.
    pub fn is_active(self) -> bool {
        self <= JobState::Stopped
    }
}

/// `job-hold-until` resolved to a scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldUntil {
    /// Not held.
    NoHold,
    /// Held until explicitly released.
    Indefinite,
    /// Held until the given instant.
    At(DateTime<Utc>),
}

impl HoldUntil {
    /// Map a `job-hold-until` keyword; named day periods resolve relative to
    /// `now`.
    pub fn from_keyword(keyword: &str, now: DateTime<Utc>) -> Self {
        use chrono::Timelike;
        let at_hour = |h: u32| {
            let today = now.date_naive().and_hms_opt(h, 0, 0).unwrap().and_utc();
            if today > now {
                HoldUntil::At(today)
            } else {
                HoldUntil::At(today + chrono::Duration::days(1))
            }
        };
        match keyword {
            "no-hold" => HoldUntil::NoHold,
            "indefinite" => HoldUntil::Indefinite,
            "day-time" => at_hour(6),
            "evening" => at_hour(18),
            "night" => at_hour(22),
            "second-shift" => at_hour(16),
            "third-shift" => at_hour(0),
            "weekend" => {
                use chrono::Datelike;
                let days_until_sat = (6 - now.weekday().num_days_from_monday() + 7) % 7;
                let sat = now.date_naive() + chrono::Duration::days(days_until_sat.max(1) as i64);
                HoldUntil::At(sat.and_hms_opt(now.hour(), 0, 0).unwrap().and_utc())
            }
            _ => HoldUntil::Indefinite,
        }
    }

    pub fn holds_at(self, now: DateTime<Utc>) -> bool {
        match self {
            HoldUntil::NoHold => false,
            HoldUntil::Indefinite => true,
            HoldUntil::At(when) => when > now,
        }
    }
}

/// One document within a job. The bytes live in the spool; the index in the
/// job's file list names them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFile {
    pub format: String,
    pub compressed: bool,
    pub k_octets: u64,
}

/// Cached credential slots, one per authentication role.
pub const AUTH_SLOTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub uuid: Uuid,
    pub user: String,
    pub host: String,
    pub dest: String,
    pub dest_kind: DestKind,
    pub files: Vec<JobFile>,
    pub attrs: AttrList,
    /// 1..=100, larger runs earlier.
    pub priority: i32,
    pub state: JobState,
    pub state_reasons: BTreeSet<String>,
    pub hold_until: HoldUntil,
    pub k_octets: u64,
    pub impressions_completed: i32,
    pub sheets_completed: i32,
    pub created_at: DateTime<Utc>,
    pub processing_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Multi-document intake deadline; `None` once the job is closed.
    pub intake_deadline: Option<DateTime<Utc>>,
    pub auth: [Option<String>; AUTH_SLOTS],
    pub auth_uid: Option<u32>,
    /// Needs a flush to the spool.
    #[serde(skip)]
    pub dirty: bool,
}

impl Job {
    pub fn new(
        id: JobId,
        user: &str,
        host: &str,
        dest: &str,
        dest_kind: DestKind,
        priority: i32,
    ) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4(),
            user: user.to_string(),
            host: host.to_string(),
            dest: dest.to_string(),
            dest_kind,
            files: Vec::new(),
            attrs: AttrList::new(),
            priority,
            state: JobState::Pending,
            state_reasons: ["none".to_string()].into_iter().collect(),
            hold_until: HoldUntil::NoHold,
            k_octets: 0,
            impressions_completed: 0,
            sheets_completed: 0,
            created_at: Utc::now(),
            processing_at: None,
            completed_at: None,
            intake_deadline: None,
            auth: Default::default(),
            auth_uid: None,
            dirty: true,
        }
    }

    pub fn set_reasons(&mut self, reasons: &[&str]) {
        self.state_reasons = reasons.iter().map(|r| r.to_string()).collect();
        if self.state_reasons.is_empty() {
            self.state_reasons.insert("none".to_string());
        }
        self.dirty = true;
    }

    pub fn add_reason(&mut self, reason: &str) {
        self.state_reasons.remove("none");
        self.state_reasons.insert(reason.to_string());
        self.dirty = true;
    }

    pub fn remove_reason(&mut self, reason: &str) {
        self.state_reasons.remove(reason);
        if self.state_reasons.is_empty() {
            self.state_reasons.insert("none".to_string());
        }
        self.dirty = true;
    }

    fn enter(&mut self, state: JobState) {
        self.state = state;
        self.dirty = true;
        match state {
            JobState::Processing => self.processing_at = Some(Utc::now()),
            s if s.is_terminal() => self.completed_at = Some(Utc::now()),
            _ => {}
        }
    }

    /// Transition guard: terminal jobs are immutable.
    fn ensure_mutable(&self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(SchedError::NotPossible(format!(
                "job {} is already {}",
                self.id,
                state_keyword(self.state)
            )));
        }
        Ok(())
    }

    /// Hold with the given `job-hold-until` interpretation.
    pub fn hold(&mut self, until: HoldUntil, reason: &str) -> Result<()> {
        self.ensure_mutable()?;
        if self.state == JobState::Processing {
            return Err(SchedError::NotPossible(format!(
                "job {} is already printing",
                self.id
            )));
        }
        self.hold_until = match until {
            HoldUntil::NoHold => HoldUntil::Indefinite,
            other => other,
        };
        self.enter(JobState::Held);
        self.set_reasons(&[reason]);
        Ok(())
    }

    /// Release a held job back to pending.
    pub fn release(&mut self) -> Result<()> {
        if self.state != JobState::Held {
            return Err(SchedError::NotPossible(format!(
                "job {} is not held",
                self.id
            )));
        }
        self.hold_until = HoldUntil::NoHold;
        self.enter(JobState::Pending);
        self.set_reasons(&["none"]);
        Ok(())
    }

    /// Scheduler picked the job up.
    pub fn start_processing(&mut self) -> Result<()> {
        if self.state != JobState::Pending {
            return Err(SchedError::NotPossible(format!(
                "job {} is not pending",
                self.id
            )));
        }
        self.enter(JobState::Processing);
        self.set_reasons(&["job-printing"]);
        Ok(())
    }

    /// Printing stopped recoverably; the job waits for the printer.
    pub fn stop(&mut self, reason: &str) -> Result<()> {
        self.ensure_mutable()?;
        self.enter(JobState::Stopped);
        self.set_reasons(&[reason]);
        Ok(())
    }

    /// Stopped or held intake returns to pending (printer start, Close-Job).
    pub fn resume_pending(&mut self) -> Result<()> {
        self.ensure_mutable()?;
        if self.state == JobState::Processing {
            return Ok(());
        }
        if self.hold_until.holds_at(Utc::now()) {
            self.enter(JobState::Held);
            self.set_reasons(&["job-hold-until-specified"]);
        } else {
            self.enter(JobState::Pending);
            self.set_reasons(&["none"]);
        }
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.ensure_mutable()?;
        self.enter(JobState::Canceled);
        self.set_reasons(&["job-canceled-by-user"]);
        Ok(())
    }

    pub fn abort(&mut self, reason: &str) -> Result<()> {
        self.ensure_mutable()?;
        self.enter(JobState::Aborted);
        self.set_reasons(&["aborted-by-system", reason]);
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        if self.state != JobState::Processing {
            return Err(SchedError::NotPossible(format!(
                "job {} is not printing",
                self.id
            )));
        }
        self.enter(JobState::Completed);
        self.set_reasons(&["processing-to-stop-point", "job-completed-successfully"]);
        Ok(())
    }

    /// Restart a terminal job whose files were retained.
    pub fn restart(&mut self) -> Result<()> {
        if !self.state.is_terminal() {
            return Err(SchedError::NotPossible(format!(
                "job {} has not finished",
                self.id
            )));
        }
        if self.files.is_empty() {
            return Err(SchedError::NotPossible(format!(
                "job {} no longer has document data",
                self.id
            )));
        }
        self.completed_at = None;
        self.processing_at = None;
        self.impressions_completed = 0;
        self.sheets_completed = 0;
        self.enter(JobState::Pending);
        self.set_reasons(&["job-restarted"]);
        self.resume_pending()
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }
}

pub fn state_keyword(state: JobState) -> &'static str {
    match state {
        JobState::Pending => "pending",
        JobState::Held => "pending-held",
        JobState::Processing => "processing",
        JobState::Stopped => "processing-stopped",
        JobState::Canceled => "canceled",
        JobState::Aborted => "aborted",
        JobState::Completed => "completed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(JobId::new(1), "mei", "localhost", "press", DestKind::Printer, 50)
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut j = job();
        assert_eq!(j.state, JobState::Pending);
        j.start_processing().unwrap();
        assert_eq!(j.state, JobState::Processing);
        j.complete().unwrap();
        assert_eq!(j.state, JobState::Completed);
        assert!(j.completed_at.is_some());
    }

    #[test]
    fn hold_and_release() {
        let mut j = job();
        j.hold(HoldUntil::Indefinite, "job-hold-until-specified")
            .unwrap();
        assert_eq!(j.state, JobState::Held);
        assert!(j.state_reasons.contains("job-hold-until-specified"));
        j.release().unwrap();
        assert_eq!(j.state, JobState::Pending);
        assert_eq!(j.hold_until, HoldUntil::NoHold);
        assert!(j.state_reasons.contains("none"));
    }

    #[test]
    fn release_requires_held() {
        let mut j = job();
        assert!(matches!(j.release(), Err(SchedError::NotPossible(_))));
    }

    #[test]
    fn terminal_jobs_are_immutable() {
        let mut j = job();
        j.cancel().unwrap();
        assert!(matches!(j.cancel(), Err(SchedError::NotPossible(_))));
        assert!(matches!(
            j.hold(HoldUntil::Indefinite, "x"),
            Err(SchedError::NotPossible(_))
        ));
        assert_eq!(j.state, JobState::Canceled);
    }

    #[test]
    fn restart_needs_files() {
        let mut j = job();
        j.cancel().unwrap();
        assert!(j.restart().is_err());
        j.files.push(JobFile {
            format: "application/pdf".into(),
            compressed: false,
            k_octets: 4,
        });
        j.restart().unwrap();
        assert_eq!(j.state, JobState::Pending);
    }

    #[test]
    fn stopped_resumes_respecting_hold() {
        let mut j = job();
        j.stop("printer-stopped").unwrap();
        j.hold_until = HoldUntil::Indefinite;
        j.resume_pending().unwrap();
        assert_eq!(j.state, JobState::Held);
        j.hold_until = HoldUntil::NoHold;
        j.resume_pending().unwrap();
        assert_eq!(j.state, JobState::Pending);
    }

    #[test]
    fn hold_keyword_mapping() {
        let now = Utc::now();
        assert_eq!(HoldUntil::from_keyword("no-hold", now), HoldUntil::NoHold);
        assert_eq!(
            HoldUntil::from_keyword("indefinite", now),
            HoldUntil::Indefinite
        );
        match HoldUntil::from_keyword("night", now) {
            HoldUntil::At(when) => assert!(when > now),
            other => panic!("expected timed hold, got {other:?}"),
        }
    }

    #[test]
    fn state_ordering_matches_activity() {
        assert!(JobState::Stopped.is_active());
        assert!(!JobState::Canceled.is_active());
        assert!(JobState::Completed.is_terminal());
        assert!(!JobState::Processing.is_terminal());
    }
}
