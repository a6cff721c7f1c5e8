//! Destination registry: printers and classes.

use crate::client::ClientContext;
use crate::error::{Result, SchedError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;
use uuid::Uuid;
use vellum_proto::{validate_dest_name, DestId, DestKind};

/// Printer state enum values carried in `printer-state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum DestState {
    Idle = 3,
    Processing = 4,
    Stopped = 5,
}

impl DestState {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// A printer or class and its configured attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub id: DestId,
    pub name: String,
    pub kind: DestKind,
    pub uuid: Uuid,
    pub info: String,
    pub location: String,
    pub geo_location: String,
    pub organization: String,
    pub organizational_unit: String,
    pub make_model: String,
    pub device_uri: String,
    pub port_monitor: String,
    /// Policy names; empty falls back to the server default.
    pub op_policy: String,
    pub error_policy: String,
    pub state: DestState,
    pub state_message: String,
    pub state_reasons: BTreeSet<String>,
    pub state_time: DateTime<Utc>,
    pub accepting: bool,
    pub shared: bool,
    pub temporary: bool,
    pub holding_new_jobs: bool,
    /// Destination is a proxy for a queue on another server.
    pub remote: bool,
    /// Users list: names or `@group` entries; `deny_users` flips the match.
    pub users: Vec<String>,
    pub deny_users: bool,
    pub quota_period_secs: u64,
    pub page_limit: u32,
    pub k_limit: u32,
    /// Start and end cover sheets.
    pub job_sheets: (String, String),
    /// Option defaults applied to jobs that did not choose.
    pub option_defaults: BTreeMap<String, String>,
    /// Attributes every job must supply.
    pub mandatory_attrs: Vec<String>,
    /// Accepted document formats; empty accepts everything.
    pub mime_types: BTreeSet<String>,
    /// Member destination names; classes only, weak references.
    pub members: Vec<String>,
    pub auth_info_required: Vec<String>,
}

impl Destination {
    fn new(id: DestId, name: &str, kind: DestKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            uuid: Uuid::new_v4(),
            info: name.to_string(),
            location: String::new(),
            geo_location: String::new(),
            organization: String::new(),
            organizational_unit: String::new(),
            make_model: String::new(),
            device_uri: String::new(),
            port_monitor: String::new(),
            op_policy: String::new(),
            error_policy: "stop-printer".to_string(),
            state: DestState::Idle,
            state_message: String::new(),
            state_reasons: ["none".to_string()].into_iter().collect(),
            state_time: Utc::now(),
            accepting: true,
            shared: true,
            temporary: false,
            holding_new_jobs: false,
            remote: false,
            users: Vec::new(),
            deny_users: false,
            quota_period_secs: 0,
            page_limit: 0,
            k_limit: 0,
            job_sheets: ("none".to_string(), "none".to_string()),
            option_defaults: BTreeMap::new(),
            mandatory_attrs: Vec::new(),
            mime_types: BTreeSet::new(),
            members: Vec::new(),
            auth_info_required: Vec::new(),
        }
    }

    pub fn is_class(&self) -> bool {
        self.kind == DestKind::Class
    }

    /// Ready to start another job.
    pub fn ready(&self) -> bool {
        self.state != DestState::Stopped && self.accepting && !self.holding_new_jobs
    }

    /// Evaluate the users list for this client.
    pub fn user_allowed(&self, ctx: &ClientContext) -> bool {
        if self.users.is_empty() {
            return true;
        }
        let matched = self.users.iter().any(|entry| {
            if let Some(group) = entry.strip_prefix('@') {
                ctx.in_group(group)
            } else if entry.starts_with('#') {
                // uuid entries only match an identity presented verbatim
                ctx.user == *entry
            } else {
                ctx.user == *entry
            }
        });
        if self.deny_users {
            !matched
        } else {
            matched
        }
    }

    fn set_reason(&mut self, reason: &str, present: bool) {
        if present {
            self.state_reasons.remove("none");
            self.state_reasons.insert(reason.to_string());
        } else {
            self.state_reasons.remove(reason);
            if self.state_reasons.is_empty() {
                self.state_reasons.insert("none".to_string());
            }
        }
    }

    /// Stop the destination (adds the `paused` reason).
    pub fn stop(&mut self) {
        if self.state != DestState::Stopped {
            self.state = DestState::Stopped;
            self.state_time = Utc::now();
        }
        self.set_reason("paused", true);
    }

    /// Return the destination to service.
    pub fn start(&mut self) {
        if self.state == DestState::Stopped {
            self.state = DestState::Idle;
            self.state_time = Utc::now();
        }
        self.set_reason("paused", false);
    }

    pub fn set_processing(&mut self, busy: bool) {
        let next = if busy {
            DestState::Processing
        } else {
            DestState::Idle
        };
        if self.state != DestState::Stopped && self.state != next {
            self.state = next;
            self.state_time = Utc::now();
        }
    }

    pub fn hold_new_jobs(&mut self) {
        self.holding_new_jobs = true;
        self.set_reason("hold-new-jobs", true);
    }

    pub fn release_held_new_jobs(&mut self) {
        self.holding_new_jobs = false;
        self.set_reason("hold-new-jobs", false);
    }

    /// Accept a document format, honoring wildcard entries.
    pub fn accepts_type(&self, mime: &str) -> bool {
        if self.mime_types.is_empty() || self.mime_types.contains("application/octet-stream") {
            return true;
        }
        if self.mime_types.contains(mime) {
            return true;
        }
        mime.split_once('/')
            .map(|(super_type, _)| self.mime_types.contains(&format!("{super_type}/*")))
            .unwrap_or(false)
    }
}

/// In-memory set of destinations, keyed case-insensitively by name.
#[derive(Debug, Default)]
pub struct Registry {
    dests: BTreeMap<String, Destination>,
    default_dest: Option<String>,
    next_id: i32,
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

impl Registry {
    pub fn new() -> Self {
        Self {
            dests: BTreeMap::new(),
            default_dest: None,
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.dests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Destination> {
        self.dests.values()
    }

    pub fn find(&self, name: &str) -> Option<&Destination> {
        self.dests.get(&key(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Destination> {
        self.dests.get_mut(&key(name))
    }

    pub fn get(&self, name: &str) -> Result<&Destination> {
        self.find(name)
            .ok_or_else(|| SchedError::NotFound(format!("destination {name:?} does not exist")))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Destination> {
        self.dests
            .get_mut(&key(name))
            .ok_or_else(|| SchedError::NotFound(format!("destination {name:?} does not exist")))
    }

    pub fn default_dest(&self) -> Option<&Destination> {
        self.default_dest.as_deref().and_then(|name| self.find(name))
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        self.get(name)?;
        self.default_dest = Some(name.to_string());
        Ok(())
    }

    /// Add a printer. The name must validate and may not collide with an
    /// existing class (or printer).
    pub fn add_printer(&mut self, name: &str) -> Result<&mut Destination> {
        self.add(name, DestKind::Printer)
    }

    /// Add a class; same collision rules as printers.
    pub fn add_class(&mut self, name: &str) -> Result<&mut Destination> {
        self.add(name, DestKind::Class)
    }

    fn add(&mut self, name: &str, kind: DestKind) -> Result<&mut Destination> {
        validate_dest_name(name)?;
        if let Some(existing) = self.find(name) {
            if existing.kind != kind {
                return Err(SchedError::NotPossible(format!(
                    "a {} named {name:?} already exists",
                    existing.kind.path_segment().trim_end_matches('s')
                )));
            }
            // modify-in-place for the existing destination of the same kind
            return Ok(self.dests.get_mut(&key(name)).unwrap());
        }
        let id = DestId::new(self.next_id);
        self.next_id += 1;
        info!(name, kind = ?kind, id = %id, "destination added");
        self.dests.insert(key(name), Destination::new(id, name, kind));
        if self.default_dest.is_none() {
            self.default_dest = Some(name.to_string());
        }
        Ok(self.dests.get_mut(&key(name)).unwrap())
    }

    /// Remove a destination record. Cascades (job purge, subscription expiry,
    /// events) are orchestrated by the scheduler.
    pub fn remove(&mut self, name: &str) -> Result<Destination> {
        let dest = self
            .dests
            .remove(&key(name))
            .ok_or_else(|| SchedError::NotFound(format!("destination {name:?} does not exist")))?;
        if self.default_dest.as_deref() == Some(dest.name.as_str()) {
            self.default_dest = self.dests.values().next().map(|d| d.name.clone());
        }
        // drop the deleted destination from any class member list
        for other in self.dests.values_mut() {
            other.members.retain(|m| !m.eq_ignore_ascii_case(name));
        }
        info!(name, "destination removed");
        Ok(dest)
    }

    /// Resolve a class to the member that should take the next job, skipping
    /// members that are not ready. Plain printers resolve to themselves.
    pub fn resolve_for_job(&self, name: &str) -> Option<&Destination> {
        let dest = self.find(name)?;
        if !dest.is_class() {
            return Some(dest);
        }
        dest.members
            .iter()
            .filter_map(|m| self.find(m))
            .find(|m| m.ready() && m.state == DestState::Idle)
            .or_else(|| dest.members.iter().filter_map(|m| self.find(m)).next())
    }

    /// Set class membership. Classes must not contain classes.
    pub fn set_members(&mut self, class_name: &str, members: Vec<String>) -> Result<()> {
        for member in &members {
            let dest = self.get(member)?;
            if dest.is_class() {
                return Err(SchedError::NotPossible(format!(
                    "class member {member:?} is itself a class"
                )));
            }
        }
        let class = self.get_mut(class_name)?;
        if !class.is_class() {
            return Err(SchedError::NotPossible(format!(
                "{class_name:?} is not a class"
            )));
        }
        class.members = members;
        Ok(())
    }

    /// Rebuild from a persisted snapshot.
    pub fn restore(&mut self, dests: Vec<Destination>, default_dest: Option<String>) {
        for dest in dests {
            if dest.id.as_i32() >= self.next_id {
                self.next_id = dest.id.as_i32() + 1;
            }
            self.dests.insert(key(&dest.name), dest);
        }
        self.default_dest = default_dest.filter(|name| self.find(name).is_some()).or_else(|| {
            self.dests.values().next().map(|d| d.name.clone())
        });
    }

    /// Expired temporary printers, ready for collection.
    pub fn expired_temporaries(&self, now: DateTime<Utc>, ttl_secs: u64) -> Vec<String> {
        self.dests
            .values()
            .filter(|d| d.temporary)
            .filter(|d| {
                let idle = now.signed_duration_since(d.state_time).num_seconds();
                idle >= 0 && idle as u64 >= ttl_secs
            })
            .map(|d| d.name.clone())
            .collect()
    }
}
