//! Subscriptions and event delivery.

use crate::config::ServerConfig;
use crate::error::{Result, SchedError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info};
use url::Url;
use vellum_proto::{AttrList, JobId, SubscriptionId};

/// Bound on queued events per subscription; older events age out and
/// `notify-first-event-id` advances past them.
pub const EVENT_RING_CAP: usize = 100;

/// Event kind bits and their protocol keywords.
pub mod event_mask {
    pub const PRINTER_STATE_CHANGED: u32 = 1 << 0;
    pub const PRINTER_RESTARTED: u32 = 1 << 1;
    pub const PRINTER_SHUTDOWN: u32 = 1 << 2;
    pub const PRINTER_STOPPED: u32 = 1 << 3;
    pub const PRINTER_CONFIG_CHANGED: u32 = 1 << 4;
    pub const PRINTER_MEDIA_CHANGED: u32 = 1 << 5;
    pub const PRINTER_ADDED: u32 = 1 << 6;
    pub const PRINTER_DELETED: u32 = 1 << 7;
    pub const PRINTER_MODIFIED: u32 = 1 << 8;
    pub const PRINTER_QUEUE_ORDER_CHANGED: u32 = 1 << 9;
    pub const JOB_STATE_CHANGED: u32 = 1 << 10;
    pub const JOB_CREATED: u32 = 1 << 11;
    pub const JOB_COMPLETED: u32 = 1 << 12;
    pub const JOB_STOPPED: u32 = 1 << 13;
    pub const JOB_CONFIG_CHANGED: u32 = 1 << 14;
    pub const JOB_PROGRESS: u32 = 1 << 15;
    pub const SERVER_RESTARTED: u32 = 1 << 16;
    pub const SERVER_STARTED: u32 = 1 << 17;
    pub const SERVER_STOPPED: u32 = 1 << 18;
    pub const SERVER_AUDIT: u32 = 1 << 19;
    pub const ALL: u32 = (1 << 20) - 1;

    const TABLE: &[(u32, &str)] = &[
        (PRINTER_STATE_CHANGED, "printer-state-changed"),
        (PRINTER_RESTARTED, "printer-restarted"),
        (PRINTER_SHUTDOWN, "printer-shutdown"),
        (PRINTER_STOPPED, "printer-stopped"),
        (PRINTER_CONFIG_CHANGED, "printer-config-changed"),
        (PRINTER_MEDIA_CHANGED, "printer-media-changed"),
        (PRINTER_ADDED, "printer-added"),
        (PRINTER_DELETED, "printer-deleted"),
        (PRINTER_MODIFIED, "printer-modified"),
        (PRINTER_QUEUE_ORDER_CHANGED, "printer-queue-order-changed"),
        (JOB_STATE_CHANGED, "job-state-changed"),
        (JOB_CREATED, "job-created"),
        (JOB_COMPLETED, "job-completed"),
        (JOB_STOPPED, "job-stopped"),
        (JOB_CONFIG_CHANGED, "job-config-changed"),
        (JOB_PROGRESS, "job-progress"),
        (SERVER_RESTARTED, "server-restarted"),
        (SERVER_STARTED, "server-started"),
        (SERVER_STOPPED, "server-stopped"),
        (SERVER_AUDIT, "server-audit"),
    ];

    /// Keyword for a single event bit.
    pub fn keyword(kind: u32) -> &'static str {
        TABLE
            .iter()
            .find(|(bit, _)| *bit == kind)
            .map(|(_, kw)| *kw)
            .unwrap_or("none")
    }

    /// Mask bit for a keyword; `all` selects everything, unknown keywords
    /// select nothing.
    pub fn from_keyword(keyword: &str) -> u32 {
        if keyword == "all" {
            return ALL;
        }
        TABLE
            .iter()
            .find(|(_, kw)| *kw == keyword)
            .map(|(bit, _)| *bit)
            .unwrap_or(0)
    }

    pub fn keywords(mask: u32) -> Vec<&'static str> {
        if mask == 0 {
            return vec!["none"];
        }
        TABLE
            .iter()
            .filter(|(bit, _)| mask & bit != 0)
            .map(|(_, kw)| *kw)
            .collect()
    }
}

/// A captured event: enough of a snapshot to render the notification after
/// the job or printer is gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: i32,
    pub time: DateTime<Utc>,
    pub kind: u32,
    pub text: String,
    pub snapshot: AttrList,
}

/// What happened, before fan-out to subscriptions.
#[derive(Debug, Clone)]
pub struct EventSpec {
    pub kind: u32,
    pub dest: Option<String>,
    pub job: Option<JobId>,
    pub text: String,
    pub snapshot: AttrList,
}

/// A rendered push notification awaiting a notifier process.
#[derive(Debug, Clone)]
pub struct PushDelivery {
    pub subscription: SubscriptionId,
    pub scheme: String,
    pub recipient: String,
    pub event: Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub mask: u32,
    /// Destination scope; weak reference by name.
    pub dest: Option<String>,
    /// Job scope.
    pub job: Option<JobId>,
    /// Push recipient uri; `None` for pull subscriptions.
    pub recipient: Option<String>,
    /// Pull method; only `ippget` is known.
    pub pull_method: Option<String>,
    pub user_data: Vec<u8>,
    /// Minimum seconds between identical events.
    pub interval: u32,
    pub lease_secs: u32,
    /// `None` = never expires.
    pub expire: Option<DateTime<Utc>>,
    pub owner: String,
    next_seq: i32,
    first_event_id: i32,
    events: VecDeque<Event>,
    #[serde(skip)]
    last_sent: HashMap<u32, DateTime<Utc>>,
}

impl Subscription {
    pub fn next_sequence(&self) -> i32 {
        self.next_seq
    }

    pub fn first_event_id(&self) -> i32 {
        self.first_event_id
    }

    pub fn queued_events(&self) -> usize {
        self.events.len()
    }

    fn scope_matches(&self, spec: &EventSpec) -> bool {
        if let Some(job) = self.job {
            return spec.job == Some(job);
        }
        if let Some(dest) = &self.dest {
            return spec
                .dest
                .as_deref()
                .map(|d| d.eq_ignore_ascii_case(dest))
                .unwrap_or(false);
        }
        true
    }

    fn throttled(&mut self, kind: u32, now: DateTime<Utc>) -> bool {
        if self.interval == 0 {
            return false;
        }
        if let Some(last) = self.last_sent.get(&kind) {
            if now.signed_duration_since(*last).num_seconds() < self.interval as i64 {
                return true;
            }
        }
        self.last_sent.insert(kind, now);
        false
    }

    fn capture(&mut self, spec: &EventSpec, now: DateTime<Utc>) -> Event {
        let event = Event {
            seq: self.next_seq,
            time: now,
            kind: spec.kind,
            text: spec.text.clone(),
            snapshot: spec.snapshot.clone(),
        };
        self.next_seq += 1;
        self.events.push_back(event.clone());
        while self.events.len() > EVENT_RING_CAP {
            self.events.pop_front();
            self.first_event_id += 1;
        }
        debug_assert_eq!(
            self.first_event_id + self.events.len() as i32,
            self.next_seq
        );
        event
    }

    /// Events with sequence number >= `min_seq`.
    pub fn events_from(&self, min_seq: i32) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| e.seq >= min_seq)
            .cloned()
            .collect()
    }
}

/// Parameters for a new subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscribeRequest {
    pub mask: u32,
    pub dest: Option<String>,
    pub job: Option<JobId>,
    pub recipient: Option<String>,
    pub pull_method: Option<String>,
    pub user_data: Vec<u8>,
    pub interval: u32,
    pub lease_secs: Option<u32>,
    pub owner: String,
}

#[derive(Debug)]
pub struct SubEngine {
    subs: BTreeMap<SubscriptionId, Subscription>,
    next_id: SubscriptionId,
    push_backlog: Vec<PushDelivery>,
}

impl SubEngine {
    pub fn new() -> Self {
        Self {
            subs: BTreeMap::new(),
            next_id: SubscriptionId::new(1),
            push_backlog: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    pub fn get(&self, id: SubscriptionId) -> Result<&Subscription> {
        self.subs
            .get(&id)
            .ok_or_else(|| SchedError::NotFound(format!("subscription {id} does not exist")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.subs.values()
    }

    /// Create a subscription, vetting recipient scheme, pull method, user
    /// data, and caps.
    pub fn create(&mut self, cfg: &ServerConfig, req: SubscribeRequest) -> Result<SubscriptionId> {
        if cfg.max_subscriptions > 0 && self.subs.len() >= cfg.max_subscriptions {
            return Err(SchedError::TooManySubscriptions);
        }
        if cfg.max_subscriptions_per_user > 0 {
            let owned = self.subs.values().filter(|s| s.owner == req.owner).count();
            if owned >= cfg.max_subscriptions_per_user {
                return Err(SchedError::TooManySubscriptions);
            }
        }

        let mut scheme = None;
        if let Some(recipient) = &req.recipient {
            let parsed = Url::parse(recipient).map_err(|_| {
                SchedError::BadRequest(format!("malformed notify-recipient-uri {recipient:?}"))
            })?;
            let s = parsed.scheme().to_string();
            if !cfg.notifier_schemes.contains(&s) {
                return Err(SchedError::UriSchemeNotSupported(s));
            }
            if s == "rss"
                && self
                    .subs
                    .values()
                    .any(|sub| sub.recipient.as_deref() == Some(recipient.as_str()))
            {
                return Err(SchedError::NotPossible(format!(
                    "an rss subscription for {recipient:?} already exists"
                )));
            }
            scheme = Some(s);
        } else {
            match req.pull_method.as_deref() {
                Some("ippget") => {}
                Some(other) => {
                    return Err(SchedError::AttributesNotSupported {
                        reason: format!("notify-pull-method {other:?} is not supported"),
                        attrs: vec![vellum_proto::Attribute::keyword(
                            "notify-pull-method",
                            other,
                        )],
                    })
                }
                None => {
                    return Err(SchedError::BadRequest(
                        "subscription needs a recipient or a pull method".to_string(),
                    ))
                }
            }
        }

        if req.user_data.len() > 63 {
            return Err(SchedError::RequestValueTooLong("notify-user-data".into()));
        }

        let lease_secs = if req.job.is_some() {
            // job subscriptions live exactly as long as the job
            0
        } else {
            let requested = req.lease_secs.unwrap_or(cfg.default_lease_secs);
            if cfg.max_lease_secs > 0 && (requested == 0 || requested > cfg.max_lease_secs) {
                cfg.max_lease_secs
            } else {
                requested
            }
        };
        let expire = if lease_secs > 0 {
            Some(Utc::now() + Duration::seconds(lease_secs as i64))
        } else {
            None
        };

        let id = self.next_id;
        self.next_id = self.next_id.next();
        let sub = Subscription {
            id,
            mask: req.mask,
            dest: req.dest,
            job: req.job,
            recipient: req.recipient,
            pull_method: req.pull_method,
            user_data: req.user_data,
            interval: req.interval,
            lease_secs,
            expire,
            owner: req.owner,
            next_seq: 1,
            first_event_id: 1,
            events: VecDeque::new(),
            last_sent: HashMap::new(),
        };
        info!(subscription = %id, scheme = scheme.as_deref().unwrap_or("ippget"), "subscription created");
        self.subs.insert(id, sub);
        Ok(id)
    }

    /// Extend a lease. Job subscriptions cannot be renewed.
    pub fn renew(&mut self, cfg: &ServerConfig, id: SubscriptionId, lease_secs: u32) -> Result<u32> {
        let sub = self
            .subs
            .get_mut(&id)
            .ok_or_else(|| SchedError::NotFound(format!("subscription {id} does not exist")))?;
        if sub.job.is_some() {
            return Err(SchedError::NotPossible(
                "job subscriptions cannot be renewed".to_string(),
            ));
        }
        let effective = if cfg.max_lease_secs > 0 && (lease_secs == 0 || lease_secs > cfg.max_lease_secs)
        {
            cfg.max_lease_secs
        } else {
            lease_secs
        };
        sub.lease_secs = effective;
        sub.expire = if effective > 0 {
            Some(Utc::now() + Duration::seconds(effective as i64))
        } else {
            None
        };
        Ok(effective)
    }

    pub fn cancel(&mut self, id: SubscriptionId) -> Result<Subscription> {
        self.subs
            .remove(&id)
            .ok_or_else(|| SchedError::NotFound(format!("subscription {id} does not exist")))
    }

    /// Fan an event out to every matching subscription.
    pub fn enqueue(&mut self, spec: &EventSpec) {
        let now = Utc::now();
        for sub in self.subs.values_mut() {
            if sub.mask & spec.kind == 0 || !sub.scope_matches(spec) {
                continue;
            }
            if sub.throttled(spec.kind, now) {
                continue;
            }
            let event = sub.capture(spec, now);
            debug!(subscription = %sub.id, seq = event.seq, kind = event_mask::keyword(spec.kind), "event queued");
            if let Some(recipient) = &sub.recipient {
                let scheme = Url::parse(recipient)
                    .map(|u| u.scheme().to_string())
                    .unwrap_or_default();
                self.push_backlog.push(PushDelivery {
                    subscription: sub.id,
                    scheme,
                    recipient: recipient.clone(),
                    event,
                });
            }
        }
    }

    /// Drain notifications awaiting delivery by notifier processes.
    pub fn take_push_backlog(&mut self) -> Vec<PushDelivery> {
        std::mem::take(&mut self.push_backlog)
    }

    /// Remove subscriptions whose lease has run out.
    pub fn expire_leases(&mut self, now: DateTime<Utc>) -> Vec<SubscriptionId> {
        let expired: Vec<SubscriptionId> = self
            .subs
            .values()
            .filter(|s| matches!(s.expire, Some(when) if when <= now))
            .map(|s| s.id)
            .collect();
        for id in &expired {
            info!(subscription = %id, "subscription lease expired");
            self.subs.remove(id);
        }
        expired
    }

    /// Rebuild from a persisted snapshot; sequence counters carry over.
    pub fn restore(&mut self, subs: Vec<Subscription>) {
        for sub in subs {
            if sub.id >= self.next_id {
                self.next_id = sub.id.next();
            }
            self.subs.insert(sub.id, sub);
        }
    }

    /// Job ended: its subscriptions go with it.
    pub fn drop_for_job(&mut self, job: JobId) {
        self.subs.retain(|_, s| s.job != Some(job));
    }

    /// Destination deleted: per-destination subscriptions go with it.
    pub fn drop_for_dest(&mut self, dest: &str) {
        self.subs
            .retain(|_, s| !matches!(&s.dest, Some(d) if d.eq_ignore_ascii_case(dest)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ServerConfig {
        ServerConfig::default()
    }

    fn pull_request(mask: u32) -> SubscribeRequest {
        SubscribeRequest {
            mask,
            pull_method: Some("ippget".to_string()),
            owner: "mei".to_string(),
            ..Default::default()
        }
    }

    fn spec(kind: u32) -> EventSpec {
        EventSpec {
            kind,
            dest: None,
            job: None,
            text: "event".to_string(),
            snapshot: AttrList::new(),
        }
    }

    #[test]
    fn sequence_numbers_start_at_one_and_increase() {
        let mut engine = SubEngine::new();
        let id = engine
            .create(&cfg(), pull_request(event_mask::ALL))
            .unwrap();
        engine.enqueue(&spec(event_mask::JOB_CREATED));
        engine.enqueue(&spec(event_mask::JOB_COMPLETED));
        let events = engine.get(id).unwrap().events_from(1);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[1].seq, 2);
    }

    #[test]
    fn mask_filters_events() {
        let mut engine = SubEngine::new();
        let id = engine
            .create(&cfg(), pull_request(event_mask::JOB_COMPLETED))
            .unwrap();
        engine.enqueue(&spec(event_mask::JOB_CREATED));
        assert_eq!(engine.get(id).unwrap().queued_events(), 0);
        engine.enqueue(&spec(event_mask::JOB_COMPLETED));
        assert_eq!(engine.get(id).unwrap().queued_events(), 1);
    }

    #[test]
    fn scope_filters_events() {
        let mut engine = SubEngine::new();
        let mut req = pull_request(event_mask::ALL);
        req.dest = Some("press".to_string());
        let id = engine.create(&cfg(), req).unwrap();

        let mut other = spec(event_mask::PRINTER_STATE_CHANGED);
        other.dest = Some("other".to_string());
        engine.enqueue(&other);
        assert_eq!(engine.get(id).unwrap().queued_events(), 0);

        let mut ours = spec(event_mask::PRINTER_STATE_CHANGED);
        ours.dest = Some("Press".to_string());
        engine.enqueue(&ours);
        assert_eq!(engine.get(id).unwrap().queued_events(), 1);
    }

    #[test]
    fn ring_cap_advances_first_event_id() {
        let mut engine = SubEngine::new();
        let id = engine
            .create(&cfg(), pull_request(event_mask::ALL))
            .unwrap();
        for _ in 0..(EVENT_RING_CAP + 10) {
            engine.enqueue(&spec(event_mask::JOB_PROGRESS));
        }
        let sub = engine.get(id).unwrap();
        assert_eq!(sub.queued_events(), EVENT_RING_CAP);
        assert_eq!(
            sub.first_event_id() + sub.queued_events() as i32,
            sub.next_sequence()
        );
    }

    #[test]
    fn unknown_pull_method_rejected() {
        let mut engine = SubEngine::new();
        let mut req = pull_request(event_mask::ALL);
        req.pull_method = Some("poke".to_string());
        assert!(matches!(
            engine.create(&cfg(), req),
            Err(SchedError::AttributesNotSupported { .. })
        ));
    }

    #[test]
    fn unknown_recipient_scheme_rejected() {
        let mut engine = SubEngine::new();
        let req = SubscribeRequest {
            mask: event_mask::ALL,
            recipient: Some("gopher://feed.example/x".to_string()),
            owner: "mei".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            engine.create(&cfg(), req),
            Err(SchedError::UriSchemeNotSupported(_))
        ));
    }

    #[test]
    fn duplicate_rss_recipient_rejected() {
        let mut engine = SubEngine::new();
        let req = SubscribeRequest {
            mask: event_mask::ALL,
            recipient: Some("rss://feed.example/x".to_string()),
            owner: "mei".to_string(),
            ..Default::default()
        };
        engine.create(&cfg(), req.clone()).unwrap();
        assert!(matches!(
            engine.create(&cfg(), req),
            Err(SchedError::NotPossible(_))
        ));
    }

    #[test]
    fn oversized_user_data_rejected() {
        let mut engine = SubEngine::new();
        let mut req = pull_request(event_mask::ALL);
        req.user_data = vec![0u8; 64];
        assert!(matches!(
            engine.create(&cfg(), req),
            Err(SchedError::RequestValueTooLong(_))
        ));
    }

    #[test]
    fn job_subscriptions_cannot_renew() {
        let mut engine = SubEngine::new();
        let mut req = pull_request(event_mask::ALL);
        req.job = Some(JobId::new(4));
        let id = engine.create(&cfg(), req).unwrap();
        assert!(matches!(
            engine.renew(&cfg(), id, 60),
            Err(SchedError::NotPossible(_))
        ));
    }

    #[test]
    fn lease_expiry_sweep() {
        let mut engine = SubEngine::new();
        let mut req = pull_request(event_mask::ALL);
        req.lease_secs = Some(1);
        let id = engine.create(&cfg(), req).unwrap();
        let expired = engine.expire_leases(Utc::now() + Duration::seconds(5));
        assert_eq!(expired, vec![id]);
        assert!(engine.get(id).is_err());
    }

    #[test]
    fn subscription_cap_enforced() {
        let mut cfg = cfg();
        cfg.max_subscriptions = 1;
        let mut engine = SubEngine::new();
        engine.create(&cfg, pull_request(event_mask::ALL)).unwrap();
        assert!(matches!(
            engine.create(&cfg, pull_request(event_mask::ALL)),
            Err(SchedError::TooManySubscriptions)
        ));
    }

    #[test]
    fn push_backlog_collects_deliveries() {
        let mut engine = SubEngine::new();
        let req = SubscribeRequest {
            mask: event_mask::ALL,
            recipient: Some("mailto:ops@example.com".to_string()),
            owner: "mei".to_string(),
            ..Default::default()
        };
        engine.create(&cfg(), req).unwrap();
        engine.enqueue(&spec(event_mask::PRINTER_ADDED));
        let backlog = engine.take_push_backlog();
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].scheme, "mailto");
        assert!(engine.take_push_backlog().is_empty());
    }

    #[test]
    fn interval_throttles_identical_events() {
        let mut engine = SubEngine::new();
        let mut req = pull_request(event_mask::ALL);
        req.interval = 60;
        let id = engine.create(&cfg(), req).unwrap();
        engine.enqueue(&spec(event_mask::JOB_PROGRESS));
        engine.enqueue(&spec(event_mask::JOB_PROGRESS));
        assert_eq!(engine.get(id).unwrap().queued_events(), 1);
    }

    #[test]
    fn keyword_mask_roundtrip() {
        assert_eq!(
            event_mask::from_keyword("job-completed"),
            event_mask::JOB_COMPLETED
        );
        assert_eq!(event_mask::from_keyword("all"), event_mask::ALL);
        assert_eq!(event_mask::from_keyword("bogus"), 0);
        assert_eq!(
            event_mask::keywords(event_mask::JOB_CREATED | event_mask::JOB_COMPLETED),
            vec!["job-created", "job-completed"]
        );
    }
}
