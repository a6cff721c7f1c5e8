//! Operation handlers and the response-building helpers they share.

pub mod jobs;
pub mod printers;
pub mod subscriptions;

use crate::client::ClientContext;
use crate::error::{Result, SchedError};
use crate::job::{state_keyword, HoldUntil, Job};
use crate::policy::PolicyDecision;
use crate::registry::Destination;
use crate::scheduler::{job_name, Scheduler};
use std::collections::HashSet;
use vellum_proto::{
    parse_dest_uri, parse_job_uri, AttrList, Attribute, DestKind, DestRef, GroupTag, IppMessage,
    JobId, Operation, StatusCode, ValueTag,
};

pub use crate::dispatch::response_for;

/// Bits of the `printer-type` capability mask.
pub mod printer_type {
    pub const CLASS: i32 = 0x0001;
    pub const REMOTE: i32 = 0x0002;
    pub const DEFAULT: i32 = 0x0002_0000;
    pub const NOT_SHARED: i32 = 0x0020_0000;
    pub const TEMPORARY: i32 = 0x0100_0000;
}

pub(crate) fn ok_response(sched: &Scheduler, msg: &IppMessage) -> IppMessage {
    response_for(sched, msg, StatusCode::Ok)
}

/// Map a policy decision onto the error taxonomy.
pub(crate) fn check_policy(
    sched: &Scheduler,
    client: &ClientContext,
    op: Operation,
    policy_name: &str,
    owner: Option<&str>,
) -> Result<()> {
    let policy = if policy_name.is_empty() {
        sched.config.default_policy.as_str()
    } else {
        policy_name
    };
    match sched.policies.check(policy, op, client, owner) {
        PolicyDecision::Allow => Ok(()),
        PolicyDecision::Forbidden => Err(SchedError::NotAuthorized(format!(
            "{} is not permitted for {:?}",
            op.name(),
            client.user
        ))),
        PolicyDecision::AuthRequired => Err(SchedError::NotAuthenticated),
        PolicyDecision::UpgradeRequired => Err(SchedError::UpgradeRequired),
    }
}

/// Destination reference from `printer-uri`, when the uri names one.
/// `ipp://host/` (the whole server) yields `None`.
pub(crate) fn dest_ref(msg: &IppMessage) -> Result<Option<DestRef>> {
    let Some(attr) = msg.attrs.find_in(GroupTag::Operation, "printer-uri") else {
        return Ok(None);
    };
    let uri = attr
        .as_str()
        .ok_or_else(|| SchedError::BadRequest("printer-uri is not a uri".into()))?;
    match parse_dest_uri(uri) {
        Ok(dest) => Ok(Some(dest)),
        Err(_) => Ok(None),
    }
}

/// The destination a request addresses, as a snapshot.
pub(crate) fn target_dest(sched: &Scheduler, msg: &IppMessage) -> Result<Destination> {
    let dest = dest_ref(msg)?
        .ok_or_else(|| SchedError::BadRequest("request needs a destination uri".into()))?;
    let registry = sched.registry.read().unwrap();
    let found = registry.get(&dest.name)?;
    if found.kind != dest.kind {
        return Err(SchedError::NotFound(format!(
            "destination {:?} does not exist",
            dest.name
        )));
    }
    Ok(found.clone())
}

/// The job a request addresses: `job-uri`, or `printer-uri` plus `job-id`.
pub(crate) fn target_job_id(msg: &IppMessage) -> Result<JobId> {
    if let Some(attr) = msg.attrs.find_in(GroupTag::Operation, "job-uri") {
        let uri = attr
            .as_str()
            .ok_or_else(|| SchedError::BadRequest("job-uri is not a uri".into()))?;
        return Ok(parse_job_uri(uri)?);
    }
    let id = msg
        .attrs
        .find_in(GroupTag::Operation, "job-id")
        .and_then(|a| a.as_integer())
        .ok_or_else(|| SchedError::BadRequest("request names no job".into()))?;
    JobId::checked(id).map_err(|_| SchedError::BadRequest(format!("job-id {id} out of range")))
}

pub(crate) fn job_snapshot(sched: &Scheduler, id: JobId) -> Result<Job> {
    Ok(sched.jobs.read().unwrap().get(id)?.clone())
}

/// Policy scope for a job: its destination's operation policy.
pub(crate) fn job_policy(sched: &Scheduler, job: &Job) -> String {
    sched
        .registry
        .read()
        .unwrap()
        .find(&job.dest)
        .map(|d| d.op_policy.clone())
        .unwrap_or_default()
}

/// `requested-attributes`, as a set; `None` means everything (absent or
/// `all`).
pub(crate) fn requested_set(msg: &IppMessage) -> Option<HashSet<String>> {
    let attr = msg
        .attrs
        .find_in(GroupTag::Operation, "requested-attributes")?;
    let mut set = HashSet::new();
    for value in attr.strings() {
        if value == "all" {
            return None;
        }
        set.insert(value.to_string());
    }
    if set.is_empty() {
        None
    } else {
        Some(set)
    }
}

fn wanted(requested: Option<&HashSet<String>>, name: &str) -> bool {
    requested.map(|set| set.contains(name)).unwrap_or(true)
}

/// Append `attrs` to `resp` under `group`, honoring the requested filter and
/// redacting private names.
pub(crate) fn append_filtered(
    resp: &mut IppMessage,
    group: GroupTag,
    attrs: Vec<Attribute>,
    requested: Option<&HashSet<String>>,
    private: &[String],
) {
    for attr in attrs {
        if private.iter().any(|p| *p == attr.name) {
            continue;
        }
        if !wanted(requested, &attr.name) {
            continue;
        }
        resp.attrs.append(group, attr);
    }
}

pub(crate) fn hold_keyword(hold: HoldUntil) -> String {
    match hold {
        HoldUntil::NoHold => "no-hold".to_string(),
        HoldUntil::Indefinite => "indefinite".to_string(),
        HoldUntil::At(when) => when.to_rfc3339(),
    }
}

/// Everything Get-Job-Attributes reports for one job: the synthesized
/// identity and status attributes, then the stored attribute set.
pub(crate) fn job_attr_list(sched: &Scheduler, job: &Job) -> Vec<Attribute> {
    let mut out = vec![
        Attribute::integer("job-id", job.id.as_i32()),
        Attribute::uri("job-uri", sched.config.job_uri(job.id.as_i32())),
        Attribute::uri("job-uuid", format!("urn:uuid:{}", job.uuid)),
        Attribute::uri(
            "job-printer-uri",
            sched
                .config
                .printer_uri(job.dest_kind.path_segment(), &job.dest),
        ),
        Attribute::enum_value("job-state", job.state.as_i32()),
        Attribute::keywords("job-state-reasons", job.state_reasons.iter().cloned()),
        Attribute::text("job-state-message", state_keyword(job.state)),
        Attribute::name_value("job-name", job_name(job)),
        Attribute::name_value("job-originating-user-name", job.user.clone()),
        Attribute::name_value("job-originating-host-name", job.host.clone()),
        Attribute::integer("job-priority", job.priority),
        Attribute::keyword("job-hold-until", hold_keyword(job.hold_until)),
        Attribute::integer("job-k-octets", job.k_octets as i32),
        Attribute::integer("job-impressions-completed", job.impressions_completed),
        Attribute::integer("job-media-sheets-completed", job.sheets_completed),
        Attribute::integer("number-of-documents", job.num_files() as i32),
        Attribute::integer("time-at-creation", job.created_at.timestamp() as i32),
        Attribute::date_time("date-time-at-creation", job.created_at),
        Attribute::integer("job-printer-up-time", sched.uptime()),
    ];
    match job.processing_at {
        Some(when) => {
            out.push(Attribute::integer("time-at-processing", when.timestamp() as i32));
            out.push(Attribute::date_time("date-time-at-processing", when));
        }
        None => out.push(Attribute::no_value("time-at-processing")),
    }
    match job.completed_at {
        Some(when) => {
            out.push(Attribute::integer("time-at-completed", when.timestamp() as i32));
            out.push(Attribute::date_time("date-time-at-completed", when));
        }
        None => out.push(Attribute::no_value("time-at-completed")),
    }
    let synthesized: HashSet<String> = out.iter().map(|a| a.name.clone()).collect();
    for (_, attr) in job.attrs.iter() {
        if !synthesized.contains(attr.name.as_str()) {
            out.push(attr.clone());
        }
    }
    out
}

/// The short identity group Print-Job / Create-Job / Send-Document answer
/// with.
pub(crate) fn append_job_identity(sched: &Scheduler, resp: &mut IppMessage, job: &Job) {
    resp.attrs
        .append(GroupTag::Job, Attribute::integer("job-id", job.id.as_i32()));
    resp.attrs.append(
        GroupTag::Job,
        Attribute::uri("job-uri", sched.config.job_uri(job.id.as_i32())),
    );
    resp.attrs.append(
        GroupTag::Job,
        Attribute::enum_value("job-state", job.state.as_i32()),
    );
    resp.attrs.append(
        GroupTag::Job,
        Attribute::keywords("job-state-reasons", job.state_reasons.iter().cloned()),
    );
}

pub(crate) fn printer_type_mask(sched: &Scheduler, dest: &Destination) -> i32 {
    let mut mask = 0;
    if dest.kind == DestKind::Class {
        mask |= printer_type::CLASS;
    }
    if dest.remote {
        mask |= printer_type::REMOTE;
    }
    if !dest.shared {
        mask |= printer_type::NOT_SHARED;
    }
    if dest.temporary {
        mask |= printer_type::TEMPORARY;
    }
    let registry = sched.registry.read().unwrap();
    if registry
        .default_dest()
        .map(|d| d.name.eq_ignore_ascii_case(&dest.name))
        .unwrap_or(false)
    {
        mask |= printer_type::DEFAULT;
    }
    mask
}

/// Everything Get-Printer-Attributes reports for one destination.
pub(crate) fn printer_attr_list(sched: &Scheduler, dest: &Destination) -> Vec<Attribute> {
    let queued = sched.jobs.read().unwrap().queued_count(&dest.name) as i32;
    let uri = sched
        .config
        .printer_uri(dest.kind.path_segment(), &dest.name);
    let mut formats: Vec<String> = dest.mime_types.iter().cloned().collect();
    if formats.is_empty() {
        formats = vec![
            "application/octet-stream".to_string(),
            "application/pdf".to_string(),
            "application/postscript".to_string(),
            "image/jpeg".to_string(),
            "image/png".to_string(),
            "text/plain".to_string(),
        ];
    }
    let mut out = vec![
        Attribute::name_value("printer-name", dest.name.clone()),
        Attribute::integer("printer-id", dest.id.as_i32()),
        Attribute::uri("printer-uuid", format!("urn:uuid:{}", dest.uuid)),
        Attribute::uri("printer-uri-supported", uri),
        Attribute::enum_value("printer-state", dest.state.as_i32()),
        Attribute::keywords("printer-state-reasons", dest.state_reasons.iter().cloned()),
        Attribute::text("printer-state-message", dest.state_message.clone()),
        Attribute::integer(
            "printer-state-change-time",
            dest.state_time.timestamp() as i32,
        ),
        Attribute::date_time("printer-state-change-date-time", dest.state_time),
        Attribute::boolean("printer-is-accepting-jobs", dest.accepting),
        Attribute::boolean("printer-is-shared", dest.shared),
        Attribute::boolean("printer-is-temporary", dest.temporary),
        Attribute::integer("printer-type", printer_type_mask(sched, dest)),
        Attribute::integer("printer-up-time", sched.uptime()),
        Attribute::date_time("printer-current-time", chrono::Utc::now()),
        Attribute::integer("queued-job-count", queued),
        Attribute::text("printer-location", dest.location.clone()),
        Attribute::text("printer-info", dest.info.clone()),
        Attribute::text("printer-geo-location", dest.geo_location.clone()),
        Attribute::text("printer-organization", dest.organization.clone()),
        Attribute::text(
            "printer-organizational-unit",
            dest.organizational_unit.clone(),
        ),
        Attribute::text("printer-make-and-model", dest.make_model.clone()),
        Attribute::uri(
            "device-uri",
            if dest.device_uri.is_empty() {
                "file:///dev/null".to_string()
            } else {
                dest.device_uri.clone()
            },
        ),
        Attribute::name_value("port-monitor", dest.port_monitor.clone()),
        Attribute::keywords("ipp-versions-supported", ["1.1", "2.0", "2.1"]),
        Attribute::charset("charset-configured", "utf-8"),
        Attribute::set_of(
            "charset-supported",
            vec![
                vellum_proto::AttrValue::Charset("us-ascii".into()),
                vellum_proto::AttrValue::Charset("utf-8".into()),
            ],
        ),
        Attribute::language(
            "natural-language-configured",
            sched.config.default_language.clone(),
        ),
        Attribute::set_of(
            "document-format-supported",
            formats
                .into_iter()
                .map(vellum_proto::AttrValue::MimeType)
                .collect(),
        ),
        Attribute::mime_type("document-format-default", "application/octet-stream"),
        Attribute::keywords("compression-supported", ["none"]),
        Attribute::boolean("multiple-document-jobs-supported", true),
        Attribute::integer(
            "multiple-operation-time-out",
            sched.config.multiple_operation_timeout_secs as i32,
        ),
        Attribute::keywords("pdl-override-supported", ["attempted"]),
        Attribute::set_of(
            "job-sheets-default",
            vec![
                vellum_proto::AttrValue::Keyword(dest.job_sheets.0.clone()),
                vellum_proto::AttrValue::Keyword(dest.job_sheets.1.clone()),
            ],
        ),
        Attribute::keywords(
            "job-sheets-supported",
            sched.config.banners.iter().cloned(),
        ),
        Attribute::name_value("printer-op-policy", if dest.op_policy.is_empty() {
            sched.config.default_policy.clone()
        } else {
            dest.op_policy.clone()
        }),
        Attribute::name_value("printer-error-policy", dest.error_policy.clone()),
        Attribute::keywords(
            "printer-error-policy-supported",
            ["abort-job", "retry-current-job", "retry-job", "stop-printer"],
        ),
    ];
    if dest.is_class() {
        out.push(Attribute::set_of(
            "member-names",
            dest.members
                .iter()
                .map(|m| vellum_proto::AttrValue::Name(m.clone()))
                .collect(),
        ));
        let member_uris: Vec<vellum_proto::AttrValue> = dest
            .members
            .iter()
            .map(|m| vellum_proto::AttrValue::Uri(sched.config.printer_uri("printers", m)))
            .collect();
        out.push(Attribute::set_of("member-uris", member_uris));
    }
    if !dest.auth_info_required.is_empty() {
        out.push(Attribute::keywords(
            "auth-info-required",
            dest.auth_info_required.iter().cloned(),
        ));
    }
    if !dest.mandatory_attrs.is_empty() {
        out.push(Attribute::keywords(
            "printer-mandatory-attributes",
            dest.mandatory_attrs.iter().cloned(),
        ));
    }
    out
}

/// Operation attribute selectors shared by Get-Jobs and the cancel family.
pub(crate) fn job_selector(
    msg: &IppMessage,
    client: &ClientContext,
    dest: Option<String>,
) -> Result<crate::jobstore::JobSelector> {
    let attrs = &msg.attrs;
    let which = attrs
        .find_in(GroupTag::Operation, "which-jobs")
        .and_then(|a| a.as_str())
        .map(crate::jobstore::WhichJobs::from_keyword)
        .transpose()?;
    let my_jobs = attrs
        .find_in(GroupTag::Operation, "my-jobs")
        .and_then(|a| a.as_boolean())
        .unwrap_or(false);
    let limit = attrs
        .find_in(GroupTag::Operation, "limit")
        .and_then(|a| a.as_integer())
        .unwrap_or(0)
        .max(0) as usize;
    let first_index = attrs
        .find_in(GroupTag::Operation, "first-index")
        .and_then(|a| a.as_integer())
        .map(|i| (i - 1).max(0) as usize)
        .unwrap_or(0);
    let first_job_id = attrs
        .find_in(GroupTag::Operation, "first-job-id")
        .and_then(|a| a.as_integer())
        .map(|id| {
            JobId::checked(id)
                .map_err(|_| SchedError::BadRequest(format!("first-job-id {id} out of range")))
        })
        .transpose()?;
    let job_ids = attrs.find_in(GroupTag::Operation, "job-ids").map(|attr| {
        attr.values
            .iter()
            .filter_map(|v| v.as_integer())
            .filter_map(|id| JobId::checked(id).ok())
            .collect::<Vec<_>>()
    });
    Ok(crate::jobstore::JobSelector {
        dest,
        which,
        user: my_jobs.then(|| client.user.clone()),
        job_ids,
        first_job_id,
        first_index,
        limit,
    })
}

/// Document format for a submitted payload: the explicit attribute, or the
/// type database's verdict, or the octet-stream fallback.
pub(crate) fn resolve_format(
    sched: &Scheduler,
    msg: &IppMessage,
) -> Result<(String, bool)> {
    if let Some(attr) = msg.attrs.find_in(GroupTag::Operation, "document-format") {
        let format = attr
            .as_str()
            .ok_or_else(|| SchedError::BadRequest("document-format is not a mime type".into()))?;
        if format != "application/octet-stream" {
            if !sched.type_db.type_exists(format) {
                return Err(SchedError::FormatNotSupported(format.to_string()));
            }
            return Ok((format.to_string(), false));
        }
    }
    let name = msg
        .attrs
        .find_in(GroupTag::Operation, "document-name")
        .and_then(|a| a.as_str());
    match sched.type_db.auto_type(&msg.payload, name) {
        Some(detected) => Ok((detected, true)),
        None => Ok(("application/octet-stream".to_string(), false)),
    }
}

/// `compression` gate: only `none` is implemented.
pub(crate) fn check_compression(msg: &IppMessage) -> Result<bool> {
    match msg
        .attrs
        .find_in(GroupTag::Operation, "compression")
        .and_then(|a| a.as_str())
    {
        None | Some("none") => Ok(false),
        Some(other) => Err(SchedError::CompressionNotSupported(other.to_string())),
    }
}

pub(crate) fn attr_in_op(msg: &IppMessage, name: &str) -> Option<Attribute> {
    msg.attrs.find_in(GroupTag::Operation, name).cloned()
}

pub(crate) fn is_uri(attr: &Attribute) -> bool {
    attr.tag == ValueTag::Uri
}

/// Build an `AttrList` holding only the job-group attributes of a request.
pub(crate) fn request_job_group(msg: &IppMessage) -> AttrList {
    let mut out = AttrList::new();
    for (group, attr) in msg.attrs.iter() {
        if group == GroupTag::Job {
            out.append(GroupTag::Job, attr.clone());
        }
    }
    out
}
