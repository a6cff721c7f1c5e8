//! Request dispatcher: header gates, conformance checks, handler routing,
//! and response assembly.

use crate::client::ClientContext;
use crate::error::{Result, SchedError};
use crate::ops;
use crate::scheduler::Scheduler;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use vellum_proto::{
    version_supported, AttrList, Attribute, GroupTag, IppMessage, Operation, StatusCode, ValueTag,
};

pub type Handler = fn(&Arc<Scheduler>, &ClientContext, &IppMessage) -> Result<IppMessage>;

pub struct Dispatcher {
    handlers: HashMap<Operation, Handler>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Build the operation table. Handlers register here at startup; an
    /// operation missing from the table answers `operation-not-supported`.
    pub fn new() -> Self {
        use Operation::*;
        let mut handlers: HashMap<Operation, Handler> = HashMap::new();
        let table: &[(Operation, Handler)] = &[
            (PrintJob, ops::jobs::print_job),
            (ValidateJob, ops::jobs::validate_job),
            (CreateJob, ops::jobs::create_job),
            (SendDocument, ops::jobs::send_document),
            (CloseJob, ops::jobs::close_job),
            (CancelJob, ops::jobs::cancel_job),
            (HoldJob, ops::jobs::hold_job),
            (ReleaseJob, ops::jobs::release_job),
            (RestartJob, ops::jobs::restart_job),
            (GetJobAttributes, ops::jobs::get_job_attributes),
            (GetJobs, ops::jobs::get_jobs),
            (SetJobAttributes, ops::jobs::set_job_attributes),
            (MoveJob, ops::jobs::move_job),
            (AuthenticateJob, ops::jobs::authenticate_job),
            (CancelJobs, ops::jobs::cancel_jobs),
            (CancelMyJobs, ops::jobs::cancel_my_jobs),
            (PurgeJobs, ops::jobs::purge_jobs),
            (GetDocument, ops::jobs::get_document),
            (GetPrinterAttributes, ops::printers::get_printer_attributes),
            (
                GetPrinterSupportedValues,
                ops::printers::get_printer_supported_values,
            ),
            (GetDefault, ops::printers::get_default),
            (GetPrinters, ops::printers::get_printers),
            (GetClasses, ops::printers::get_classes),
            (AddModifyPrinter, ops::printers::add_modify_printer),
            (AddModifyClass, ops::printers::add_modify_class),
            (DeletePrinter, ops::printers::delete_printer),
            (DeleteClass, ops::printers::delete_class),
            (AcceptJobs, ops::printers::accept_jobs),
            (RejectJobs, ops::printers::reject_jobs),
            (PausePrinter, ops::printers::pause_printer),
            (ResumePrinter, ops::printers::resume_printer),
            (HoldNewJobs, ops::printers::hold_new_jobs),
            (ReleaseHeldNewJobs, ops::printers::release_held_new_jobs),
            (SetDefault, ops::printers::set_default),
            (SetPrinterAttributes, ops::printers::set_printer_attributes),
            (CreateLocalPrinter, ops::printers::create_local_printer),
            (GetDevices, ops::printers::get_devices),
            (GetPpds, ops::printers::get_ppds),
            (GetPpd, ops::printers::get_ppd),
            (
                CreatePrinterSubscriptions,
                ops::subscriptions::create_printer_subscriptions,
            ),
            (
                CreateJobSubscriptions,
                ops::subscriptions::create_job_subscriptions,
            ),
            (
                GetSubscriptionAttributes,
                ops::subscriptions::get_subscription_attributes,
            ),
            (GetSubscriptions, ops::subscriptions::get_subscriptions),
            (RenewSubscription, ops::subscriptions::renew_subscription),
            (CancelSubscription, ops::subscriptions::cancel_subscription),
            (GetNotifications, ops::subscriptions::get_notifications),
        ];
        for (op, handler) in table {
            handlers.insert(*op, *handler);
        }
        Self { handlers }
    }

    /// Process one request and produce the response for the same channel.
    pub fn dispatch(
        &self,
        sched: &Arc<Scheduler>,
        client: &ClientContext,
        msg: &IppMessage,
    ) -> IppMessage {
        match self.process(sched, client, msg) {
            Ok(response) => response,
            Err(err) => {
                let op = msg
                    .operation()
                    .map(|o| o.name())
                    .unwrap_or("unknown-operation");
                warn!(op, status = err.status().keyword(), error = %err, "request failed");
                error_response(sched, msg, &err)
            }
        }
    }

    fn process(
        &self,
        sched: &Arc<Scheduler>,
        client: &ClientContext,
        msg: &IppMessage,
    ) -> Result<IppMessage> {
        if !version_supported(msg.version) {
            return Err(SchedError::VersionNotSupported(msg.version.0, msg.version.1));
        }
        if msg.request_id < 1 {
            return Err(SchedError::BadRequest(format!(
                "request id {} out of range",
                msg.request_id
            )));
        }

        check_group_order(&msg.attrs)?;

        let op = msg
            .operation()
            .ok_or(SchedError::OperationNotSupported(msg.code))?;

        check_operation_group(msg, op)?;
        let effective = effective_client(sched, client, msg)?;

        let handler = self
            .handlers
            .get(&op)
            .ok_or(SchedError::OperationNotSupported(msg.code))?;
        debug!(op = op.name(), user = %effective.user, host = %effective.host, "dispatching");
        handler(sched, &effective, msg)
    }
}

/// Group tags must not decrease over the request (separators excepted).
fn check_group_order(attrs: &AttrList) -> Result<()> {
    let mut last = GroupTag::Zero;
    for group in attrs.groups() {
        if group.tag == GroupTag::Zero {
            continue;
        }
        if group.tag < last {
            return Err(SchedError::BadRequest(format!(
                "attribute group 0x{:02x} out of order",
                group.tag.as_u8()
            )));
        }
        last = group.tag;
    }
    Ok(())
}

/// The operation group must open the request with `attributes-charset` then
/// `attributes-natural-language`, followed by a target uri for operations
/// that address one destination, job, or ppd.
fn check_operation_group(msg: &IppMessage, op: Operation) -> Result<()> {
    let first = msg
        .attrs
        .groups()
        .iter()
        .find(|g| g.tag != GroupTag::Zero)
        .ok_or_else(|| SchedError::BadRequest("request carries no attributes".into()))?;
    if first.tag != GroupTag::Operation {
        return Err(SchedError::BadRequest(
            "request does not start with an operation group".into(),
        ));
    }

    let charset = first
        .attrs
        .first()
        .filter(|a| a.name == "attributes-charset" && a.tag == ValueTag::Charset)
        .ok_or_else(|| {
            SchedError::BadRequest("attributes-charset must lead the operation group".into())
        })?;
    match charset.as_str() {
        Some("utf-8") | Some("us-ascii") => {}
        Some(other) => return Err(SchedError::CharsetNotSupported(other.to_string())),
        None => return Err(SchedError::CharsetNotSupported(String::new())),
    }

    first
        .attrs
        .get(1)
        .filter(|a| a.name == "attributes-natural-language" && a.tag == ValueTag::NaturalLanguage)
        .ok_or_else(|| {
            SchedError::BadRequest(
                "attributes-natural-language must follow attributes-charset".into(),
            )
        })?;

    if op.requires_target_uri() {
        let has_target = first.attrs.iter().any(|a| {
            matches!(a.name.as_str(), "printer-uri" | "job-uri") && a.tag == ValueTag::Uri
                || (op == Operation::GetPpd && a.name == "ppd-name")
        });
        if !has_target {
            return Err(SchedError::BadRequest(format!(
                "{} requires a target uri",
                op.name()
            )));
        }
    }
    Ok(())
}

/// Fold the `requesting-user-name` rules into the client context handlers
/// see: authenticated identities win, syntactically bad names become
/// `anonymous` (or fail in strict mode), and remote callers claiming root
/// are demoted to the configured substitute.
fn effective_client(
    sched: &Scheduler,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<ClientContext> {
    let mut effective = client.clone();
    if effective.authenticated() {
        return Ok(effective);
    }

    let claimed = match msg.attrs.find_in(GroupTag::Operation, "requesting-user-name") {
        Some(attr) => {
            let valid = matches!(attr.tag, ValueTag::Name | ValueTag::Keyword)
                && attr.validate().is_ok()
                && attr.as_str().is_some();
            if !valid {
                if sched.config.strict_conformance {
                    return Err(SchedError::BadRequest(
                        "bad requesting-user-name attribute".into(),
                    ));
                }
                warn!("replacing malformed requesting-user-name with \"anonymous\"");
                "anonymous".to_string()
            } else {
                attr.as_str().unwrap_or("anonymous").to_string()
            }
        }
        None => {
            if msg.attrs.find("requesting-user-name").is_some() {
                // present, but in the wrong group
                if sched.config.strict_conformance {
                    return Err(SchedError::BadRequest(
                        "requesting-user-name outside the operation group".into(),
                    ));
                }
                warn!("ignoring requesting-user-name outside the operation group");
            }
            "anonymous".to_string()
        }
    };

    effective.user = if claimed == "root" && !client.local {
        match &sched.config.remote_root {
            Some(substitute) => substitute.clone(),
            None => claimed,
        }
    } else {
        claimed
    };
    Ok(effective)
}

/// Success scaffolding shared by handlers: echoed charset and language lead
/// the operation group.
pub fn response_for(sched: &Scheduler, msg: &IppMessage, status: StatusCode) -> IppMessage {
    let mut resp = IppMessage::response(msg.version, status, msg.request_id);
    resp.attrs.append(
        GroupTag::Operation,
        Attribute::charset("attributes-charset", "utf-8"),
    );
    let language = msg
        .attrs
        .find_in(GroupTag::Operation, "attributes-natural-language")
        .and_then(|a| a.as_str())
        .unwrap_or(sched.config.default_language.as_str())
        .to_string();
    resp.attrs.append(
        GroupTag::Operation,
        Attribute::language("attributes-natural-language", language),
    );
    resp
}

fn error_response(sched: &Scheduler, msg: &IppMessage, err: &SchedError) -> IppMessage {
    let mut resp = response_for(sched, msg, err.status());
    resp.attrs.append(
        GroupTag::Operation,
        Attribute::text("status-message", err.public_message()),
    );
    for attr in err.unsupported_attrs() {
        let mut echoed = attr.clone();
        if echoed.values.is_empty() {
            echoed.values.push(vellum_proto::AttrValue::Unsupported);
        }
        resp.attrs.append(GroupTag::Unsupported, echoed);
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use tempfile::TempDir;

    fn scheduler() -> (TempDir, Arc<Scheduler>) {
        let dir = TempDir::new().unwrap();
        let mut config = ServerConfig::default();
        config.spool_root = dir.path().join("spool");
        config.cache_root = dir.path().join("cache");
        let sched = Arc::new(Scheduler::new(config).unwrap());
        sched.registry.write().unwrap().add_printer("press").unwrap();
        (dir, sched)
    }

    fn base_request(op: Operation) -> IppMessage {
        let mut msg = IppMessage::request((2, 0), op, 1);
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::charset("attributes-charset", "utf-8"),
        );
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::language("attributes-natural-language", "en"),
        );
        msg
    }

    #[test]
    fn version_gate() {
        let (_d, sched) = scheduler();
        let dispatcher = Dispatcher::new();
        let mut msg = base_request(Operation::GetPrinters);
        msg.version = (3, 0);
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &msg);
        assert_eq!(resp.status(), Some(StatusCode::VersionNotSupported));
    }

    #[test]
    fn unknown_operation_rejected() {
        let (_d, sched) = scheduler();
        let dispatcher = Dispatcher::new();
        let mut msg = base_request(Operation::GetPrinters);
        msg.code = 0x3fff;
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &msg);
        assert_eq!(resp.status(), Some(StatusCode::OperationNotSupported));
    }

    #[test]
    fn charset_must_lead() {
        let (_d, sched) = scheduler();
        let dispatcher = Dispatcher::new();
        let mut msg = IppMessage::request((2, 0), Operation::GetPrinters, 1);
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::language("attributes-natural-language", "en"),
        );
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::charset("attributes-charset", "utf-8"),
        );
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &msg);
        assert_eq!(resp.status(), Some(StatusCode::BadRequest));
    }

    #[test]
    fn exotic_charset_rejected() {
        let (_d, sched) = scheduler();
        let dispatcher = Dispatcher::new();
        let mut msg = IppMessage::request((2, 0), Operation::GetPrinters, 1);
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::charset("attributes-charset", "iso-8859-1"),
        );
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::language("attributes-natural-language", "en"),
        );
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &msg);
        assert_eq!(resp.status(), Some(StatusCode::CharsetNotSupported));
    }

    #[test]
    fn out_of_order_groups_rejected() {
        let (_d, sched) = scheduler();
        let dispatcher = Dispatcher::new();
        let mut msg = base_request(Operation::PrintJob);
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::uri("printer-uri", "ipp://localhost/printers/press"),
        );
        msg.attrs
            .append(GroupTag::Job, Attribute::integer("copies", 1));
        // a second operation group after the job group
        msg.attrs.separator();
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::name_value("requesting-user-name", "mei"),
        );
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &msg);
        assert_eq!(resp.status(), Some(StatusCode::BadRequest));
        assert!(sched.jobs.read().unwrap().is_empty());
    }

    #[test]
    fn missing_target_rejected() {
        let (_d, sched) = scheduler();
        let dispatcher = Dispatcher::new();
        let msg = base_request(Operation::PrintJob);
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &msg);
        assert_eq!(resp.status(), Some(StatusCode::BadRequest));
    }

    #[test]
    fn remote_root_demoted() {
        let (_d, sched) = scheduler();
        let mut msg = base_request(Operation::GetPrinters);
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::name_value("requesting-user-name", "root"),
        );
        let remote = ClientContext::anonymous("far.example.com");
        let effective = effective_client(&sched, &remote, &msg).unwrap();
        assert_eq!(effective.user, "remroot");

        let local = ClientContext {
            local: true,
            ..ClientContext::anonymous("localhost")
        };
        let effective = effective_client(&sched, &local, &msg).unwrap();
        assert_eq!(effective.user, "root");
    }

    #[test]
    fn bad_user_name_becomes_anonymous_when_lenient() {
        let (_d, sched) = scheduler();
        let mut msg = base_request(Operation::GetPrinters);
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::text("requesting-user-name", "not-a-name-syntax"),
        );
        let effective =
            effective_client(&sched, &ClientContext::anonymous("h"), &msg).unwrap();
        assert_eq!(effective.user, "anonymous");
    }

    #[test]
    fn authenticated_identity_wins() {
        let (_d, sched) = scheduler();
        let mut msg = base_request(Operation::GetPrinters);
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::name_value("requesting-user-name", "impostor"),
        );
        let mut client = ClientContext::anonymous("h");
        client.user = "mei".to_string();
        let effective = effective_client(&sched, &client, &msg).unwrap();
        assert_eq!(effective.user, "mei");
    }
}
