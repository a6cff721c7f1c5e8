//! Printer and class operation handlers.

use crate::client::ClientContext;
use crate::error::{Result, SchedError};
use crate::ops::{self, ok_response};
use crate::registry::{DestState, Destination};
use crate::scheduler::Scheduler;
use crate::subs::event_mask;
use std::sync::Arc;
use tracing::{debug, info};
use vellum_proto::{
    parse_dest_uri, validate_dest_name, AttrValue, Attribute, DestKind, GroupTag, IppMessage,
    Operation, StatusCode,
};

pub fn get_printer_attributes(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let dest = ops::target_dest(sched, msg)?;
    ops::check_policy(
        sched,
        client,
        Operation::GetPrinterAttributes,
        &dest.op_policy,
        None,
    )?;
    let requested = ops::requested_set(msg);
    let mut resp = ok_response(sched, msg);
    resp.attrs.separator();
    ops::append_filtered(
        &mut resp,
        GroupTag::Printer,
        ops::printer_attr_list(sched, &dest),
        requested.as_ref(),
        &[],
    );
    Ok(resp)
}

pub fn get_printer_supported_values(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let dest = ops::target_dest(sched, msg)?;
    ops::check_policy(
        sched,
        client,
        Operation::GetPrinterSupportedValues,
        &dest.op_policy,
        None,
    )?;
    let requested = ops::requested_set(msg);
    let supported = vec![
        Attribute::range("copies-supported", 1, sched.config.max_copies),
        Attribute::set_of(
            "number-up-supported",
            [1, 2, 4, 6, 9, 16].into_iter().map(AttrValue::Integer).collect(),
        ),
        Attribute::integer("job-priority-supported", 100),
        Attribute::boolean("page-ranges-supported", true),
        Attribute::keywords(
            "job-hold-until-supported",
            [
                "no-hold",
                "indefinite",
                "day-time",
                "evening",
                "night",
                "second-shift",
                "third-shift",
                "weekend",
            ],
        ),
        Attribute::keywords("job-sheets-supported", sched.config.banners.iter().cloned()),
        Attribute::integer("notify-lease-duration-supported", sched.config.max_lease_secs as i32),
        Attribute::keywords("notify-pull-method-supported", ["ippget"]),
    ];
    let mut resp = ok_response(sched, msg);
    resp.attrs.separator();
    ops::append_filtered(
        &mut resp,
        GroupTag::Printer,
        supported,
        requested.as_ref(),
        &[],
    );
    Ok(resp)
}

pub fn get_default(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    ops::check_policy(
        sched,
        client,
        Operation::GetDefault,
        &sched.config.default_policy,
        None,
    )?;
    let dest = sched
        .registry
        .read()
        .unwrap()
        .default_dest()
        .cloned()
        .ok_or_else(|| SchedError::NotFound("no default destination".into()))?;
    let requested = ops::requested_set(msg);
    let mut resp = ok_response(sched, msg);
    resp.attrs.separator();
    ops::append_filtered(
        &mut resp,
        GroupTag::Printer,
        ops::printer_attr_list(sched, &dest),
        requested.as_ref(),
        &[],
    );
    Ok(resp)
}

fn list_destinations(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
    op: Operation,
    kind: DestKind,
) -> Result<IppMessage> {
    ops::check_policy(sched, client, op, &sched.config.default_policy, None)?;
    let requested = ops::requested_set(msg);
    let limit = msg
        .attrs
        .find_in(GroupTag::Operation, "limit")
        .and_then(|a| a.as_integer())
        .unwrap_or(0)
        .max(0) as usize;

    let dests: Vec<Destination> = {
        let registry = sched.registry.read().unwrap();
        registry
            .iter()
            .filter(|d| d.kind == kind)
            .filter(|d| d.shared || client.local)
            .cloned()
            .collect()
    };

    let mut resp = ok_response(sched, msg);
    for (index, dest) in dests.iter().enumerate() {
        if limit > 0 && index >= limit {
            break;
        }
        resp.attrs.separator();
        ops::append_filtered(
            &mut resp,
            GroupTag::Printer,
            ops::printer_attr_list(sched, dest),
            requested.as_ref(),
            &[],
        );
    }
    Ok(resp)
}

pub fn get_printers(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    list_destinations(sched, client, msg, Operation::GetPrinters, DestKind::Printer)
}

pub fn get_classes(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    list_destinations(sched, client, msg, Operation::GetClasses, DestKind::Class)
}

/// Vetted attribute application shared by Add-Modify-Printer and
/// Add-Modify-Class. Returns the class member list when one was supplied.
fn apply_dest_attrs(
    sched: &Scheduler,
    dest: &mut Destination,
    msg: &IppMessage,
) -> Result<Option<Vec<String>>> {
    let mut members = None;
    for (group, attr) in msg.attrs.iter() {
        if group != GroupTag::Printer && group != GroupTag::Operation {
            continue;
        }
        match attr.name.as_str() {
            "printer-location" => dest.location = attr.as_str().unwrap_or("").to_string(),
            "printer-info" => dest.info = attr.as_str().unwrap_or("").to_string(),
            "printer-geo-location" => {
                dest.geo_location = attr.as_str().unwrap_or("").to_string()
            }
            "printer-organization" => {
                dest.organization = attr.as_str().unwrap_or("").to_string()
            }
            "printer-organizational-unit" => {
                dest.organizational_unit = attr.as_str().unwrap_or("").to_string()
            }
            "printer-make-and-model" => {
                dest.make_model = attr.as_str().unwrap_or("").to_string()
            }
            "printer-state-message" => {
                dest.state_message = attr.as_str().unwrap_or("").to_string()
            }
            "printer-is-accepting-jobs" => {
                dest.accepting = attr.as_boolean().unwrap_or(dest.accepting)
            }
            "printer-is-shared" => {
                if dest.remote {
                    return Err(SchedError::NotPossible(format!(
                        "cannot change sharing of remote destination {:?}",
                        dest.name
                    )));
                }
                dest.shared = attr.as_boolean().unwrap_or(dest.shared);
            }
            "printer-state" => match attr.as_integer() {
                Some(state) if state == DestState::Idle.as_i32() => dest.start(),
                Some(state) if state == DestState::Stopped.as_i32() => dest.stop(),
                _ => {
                    return Err(SchedError::AttributesNotSupported {
                        reason: "printer-state may only be set to idle or stopped".into(),
                        attrs: vec![attr.clone()],
                    })
                }
            },
            "printer-state-reasons" => {
                let reasons: Vec<&str> = attr.strings();
                dest.state_reasons = reasons.iter().map(|r| r.to_string()).collect();
                if reasons.iter().any(|r| *r == "paused") {
                    dest.stop();
                } else {
                    dest.start();
                }
            }
            "device-uri" => {
                let uri = attr
                    .as_str()
                    .ok_or_else(|| SchedError::BadRequest("device-uri is not a uri".into()))?;
                let scheme = uri.split(':').next().unwrap_or("");
                if scheme == "file" {
                    if !sched.config.file_device {
                        return Err(SchedError::NotPossible(
                            "file device uris are disabled".into(),
                        ));
                    }
                } else if !sched.devices.backend_schemes().contains(scheme) {
                    return Err(SchedError::UriSchemeNotSupported(scheme.to_string()));
                }
                dest.device_uri = uri.to_string();
            }
            "port-monitor" => dest.port_monitor = attr.as_str().unwrap_or("").to_string(),
            "printer-op-policy" => dest.op_policy = attr.as_str().unwrap_or("").to_string(),
            "printer-error-policy" => {
                let value = attr.as_str().unwrap_or("");
                if !["abort-job", "retry-current-job", "retry-job", "stop-printer"]
                    .contains(&value)
                {
                    return Err(SchedError::AttributesNotSupported {
                        reason: format!("unknown error policy {value:?}"),
                        attrs: vec![attr.clone()],
                    });
                }
                dest.error_policy = value.to_string();
            }
            "job-sheets-default" => {
                let sheets = attr.strings();
                dest.job_sheets = (
                    sheets.first().unwrap_or(&"none").to_string(),
                    sheets.get(1).unwrap_or(&"none").to_string(),
                );
            }
            "job-quota-period" => {
                dest.quota_period_secs = attr.as_integer().unwrap_or(0).max(0) as u64
            }
            "job-page-limit" => dest.page_limit = attr.as_integer().unwrap_or(0).max(0) as u32,
            "job-k-limit" => dest.k_limit = attr.as_integer().unwrap_or(0).max(0) as u32,
            "requesting-user-name-allowed" => {
                dest.deny_users = false;
                dest.users = allow_list(attr);
            }
            "requesting-user-name-denied" => {
                dest.deny_users = true;
                dest.users = allow_list(attr);
            }
            "printer-mandatory-attributes" => {
                dest.mandatory_attrs = attr.strings().iter().map(|s| s.to_string()).collect();
            }
            "auth-info-required" => {
                dest.auth_info_required =
                    attr.strings().iter().map(|s| s.to_string()).collect();
            }
            "document-format-supported" => {
                dest.mime_types = attr.strings().iter().map(|s| s.to_string()).collect();
            }
            "member-uris" => {
                let mut names = Vec::new();
                for value in &attr.values {
                    if let Some(uri) = value.as_str() {
                        let member = parse_dest_uri(uri)?;
                        names.push(member.name);
                    }
                }
                members = Some(names);
            }
            name if name.ends_with("-default") && name != "document-format-default" => {
                let option = name.trim_end_matches("-default").to_string();
                if let Some(value) = attr.as_str() {
                    dest.option_defaults.insert(option, value.to_string());
                } else if let Some(value) = attr.as_integer() {
                    dest.option_defaults.insert(option, value.to_string());
                } else if let Some(value) = attr.as_boolean() {
                    dest.option_defaults.insert(option, value.to_string());
                }
            }
            other => debug!(attr = other, "ignoring unrecognized destination attribute"),
        }
    }
    Ok(members)
}

fn allow_list(attr: &Attribute) -> Vec<String> {
    attr.strings()
        .into_iter()
        .filter(|v| *v != "all" && *v != "none")
        .map(str::to_string)
        .collect()
}

fn add_modify(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
    op: Operation,
    kind: DestKind,
) -> Result<IppMessage> {
    ops::check_policy(sched, client, op, &sched.config.default_policy, None)?;
    let target = ops::dest_ref(msg)?
        .ok_or_else(|| SchedError::BadRequest("request needs a destination uri".into()))?;
    if target.kind != kind {
        return Err(SchedError::BadRequest(format!(
            "{} addresses a {}",
            op.name(),
            kind.path_segment().trim_end_matches('s')
        )));
    }

    let (snapshot, members, existed) = {
        let mut registry = sched.registry.write().unwrap();
        let existed = registry.find(&target.name).is_some();
        let dest = match kind {
            DestKind::Printer => registry.add_printer(&target.name)?,
            DestKind::Class => registry.add_class(&target.name)?,
        };
        let members = match apply_dest_attrs(sched, dest, msg) {
            Ok(members) => members,
            Err(e) => {
                // reject-and-rollback: a freshly created destination must not
                // survive invalid input
                if !existed {
                    let name = target.name.clone();
                    let _ = registry.remove(&name);
                }
                return Err(e);
            }
        };
        let snapshot = dest.clone();
        (snapshot, members, existed)
    };

    if let Some(members) = members {
        sched
            .registry
            .write()
            .unwrap()
            .set_members(&target.name, members)?;
    }

    let kind_event = if existed {
        event_mask::PRINTER_MODIFIED
    } else {
        event_mask::PRINTER_ADDED
    };
    sched.printer_event(
        kind_event,
        &snapshot,
        format!(
            "Destination {} {}.",
            snapshot.name,
            if existed { "modified" } else { "added" }
        ),
    );
    sched.mark_dirty();
    sched.start_pending_jobs();
    Ok(ok_response(sched, msg))
}

pub fn add_modify_printer(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    add_modify(sched, client, msg, Operation::AddModifyPrinter, DestKind::Printer)
}

pub fn add_modify_class(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    add_modify(sched, client, msg, Operation::AddModifyClass, DestKind::Class)
}

fn delete_dest(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
    op: Operation,
) -> Result<IppMessage> {
    ops::check_policy(sched, client, op, &sched.config.default_policy, None)?;
    let target = ops::dest_ref(msg)?
        .ok_or_else(|| SchedError::BadRequest("request needs a destination uri".into()))?;
    sched.delete_destination(&target.name)?;
    Ok(ok_response(sched, msg))
}

pub fn delete_printer(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    delete_dest(sched, client, msg, Operation::DeletePrinter)
}

pub fn delete_class(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    delete_dest(sched, client, msg, Operation::DeleteClass)
}

fn set_accepting(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
    op: Operation,
    accepting: bool,
) -> Result<IppMessage> {
    let dest = ops::target_dest(sched, msg)?;
    ops::check_policy(sched, client, op, &dest.op_policy, None)?;

    // idempotent: no event when nothing changes
    if dest.accepting != accepting {
        let snapshot = {
            let mut registry = sched.registry.write().unwrap();
            let d = registry.get_mut(&dest.name)?;
            d.accepting = accepting;
            d.state_time = chrono::Utc::now();
            d.clone()
        };
        sched.printer_event(
            event_mask::PRINTER_STATE_CHANGED,
            &snapshot,
            format!(
                "Destination {} {} accepting jobs.",
                snapshot.name,
                if accepting { "now" } else { "no longer" }
            ),
        );
        sched.mark_dirty();
        if accepting {
            sched.start_pending_jobs();
        }
    }
    Ok(ok_response(sched, msg))
}

pub fn accept_jobs(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    set_accepting(sched, client, msg, Operation::AcceptJobs, true)
}

pub fn reject_jobs(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    set_accepting(sched, client, msg, Operation::RejectJobs, false)
}

pub fn pause_printer(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let dest = ops::target_dest(sched, msg)?;
    ops::check_policy(sched, client, Operation::PausePrinter, &dest.op_policy, None)?;
    let snapshot = {
        let mut registry = sched.registry.write().unwrap();
        let d = registry.get_mut(&dest.name)?;
        d.stop();
        if let Some(message) = msg
            .attrs
            .find("printer-state-message")
            .and_then(|a| a.as_str())
        {
            d.state_message = message.to_string();
        }
        d.clone()
    };
    info!(printer = %snapshot.name, "printer paused");
    sched.printer_event(
        event_mask::PRINTER_STOPPED,
        &snapshot,
        format!("Printer {} paused.", snapshot.name),
    );
    sched.mark_dirty();
    Ok(ok_response(sched, msg))
}

pub fn resume_printer(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let dest = ops::target_dest(sched, msg)?;
    ops::check_policy(sched, client, Operation::ResumePrinter, &dest.op_policy, None)?;
    let snapshot = {
        let mut registry = sched.registry.write().unwrap();
        let d = registry.get_mut(&dest.name)?;
        d.start();
        d.state_message.clear();
        d.clone()
    };
    info!(printer = %snapshot.name, "printer resumed");
    sched.printer_event(
        event_mask::PRINTER_STATE_CHANGED,
        &snapshot,
        format!("Printer {} resumed.", snapshot.name),
    );
    sched.mark_dirty();
    // stopped jobs on this printer go back to pending
    let stopped: Vec<_> = {
        let store = sched.jobs.read().unwrap();
        store
            .iter()
            .filter(|j| {
                j.state == crate::job::JobState::Stopped
                    && j.dest.eq_ignore_ascii_case(&snapshot.name)
            })
            .map(|j| j.id)
            .collect()
    };
    for id in stopped {
        let _ = sched
            .jobs
            .write()
            .unwrap()
            .with_job_mut(id, |j| j.resume_pending());
    }
    sched.start_pending_jobs();
    Ok(ok_response(sched, msg))
}

fn set_holding(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
    op: Operation,
    holding: bool,
) -> Result<IppMessage> {
    let dest = ops::target_dest(sched, msg)?;
    ops::check_policy(sched, client, op, &dest.op_policy, None)?;
    if dest.holding_new_jobs != holding {
        let snapshot = {
            let mut registry = sched.registry.write().unwrap();
            let d = registry.get_mut(&dest.name)?;
            if holding {
                d.hold_new_jobs();
            } else {
                d.release_held_new_jobs();
            }
            d.clone()
        };
        sched.printer_event(
            event_mask::PRINTER_STATE_CHANGED,
            &snapshot,
            format!(
                "Destination {} {} holding new jobs.",
                snapshot.name,
                if holding { "now" } else { "no longer" }
            ),
        );
        sched.mark_dirty();
        if !holding {
            sched.start_pending_jobs();
        }
    }
    Ok(ok_response(sched, msg))
}

pub fn hold_new_jobs(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    set_holding(sched, client, msg, Operation::HoldNewJobs, true)
}

pub fn release_held_new_jobs(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    set_holding(sched, client, msg, Operation::ReleaseHeldNewJobs, false)
}

pub fn set_default(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let dest = ops::target_dest(sched, msg)?;
    ops::check_policy(sched, client, Operation::SetDefault, &sched.config.default_policy, None)?;
    sched.registry.write().unwrap().set_default(&dest.name)?;
    info!(dest = %dest.name, "default destination changed");
    sched.mark_dirty();
    Ok(ok_response(sched, msg))
}

/// Set-Printer-Attributes permits only descriptive changes.
pub fn set_printer_attributes(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    const SETTABLE: &[&str] = &[
        "printer-location",
        "printer-info",
        "printer-geo-location",
        "printer-organization",
        "printer-organizational-unit",
    ];
    let dest = ops::target_dest(sched, msg)?;
    ops::check_policy(
        sched,
        client,
        Operation::SetPrinterAttributes,
        &dest.op_policy,
        None,
    )?;

    let updates: Vec<Attribute> = msg
        .attrs
        .iter()
        .filter(|(g, _)| *g == GroupTag::Printer)
        .map(|(_, a)| a.clone())
        .collect();
    let offenders: Vec<Attribute> = updates
        .iter()
        .filter(|a| !SETTABLE.contains(&a.name.as_str()))
        .cloned()
        .collect();
    if !offenders.is_empty() {
        return Err(SchedError::AttributesNotSupported {
            reason: format!("{:?} cannot be set on an existing queue", offenders[0].name),
            attrs: offenders,
        });
    }

    let snapshot = {
        let mut registry = sched.registry.write().unwrap();
        let d = registry.get_mut(&dest.name)?;
        for attr in &updates {
            let value = attr.as_str().unwrap_or("").to_string();
            match attr.name.as_str() {
                "printer-location" => d.location = value,
                "printer-info" => d.info = value,
                "printer-geo-location" => d.geo_location = value,
                "printer-organization" => d.organization = value,
                "printer-organizational-unit" => d.organizational_unit = value,
                _ => unreachable!("filtered above"),
            }
        }
        d.clone()
    };
    sched.printer_event(
        event_mask::PRINTER_CONFIG_CHANGED,
        &snapshot,
        format!("Printer {} configuration changed.", snapshot.name),
    );
    sched.mark_dirty();
    Ok(ok_response(sched, msg))
}

/// Create-Local-Printer: local connections register a temporary, non-shared
/// queue; a background task probes the device and publishes or condemns it.
pub fn create_local_printer(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    if !client.local {
        return Err(SchedError::Forbidden(
            "local printers may only be created from local connections".into(),
        ));
    }
    ops::check_policy(
        sched,
        client,
        Operation::CreateLocalPrinter,
        &sched.config.default_policy,
        None,
    )?;

    let name = msg
        .attrs
        .find("printer-name")
        .and_then(|a| a.as_str())
        .ok_or_else(|| SchedError::BadRequest("printer-name is required".into()))?
        .to_string();
    validate_dest_name(&name)?;
    let device_uri = msg
        .attrs
        .find("device-uri")
        .and_then(|a| a.as_str())
        .ok_or_else(|| SchedError::BadRequest("device-uri is required".into()))?
        .to_string();

    let snapshot = {
        let mut registry = sched.registry.write().unwrap();
        let dest = registry.add_printer(&name)?;
        dest.temporary = true;
        dest.shared = false;
        dest.device_uri = device_uri.clone();
        dest.state_time = chrono::Utc::now();
        if let Some(info) = msg.attrs.find("printer-info").and_then(|a| a.as_str()) {
            dest.info = info.to_string();
        }
        if let Some(location) = msg.attrs.find("printer-location").and_then(|a| a.as_str()) {
            dest.location = location.to_string();
        }
        dest.clone()
    };
    info!(printer = %name, device = %device_uri, "temporary local printer registered");
    sched.mark_dirty();

    // ppd generation / device contact runs off the request path
    if tokio::runtime::Handle::try_current().is_ok() {
        let sched = Arc::clone(sched);
        let probe_name = name.clone();
        tokio::spawn(async move {
            sched.probe_local_printer(probe_name, device_uri).await;
        });
    }

    let requested = ops::requested_set(msg);
    let mut resp = ok_response(sched, msg);
    resp.attrs.separator();
    ops::append_filtered(
        &mut resp,
        GroupTag::Printer,
        ops::printer_attr_list(sched, &snapshot),
        requested.as_ref(),
        &[],
    );
    Ok(resp)
}

pub fn get_devices(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    ops::check_policy(
        sched,
        client,
        Operation::GetDevices,
        &sched.config.default_policy,
        None,
    )?;
    let limit = msg
        .attrs
        .find_in(GroupTag::Operation, "limit")
        .and_then(|a| a.as_integer())
        .unwrap_or(0)
        .max(0) as usize;
    let mut resp = ok_response(sched, msg);
    for (index, device) in sched.devices.devices().into_iter().enumerate() {
        if limit > 0 && index >= limit {
            break;
        }
        resp.attrs.separator();
        resp.attrs.append(
            GroupTag::Printer,
            Attribute::keyword("device-class", device.device_class),
        );
        resp.attrs
            .append(GroupTag::Printer, Attribute::uri("device-uri", device.uri));
        resp.attrs
            .append(GroupTag::Printer, Attribute::text("device-info", device.info));
        resp.attrs.append(
            GroupTag::Printer,
            Attribute::text("device-make-and-model", device.make_model),
        );
    }
    Ok(resp)
}

pub fn get_ppds(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    ops::check_policy(
        sched,
        client,
        Operation::GetPpds,
        &sched.config.default_policy,
        None,
    )?;
    // nothing beyond generated ppds is cataloged here
    Ok(ok_response(sched, msg))
}

pub fn get_ppd(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    ops::check_policy(
        sched,
        client,
        Operation::GetPpd,
        &sched.config.default_policy,
        None,
    )?;
    let name = msg
        .attrs
        .find_in(GroupTag::Operation, "ppd-name")
        .and_then(|a| a.as_str())
        .ok_or_else(|| SchedError::BadRequest("ppd-name is required".into()))?;
    if sched.ppds.open(name).is_none() {
        return Err(SchedError::NotFound(format!("ppd {name:?} does not exist")));
    }
    let mut resp = ops::response_for(sched, msg, StatusCode::Ok);
    resp.attrs
        .append(GroupTag::Operation, Attribute::name_value("ppd-name", name));
    Ok(resp)
}
