//! Job operation handlers.

use crate::client::ClientContext;
use crate::error::{Result, SchedError};
use crate::job::{HoldUntil, JobFile, JobState, AUTH_SLOTS};
use crate::jobstore::READ_ONLY_ATTRS;
use crate::ops::{self, ok_response};
use crate::scheduler::Scheduler;
use crate::subs::event_mask;
use std::sync::Arc;
use tracing::info;
use vellum_proto::{Attribute, GroupTag, IppMessage, JobId, Operation, ValueTag};

pub fn print_job(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let dest = ops::target_dest(sched, msg)?;
    ops::check_policy(sched, client, Operation::PrintJob, &dest.op_policy, None)?;
    let compressed = ops::check_compression(msg)?;
    if msg.payload.is_empty() {
        return Err(SchedError::BadRequest("no document data".into()));
    }
    let (format, detected) = ops::resolve_format(sched, msg)?;

    let id = {
        let mut store = sched.jobs.write().unwrap();
        let mut ledger = sched.quotas.lock().unwrap();
        store.add_job(
            &sched.config,
            &dest,
            client,
            &mut ledger,
            &msg.attrs,
            Some(format.clone()),
            false,
        )?
    };

    let kb = sched.spool.write_document(id, 1, &msg.payload)?;
    sched.jobs.write().unwrap().with_job_mut(id, |j| {
        j.files.push(JobFile {
            format: format.clone(),
            compressed,
            k_octets: kb,
        });
        j.k_octets += kb;
        if detected {
            j.attrs.append(
                GroupTag::Job,
                Attribute::mime_type("document-format-detected", format.clone()),
            );
        }
        Ok(())
    })?;

    let job = ops::job_snapshot(sched, id)?;
    sched.job_event(
        event_mask::JOB_CREATED,
        &job,
        format!("Job {} queued on {}.", id, dest.name),
    );
    sched.start_pending_jobs();

    let job = ops::job_snapshot(sched, id).unwrap_or(job);
    let mut resp = ok_response(sched, msg);
    ops::append_job_identity(sched, &mut resp, &job);
    Ok(resp)
}

/// Print-Job's checks with none of its effects.
pub fn validate_job(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let dest = ops::target_dest(sched, msg)?;
    ops::check_policy(sched, client, Operation::ValidateJob, &dest.op_policy, None)?;
    ops::check_compression(msg)?;
    let format = msg
        .attrs
        .find_in(GroupTag::Operation, "document-format")
        .and_then(|a| a.as_str())
        .map(str::to_string);
    if let Some(format) = &format {
        if format != "application/octet-stream" && !sched.type_db.type_exists(format) {
            return Err(SchedError::FormatNotSupported(format.clone()));
        }
    }
    let store = sched.jobs.read().unwrap();
    let mut ledger = sched.quotas.lock().unwrap();
    store.validate_job(
        &sched.config,
        &dest,
        client,
        &mut ledger,
        &msg.attrs,
        format.as_deref(),
    )?;
    Ok(ok_response(sched, msg))
}

pub fn create_job(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let dest = ops::target_dest(sched, msg)?;
    ops::check_policy(sched, client, Operation::CreateJob, &dest.op_policy, None)?;
    let id = {
        let mut store = sched.jobs.write().unwrap();
        let mut ledger = sched.quotas.lock().unwrap();
        store.add_job(
            &sched.config,
            &dest,
            client,
            &mut ledger,
            &msg.attrs,
            None,
            true,
        )?
    };
    let job = ops::job_snapshot(sched, id)?;
    sched.job_event(
        event_mask::JOB_CREATED,
        &job,
        format!("Job {} created on {}.", id, dest.name),
    );
    let mut resp = ok_response(sched, msg);
    ops::append_job_identity(sched, &mut resp, &job);
    Ok(resp)
}

pub fn send_document(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let id = ops::target_job_id(msg)?;
    let job = ops::job_snapshot(sched, id)?;
    let policy = ops::job_policy(sched, &job);
    ops::check_policy(sched, client, Operation::SendDocument, &policy, Some(&job.user))?;

    if job.intake_deadline.is_none() {
        return Err(SchedError::NotPossible(format!(
            "job {id} is not accepting documents"
        )));
    }
    let last = ops::attr_in_op(msg, "last-document")
        .and_then(|a| a.as_boolean())
        .unwrap_or(false);
    let compressed = ops::check_compression(msg)?;

    if !msg.payload.is_empty() {
        let (format, detected) = ops::resolve_format(sched, msg)?;
        let accepts = sched
            .registry
            .read()
            .unwrap()
            .find(&job.dest)
            .map(|d| d.accepts_type(&format))
            .unwrap_or(true);
        if !accepts {
            return Err(SchedError::FormatNotSupported(format));
        }
        let index = job.num_files() + 1;
        let kb = sched.spool.write_document(id, index, &msg.payload)?;
        let deadline =
            chrono::Utc::now() + chrono::Duration::seconds(sched.config.multiple_operation_timeout_secs as i64);
        sched.jobs.write().unwrap().with_job_mut(id, |j| {
            j.files.push(JobFile {
                format: format.clone(),
                compressed,
                k_octets: kb,
            });
            j.k_octets += kb;
            j.intake_deadline = Some(deadline);
            if detected {
                j.attrs.append(
                    GroupTag::Job,
                    Attribute::mime_type("document-format-detected", format.clone()),
                );
            }
            Ok(())
        })?;
    } else if !last {
        return Err(SchedError::BadRequest("no document data".into()));
    }

    if last {
        finish_intake(sched, id)?;
    }

    let job = ops::job_snapshot(sched, id)?;
    let mut resp = ok_response(sched, msg);
    ops::append_job_identity(sched, &mut resp, &job);
    Ok(resp)
}

pub fn close_job(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let id = ops::target_job_id(msg)?;
    let job = ops::job_snapshot(sched, id)?;
    if job.state.is_terminal() {
        return Err(SchedError::NotPossible(format!("job {id} has finished")));
    }
    let policy = ops::job_policy(sched, &job);
    ops::check_policy(sched, client, Operation::CloseJob, &policy, Some(&job.user))?;
    finish_intake(sched, id)?;
    let job = ops::job_snapshot(sched, id)?;
    let mut resp = ok_response(sched, msg);
    ops::append_job_identity(sched, &mut resp, &job);
    Ok(resp)
}

fn finish_intake(sched: &Scheduler, id: JobId) -> Result<()> {
    sched.jobs.write().unwrap().close_intake(id)?;
    let job = sched.jobs.read().unwrap().get(id)?.clone();
    sched.job_event(
        event_mask::JOB_STATE_CHANGED,
        &job,
        format!("Job {id} ready."),
    );
    sched.start_pending_jobs();
    Ok(())
}

pub fn cancel_job(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let id = ops::target_job_id(msg)?;
    let job = ops::job_snapshot(sched, id)?;
    let policy = ops::job_policy(sched, &job);
    ops::check_policy(sched, client, Operation::CancelJob, &policy, Some(&job.user))?;
    let purge = ops::attr_in_op(msg, "purge-job")
        .and_then(|a| a.as_boolean())
        .unwrap_or(false);
    sched.cancel_job(id, purge, "canceled by user request")?;
    Ok(ok_response(sched, msg))
}

pub fn hold_job(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let id = ops::target_job_id(msg)?;
    let job = ops::job_snapshot(sched, id)?;
    let policy = ops::job_policy(sched, &job);
    ops::check_policy(sched, client, Operation::HoldJob, &policy, Some(&job.user))?;

    let keyword = msg
        .attrs
        .find("job-hold-until")
        .and_then(|a| a.as_str())
        .unwrap_or("indefinite")
        .to_string();
    let until = HoldUntil::from_keyword(&keyword, chrono::Utc::now());
    sched.jobs.write().unwrap().with_job_mut(id, |j| {
        j.hold(until, "job-hold-until-specified")?;
        j.attrs.append(
            GroupTag::Job,
            Attribute::keyword("job-hold-until", keyword.clone()),
        );
        Ok(())
    })?;
    let job = ops::job_snapshot(sched, id)?;
    sched.job_event(event_mask::JOB_STATE_CHANGED, &job, format!("Job {id} held."));
    Ok(ok_response(sched, msg))
}

pub fn release_job(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let id = ops::target_job_id(msg)?;
    let job = ops::job_snapshot(sched, id)?;
    let policy = ops::job_policy(sched, &job);
    ops::check_policy(sched, client, Operation::ReleaseJob, &policy, Some(&job.user))?;
    sched.jobs.write().unwrap().with_job_mut(id, |j| {
        j.release()?;
        j.attrs
            .append(GroupTag::Job, Attribute::keyword("job-hold-until", "no-hold"));
        Ok(())
    })?;
    let job = ops::job_snapshot(sched, id)?;
    sched.job_event(
        event_mask::JOB_STATE_CHANGED,
        &job,
        format!("Job {id} released."),
    );
    sched.start_pending_jobs();
    Ok(ok_response(sched, msg))
}

pub fn restart_job(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let id = ops::target_job_id(msg)?;
    let job = ops::job_snapshot(sched, id)?;
    let policy = ops::job_policy(sched, &job);
    ops::check_policy(sched, client, Operation::RestartJob, &policy, Some(&job.user))?;
    sched
        .jobs
        .write()
        .unwrap()
        .with_job_mut(id, |j| j.restart())?;
    let job = ops::job_snapshot(sched, id)?;
    sched.job_event(
        event_mask::JOB_STATE_CHANGED,
        &job,
        format!("Job {id} restarted."),
    );
    sched.start_pending_jobs();
    Ok(ok_response(sched, msg))
}

pub fn get_job_attributes(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let id = ops::target_job_id(msg)?;
    let job = ops::job_snapshot(sched, id)?;
    let policy = ops::job_policy(sched, &job);
    ops::check_policy(sched, client, Operation::GetJobAttributes, &policy, None)?;
    let requested = ops::requested_set(msg);
    let private = sched
        .policies
        .private_attributes(&policy_or_default(sched, &policy), client, Some(&job.user))
        .to_vec();

    let mut resp = ok_response(sched, msg);
    resp.attrs.separator();
    ops::append_filtered(
        &mut resp,
        GroupTag::Job,
        ops::job_attr_list(sched, &job),
        requested.as_ref(),
        &private,
    );
    Ok(resp)
}

pub fn get_jobs(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let dest = match ops::dest_ref(msg)? {
        Some(dest) => {
            sched.registry.read().unwrap().get(&dest.name)?;
            Some(dest.name)
        }
        None => None,
    };
    ops::check_policy(
        sched,
        client,
        Operation::GetJobs,
        &sched.config.default_policy,
        None,
    )?;
    let selector = ops::job_selector(msg, client, dest)?;
    let requested = ops::requested_set(msg);

    let ids = sched.jobs.read().unwrap().select(&selector);
    let mut resp = ok_response(sched, msg);
    for id in ids {
        let Ok(job) = ops::job_snapshot(sched, id) else {
            continue;
        };
        let policy = ops::job_policy(sched, &job);
        let private = sched
            .policies
            .private_attributes(&policy_or_default(sched, &policy), client, Some(&job.user))
            .to_vec();
        resp.attrs.separator();
        ops::append_filtered(
            &mut resp,
            GroupTag::Job,
            ops::job_attr_list(sched, &job),
            requested.as_ref(),
            &private,
        );
    }
    Ok(resp)
}

pub fn set_job_attributes(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let id = ops::target_job_id(msg)?;
    let job = ops::job_snapshot(sched, id)?;
    let policy = ops::job_policy(sched, &job);
    ops::check_policy(sched, client, Operation::SetJobAttributes, &policy, Some(&job.user))?;
    if job.state.is_terminal() {
        return Err(SchedError::NotPossible(format!("job {id} has finished")));
    }

    let updates = ops::request_job_group(msg);
    let offenders: Vec<Attribute> = updates
        .iter()
        .filter(|(_, a)| READ_ONLY_ATTRS.contains(&a.name.as_str()))
        .map(|(_, a)| a.clone())
        .collect();
    if !offenders.is_empty() {
        return Err(SchedError::AttributesNotSupported {
            reason: format!("{:?} is read-only", offenders[0].name),
            attrs: offenders,
        });
    }

    let mut hold_change: Option<String> = None;
    sched.jobs.write().unwrap().with_job_mut(id, |j| {
        for (_, attr) in updates.iter() {
            if attr.tag == ValueTag::DeleteAttribute {
                j.attrs.remove(&attr.name);
                j.dirty = true;
                continue;
            }
            attr.validate()?;
            match attr.name.as_str() {
                "job-priority" => {
                    let value = attr.as_integer().unwrap_or(0);
                    if !(1..=100).contains(&value) {
                        return Err(SchedError::AttributesNotSupported {
                            reason: format!("job-priority {value} outside [1, 100]"),
                            attrs: vec![attr.clone()],
                        });
                    }
                    j.priority = value;
                    j.dirty = true;
                }
                "job-hold-until" => {
                    hold_change = attr.as_str().map(str::to_string);
                }
                _ => {
                    j.attrs.append(GroupTag::Job, attr.clone());
                    j.dirty = true;
                }
            }
        }
        Ok(())
    })?;

    if let Some(keyword) = hold_change {
        sched.jobs.write().unwrap().with_job_mut(id, |j| {
            if keyword == "no-hold" {
                if j.state == JobState::Held {
                    j.release()?;
                }
            } else {
                j.hold(
                    HoldUntil::from_keyword(&keyword, chrono::Utc::now()),
                    "job-hold-until-specified",
                )?;
            }
            j.attrs.append(
                GroupTag::Job,
                Attribute::keyword("job-hold-until", keyword.clone()),
            );
            Ok(())
        })?;
    }

    let job = ops::job_snapshot(sched, id)?;
    sched.job_event(
        event_mask::JOB_CONFIG_CHANGED,
        &job,
        format!("Job {id} changed."),
    );
    sched.start_pending_jobs();
    Ok(ok_response(sched, msg))
}

pub fn move_job(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let target_uri = ops::attr_in_op(msg, "job-printer-uri")
        .ok_or_else(|| SchedError::BadRequest("job-printer-uri is required".into()))?;
    if !ops::is_uri(&target_uri) {
        return Err(SchedError::BadRequest("job-printer-uri is not a uri".into()));
    }
    let new_ref = vellum_proto::parse_dest_uri(
        target_uri
            .as_str()
            .ok_or_else(|| SchedError::BadRequest("job-printer-uri is not a uri".into()))?,
    )?;
    let new_dest = sched
        .registry
        .read()
        .unwrap()
        .get(&new_ref.name)?
        .clone();

    let single = msg.attrs.find_in(GroupTag::Operation, "job-uri").is_some()
        || msg.attrs.find_in(GroupTag::Operation, "job-id").is_some();

    let ids: Vec<JobId> = if single {
        vec![ops::target_job_id(msg)?]
    } else {
        let source = ops::dest_ref(msg)?
            .ok_or_else(|| SchedError::BadRequest("request names no job or queue".into()))?;
        sched
            .jobs
            .read()
            .unwrap()
            .iter()
            .filter(|j| j.dest.eq_ignore_ascii_case(&source.name) && j.state.is_active())
            .map(|j| j.id)
            .collect()
    };

    for id in &ids {
        let job = ops::job_snapshot(sched, *id)?;
        let owner = if single { Some(job.user.clone()) } else { None };
        ops::check_policy(
            sched,
            client,
            Operation::MoveJob,
            &new_dest.op_policy,
            owner.as_deref(),
        )?;
        if job.state == JobState::Processing {
            if single {
                return Err(SchedError::NotPossible(format!(
                    "job {id} is already printing"
                )));
            }
            continue;
        }
        if job.state.is_terminal() {
            if single {
                return Err(SchedError::NotPossible(format!("job {id} has finished")));
            }
            continue;
        }
        sched.jobs.write().unwrap().with_job_mut(*id, |j| {
            j.dest = new_dest.name.clone();
            j.dest_kind = new_dest.kind;
            j.dirty = true;
            Ok(())
        })?;
        info!(job = %id, dest = %new_dest.name, "job moved");
    }

    sched.printer_event(
        event_mask::PRINTER_QUEUE_ORDER_CHANGED,
        &new_dest,
        format!("Jobs moved to {}.", new_dest.name),
    );
    sched.start_pending_jobs();
    Ok(ok_response(sched, msg))
}

pub fn authenticate_job(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let id = ops::target_job_id(msg)?;
    let job = ops::job_snapshot(sched, id)?;
    let policy = ops::job_policy(sched, &job);
    ops::check_policy(
        sched,
        client,
        Operation::AuthenticateJob,
        &policy,
        Some(&job.user),
    )?;

    let values: Vec<String> = msg
        .attrs
        .find_in(GroupTag::Operation, "auth-info")
        .map(|a| a.strings().into_iter().map(str::to_string).collect())
        .unwrap_or_default();
    if values.is_empty() {
        return Err(SchedError::BadRequest("auth-info is required".into()));
    }

    let mut slots: [Option<String>; AUTH_SLOTS] = Default::default();
    for (slot, value) in slots.iter_mut().zip(values.into_iter()) {
        *slot = Some(value);
    }
    sched.spool.write_credentials(id, &slots)?;

    let was_held_for_auth = job.state_reasons.contains("job-held-for-authentication");
    sched.jobs.write().unwrap().with_job_mut(id, |j| {
        j.auth = slots;
        j.remove_reason("job-held-for-authentication");
        if j.state == JobState::Held && was_held_for_auth {
            j.release()?;
        }
        Ok(())
    })?;

    let job = ops::job_snapshot(sched, id)?;
    sched.job_event(
        event_mask::JOB_STATE_CHANGED,
        &job,
        format!("Job {id} authenticated."),
    );
    sched.start_pending_jobs();
    Ok(ok_response(sched, msg))
}

fn bulk_cancel(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
    op: Operation,
    purge_default: bool,
    own_only: bool,
) -> Result<IppMessage> {
    let dest = match ops::dest_ref(msg)? {
        Some(dest) => {
            sched.registry.read().unwrap().get(&dest.name)?;
            Some(dest.name)
        }
        None => None,
    };
    let owner = own_only.then(|| client.user.clone());
    ops::check_policy(
        sched,
        client,
        op,
        &sched.config.default_policy,
        owner.as_deref(),
    )?;

    let purge = ops::attr_in_op(msg, "purge-jobs")
        .and_then(|a| a.as_boolean())
        .unwrap_or(purge_default);

    let mut selector = ops::job_selector(msg, client, dest)?;
    selector.which = Some(if purge {
        crate::jobstore::WhichJobs::All
    } else {
        crate::jobstore::WhichJobs::NotCompleted
    });
    if own_only {
        selector.user = Some(client.user.clone());
    }

    let ids = sched.jobs.read().unwrap().select(&selector);
    let mut canceled = 0usize;
    for id in ids {
        match sched.cancel_job(id, purge, op.name()) {
            Ok(()) => canceled += 1,
            Err(SchedError::NotPossible(_)) => {}
            Err(e) => return Err(e),
        }
    }
    info!(op = op.name(), canceled, purge, "bulk cancel finished");
    Ok(ok_response(sched, msg))
}

/// Cancel-Jobs: administrative, cancels active jobs, purge only on request.
pub fn cancel_jobs(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    bulk_cancel(sched, client, msg, Operation::CancelJobs, false, false)
}

/// Purge-Jobs: administrative, removes history and files too.
pub fn purge_jobs(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    bulk_cancel(sched, client, msg, Operation::PurgeJobs, true, false)
}

/// Cancel-My-Jobs: scoped to the requesting user, never purges.
pub fn cancel_my_jobs(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    bulk_cancel(sched, client, msg, Operation::CancelMyJobs, false, true)
}

pub fn get_document(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let id = ops::target_job_id(msg)?;
    let job = ops::job_snapshot(sched, id)?;
    let policy = ops::job_policy(sched, &job);
    ops::check_policy(sched, client, Operation::GetDocument, &policy, Some(&job.user))?;

    let number = msg
        .attrs
        .find_in(GroupTag::Operation, "document-number")
        .and_then(|a| a.as_integer())
        .unwrap_or(1);
    if number < 1 || number as usize > job.num_files() {
        return Err(SchedError::NotFound(format!(
            "job {id} has no document {number}"
        )));
    }
    let bytes = sched.spool.read_document(id, number as usize)?;
    let format = job.files[number as usize - 1].format.clone();

    let mut resp = ok_response(sched, msg);
    resp.attrs.append(
        GroupTag::Operation,
        Attribute::mime_type("document-format", format),
    );
    resp.attrs.append(
        GroupTag::Operation,
        Attribute::integer("document-number", number),
    );
    resp.payload = bytes;
    Ok(resp)
}

fn policy_or_default<'a>(sched: &'a Scheduler, policy: &'a str) -> String {
    if policy.is_empty() {
        sched.config.default_policy.clone()
    } else {
        policy.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::dispatch::Dispatcher;
    use tempfile::TempDir;
    use vellum_proto::StatusCode;

    fn scheduler() -> (TempDir, Arc<Scheduler>) {
        let dir = TempDir::new().unwrap();
        let mut config = ServerConfig::default();
        config.spool_root = dir.path().join("spool");
        config.cache_root = dir.path().join("cache");
        let sched = Arc::new(Scheduler::new(config).unwrap());
        sched.registry.write().unwrap().add_printer("press").unwrap();
        (dir, sched)
    }

    fn request(op: Operation, uri: &str) -> IppMessage {
        let mut msg = IppMessage::request((2, 0), op, 1);
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::charset("attributes-charset", "utf-8"),
        );
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::language("attributes-natural-language", "en"),
        );
        msg.attrs
            .append(GroupTag::Operation, Attribute::uri("printer-uri", uri));
        msg
    }

    const PRINTER: &str = "ipp://localhost/printers/press";

    #[test]
    fn print_job_autotypes_pdf() {
        let (_d, sched) = scheduler();
        let dispatcher = Dispatcher::new();
        let mut msg = request(Operation::PrintJob, PRINTER);
        msg.payload = b"%PDF-1.4 payload".to_vec();
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &msg);
        assert_eq!(resp.status(), Some(StatusCode::Ok));
        let id = resp.attrs.find("job-id").unwrap().as_integer().unwrap();
        let job = sched
            .jobs
            .read()
            .unwrap()
            .get(JobId::new(id))
            .unwrap()
            .clone();
        assert_eq!(
            job.attrs.find("document-format-detected").unwrap().as_str(),
            Some("application/pdf")
        );
    }

    #[test]
    fn validate_job_creates_nothing() {
        let (_d, sched) = scheduler();
        let dispatcher = Dispatcher::new();
        let mut msg = request(Operation::ValidateJob, PRINTER);
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::mime_type("document-format", "text/plain"),
        );
        msg.attrs
            .append(GroupTag::Operation, Attribute::name_value("job-name", "t"));
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &msg);
        assert_eq!(resp.status(), Some(StatusCode::Ok));
        assert!(sched.jobs.read().unwrap().is_empty());
        assert_eq!(sched.jobs.read().unwrap().queued_count("press"), 0);
    }

    #[test]
    fn multi_document_flow() {
        let (_d, mut sched) = scheduler();
        Arc::get_mut(&mut sched).unwrap().exec = Box::new(crate::seams::ManualExec);
        let dispatcher = Dispatcher::new();

        let resp = dispatcher.dispatch(
            &sched,
            &ClientContext::local_admin(),
            &request(Operation::CreateJob, PRINTER),
        );
        assert_eq!(resp.status(), Some(StatusCode::Ok));
        let id = resp.attrs.find("job-id").unwrap().as_integer().unwrap();
        assert_eq!(
            resp.attrs.find("job-state").unwrap().as_integer(),
            Some(JobState::Held.as_i32())
        );

        let mut send = request(Operation::SendDocument, PRINTER);
        send.attrs
            .append(GroupTag::Operation, Attribute::integer("job-id", id));
        send.attrs.append(
            GroupTag::Operation,
            Attribute::boolean("last-document", false),
        );
        send.payload = b"a".to_vec();
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &send);
        assert_eq!(resp.status(), Some(StatusCode::Ok));

        let mut send = request(Operation::SendDocument, PRINTER);
        send.attrs
            .append(GroupTag::Operation, Attribute::integer("job-id", id));
        send.attrs.append(
            GroupTag::Operation,
            Attribute::boolean("last-document", true),
        );
        send.payload = b"b".to_vec();
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &send);
        assert_eq!(resp.status(), Some(StatusCode::Ok));

        let job = sched
            .jobs
            .read()
            .unwrap()
            .get(JobId::new(id))
            .unwrap()
            .clone();
        assert_eq!(job.num_files(), 2);
        assert!(matches!(job.state, JobState::Pending | JobState::Processing));
    }

    #[test]
    fn hold_and_release_via_handlers() {
        let (_d, mut sched) = scheduler();
        Arc::get_mut(&mut sched).unwrap().exec = Box::new(crate::seams::ManualExec);
        let dispatcher = Dispatcher::new();
        let mut msg = request(Operation::PrintJob, PRINTER);
        msg.payload = b"%PDF-1.4".to_vec();
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &msg);
        let id = resp.attrs.find("job-id").unwrap().as_integer().unwrap();

        // the manual engine leaves it printing; cancel that and start over
        // with a fresh pending job is overkill: hold the processing job fails
        let mut hold = request(Operation::HoldJob, PRINTER);
        hold.attrs
            .append(GroupTag::Operation, Attribute::integer("job-id", id));
        hold.attrs.append(
            GroupTag::Operation,
            Attribute::keyword("job-hold-until", "indefinite"),
        );
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &hold);
        assert_eq!(resp.status(), Some(StatusCode::NotPossible));

        // release on a non-held job is not-possible either
        let mut release = request(Operation::ReleaseJob, PRINTER);
        release
            .attrs
            .append(GroupTag::Operation, Attribute::integer("job-id", id));
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &release);
        assert_eq!(resp.status(), Some(StatusCode::NotPossible));
    }

    #[test]
    fn owner_checks_gate_cancel() {
        let (_d, mut sched) = scheduler();
        Arc::get_mut(&mut sched).unwrap().exec = Box::new(crate::seams::ManualExec);
        let dispatcher = Dispatcher::new();

        let mei = ClientContext {
            user: "mei".into(),
            groups: vec![],
            host: "h".into(),
            local: true,
            tls: false,
        };
        let mut msg = request(Operation::CreateJob, PRINTER);
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::name_value("requesting-user-name", "mei"),
        );
        let resp = dispatcher.dispatch(&sched, &mei, &msg);
        let id = resp.attrs.find("job-id").unwrap().as_integer().unwrap();

        let sam = ClientContext {
            user: "sam".into(),
            ..mei.clone()
        };
        let mut cancel = request(Operation::CancelJob, PRINTER);
        cancel
            .attrs
            .append(GroupTag::Operation, Attribute::integer("job-id", id));
        let resp = dispatcher.dispatch(&sched, &sam, &cancel);
        assert_eq!(resp.status(), Some(StatusCode::NotAuthorized));

        let resp = dispatcher.dispatch(&sched, &mei, &cancel);
        assert_eq!(resp.status(), Some(StatusCode::Ok));
    }

    #[test]
    fn get_jobs_redacts_for_strangers() {
        let (_d, mut sched) = scheduler();
        Arc::get_mut(&mut sched).unwrap().exec = Box::new(crate::seams::ManualExec);
        let dispatcher = Dispatcher::new();

        let mei = ClientContext {
            user: "mei".into(),
            groups: vec![],
            host: "h".into(),
            local: true,
            tls: false,
        };
        let resp = dispatcher.dispatch(&sched, &mei, &request(Operation::CreateJob, PRINTER));
        assert_eq!(resp.status(), Some(StatusCode::Ok));

        let sam = ClientContext {
            user: "sam".into(),
            ..mei.clone()
        };
        let mut list = request(Operation::GetJobs, PRINTER);
        list.attrs.append(
            GroupTag::Operation,
            Attribute::keyword("which-jobs", "not-completed"),
        );
        let resp = dispatcher.dispatch(&sched, &sam, &list);
        assert_eq!(resp.status(), Some(StatusCode::Ok));
        assert!(resp.attrs.find("job-id").is_some());
        assert!(resp.attrs.find("job-originating-user-name").is_none());

        let resp = dispatcher.dispatch(&sched, &mei, &list);
        assert_eq!(
            resp.attrs
                .find("job-originating-user-name")
                .unwrap()
                .as_str(),
            Some("mei")
        );
    }

    #[test]
    fn set_job_attributes_rejects_read_only() {
        let (_d, mut sched) = scheduler();
        Arc::get_mut(&mut sched).unwrap().exec = Box::new(crate::seams::ManualExec);
        let dispatcher = Dispatcher::new();
        let resp = dispatcher.dispatch(
            &sched,
            &ClientContext::local_admin(),
            &request(Operation::CreateJob, PRINTER),
        );
        let id = resp.attrs.find("job-id").unwrap().as_integer().unwrap();

        let mut set = request(Operation::SetJobAttributes, PRINTER);
        set.attrs
            .append(GroupTag::Operation, Attribute::integer("job-id", id));
        set.attrs
            .append(GroupTag::Job, Attribute::enum_value("job-state", 9));
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &set);
        assert_eq!(
            resp.status(),
            Some(StatusCode::AttributesOrValuesNotSupported)
        );
        // the offending attribute is echoed in the unsupported group
        assert!(resp
            .attrs
            .groups()
            .iter()
            .any(|g| g.tag == GroupTag::Unsupported && g.find("job-state").is_some()));
    }

    #[test]
    fn cancel_my_jobs_leaves_other_users_jobs() {
        let (_d, mut sched) = scheduler();
        Arc::get_mut(&mut sched).unwrap().exec = Box::new(crate::seams::ManualExec);
        let dispatcher = Dispatcher::new();
        let mei = ClientContext {
            user: "mei".into(),
            groups: vec![],
            host: "h".into(),
            local: true,
            tls: false,
        };
        let sam = ClientContext {
            user: "sam".into(),
            ..mei.clone()
        };
        let a = dispatcher.dispatch(&sched, &mei, &request(Operation::CreateJob, PRINTER));
        let b = dispatcher.dispatch(&sched, &sam, &request(Operation::CreateJob, PRINTER));
        let a = a.attrs.find("job-id").unwrap().as_integer().unwrap();
        let b = b.attrs.find("job-id").unwrap().as_integer().unwrap();

        let resp = dispatcher.dispatch(&sched, &mei, &request(Operation::CancelMyJobs, PRINTER));
        assert_eq!(resp.status(), Some(StatusCode::Ok));

        let store = sched.jobs.read().unwrap();
        assert!(store.get(JobId::new(a)).unwrap().state.is_terminal());
        assert!(store.get(JobId::new(b)).unwrap().state.is_active());
    }

    #[test]
    fn move_job_reassigns_destination() {
        let (_d, mut sched) = scheduler();
        Arc::get_mut(&mut sched).unwrap().exec = Box::new(crate::seams::ManualExec);
        sched.registry.write().unwrap().add_printer("backup").unwrap();
        let dispatcher = Dispatcher::new();
        let resp = dispatcher.dispatch(
            &sched,
            &ClientContext::local_admin(),
            &request(Operation::CreateJob, PRINTER),
        );
        let id = resp.attrs.find("job-id").unwrap().as_integer().unwrap();

        let mut mv = request(Operation::MoveJob, PRINTER);
        mv.attrs
            .append(GroupTag::Operation, Attribute::integer("job-id", id));
        mv.attrs.append(
            GroupTag::Operation,
            Attribute::uri("job-printer-uri", "ipp://localhost/printers/backup"),
        );
        let resp = dispatcher.dispatch(&sched, &ClientContext::local_admin(), &mv);
        assert_eq!(resp.status(), Some(StatusCode::Ok));
        assert_eq!(
            sched
                .jobs
                .read()
                .unwrap()
                .get(JobId::new(id))
                .unwrap()
                .dest,
            "backup"
        );
    }
}
