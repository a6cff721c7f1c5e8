//! Subscription operation handlers.

use crate::client::ClientContext;
use crate::error::{Result, SchedError};
use crate::job::JobState;
use crate::ops::{self, ok_response};
use crate::registry::DestState;
use crate::scheduler::Scheduler;
use crate::subs::{event_mask, SubscribeRequest, Subscription};
use std::sync::Arc;
use vellum_proto::{
    AttrValue, Attribute, GroupTag, IppMessage, JobId, Operation, StatusCode, SubscriptionId,
};

fn owner_or_admin(client: &ClientContext, sub: &Subscription) -> Result<()> {
    if client.is_admin() || client.user == sub.owner {
        Ok(())
    } else {
        Err(SchedError::NotAuthorized(format!(
            "subscription {} belongs to {:?}",
            sub.id, sub.owner
        )))
    }
}

/// Build one subscription request from a subscription attribute group.
fn subscribe_request(
    group: &[Attribute],
    dest: Option<String>,
    job: Option<JobId>,
    owner: &str,
) -> Result<SubscribeRequest> {
    let mut req = SubscribeRequest {
        dest,
        job,
        owner: owner.to_string(),
        mask: 0,
        ..Default::default()
    };
    for attr in group {
        match attr.name.as_str() {
            "notify-events" => {
                for keyword in attr.strings() {
                    req.mask |= event_mask::from_keyword(keyword);
                }
            }
            "notify-recipient-uri" => {
                req.recipient = attr.as_str().map(str::to_string);
            }
            "notify-pull-method" => {
                req.pull_method = attr.as_str().map(str::to_string);
            }
            "notify-lease-duration" => {
                req.lease_secs = attr.as_integer().map(|v| v.max(0) as u32);
            }
            "notify-time-interval" => {
                req.interval = attr.as_integer().unwrap_or(0).max(0) as u32;
            }
            "notify-user-data" => {
                if attr.values.len() > 1 {
                    return Err(SchedError::BadRequest(
                        "notify-user-data accepts one value".into(),
                    ));
                }
                if let Some(AttrValue::OctetString(bytes)) = attr.first() {
                    req.user_data = bytes.clone();
                }
            }
            "notify-job-id" => {
                let id = attr
                    .as_integer()
                    .and_then(|v| JobId::checked(v).ok())
                    .ok_or_else(|| {
                        SchedError::BadRequest("notify-job-id out of range".into())
                    })?;
                req.job = Some(id);
            }
            _ => {}
        }
    }
    if req.mask == 0 {
        req.mask = event_mask::JOB_COMPLETED;
    }
    Ok(req)
}

fn create_subscriptions(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
    op: Operation,
    job_scope: bool,
) -> Result<IppMessage> {
    let dest = match ops::dest_ref(msg)? {
        Some(dest) => {
            let registry = sched.registry.read().unwrap();
            Some(registry.get(&dest.name)?.name.clone())
        }
        None => None,
    };
    let policy = dest
        .as_deref()
        .and_then(|name| {
            sched
                .registry
                .read()
                .unwrap()
                .find(name)
                .map(|d| d.op_policy.clone())
        })
        .unwrap_or_default();
    ops::check_policy(sched, client, op, &policy, None)?;

    let job = if job_scope {
        let id = ops::target_job_id(msg)?;
        sched.jobs.read().unwrap().get(id)?;
        Some(id)
    } else {
        None
    };

    let groups: Vec<Vec<Attribute>> = msg
        .attrs
        .groups()
        .iter()
        .filter(|g| g.tag == GroupTag::Subscription)
        .map(|g| g.attrs.clone())
        .collect();
    if groups.is_empty() {
        return Err(SchedError::BadRequest(
            "request carries no subscription attributes".into(),
        ));
    }

    let mut resp = ok_response(sched, msg);
    for group in groups {
        let request = subscribe_request(&group, dest.clone(), job, &client.user)?;
        let id = sched.subs.write().unwrap().create(&sched.config, request)?;
        sched.mark_dirty();
        resp.attrs.separator();
        resp.attrs.append(
            GroupTag::Subscription,
            Attribute::integer("notify-subscription-id", id.as_i32()),
        );
    }
    Ok(resp)
}

pub fn create_printer_subscriptions(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    create_subscriptions(
        sched,
        client,
        msg,
        Operation::CreatePrinterSubscriptions,
        false,
    )
}

pub fn create_job_subscriptions(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    create_subscriptions(sched, client, msg, Operation::CreateJobSubscriptions, true)
}

fn subscription_attr_list(sched: &Scheduler, sub: &Subscription) -> Vec<Attribute> {
    let mut out = vec![
        Attribute::integer("notify-subscription-id", sub.id.as_i32()),
        Attribute::keywords("notify-events", event_mask::keywords(sub.mask)),
        Attribute::integer("notify-lease-duration", sub.lease_secs as i32),
        Attribute::integer("notify-time-interval", sub.interval as i32),
        Attribute::name_value("notify-subscriber-user-name", sub.owner.clone()),
    ];
    if let Some(dest) = &sub.dest {
        let segment = sched
            .registry
            .read()
            .unwrap()
            .find(dest)
            .map(|d| d.kind.path_segment())
            .unwrap_or("printers");
        out.push(Attribute::uri(
            "notify-printer-uri",
            sched.config.printer_uri(segment, dest),
        ));
    }
    if let Some(job) = sub.job {
        out.push(Attribute::integer("notify-job-id", job.as_i32()));
    }
    if let Some(recipient) = &sub.recipient {
        out.push(Attribute::uri("notify-recipient-uri", recipient.clone()));
    }
    if let Some(method) = &sub.pull_method {
        out.push(Attribute::keyword("notify-pull-method", method.clone()));
    }
    if !sub.user_data.is_empty() {
        out.push(Attribute::new(
            "notify-user-data",
            AttrValue::OctetString(sub.user_data.clone()),
        ));
    }
    out.push(match sub.expire {
        Some(when) => Attribute::integer("notify-lease-expiration-time", when.timestamp() as i32),
        None => Attribute::integer("notify-lease-expiration-time", 0),
    });
    out
}

pub fn get_subscription_attributes(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let id = subscription_id(msg)?;
    let sub = sched.subs.read().unwrap().get(id)?.clone();
    ops::check_policy(
        sched,
        client,
        Operation::GetSubscriptionAttributes,
        &sched.config.default_policy,
        Some(&sub.owner),
    )?;
    let requested = ops::requested_set(msg);
    let mut resp = ok_response(sched, msg);
    resp.attrs.separator();
    ops::append_filtered(
        &mut resp,
        GroupTag::Subscription,
        subscription_attr_list(sched, &sub),
        requested.as_ref(),
        &[],
    );
    Ok(resp)
}

pub fn get_subscriptions(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    ops::check_policy(
        sched,
        client,
        Operation::GetSubscriptions,
        &sched.config.default_policy,
        None,
    )?;
    let dest = ops::dest_ref(msg)?.map(|d| d.name);
    let mine = msg
        .attrs
        .find_in(GroupTag::Operation, "my-subscriptions")
        .and_then(|a| a.as_boolean())
        .unwrap_or(false);
    let limit = msg
        .attrs
        .find_in(GroupTag::Operation, "limit")
        .and_then(|a| a.as_integer())
        .unwrap_or(0)
        .max(0) as usize;
    let requested = ops::requested_set(msg);

    let subs: Vec<Subscription> = {
        let engine = sched.subs.read().unwrap();
        engine
            .iter()
            .filter(|s| match &dest {
                Some(dest) => s
                    .dest
                    .as_deref()
                    .map(|d| d.eq_ignore_ascii_case(dest))
                    .unwrap_or(false),
                None => true,
            })
            .filter(|s| !mine || s.owner == client.user)
            .cloned()
            .collect()
    };

    let mut resp = ok_response(sched, msg);
    for (index, sub) in subs.iter().enumerate() {
        if limit > 0 && index >= limit {
            break;
        }
        resp.attrs.separator();
        ops::append_filtered(
            &mut resp,
            GroupTag::Subscription,
            subscription_attr_list(sched, sub),
            requested.as_ref(),
            &[],
        );
    }
    Ok(resp)
}

pub fn renew_subscription(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let id = subscription_id(msg)?;
    let sub = sched.subs.read().unwrap().get(id)?.clone();
    owner_or_admin(client, &sub)?;
    let lease = msg
        .attrs
        .find("notify-lease-duration")
        .and_then(|a| a.as_integer())
        .map(|v| v.max(0) as u32)
        .unwrap_or(sched.config.default_lease_secs);
    let effective = sched.subs.write().unwrap().renew(&sched.config, id, lease)?;
    sched.mark_dirty();
    let mut resp = ok_response(sched, msg);
    resp.attrs.append(
        GroupTag::Subscription,
        Attribute::integer("notify-lease-duration", effective as i32),
    );
    Ok(resp)
}

pub fn cancel_subscription(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let id = subscription_id(msg)?;
    let sub = sched.subs.read().unwrap().get(id)?.clone();
    owner_or_admin(client, &sub)?;
    sched.subs.write().unwrap().cancel(id)?;
    sched.mark_dirty();
    Ok(ok_response(sched, msg))
}

/// How soon the client should poll again, and whether anything can still
/// happen: (seconds, still-active).
fn poll_hint(sched: &Scheduler, sub: &Subscription) -> (i32, bool) {
    if let Some(job) = sub.job {
        return match sched.jobs.read().unwrap().get(job) {
            Ok(j) if j.state == JobState::Processing => (10, true),
            Ok(j) if !j.state.is_terminal() => (60, true),
            _ => (0, false),
        };
    }
    if let Some(dest) = &sub.dest {
        let registry = sched.registry.read().unwrap();
        let processing = registry
            .find(dest)
            .map(|d| d.state == DestState::Processing)
            .unwrap_or(false);
        if processing {
            return (30, true);
        }
        let active = sched.jobs.read().unwrap().queued_count(dest) > 0;
        return (60, active);
    }
    let active = !sched.jobs.read().unwrap().active_jobs().is_empty();
    (60, active)
}

pub fn get_notifications(
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> Result<IppMessage> {
    let ids_attr = msg
        .attrs
        .find_in(GroupTag::Operation, "notify-subscription-ids")
        .ok_or_else(|| SchedError::BadRequest("notify-subscription-ids is required".into()))?;
    let ids: Vec<SubscriptionId> = ids_attr
        .values
        .iter()
        .filter_map(|v| v.as_integer())
        .filter_map(|v| SubscriptionId::checked(v).ok())
        .collect();
    if ids.is_empty() {
        return Err(SchedError::BadRequest(
            "notify-subscription-ids carries no valid ids".into(),
        ));
    }
    let min_seqs: Vec<i32> = msg
        .attrs
        .find_in(GroupTag::Operation, "notify-sequence-numbers")
        .map(|a| a.values.iter().filter_map(|v| v.as_integer()).collect())
        .unwrap_or_default();

    let mut interval = i32::MAX;
    let mut all_done = true;
    let mut resp = ok_response(sched, msg);
    let mut event_groups: Vec<(SubscriptionId, Vec<crate::subs::Event>)> = Vec::new();

    for (index, id) in ids.iter().enumerate() {
        let sub = sched.subs.read().unwrap().get(*id)?.clone();
        owner_or_admin(client, &sub)?;
        let min_seq = min_seqs.get(index).copied().unwrap_or(1).max(1);
        let events = sub.events_from(min_seq);
        let (hint, active) = poll_hint(sched, &sub);
        if active {
            all_done = false;
            interval = interval.min(hint.max(1));
        }
        event_groups.push((*id, events));
    }
    if all_done {
        interval = 0;
    } else if interval == i32::MAX {
        interval = 60;
    }

    resp.attrs.append(
        GroupTag::Operation,
        Attribute::integer("notify-get-interval", interval),
    );
    resp.attrs.append(
        GroupTag::Operation,
        Attribute::integer("printer-up-time", sched.uptime()),
    );

    for (id, events) in event_groups {
        for event in events {
            resp.attrs.separator();
            resp.attrs.append(
                GroupTag::EventNotification,
                Attribute::integer("notify-subscription-id", id.as_i32()),
            );
            resp.attrs.append(
                GroupTag::EventNotification,
                Attribute::integer("notify-sequence-number", event.seq),
            );
            resp.attrs.append(
                GroupTag::EventNotification,
                Attribute::keyword(
                    "notify-subscribed-event",
                    event_mask::keyword(event.kind),
                ),
            );
            resp.attrs.append(
                GroupTag::EventNotification,
                Attribute::text("notify-text", event.text.clone()),
            );
            for (_, attr) in event.snapshot.iter() {
                resp.attrs
                    .append(GroupTag::EventNotification, attr.clone());
            }
        }
    }

    if all_done {
        resp.code = StatusCode::OkEventsComplete.as_u16();
    }
    Ok(resp)
}

fn subscription_id(msg: &IppMessage) -> Result<SubscriptionId> {
    let id = msg
        .attrs
        .find_in(GroupTag::Operation, "notify-subscription-id")
        .and_then(|a| a.as_integer())
        .ok_or_else(|| SchedError::BadRequest("notify-subscription-id is required".into()))?;
    SubscriptionId::checked(id)
        .map_err(|_| SchedError::BadRequest(format!("notify-subscription-id {id} out of range")))
}
