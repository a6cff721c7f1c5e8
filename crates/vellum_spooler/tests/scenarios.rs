//! End-to-end request scenarios driven through the dispatcher, with every
//! request pushed through the wire codec first so the whole stack is
//! exercised.

use std::sync::Arc;
use tempfile::TempDir;
use vellum_proto::{
    Attribute, GroupTag, IppMessage, JobId, Operation, StatusCode,
};
use vellum_spooler::{ClientContext, Dispatcher, Scheduler, ServerConfig};

const PRINTER: &str = "ipp://localhost/printers/press";

fn scheduler_at(dir: &TempDir) -> Arc<Scheduler> {
    let mut config = ServerConfig::default();
    config.spool_root = dir.path().join("spool");
    config.cache_root = dir.path().join("cache");
    let sched = Arc::new(Scheduler::new(config).unwrap());
    sched
        .registry
        .write()
        .unwrap()
        .add_printer("press")
        .unwrap();
    sched
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

/// Encode, decode, dispatch: the request crosses the wire format both ways.
fn roundtrip_dispatch(
    dispatcher: &Dispatcher,
    sched: &Arc<Scheduler>,
    client: &ClientContext,
    msg: &IppMessage,
) -> IppMessage {
    let bytes = msg.encode().unwrap();
    let decoded = IppMessage::decode(&bytes).unwrap();
    assert_eq!(&decoded, msg);
    let resp = dispatcher.dispatch(sched, client, &decoded);
    let resp_bytes = resp.encode().unwrap();
    IppMessage::decode(&resp_bytes).unwrap()
}

#[test]
fn validate_job_happy_path() {
    let dir = TempDir::new().unwrap();
    let sched = scheduler_at(&dir);
    let dispatcher = Dispatcher::new();

    let mut msg = request(Operation::ValidateJob, PRINTER);
    msg.attrs.append(
        GroupTag::Operation,
        Attribute::mime_type("document-format", "text/plain"),
    );
    msg.attrs
        .append(GroupTag::Operation, Attribute::name_value("job-name", "t"));

    let resp = roundtrip_dispatch(&dispatcher, &sched, &ClientContext::local_admin(), &msg);
    assert_eq!(resp.status(), Some(StatusCode::Ok));
    assert!(sched.jobs.read().unwrap().is_empty());
    assert_eq!(sched.jobs.read().unwrap().queued_count("press"), 0);
}

#[test]
fn print_job_auto_types_pdf_payload() {
    let dir = TempDir::new().unwrap();
    let sched = scheduler_at(&dir);
    let dispatcher = Dispatcher::new();

    let mut msg = request(Operation::PrintJob, PRINTER);
    msg.payload = b"%PDF-1.5\n...".to_vec();
    let resp = roundtrip_dispatch(&dispatcher, &sched, &ClientContext::local_admin(), &msg);
    assert_eq!(resp.status(), Some(StatusCode::Ok));

    let state = resp.attrs.find("job-state").unwrap().as_integer().unwrap();
    // pending, processing, or already done under the immediate engine
    assert!((3..=9).contains(&state));

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
fn multi_document_job_collects_two_files() {
    let dir = TempDir::new().unwrap();
    let sched = scheduler_at(&dir);
    let dispatcher = Dispatcher::new();
    let admin = ClientContext::local_admin();

    let resp = roundtrip_dispatch(
        &dispatcher,
        &sched,
        &admin,
        &request(Operation::CreateJob, PRINTER),
    );
    assert_eq!(resp.status(), Some(StatusCode::Ok));
    let id = resp.attrs.find("job-id").unwrap().as_integer().unwrap();

    for (body, last) in [(&b"first"[..], false), (&b"second"[..], true)] {
        let mut send = request(Operation::SendDocument, PRINTER);
        send.attrs
            .append(GroupTag::Operation, Attribute::integer("job-id", id));
        send.attrs.append(
            GroupTag::Operation,
            Attribute::boolean("last-document", last),
        );
        send.attrs.append(
            GroupTag::Operation,
            Attribute::mime_type("document-format", "text/plain"),
        );
        send.payload = body.to_vec();
        let resp = roundtrip_dispatch(&dispatcher, &sched, &admin, &send);
        assert_eq!(resp.status(), Some(StatusCode::Ok));
    }

    // the immediate engine completes the job right after close; history
    // preserves it with both documents on record
    let job = sched
        .jobs
        .read()
        .unwrap()
        .get(JobId::new(id))
        .unwrap()
        .clone();
    assert!(job.state.is_terminal() || job.num_files() == 2);
    assert_eq!(job.attrs.find("document-format-detected"), None);
}

#[test]
fn hold_until_indefinite_then_release() {
    let dir = TempDir::new().unwrap();
    let sched = scheduler_at(&dir);
    let dispatcher = Dispatcher::new();
    let admin = ClientContext::local_admin();

    // a held submission survives the scheduler pass untouched
    let mut msg = request(Operation::PrintJob, PRINTER);
    msg.attrs.append(
        GroupTag::Job,
        Attribute::keyword("job-hold-until", "indefinite"),
    );
    msg.payload = b"%PDF-1.5".to_vec();
    let resp = roundtrip_dispatch(&dispatcher, &sched, &admin, &msg);
    assert_eq!(resp.status(), Some(StatusCode::Ok));
    let id = resp.attrs.find("job-id").unwrap().as_integer().unwrap();
    assert_eq!(resp.attrs.find("job-state").unwrap().as_integer(), Some(4));
    let reasons: Vec<String> = resp
        .attrs
        .find("job-state-reasons")
        .unwrap()
        .strings()
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert!(reasons.contains(&"job-hold-until-specified".to_string()));

    let mut release = request(Operation::ReleaseJob, PRINTER);
    release
        .attrs
        .append(GroupTag::Operation, Attribute::integer("job-id", id));
    let resp = roundtrip_dispatch(&dispatcher, &sched, &admin, &release);
    assert_eq!(resp.status(), Some(StatusCode::Ok));

    // released and immediately finished by the immediate engine
    let job = sched
        .jobs
        .read()
        .unwrap()
        .get(JobId::new(id))
        .unwrap()
        .clone();
    assert!(job.state == vellum_spooler::job::JobState::Completed);
}

#[test]
fn subscription_pull_sees_job_completed() {
    let dir = TempDir::new().unwrap();
    let sched = scheduler_at(&dir);
    let dispatcher = Dispatcher::new();
    let admin = ClientContext::local_admin();

    let mut create = request(Operation::CreatePrinterSubscriptions, PRINTER);
    create.attrs.append(
        GroupTag::Subscription,
        Attribute::keywords("notify-events", ["job-completed"]),
    );
    create.attrs.append(
        GroupTag::Subscription,
        Attribute::keyword("notify-pull-method", "ippget"),
    );
    let resp = roundtrip_dispatch(&dispatcher, &sched, &admin, &create);
    assert_eq!(resp.status(), Some(StatusCode::Ok));
    let sub_id = resp
        .attrs
        .find("notify-subscription-id")
        .unwrap()
        .as_integer()
        .unwrap();

    let mut print = request(Operation::PrintJob, PRINTER);
    print.payload = b"%PDF-1.5".to_vec();
    let resp = roundtrip_dispatch(&dispatcher, &sched, &admin, &print);
    assert_eq!(resp.status(), Some(StatusCode::Ok));

    let mut poll = request(Operation::GetNotifications, PRINTER);
    poll.attrs.append(
        GroupTag::Operation,
        Attribute::integer("notify-subscription-ids", sub_id),
    );
    poll.attrs.append(
        GroupTag::Operation,
        Attribute::integer("notify-sequence-numbers", 1),
    );
    let resp = roundtrip_dispatch(&dispatcher, &sched, &admin, &poll);
    assert_eq!(resp.status(), Some(StatusCode::OkEventsComplete));
    assert_eq!(
        resp.attrs
            .find("notify-sequence-number")
            .unwrap()
            .as_integer(),
        Some(1)
    );
    assert_eq!(
        resp.attrs
            .find("notify-subscribed-event")
            .unwrap()
            .as_str(),
        Some("job-completed")
    );
}

#[test]
fn out_of_order_groups_create_nothing() {
    let dir = TempDir::new().unwrap();
    let sched = scheduler_at(&dir);
    let dispatcher = Dispatcher::new();

    let mut msg = request(Operation::PrintJob, PRINTER);
    msg.payload = b"%PDF-1.5".to_vec();
    msg.attrs
        .append(GroupTag::Job, Attribute::integer("copies", 1));
    // an operation-group attribute after the job group
    msg.attrs.append(
        GroupTag::Operation,
        Attribute::name_value("requesting-user-name", "mei"),
    );

    let resp = roundtrip_dispatch(
        &dispatcher,
        &sched,
        &ClientContext::local_admin(),
        &msg,
    );
    assert_eq!(resp.status(), Some(StatusCode::BadRequest));
    assert!(sched.jobs.read().unwrap().is_empty());
    assert_eq!(sched.jobs.read().unwrap().queued_count("press"), 0);
}

#[test]
fn quota_denial_is_per_user() {
    let dir = TempDir::new().unwrap();
    let sched = scheduler_at(&dir);
    {
        let mut registry = sched.registry.write().unwrap();
        let p = registry.find_mut("press").unwrap();
        p.page_limit = 1;
        p.quota_period_secs = 3600;
    }
    let dispatcher = Dispatcher::new();
    let mei = ClientContext {
        user: "mei".into(),
        groups: vec![],
        host: "h".into(),
        local: true,
        tls: false,
    };

    // first job completes and books one impression against the quota
    let mut print = request(Operation::PrintJob, PRINTER);
    print.payload = b"%PDF-1.5".to_vec();
    let resp = roundtrip_dispatch(&dispatcher, &sched, &mei, &print);
    assert_eq!(resp.status(), Some(StatusCode::Ok));

    // the second submission by the same user is over the limit
    let resp = roundtrip_dispatch(&dispatcher, &sched, &mei, &print);
    assert_eq!(resp.status(), Some(StatusCode::NotPossible));

    // a different user still prints
    let sam = ClientContext {
        user: "sam".into(),
        ..mei.clone()
    };
    let resp = roundtrip_dispatch(&dispatcher, &sched, &sam, &print);
    assert_eq!(resp.status(), Some(StatusCode::Ok));
}

#[test]
fn state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let held_id;
    {
        let sched = scheduler_at(&dir);
        let dispatcher = Dispatcher::new();
        let mut msg = request(Operation::PrintJob, PRINTER);
        msg.attrs.append(
            GroupTag::Job,
            Attribute::keyword("job-hold-until", "indefinite"),
        );
        msg.payload = b"%PDF-1.5".to_vec();
        let resp = roundtrip_dispatch(&dispatcher, &sched, &ClientContext::local_admin(), &msg);
        held_id = resp.attrs.find("job-id").unwrap().as_integer().unwrap();
        sched.flush(true).unwrap();
    }

    let mut config = ServerConfig::default();
    config.spool_root = dir.path().join("spool");
    config.cache_root = dir.path().join("cache");
    let sched = Scheduler::new(config).unwrap();
    assert!(sched.registry.read().unwrap().find("press").is_some());
    let job = sched
        .jobs
        .read()
        .unwrap()
        .get(JobId::new(held_id))
        .unwrap()
        .clone();
    assert_eq!(job.state, vellum_spooler::job::JobState::Held);
    assert_eq!(job.user, "root");
}

#[test]
fn cancel_terminal_job_not_possible() {
    let dir = TempDir::new().unwrap();
    let sched = scheduler_at(&dir);
    let dispatcher = Dispatcher::new();
    let admin = ClientContext::local_admin();

    let mut print = request(Operation::PrintJob, PRINTER);
    print.payload = b"%PDF-1.5".to_vec();
    let resp = roundtrip_dispatch(&dispatcher, &sched, &admin, &print);
    let id = resp.attrs.find("job-id").unwrap().as_integer().unwrap();

    // the immediate engine already completed it
    let mut cancel = request(Operation::CancelJob, PRINTER);
    cancel
        .attrs
        .append(GroupTag::Operation, Attribute::integer("job-id", id));
    let resp = roundtrip_dispatch(&dispatcher, &sched, &admin, &cancel);
    assert_eq!(resp.status(), Some(StatusCode::NotPossible));
    assert_eq!(
        sched
            .jobs
            .read()
            .unwrap()
            .get(JobId::new(id))
            .unwrap()
            .state,
        vellum_spooler::job::JobState::Completed
    );
}
