//! Notifier child-process supervision.
//!
//! Push subscriptions hand rendered events to an external helper named for
//! the recipient's uri scheme (`vellum-notifier-rss`, `vellum-notifier-mailto`,
//! ...). Helpers get the event on stdin and a bounded wall clock; a helper
//! that overruns is killed rather than leaked.

use crate::error::{Result, SchedError};
use crate::subs::PushDelivery;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct NotifierRunner {
    helper_dir: PathBuf,
    timeout: Duration,
}

impl NotifierRunner {
    pub fn new(helper_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            helper_dir: helper_dir.into(),
            timeout,
        }
    }

    fn helper_path(&self, scheme: &str) -> PathBuf {
        self.helper_dir.join(format!("vellum-notifier-{scheme}"))
    }

    /// Schemes with an installed helper; `ippget` is always available since
    /// pull delivery is internal.
    pub fn installed_schemes(&self) -> BTreeSet<String> {
        let mut schemes: BTreeSet<String> = ["ippget".to_string()].into_iter().collect();
        if let Ok(entries) = std::fs::read_dir(&self.helper_dir) {
            for entry in entries.flatten() {
                if let Some(scheme) = entry
                    .file_name()
                    .to_string_lossy()
                    .strip_prefix("vellum-notifier-")
                {
                    schemes.insert(scheme.to_string());
                }
            }
        }
        schemes
    }

    /// Run the helper for one delivery. Exit codes and timeouts surface as
    /// internal errors with a diagnostic.
    pub async fn deliver(&self, delivery: &PushDelivery) -> Result<()> {
        if delivery.scheme == "ippget" {
            return Ok(());
        }
        let helper = self.helper_path(&delivery.scheme);
        let payload = json!({
            "notify-subscription-id": delivery.subscription.as_i32(),
            "notify-sequence-number": delivery.event.seq,
            "notify-subscribed-event": crate::subs::event_mask::keyword(delivery.event.kind),
            "notify-text": delivery.event.text,
            "event-time": delivery.event.time.to_rfc3339(),
        });

        let mut child = Command::new(&helper)
            .arg(&delivery.recipient)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SchedError::Internal(format!("notifier {} failed to start: {e}", helper.display()))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let body = payload.to_string();
            if let Err(e) = stdin.write_all(body.as_bytes()).await {
                warn!(scheme = %delivery.scheme, error = %e, "notifier rejected event body");
            }
        }

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(result) => result
                .map_err(|e| SchedError::Internal(format!("notifier wait failed: {e}")))?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(SchedError::Internal(format!(
                    "notifier for {} timed out after {:?}",
                    delivery.scheme, self.timeout
                )));
            }
        };

        if !status.success() {
            return Err(SchedError::Internal(format!(
                "notifier for {} exited with {}",
                delivery.scheme,
                status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string())
            )));
        }
        debug!(scheme = %delivery.scheme, seq = delivery.event.seq, "notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subs::{event_mask, Event};
    use chrono::Utc;
    use vellum_proto::{AttrList, SubscriptionId};

    fn delivery(scheme: &str) -> PushDelivery {
        PushDelivery {
            subscription: SubscriptionId::new(1),
            scheme: scheme.to_string(),
            recipient: format!("{scheme}://target"),
            event: Event {
                seq: 1,
                time: Utc::now(),
                kind: event_mask::JOB_COMPLETED,
                text: "done".to_string(),
                snapshot: AttrList::new(),
            },
        }
    }

    #[test]
    fn ippget_is_always_installed() {
        let runner = NotifierRunner::new("/nonexistent", Duration::from_secs(1));
        assert!(runner.installed_schemes().contains("ippget"));
    }

    #[tokio::test]
    async fn pull_deliveries_are_a_no_op() {
        let runner = NotifierRunner::new("/nonexistent", Duration::from_secs(1));
        assert!(runner.deliver(&delivery("ippget")).await.is_ok());
    }

    #[tokio::test]
    async fn missing_helper_is_an_internal_error() {
        let runner = NotifierRunner::new("/nonexistent", Duration::from_secs(1));
        let err = runner.deliver(&delivery("rss")).await.unwrap_err();
        assert!(matches!(err, SchedError::Internal(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn helper_exit_code_is_surfaced() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let helper = dir.path().join("vellum-notifier-rss");
        let mut f = std::fs::File::create(&helper).unwrap();
        writeln!(f, "#!/bin/sh\ncat >/dev/null\nexit 7").unwrap();
        drop(f);
        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).unwrap();

        let runner = NotifierRunner::new(dir.path(), Duration::from_secs(5));
        assert!(runner.installed_schemes().contains("rss"));
        let err = runner.deliver(&delivery("rss")).await.unwrap_err();
        match err {
            SchedError::Internal(msg) => assert!(msg.contains('7'), "message: {msg}"),
            other => panic!("expected internal error, got {other:?}"),
        }
    }
}
