//! Server configuration.
//!
//! The surrounding runtime reads its environment once at startup and hands
//! the scheduler an explicit config; nothing in the core re-reads files or
//! environment variables after boot.

use std::collections::BTreeSet;
use std::path::PathBuf;

pub mod defaults {
    /// Listen address for the framed request channel.
    pub const BIND_ADDR: &str = "127.0.0.1:6631";
    pub const SERVER_NAME: &str = "localhost";
    pub const DEFAULT_POLICY: &str = "default";
    /// Substitute identity for remote clients claiming root.
    pub const REMOTE_ROOT: &str = "remroot";
    pub const DEFAULT_LANGUAGE: &str = "en";
    pub const MAX_JOBS: usize = 500;
    pub const MAX_JOBS_PER_USER: usize = 0; // 0 = unlimited
    pub const MAX_JOBS_PER_PRINTER: usize = 0;
    pub const MAX_ACTIVE_PER_PRINTER: usize = 1;
    pub const MAX_COPIES: i32 = 9999;
    pub const MAX_SUBSCRIPTIONS: usize = 100;
    pub const MAX_SUBSCRIPTIONS_PER_USER: usize = 0;
    pub const MAX_LEASE_SECS: u32 = 0; // 0 = leases may be unbounded
    pub const DEFAULT_LEASE_SECS: u32 = 86_400;
    pub const QUOTA_PERIOD_SECS: u64 = 86_400;
    pub const MULTIPLE_OPERATION_TIMEOUT_SECS: u64 = 900;
    /// Idle window before an unused temporary printer is collected.
    pub const TEMP_PRINTER_TTL_SECS: u64 = 60;
    pub const DIRTY_FLUSH_SECS: u64 = 30;
    pub const NOTIFIER_TIMEOUT_SECS: u64 = 30;
    pub const PRESERVE_JOB_HISTORY: bool = true;
    pub const PRESERVE_JOB_FILES: bool = false;
}

/// Everything the scheduler needs to know about its deployment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_name: String,
    pub bind_addr: String,
    pub default_policy: String,
    /// `Some(name)`: rewrite remote clients masquerading as root to `name`.
    pub remote_root: Option<String>,
    pub default_language: String,
    /// Fail requests on conformance violations instead of repairing them.
    pub strict_conformance: bool,
    pub max_jobs: usize,
    pub max_jobs_per_user: usize,
    pub max_jobs_per_printer: usize,
    /// Concurrency bound for jobs printing on one destination.
    pub max_active_per_printer: usize,
    pub max_copies: i32,
    pub max_subscriptions: usize,
    pub max_subscriptions_per_user: usize,
    /// Upper bound applied to requested leases; 0 leaves them unbounded.
    pub max_lease_secs: u32,
    pub default_lease_secs: u32,
    pub quota_period_secs: u64,
    pub multiple_operation_timeout_secs: u64,
    pub temp_printer_ttl_secs: u64,
    pub dirty_flush_secs: u64,
    pub notifier_timeout_secs: u64,
    /// Keep terminated jobs visible to Get-Jobs which-jobs=completed.
    pub preserve_job_history: bool,
    /// Keep document files after termination (enables Restart-Job).
    pub preserve_job_files: bool,
    /// `file:` device uris allowed.
    pub file_device: bool,
    pub spool_root: PathBuf,
    pub cache_root: PathBuf,
    /// Cover sheet names accepted in job-sheets.
    pub banners: BTreeSet<String>,
    /// Notifier uri schemes with an installed helper.
    pub notifier_schemes: BTreeSet<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let home = vellum_logging::vellum_home();
        Self {
            server_name: defaults::SERVER_NAME.to_string(),
            bind_addr: defaults::BIND_ADDR.to_string(),
            default_policy: defaults::DEFAULT_POLICY.to_string(),
            remote_root: Some(defaults::REMOTE_ROOT.to_string()),
            default_language: defaults::DEFAULT_LANGUAGE.to_string(),
            strict_conformance: false,
            max_jobs: defaults::MAX_JOBS,
            max_jobs_per_user: defaults::MAX_JOBS_PER_USER,
            max_jobs_per_printer: defaults::MAX_JOBS_PER_PRINTER,
            max_active_per_printer: defaults::MAX_ACTIVE_PER_PRINTER,
            max_copies: defaults::MAX_COPIES,
            max_subscriptions: defaults::MAX_SUBSCRIPTIONS,
            max_subscriptions_per_user: defaults::MAX_SUBSCRIPTIONS_PER_USER,
            max_lease_secs: defaults::MAX_LEASE_SECS,
            default_lease_secs: defaults::DEFAULT_LEASE_SECS,
            quota_period_secs: defaults::QUOTA_PERIOD_SECS,
            multiple_operation_timeout_secs: defaults::MULTIPLE_OPERATION_TIMEOUT_SECS,
            temp_printer_ttl_secs: defaults::TEMP_PRINTER_TTL_SECS,
            dirty_flush_secs: defaults::DIRTY_FLUSH_SECS,
            notifier_timeout_secs: defaults::NOTIFIER_TIMEOUT_SECS,
            preserve_job_history: defaults::PRESERVE_JOB_HISTORY,
            preserve_job_files: defaults::PRESERVE_JOB_FILES,
            file_device: false,
            spool_root: home.join("spool"),
            cache_root: home.join("cache"),
            banners: ["none", "classified", "confidential", "secret", "standard"]
                .into_iter()
                .map(String::from)
                .collect(),
            notifier_schemes: ["ippget", "rss", "mailto"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ServerConfig {
    /// Printer uri advertised for a destination.
    pub fn printer_uri(&self, kind_segment: &str, name: &str) -> String {
        format!("ipp://{}/{}/{}", self.server_name, kind_segment, name)
    }

    pub fn job_uri(&self, id: i32) -> String {
        format!("ipp://{}/jobs/{}", self.server_name, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let cfg = ServerConfig::default();
        assert!(cfg.banners.contains("none"));
        assert!(cfg.notifier_schemes.contains("ippget"));
        assert_eq!(cfg.default_policy, "default");
        assert!(cfg.remote_root.is_some());
    }

    #[test]
    fn uri_builders() {
        let cfg = ServerConfig::default();
        assert_eq!(
            cfg.printer_uri("printers", "press"),
            "ipp://localhost/printers/press"
        );
        assert_eq!(cfg.job_uri(12), "ipp://localhost/jobs/12");
    }
}
