//! Operation access policy.
//!
//! Policies are named rule tables mapping an operation onto the required
//! authentication and the identities allowed to run it. Destinations name
//! the policy they are governed by; the engine falls back to the server's
//! default policy when a destination names nothing (or nothing exists yet,
//! as for server-scoped operations).

use crate::client::ClientContext;
use std::collections::HashMap;
use vellum_proto::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Forbidden,
    AuthRequired,
    UpgradeRequired,
}

/// Who may run an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Anyone, including anonymous callers.
    Anyone,
    /// Any authenticated identity.
    Authenticated,
    /// The resource owner or an administrator.
    OwnerOrAdmin,
    /// Administrators only.
    Admin,
}

#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub audience: Audience,
    /// Require an encrypted channel.
    pub require_tls: bool,
}

impl PolicyRule {
    fn new(audience: Audience) -> Self {
        Self {
            audience,
            require_tls: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Policy {
    pub name: String,
    rules: HashMap<Operation, PolicyRule>,
    default_rule: PolicyRule,
    /// Attribute names hidden from requesters that are neither the job owner
    /// nor an administrator.
    private_attrs: Vec<String>,
}

impl Policy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: HashMap::new(),
            default_rule: PolicyRule::new(Audience::Anyone),
            private_attrs: vec![
                "job-name".to_string(),
                "job-originating-host-name".to_string(),
                "job-originating-user-name".to_string(),
                "phone".to_string(),
            ],
        }
    }

    pub fn rule(mut self, ops: &[Operation], audience: Audience) -> Self {
        for op in ops {
            self.rules.insert(*op, PolicyRule::new(audience));
        }
        self
    }

    fn rule_for(&self, op: Operation) -> &PolicyRule {
        self.rules.get(&op).unwrap_or(&self.default_rule)
    }
}

pub struct PolicyEngine {
    policies: HashMap<String, Policy>,
    default_name: String,
}

impl PolicyEngine {
    /// Engine with the built-in `default` policy registered.
    pub fn with_defaults(default_name: &str) -> Self {
        let mut engine = Self {
            policies: HashMap::new(),
            default_name: default_name.to_string(),
        };
        engine.register(builtin_policy(default_name));
        engine
    }

    pub fn register(&mut self, policy: Policy) {
        self.policies.insert(policy.name.clone(), policy);
    }

    fn resolve(&self, name: &str) -> &Policy {
        self.policies
            .get(name)
            .or_else(|| self.policies.get(&self.default_name))
            .expect("default policy registered at startup")
    }

    /// Evaluate `(policy, operation, identity, resource owner)`.
    pub fn check(
        &self,
        policy_name: &str,
        op: Operation,
        client: &ClientContext,
        owner: Option<&str>,
    ) -> PolicyDecision {
        let rule = self.resolve(policy_name).rule_for(op);
        if rule.require_tls && !client.tls && !client.local {
            return PolicyDecision::UpgradeRequired;
        }
        match rule.audience {
            Audience::Anyone => PolicyDecision::Allow,
            Audience::Authenticated => {
                if client.authenticated() {
                    PolicyDecision::Allow
                } else {
                    PolicyDecision::AuthRequired
                }
            }
            Audience::OwnerOrAdmin => {
                if client.is_admin() {
                    return PolicyDecision::Allow;
                }
                if !client.authenticated() {
                    return PolicyDecision::AuthRequired;
                }
                match owner {
                    Some(owner) if owner == client.user => PolicyDecision::Allow,
                    _ => PolicyDecision::Forbidden,
                }
            }
            Audience::Admin => {
                if client.is_admin() {
                    PolicyDecision::Allow
                } else if client.authenticated() {
                    PolicyDecision::Forbidden
                } else {
                    PolicyDecision::AuthRequired
                }
            }
        }
    }

    /// Names redacted from Get-* responses for this requester.
    pub fn private_attributes(
        &self,
        policy_name: &str,
        client: &ClientContext,
        owner: Option<&str>,
    ) -> &[String] {
        if client.is_admin() {
            return &[];
        }
        if let Some(owner) = owner {
            if client.user == owner {
                return &[];
            }
        }
        &self.resolve(policy_name).private_attrs
    }
}

/// The stock policy: submission open to everyone, job control limited to the
/// owner, administration limited to admins.
fn builtin_policy(name: &str) -> Policy {
    use Operation::*;
    Policy::new(name)
        .rule(
            &[
                PrintJob,
                ValidateJob,
                CreateJob,
                GetJobAttributes,
                GetJobs,
                GetPrinterAttributes,
                GetPrinterSupportedValues,
                GetDefault,
                GetPrinters,
                GetClasses,
                CreatePrinterSubscriptions,
                CreateJobSubscriptions,
                GetSubscriptionAttributes,
                GetSubscriptions,
                GetNotifications,
            ],
            Audience::Anyone,
        )
        .rule(
            &[
                SendDocument,
                CancelJob,
                HoldJob,
                ReleaseJob,
                RestartJob,
                CloseJob,
                SetJobAttributes,
                MoveJob,
                AuthenticateJob,
                CancelMyJobs,
                RenewSubscription,
                CancelSubscription,
                GetDocument,
            ],
            Audience::OwnerOrAdmin,
        )
        .rule(
            &[
                PausePrinter,
                ResumePrinter,
                PurgeJobs,
                CancelJobs,
                SetPrinterAttributes,
                HoldNewJobs,
                ReleaseHeldNewJobs,
                AddModifyPrinter,
                DeletePrinter,
                AddModifyClass,
                DeleteClass,
                AcceptJobs,
                RejectJobs,
                SetDefault,
                GetDevices,
                GetPpds,
                GetPpd,
                CreateLocalPrinter,
            ],
            Audience::Admin,
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PolicyEngine {
        PolicyEngine::with_defaults("default")
    }

    fn user(name: &str) -> ClientContext {
        ClientContext {
            user: name.to_string(),
            groups: vec![],
            host: "h".to_string(),
            local: false,
            tls: false,
        }
    }

    #[test]
    fn anyone_may_print() {
        let e = engine();
        let anon = ClientContext::anonymous("h");
        assert_eq!(
            e.check("default", Operation::PrintJob, &anon, None),
            PolicyDecision::Allow
        );
    }

    #[test]
    fn owner_controls_own_job() {
        let e = engine();
        assert_eq!(
            e.check("default", Operation::CancelJob, &user("mei"), Some("mei")),
            PolicyDecision::Allow
        );
        assert_eq!(
            e.check("default", Operation::CancelJob, &user("sam"), Some("mei")),
            PolicyDecision::Forbidden
        );
        assert_eq!(
            e.check(
                "default",
                Operation::CancelJob,
                &ClientContext::anonymous("h"),
                Some("mei")
            ),
            PolicyDecision::AuthRequired
        );
    }

    #[test]
    fn admin_required_for_pause() {
        let e = engine();
        assert_eq!(
            e.check("default", Operation::PausePrinter, &user("mei"), None),
            PolicyDecision::Forbidden
        );
        assert_eq!(
            e.check(
                "default",
                Operation::PausePrinter,
                &ClientContext::local_admin(),
                None
            ),
            PolicyDecision::Allow
        );
    }

    #[test]
    fn unknown_policy_falls_back_to_default() {
        let e = engine();
        assert_eq!(
            e.check("no-such", Operation::PrintJob, &user("mei"), None),
            PolicyDecision::Allow
        );
    }

    #[test]
    fn private_attrs_redacted_for_strangers() {
        let e = engine();
        assert!(e
            .private_attributes("default", &user("sam"), Some("mei"))
            .contains(&"job-originating-user-name".to_string()));
        assert!(e
            .private_attributes("default", &user("mei"), Some("mei"))
            .is_empty());
        assert!(e
            .private_attributes("default", &ClientContext::local_admin(), Some("mei"))
            .is_empty());
    }
}
