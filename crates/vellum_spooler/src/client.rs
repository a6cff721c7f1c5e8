//! Per-connection client context.
//!
//! The transport authenticates the peer before any request reaches the
//! dispatcher; the core only ever enforces the identity it is handed.

use serde::{Deserialize, Serialize};

/// Identity and channel properties supplied by the transport at connect time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientContext {
    /// Authenticated user name; empty when the transport did not
    /// authenticate.
    #[serde(default)]
    pub user: String,
    /// Unix groups of the authenticated user.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Peer host name or address.
    #[serde(default = "local_host")]
    pub host: String,
    /// Connection originates on this machine.
    #[serde(default)]
    pub local: bool,
    /// Channel is encrypted.
    #[serde(default)]
    pub tls: bool,
}

fn local_host() -> String {
    "localhost".to_string()
}

impl ClientContext {
    pub fn local_admin() -> Self {
        Self {
            user: "root".to_string(),
            groups: vec!["admin".to_string()],
            host: local_host(),
            local: true,
            tls: false,
        }
    }

    pub fn anonymous(host: impl Into<String>) -> Self {
        Self {
            user: String::new(),
            groups: Vec::new(),
            host: host.into(),
            local: false,
            tls: false,
        }
    }

    pub fn authenticated(&self) -> bool {
        !self.user.is_empty()
    }

    pub fn is_admin(&self) -> bool {
        self.user == "root" || self.groups.iter().any(|g| g == "admin")
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_detection() {
        assert!(ClientContext::local_admin().is_admin());
        let mut ctx = ClientContext::anonymous("far.example.com");
        assert!(!ctx.is_admin());
        ctx.groups.push("admin".into());
        assert!(ctx.is_admin());
    }

    #[test]
    fn hello_deserializes_with_defaults() {
        let ctx: ClientContext = serde_json::from_str(r#"{"user":"mei"}"#).unwrap();
        assert_eq!(ctx.user, "mei");
        assert_eq!(ctx.host, "localhost");
        assert!(!ctx.tls);
    }
}
