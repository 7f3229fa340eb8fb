//! Outbound message channels.
//!
//! Neither channel talks to a remote endpoint; they gate and record messages
//! so transports can be bolted on behind the same checks.
//!
//! - [`PublicChannel`] is policy-gated: a role without internet access cannot
//!   send, and the denial is escalated when a sink is supplied.
//! - [`LanSecretChannel`] is local-only: it masks secrets in secret mode and
//!   appends each message to an audit log, one line per message.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::RolegateConfig;
use crate::error::Result;
use crate::impediment::{Escalate, REASON_INTERNET_REQUIRED};
use crate::policy::PolicyOracle;
use crate::secrets::SecretMasker;

// ---------------------------------------------------------------------------
// PublicChannel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PublicChannel {
    policy: PolicyOracle,
}

impl PublicChannel {
    pub fn new(policy: PolicyOracle) -> Self {
        Self { policy }
    }

    /// Send `message` on behalf of `role`. Returns whether it was sent.
    ///
    /// Without a role the send is treated as local and always allowed.
    pub fn send(&self, message: &str, role: Option<&str>, sink: Option<&dyn Escalate>) -> bool {
        let Some(role) = role else {
            info!(channel = "public", "send: {message}");
            return true;
        };

        let mut ctx = Map::new();
        ctx.insert("message".into(), Value::String(message.to_string()));
        if !self
            .policy
            .require_or_escalate(sink, REASON_INTERNET_REQUIRED, ctx, role)
        {
            info!(channel = "public", role = %role, "blocked send, internet disallowed");
            return false;
        }
        info!(channel = "public", role = %role, "send: {message}");
        true
    }

    /// Poll for an incoming message. Nothing is ever received.
    pub fn receive(&self) -> Option<String> {
        None
    }
}

// ---------------------------------------------------------------------------
// LanSecretChannel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LanSecretChannel {
    /// Present only in secret mode.
    masker: Option<SecretMasker>,
    audit_path: PathBuf,
}

impl LanSecretChannel {
    pub fn new(masker: Option<SecretMasker>, audit_path: impl Into<PathBuf>) -> Self {
        Self {
            masker,
            audit_path: audit_path.into(),
        }
    }

    /// Mask with the config's env secrets when `secret_mode` is on.
    pub fn from_config(config: &RolegateConfig, audit_path: impl Into<PathBuf>) -> Self {
        let masker = config
            .secret_mode
            .then(|| SecretMasker::from_config(config));
        Self::new(masker, audit_path)
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }

    /// Append `message` to the audit log, masked in secret mode, with
    /// newlines escaped so each message occupies one line.
    pub fn send(&self, message: &str) -> Result<()> {
        let masked = match &self.masker {
            Some(m) => m.mask(message),
            None => message.to_string(),
        };
        let line = masked.replace('\n', "\\n");

        if let Some(dir) = self.audit_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_path)?;
        writeln!(file, "{line}")?;
        debug!(channel = "lan_secret", path = %self.audit_path.display(), "message recorded");
        Ok(())
    }

    pub fn receive(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::impediment::{Escalator, ImpedimentSink, MemoryImpedimentLog};
    use std::sync::Arc;

    fn policy(roles: &[&str]) -> PolicyOracle {
        PolicyOracle::new(NetworkConfig {
            internet_access: false,
            internet_allowed_roles: roles.iter().map(|r| r.to_string()).collect(),
        })
    }

    #[test]
    fn test_public_send_without_role_is_local() {
        let channel = PublicChannel::new(PolicyOracle::deny_all());
        assert!(channel.send("hello", None, None));
        assert_eq!(channel.receive(), None);
    }

    #[test]
    fn test_public_send_allowed_role() {
        let channel = PublicChannel::new(policy(&["controller"]));
        assert!(channel.send("status update", Some("controller"), None));
    }

    #[test]
    fn test_public_send_denied_escalates() {
        let log = Arc::new(MemoryImpedimentLog::new());
        let escalator = Escalator::new(log.clone());
        let channel = PublicChannel::new(policy(&["controller"]));

        assert!(!channel.send("fetch docs", Some("worker"), Some(&escalator)));

        let records = log.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason, "internet_required");
        assert_eq!(records[0].weight, 5);
        assert_eq!(records[0].context["message"], "fetch docs");
        assert_eq!(records[0].context["role"], "worker");
    }

    #[test]
    fn test_public_send_denied_without_sink_is_silent() {
        let channel = PublicChannel::new(PolicyOracle::deny_all());
        assert!(!channel.send("x", Some("worker"), None));
    }

    #[test]
    fn test_lan_send_masks_and_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let audit = dir.path().join("audit").join("lan.log");
        let channel = LanSecretChannel::new(Some(SecretMasker::new(["s3cr3t"])), &audit);

        channel.send("token=s3cr3t\nsecond line").unwrap();
        channel.send("plain").unwrap();

        let text = std::fs::read_to_string(&audit).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["token=<REDACTED>\\nsecond line", "plain"]);
    }

    #[test]
    fn test_lan_send_outside_secret_mode_keeps_text() {
        let dir = tempfile::tempdir().unwrap();
        let audit = dir.path().join("lan.log");
        let config = RolegateConfig::default();
        let channel = LanSecretChannel::from_config(&config, &audit);

        channel.send("keep me").unwrap();
        assert_eq!(std::fs::read_to_string(&audit).unwrap(), "keep me\n");
    }
}
