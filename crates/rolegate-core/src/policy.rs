//! Network access policy.
//!
//! The oracle answers one question: may `role` use `capability`? It holds a
//! snapshot of the `network` config block and never fails: a missing or
//! unreadable config denies everything.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::{NetworkConfig, RolegateConfig};
use crate::impediment::{Escalate, WEIGHT_HIGH};
use crate::obs;

/// Note attached to policy escalations when the caller gives none.
pub const POLICY_DENIED_NOTE: &str = "internet access required but disabled by policy";

/// Capabilities governed by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Internet,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Internet => write!(f, "internet"),
        }
    }
}

/// Pure predicate over role name and a config snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyOracle {
    network: NetworkConfig,
}

impl PolicyOracle {
    /// An oracle that denies every role.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// An oracle that allows every role.
    pub fn allow_all() -> Self {
        Self {
            network: NetworkConfig {
                internet_access: true,
                internet_allowed_roles: Vec::new(),
            },
        }
    }

    pub fn new(network: NetworkConfig) -> Self {
        Self { network }
    }

    pub fn from_config(config: &RolegateConfig) -> Self {
        Self::new(config.network.clone())
    }

    /// Snapshot the config at `path`; any failure yields a deny-all oracle.
    pub fn from_path(path: &Path) -> Self {
        Self::from_config(&RolegateConfig::load_or_default(path))
    }

    /// Whether `role` may use `capability`.
    pub fn is_allowed(&self, role: &str, capability: Capability) -> bool {
        match capability {
            Capability::Internet => {
                self.network.internet_access
                    || self.network.internet_allowed_roles.iter().any(|r| r == role)
            }
        }
    }

    /// Shorthand for [`Capability::Internet`].
    pub fn internet_allowed(&self, role: &str) -> bool {
        self.is_allowed(role, Capability::Internet)
    }

    /// Return the internet decision for `role`; on denial also raise an
    /// impediment through `sink` (weight 5).
    ///
    /// The escalation context is `context` plus `role` and a `note`, each
    /// only added when the caller did not set it. Escalation failures are
    /// logged, never surfaced: the decision is what the caller needs.
    pub fn require_or_escalate(
        &self,
        sink: Option<&dyn Escalate>,
        reason: &str,
        context: Map<String, Value>,
        role: &str,
    ) -> bool {
        if self.internet_allowed(role) {
            return true;
        }
        obs::emit_policy_denied(role, Capability::Internet);

        if let Some(sink) = sink {
            let mut ctx = context;
            ctx.entry("role")
                .or_insert_with(|| Value::String(role.to_string()));
            ctx.entry("note")
                .or_insert_with(|| Value::String(POLICY_DENIED_NOTE.to_string()));
            if let Err(e) = sink.raise_impediment(reason, ctx, WEIGHT_HIGH) {
                warn!(role = %role, error = %e, "failed to record policy impediment");
            }
        }
        false
    }
}
