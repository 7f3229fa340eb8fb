//! Structured observability hooks for arbiter, dialog and policy events.
//!
//! - `JobSpan` RAII guard scoping everything a worker logs for one job
//! - named emitters for the lifecycle events operators grep for
//!
//! All events carry an `event` field (`job.claimed`, `impediment.raised`, ...).

use tracing::{debug, info, warn};

use crate::policy::Capability;

/// RAII guard that enters a job-scoped tracing span while a worker runs it.
pub struct JobSpan {
    _span: tracing::span::EnteredSpan,
}

impl JobSpan {
    pub fn enter(job_id: &str, role: &str) -> Self {
        let span = tracing::info_span!("rolegate.job", job_id = %job_id, role = %role);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a worker claimed a job.
pub fn emit_job_claimed(job_id: &str, role: &str, running: usize, max_parallel: usize) {
    info!(
        event = "job.claimed",
        job_id = %job_id,
        role = %role,
        running = running,
        max_parallel = max_parallel,
    );
}

/// Emit event: a job reached its terminal status.
pub fn emit_job_finished(job_id: &str, role: &str, status: &str, duration_ms: u64) {
    info!(
        event = "job.finished",
        job_id = %job_id,
        role = %role,
        status = %status,
        duration_ms = duration_ms,
    );
}

/// Emit event: a handler failed (error or panic).
pub fn emit_job_failed(job_id: &str, role: &str, error: &dyn std::fmt::Display) {
    warn!(event = "job.failed", job_id = %job_id, role = %role, error = %error);
}

/// Emit event: an impediment was appended to the log.
pub fn emit_impediment_raised(reason: &str, weight: u32) {
    warn!(event = "impediment.raised", reason = %reason, weight = weight);
}

/// Emit event: policy denied a capability.
pub fn emit_policy_denied(role: &str, capability: Capability) {
    info!(event = "policy.denied", role = %role, capability = %capability);
}

/// Emit event: the arbiter nominated a role.
pub fn emit_nomination(role: Option<&str>, score: i64, needs_network: bool) {
    info!(
        event = "arbiter.nomination",
        role = role.unwrap_or("none"),
        score = score,
        needs_network = needs_network,
    );
}

/// Emit event: a dialog reply was rejected.
pub fn emit_invalid_reply(attempt: u32, max_attempts: u32) {
    debug!(event = "dialog.invalid_reply", attempt = attempt, max_attempts = max_attempts);
}
