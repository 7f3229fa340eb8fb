//! Optional observer of arbiter lifecycle events.

use super::activation::ActivationStatus;
use super::scoring::Nomination;
use super::task::TaskContext;

/// Callbacks fired by the arbiter. Every method defaults to a no-op, so an
/// observer implements only the events it cares about.
///
/// Callbacks run on the calling thread (worker threads for job events) and
/// must not block for long. A panicking callback is logged and ignored.
pub trait ArbiterObserver: Send + Sync {
    fn on_role_nomination(&self, _role: &str, _nomination: &Nomination) {}

    fn on_activation(&self, _role: &str, _status: &ActivationStatus) {}

    fn on_job_started(&self, _role: &str, _task: &TaskContext) {}

    fn on_job_completed(&self, _role: &str, _task: &TaskContext, _status: &ActivationStatus) {}
}
