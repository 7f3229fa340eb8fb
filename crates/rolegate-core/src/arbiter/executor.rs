//! The role arbiter: registry, nomination, activation and the worker pool.
//!
//! Shared state sits behind two coarse locks that are never held together:
//!
//! - the scheduler lock guards the job queue, running counters and the
//!   per-role limits the claim scan reads; a condition variable on it wakes
//!   workers on enqueue and job completion;
//! - the ledger lock guards the activation records.
//!
//! A worker claims the first queued job whose role is below its
//! `max_parallel_jobs`, incrementing the running counter in the same critical
//! section, so `running <= max_parallel_jobs` holds at every instant.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::{json, Map, Value};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::impediment::{Escalate, REASON_INTERNET_REQUIRED, WEIGHT_HIGH};
use crate::obs::{self, JobSpan};
use crate::policy::PolicyOracle;

use super::activation::{ActivationLedger, ActivationRecord, ActivationStatus};
use super::observer::ArbiterObserver;
use super::roles::{NetworkOverride, RoleDescriptor};
use super::scoring::{estimate_seconds, score_role, Nomination};
use super::task::{Handler, HandlerError, HandlerOutput, HandlerResult, HandlerReturn, Job, TaskContext};

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Longest a parked worker waits before rescanning the queue.
    pub poll_interval: Duration,
    /// Upper bound on a task's `simulate_duration`.
    pub max_simulated_duration: Duration,
    /// Upper bound on a simulation derived from the estimate.
    pub max_estimated_simulation: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            max_simulated_duration: Duration::from_secs(5),
            max_estimated_simulation: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Default)]
struct SchedState {
    queue: VecDeque<Job>,
    running: HashMap<String, usize>,
    limits: HashMap<String, usize>,
}

impl SchedState {
    fn limit(&self, role: &str) -> usize {
        self.limits.get(role).copied().unwrap_or(1)
    }

    fn running(&self, role: &str) -> usize {
        self.running.get(role).copied().unwrap_or(0)
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.running.values().all(|&n| n == 0)
    }

    /// Pop the first job whose role has spare capacity and count it as running.
    fn claim(&mut self) -> Option<(Job, usize, usize)> {
        let idx = self
            .queue
            .iter()
            .position(|job| self.running(&job.role) < self.limit(&job.role))?;
        let job = self.queue.remove(idx)?;
        let running = self.running.entry(job.role.clone()).or_insert(0);
        *running += 1;
        let running = *running;
        let limit = self.limit(&job.role);
        Some((job, running, limit))
    }
}

struct Shared {
    policy: PolicyOracle,
    config: ExecutorConfig,
    roles: RwLock<Vec<RoleDescriptor>>,
    handlers: RwLock<HashMap<String, Handler>>,
    observer: RwLock<Option<Arc<dyn ArbiterObserver>>>,
    sched: Mutex<SchedState>,
    sched_cv: Condvar,
    ledger: Mutex<ActivationLedger>,
}

struct WorkerPool {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

/// Nominates roles for tasks and runs their jobs on a small thread pool.
pub struct RoleArbiter {
    shared: Arc<Shared>,
    pool: Mutex<Option<WorkerPool>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl RoleArbiter {
    pub fn new(policy: PolicyOracle) -> Self {
        Self::with_config(policy, ExecutorConfig::default())
    }

    pub fn with_config(policy: PolicyOracle, config: ExecutorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                policy,
                config,
                roles: RwLock::new(Vec::new()),
                handlers: RwLock::new(HashMap::new()),
                observer: RwLock::new(None),
                sched: Mutex::new(SchedState::default()),
                sched_cv: Condvar::new(),
                ledger: Mutex::new(ActivationLedger::default()),
            }),
            pool: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Register `role`, replacing any descriptor with the same name in place.
    ///
    /// A changed `max_parallel_jobs` only applies to future claims. Jobs
    /// already running are never pre-empted, so the running count may sit
    /// above a lowered limit until they finish.
    pub fn add_role(&self, role: RoleDescriptor) {
        let name = role.name.clone();
        let limit = role.parallel_limit();
        {
            let mut roles = self.shared.roles.write().unwrap_or_else(|e| e.into_inner());
            match roles.iter_mut().find(|r| r.name == role.name) {
                Some(existing) => *existing = role,
                None => roles.push(role),
            }
        }
        lock(&self.shared.sched).limits.insert(name.clone(), limit);
        self.shared.sched_cv.notify_all();
        debug!(role = %name, max_parallel = limit, "role registered");
    }

    /// Registered roles in registration order.
    pub fn roles(&self) -> Vec<RoleDescriptor> {
        self.shared
            .roles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn role(&self, name: &str) -> Option<RoleDescriptor> {
        self.shared
            .roles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.name == name)
            .cloned()
    }

    /// Register the default handler for a role's jobs.
    pub fn register_handler(&self, role: impl Into<String>, handler: Handler) {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(role.into(), handler);
    }

    pub fn set_observer(&self, observer: Arc<dyn ArbiterObserver>) {
        *self
            .shared
            .observer
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(observer);
    }

    pub fn policy(&self) -> &PolicyOracle {
        &self.shared.policy
    }

    /// Effective network permission: the role's override, else the policy.
    pub fn network_allowed(&self, role: &RoleDescriptor) -> bool {
        match role.network {
            NetworkOverride::Allow => true,
            NetworkOverride::Deny => false,
            NetworkOverride::Policy => self.shared.policy.internet_allowed(&role.name),
        }
    }

    // -----------------------------------------------------------------------
    // Nomination
    // -----------------------------------------------------------------------

    /// Nominate the best role for `task`.
    ///
    /// Roles without network permission are excluded from network-requiring
    /// tasks. Highest score wins; ties go to the earliest registered role.
    /// When nothing is feasible and the task needs the network, an
    /// `internet_required` impediment is raised through `sink`.
    pub fn evaluate(&self, task: &TaskContext, sink: Option<&dyn Escalate>) -> Nomination {
        let roles = self.roles();
        let mut network_blocked = Vec::new();
        let mut feasible: Vec<(&RoleDescriptor, i64)> = Vec::new();

        for role in &roles {
            if task.requires_internet && !self.network_allowed(role) {
                network_blocked.push(role.name.clone());
                continue;
            }
            let score = score_role(role, task);
            if score > 0 {
                feasible.push((role, score));
            }
        }

        // Stable: equal scores keep registration order.
        feasible.sort_by(|a, b| b.1.cmp(&a.1));

        let nomination = match feasible.first() {
            Some((role, score)) => Nomination::selected(role, *score, task),
            None if task.requires_internet => {
                if let Some(sink) = sink {
                    let mut ctx = Map::new();
                    ctx.insert("task".into(), task.to_json());
                    ctx.insert("network_blocked".into(), json!(network_blocked));
                    if let Err(e) = sink.raise_impediment(REASON_INTERNET_REQUIRED, ctx, WEIGHT_HIGH)
                    {
                        warn!(error = %e, "failed to record nomination impediment");
                    }
                }
                Nomination::needs_network(network_blocked)
            }
            None => Nomination::no_match(),
        };

        obs::emit_nomination(nomination.role.as_deref(), nomination.score, nomination.needs_network);
        if let Some(role) = &nomination.role {
            self.notify(|o| o.on_role_nomination(role, &nomination));
        }
        nomination
    }

    // -----------------------------------------------------------------------
    // Activation
    // -----------------------------------------------------------------------

    /// Record an activation attempt and, when it passes checks, enqueue a job.
    pub fn activate(
        &self,
        role_name: &str,
        task: TaskContext,
        sink: Option<&dyn Escalate>,
    ) -> ActivationStatus {
        let status = match self.role(role_name) {
            None => {
                self.record(role_name, ActivationStatus::UnknownRole, None, &task, None);
                ActivationStatus::UnknownRole
            }
            Some(role) if task.requires_internet && !self.network_allowed(&role) => {
                self.record(role_name, ActivationStatus::BlockedInternet, None, &task, None);
                if let Some(sink) = sink {
                    let mut ctx = Map::new();
                    ctx.insert("role".into(), Value::String(role_name.to_string()));
                    ctx.insert("task".into(), task.to_json());
                    if let Err(e) = sink.raise_impediment(REASON_INTERNET_REQUIRED, ctx, WEIGHT_HIGH)
                    {
                        warn!(role = %role_name, error = %e, "failed to record activation impediment");
                    }
                }
                ActivationStatus::BlockedInternet
            }
            Some(_) => {
                let job = Job::new(role_name, task);
                self.record(
                    role_name,
                    ActivationStatus::Activated,
                    Some(job.id),
                    &job.task,
                    None,
                );
                self.enqueue(job);
                ActivationStatus::Activated
            }
        };
        info!(role = %role_name, status = %status, "activation recorded");
        self.notify(|o| o.on_activation(role_name, &status));
        status
    }

    /// Enqueue a job without any checks. Returns the job id.
    pub fn schedule(&self, role_name: &str, task: TaskContext) -> Uuid {
        let job = Job::new(role_name, task);
        let id = job.id;
        self.enqueue(job);
        id
    }

    fn enqueue(&self, job: Job) {
        lock(&self.shared.sched).queue.push_back(job);
        self.shared.sched_cv.notify_all();
    }

    fn record(
        &self,
        role: &str,
        status: ActivationStatus,
        job_id: Option<Uuid>,
        task: &TaskContext,
        result: Option<Value>,
    ) -> ActivationRecord {
        self.shared.record(role, status, job_id, task, result)
    }

    fn notify(&self, f: impl FnOnce(&dyn ArbiterObserver)) {
        self.shared.notify(f)
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Snapshot of the activation trail.
    pub fn activations(&self) -> Vec<ActivationRecord> {
        lock(&self.shared.ledger).records().to_vec()
    }

    /// Snapshot of the pending queue, front first.
    pub fn job_queue(&self) -> Vec<Job> {
        lock(&self.shared.sched).queue.iter().cloned().collect()
    }

    /// Current running-job count per role (roles that ever ran a job).
    pub fn running_counts(&self) -> HashMap<String, usize> {
        lock(&self.shared.sched).running.clone()
    }

    /// Block until the queue is empty and nothing is running, or `timeout`
    /// passes. Returns whether the arbiter went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut sched = lock(&self.shared.sched);
        loop {
            if sched.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sched = self
                .shared
                .sched_cv
                .wait_timeout(sched, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    // -----------------------------------------------------------------------
    // Executor
    // -----------------------------------------------------------------------

    /// Start `num_threads` (at least one) workers. No-op when already running.
    pub fn start_executor(&self, num_threads: usize) {
        let mut pool = lock(&self.pool);
        if pool.is_some() {
            return;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let handles = (0..num_threads.max(1))
            .filter_map(|idx| {
                let shared = Arc::clone(&self.shared);
                let stop = Arc::clone(&stop);
                std::thread::Builder::new()
                    .name(format!("rolegate-worker-{idx}"))
                    .spawn(move || shared.worker_loop(idx, &stop))
                    .map_err(|e| warn!(worker = idx, error = %e, "failed to spawn worker"))
                    .ok()
            })
            .collect::<Vec<_>>();
        info!(workers = handles.len(), "executor started");
        *pool = Some(WorkerPool { stop, handles });
    }

    pub fn is_running(&self) -> bool {
        lock(&self.pool).is_some()
    }

    /// Signal workers to stop claiming jobs.
    ///
    /// In-flight jobs run to completion. With `wait`, joins workers for at
    /// most that long; workers still busy afterwards are detached.
    pub fn stop_executor(&self, wait: Option<Duration>) {
        let Some(pool) = lock(&self.pool).take() else {
            return;
        };
        {
            let _sched = lock(&self.shared.sched);
            pool.stop.store(true, Ordering::SeqCst);
        }
        self.shared.sched_cv.notify_all();

        let Some(wait) = wait else {
            return;
        };
        let deadline = Instant::now() + wait;
        for handle in pool.handles {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(2));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("worker still busy after stop wait, detaching");
            }
        }
        info!("executor stopped");
    }
}

impl Drop for RoleArbiter {
    fn drop(&mut self) {
        if let Some(pool) = lock(&self.pool).take() {
            {
                let _sched = lock(&self.shared.sched);
                pool.stop.store(true, Ordering::SeqCst);
            }
            self.shared.sched_cv.notify_all();
        }
    }
}

impl std::fmt::Debug for RoleArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleArbiter")
            .field("roles", &self.roles().len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Decrements a role's running counter when a job ends, however it ends.
struct RunningGuard<'a> {
    shared: &'a Shared,
    role: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        {
            let mut sched = lock(&self.shared.sched);
            if let Some(n) = sched.running.get_mut(&self.role) {
                *n = n.saturating_sub(1);
            }
        }
        self.shared.sched_cv.notify_all();
    }
}

impl Shared {
    fn record(
        &self,
        role: &str,
        status: ActivationStatus,
        job_id: Option<Uuid>,
        task: &TaskContext,
        result: Option<Value>,
    ) -> ActivationRecord {
        lock(&self.ledger).append(role, status, job_id, task, result)
    }

    fn notify(&self, f: impl FnOnce(&dyn ArbiterObserver)) {
        let observer = self
            .observer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(observer) = observer {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))) {
                warn!(error = %panic_message(panic.as_ref()), "arbiter observer panicked");
            }
        }
    }

    fn worker_loop(&self, idx: usize, stop: &AtomicBool) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => Some(rt),
            Err(e) => {
                warn!(worker = idx, error = %e, "no async runtime, async handlers will fail");
                None
            }
        };
        debug!(worker = idx, "worker started");

        while !stop.load(Ordering::SeqCst) {
            if let Some((job, running, limit)) = self.next_job(stop) {
                self.run_job(job, running, limit, runtime.as_ref());
            }
        }
        debug!(worker = idx, "worker exiting");
    }

    /// Claim a job, parking on the condition variable for at most one poll
    /// interval when nothing is eligible.
    ///
    /// `stop` is read under the sched lock before every claim, so a job
    /// scheduled after `stop_executor` returns is never claimed.
    fn next_job(&self, stop: &AtomicBool) -> Option<(Job, usize, usize)> {
        let mut sched = lock(&self.sched);
        if stop.load(Ordering::SeqCst) {
            return None;
        }
        if let Some(claimed) = sched.claim() {
            return Some(claimed);
        }
        let (mut sched, _) = self
            .sched_cv
            .wait_timeout(sched, self.config.poll_interval)
            .unwrap_or_else(|e| e.into_inner());
        if stop.load(Ordering::SeqCst) {
            return None;
        }
        sched.claim()
    }

    fn run_job(&self, job: Job, running: usize, limit: usize, runtime: Option<&Runtime>) {
        let Job { id, role, task } = job;
        let job_id = id.to_string();
        let _span = JobSpan::enter(&job_id, &role);
        let _running = RunningGuard {
            shared: self,
            role: role.clone(),
        };
        let started = Instant::now();

        obs::emit_job_claimed(&job_id, &role, running, limit);
        self.record(&role, ActivationStatus::Running, Some(id), &task, None);
        self.notify(|o| o.on_job_started(&role, &task));

        let handler = task.handler.clone().or_else(|| {
            self.handlers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(&role)
                .cloned()
        });

        let (status, result) = match handler {
            Some(handler) => match invoke(&handler, &task, runtime) {
                Ok(HandlerOutput::NoResult) => (ActivationStatus::Ok, None),
                Ok(HandlerOutput::Status { status, result }) => (ActivationStatus::from(status), result),
                Err(e) => {
                    obs::emit_job_failed(&job_id, &role, &e);
                    (ActivationStatus::Failed, Some(Value::String(e.to_string())))
                }
            },
            None => {
                let duration = self.simulated_duration(&role, &task);
                std::thread::sleep(duration);
                (ActivationStatus::Completed, None)
            }
        };

        self.record(&role, status.clone(), Some(id), &task, result);
        obs::emit_job_finished(
            &job_id,
            &role,
            status.as_str(),
            started.elapsed().as_millis() as u64,
        );
        self.notify(|o| o.on_job_completed(&role, &task, &status));
    }

    fn simulated_duration(&self, role: &str, task: &TaskContext) -> Duration {
        if let Some(d) = task.simulated_duration() {
            return d.min(self.config.max_simulated_duration);
        }
        let descriptor = self
            .roles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.name == role)
            .cloned();
        match descriptor {
            // One hundredth of the estimate keeps simulations short.
            Some(r) => Duration::from_millis(estimate_seconds(&r, task).saturating_mul(10))
                .min(self.config.max_estimated_simulation),
            None => Duration::ZERO,
        }
    }
}

/// Call a handler, driving async handlers to completion on `runtime`.
/// Errors and panics come back as [`HandlerError`].
fn invoke(handler: &Handler, task: &TaskContext, runtime: Option<&Runtime>) -> HandlerResult {
    let returned = catch_unwind(AssertUnwindSafe(|| handler.call(task)))
        .map_err(|p| HandlerError::Panicked(panic_message(p.as_ref())))?;
    match returned {
        HandlerReturn::Ready(result) => result,
        HandlerReturn::Pending(fut) => {
            let Some(rt) = runtime else {
                return Err(HandlerError::Runtime("worker has no async runtime".into()));
            };
            rt.block_on(AssertUnwindSafe(fut).catch_unwind())
                .unwrap_or_else(|p| Err(HandlerError::Panicked(panic_message(p.as_ref()))))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
