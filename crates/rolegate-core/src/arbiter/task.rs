//! Task contexts, job handlers and queued jobs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutput {
    /// Finished without anything to report; recorded as `ok`.
    NoResult,
    /// Finished with an explicit status and optional result payload.
    Status {
        status: String,
        result: Option<Value>,
    },
}

impl HandlerOutput {
    pub fn status(status: impl Into<String>, result: Option<Value>) -> Self {
        HandlerOutput::Status {
            status: status.into(),
            result,
        }
    }
}

/// A handler failure. Always recorded as a `failed` activation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("async handler could not be driven: {0}")]
    Runtime(String),
}

pub type HandlerResult = std::result::Result<HandlerOutput, HandlerError>;

/// Future returned by asynchronous handlers; driven on the claiming worker.
pub type HandlerFuture = LocalBoxFuture<'static, HandlerResult>;

/// The immediate return of a handler call.
pub enum HandlerReturn {
    Ready(HandlerResult),
    Pending(HandlerFuture),
}

type HandlerFn = dyn Fn(&TaskContext) -> HandlerReturn + Send + Sync;

/// A job handler, sync or async, shareable across workers.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    /// Wrap a synchronous handler.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&TaskContext) -> HandlerResult + Send + Sync + 'static,
    {
        Handler(Arc::new(move |task| HandlerReturn::Ready(f(task))))
    }

    /// Wrap an asynchronous handler. It receives its own copy of the task.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        Handler(Arc::new(move |task| {
            HandlerReturn::Pending(f(task.clone()).boxed_local())
        }))
    }

    pub fn call(&self, task: &TaskContext) -> HandlerReturn {
        (self.0)(task)
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Handler(..)")
    }
}

// ---------------------------------------------------------------------------
// TaskContext
// ---------------------------------------------------------------------------

/// Caller-supplied description of a unit of work.
///
/// The recognised fields drive scoring and execution; anything else lands in
/// `extra` and is carried through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_internet: bool,
    /// Simulated run time in seconds for jobs without a handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulate_duration: Option<f64>,
    /// Per-task handler; wins over the role's registered handler.
    #[serde(skip)]
    pub handler: Option<Handler>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_skills.extend(skills.into_iter().map(Into::into));
        self
    }

    pub fn with_complexity(mut self, complexity: f64) -> Self {
        self.complexity = Some(complexity);
        self
    }

    pub fn requiring_internet(mut self) -> Self {
        self.requires_internet = true;
        self
    }

    pub fn with_simulated_duration(mut self, duration: Duration) -> Self {
        self.simulate_duration = Some(duration.as_secs_f64());
        self
    }

    pub fn with_handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Complexity used by the estimate; missing, zero or non-finite means 1.
    pub fn effective_complexity(&self) -> f64 {
        match self.complexity {
            Some(c) if c.is_finite() && c != 0.0 => c,
            _ => 1.0,
        }
    }

    /// The simulated duration, when it is a positive finite number of seconds.
    pub fn simulated_duration(&self) -> Option<Duration> {
        self.simulate_duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .and_then(|d| Duration::try_from_secs_f64(d).ok())
    }

    /// JSON view of the task for impediment contexts and records.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A queued unit of work for a role.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub role: String,
    pub task: TaskContext,
}

impl Job {
    pub fn new(role: impl Into<String>, task: TaskContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: role.into(),
            task,
        }
    }
}
