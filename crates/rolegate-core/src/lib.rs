//! rolegate core library
//!
//! Role arbitration, network policy enforcement, impediment escalation and
//! human-in-the-loop confirmation dialogs for small multi-agent workflows.

pub mod arbiter;
pub mod atomic;
pub mod backlog;
pub mod channel;
pub mod config;
pub mod dialog;
pub mod error;
pub mod impediment;
pub mod obs;
pub mod policy;
pub mod secrets;
pub mod telemetry;

pub use arbiter::{
    ActivationRecord, ActivationStatus, ArbiterObserver, ExecutorConfig, Handler, HandlerError,
    HandlerOutput, Job, NetworkOverride, Nomination, RoleArbiter, RoleDescriptor, TaskContext,
};
pub use backlog::{BacklogItem, BacklogStore};
pub use channel::{LanSecretChannel, PublicChannel};
pub use config::{NetworkConfig, RolegateConfig, SecretRef};
pub use dialog::{
    DialogConfig, DialogEngine, ReplyPoll, ReplySource, ScriptedPolls, ScriptedReplies,
    Selection, SessionOrigin, StdinReplies,
};
pub use error::{Result, RolegateError};
pub use impediment::{
    Escalate, Escalator, ImpedimentRecord, ImpedimentSink, JsonFileImpedimentLog,
    MemoryImpedimentLog,
};
pub use policy::{Capability, PolicyOracle};
pub use secrets::SecretMasker;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
