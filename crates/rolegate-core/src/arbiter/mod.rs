//! Role arbitration: nominate the best-fit role for a task, gate activations
//! on network policy, and run queued jobs under per-role parallel limits.
//!
//! # Module layout
//!
//! - [`roles`]: `RoleDescriptor`, `NetworkOverride`
//! - [`task`]: `TaskContext`, `Handler`, `HandlerOutput`, `HandlerError`, `Job`
//! - [`scoring`]: `score_role`, `estimate_seconds`, `Nomination`
//! - [`activation`]: `ActivationStatus`, `ActivationRecord`
//! - [`observer`]: `ArbiterObserver`
//! - [`executor`]: `RoleArbiter`, `ExecutorConfig`

pub mod activation;
pub mod executor;
pub mod observer;
pub mod roles;
pub mod scoring;
pub mod task;

pub use activation::{ActivationRecord, ActivationStatus};
pub use executor::{ExecutorConfig, RoleArbiter};
pub use observer::ArbiterObserver;
pub use roles::{NetworkOverride, RoleDescriptor};
pub use scoring::{estimate_seconds, score_role, skill_matches, Nomination};
pub use task::{
    Handler, HandlerError, HandlerFuture, HandlerOutput, HandlerResult, HandlerReturn, Job,
    TaskContext,
};
