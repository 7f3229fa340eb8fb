//! Human-in-the-loop confirmation dialogs.
//!
//! # Module layout
//!
//! - [`engine`]: `DialogEngine`, `DialogConfig`, `Selection`, `SessionOrigin`
//! - [`source`]: `ReplySource`, `ScriptedReplies`, `ScriptedPolls`, `StdinReplies`
//! - [`backoff`]: `Backoff`, `BackoffConfig`, `Sleeper`

pub mod backoff;
pub mod engine;
pub mod source;

pub use backoff::{Backoff, BackoffConfig, RecordingSleeper, Sleeper, ThreadSleeper};
pub use engine::{DialogConfig, DialogEngine, Selection, SessionOrigin, MAX_OPTIONS};
pub use source::{ReplyPoll, ReplySource, ScriptedPolls, ScriptedReplies, StdinReplies};
