//! Where dialog replies come from.
//!
//! A [`ReplySource`] is polled once per dialog round. Scripted sources serve
//! pre-recorded replies for tests and batch callers; [`StdinReplies`] reads a
//! terminal with an optional per-poll timeout.

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use tracing::debug;

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPoll {
    /// A raw reply line, untrimmed.
    Reply(String),
    /// No reply arrived within the timeout.
    TimedOut,
    /// The source will never produce another reply.
    Closed,
}

/// A supplier of dialog replies.
pub trait ReplySource {
    /// Show the prompt to the respondent. Silent sources ignore it.
    fn prompt(&mut self, _text: &str) {}

    /// Wait for the next reply, for at most `timeout` when one is given.
    fn poll(&mut self, timeout: Option<Duration>) -> ReplyPoll;
}

// ---------------------------------------------------------------------------
// ScriptedReplies
// ---------------------------------------------------------------------------

/// Pre-recorded replies, served in order, then `Closed`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReplies {
    replies: VecDeque<String>,
}

impl ScriptedReplies {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.replies.len()
    }
}

impl ReplySource for ScriptedReplies {
    fn poll(&mut self, _timeout: Option<Duration>) -> ReplyPoll {
        match self.replies.pop_front() {
            Some(reply) => ReplyPoll::Reply(reply),
            None => ReplyPoll::Closed,
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedPolls
// ---------------------------------------------------------------------------

/// Pre-recorded poll outcomes, timeouts included, then `Closed`.
///
/// Stands in for an interactive respondent who sometimes says nothing.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPolls {
    polls: VecDeque<ReplyPoll>,
    prompts: usize,
}

impl ScriptedPolls {
    pub fn new(polls: impl IntoIterator<Item = ReplyPoll>) -> Self {
        Self {
            polls: polls.into_iter().collect(),
            prompts: 0,
        }
    }

    /// A respondent that never answers within `n` polls.
    pub fn silent(n: usize) -> Self {
        Self::new(std::iter::repeat(ReplyPoll::TimedOut).take(n))
    }

    /// How many times the prompt was shown.
    pub fn prompts(&self) -> usize {
        self.prompts
    }
}

impl ReplySource for ScriptedPolls {
    fn prompt(&mut self, _text: &str) {
        self.prompts += 1;
    }

    fn poll(&mut self, _timeout: Option<Duration>) -> ReplyPoll {
        self.polls.pop_front().unwrap_or(ReplyPoll::Closed)
    }
}

// ---------------------------------------------------------------------------
// StdinReplies
// ---------------------------------------------------------------------------

/// Interactive replies from standard input.
///
/// Lines are read on a background thread so each poll can time out without
/// losing a line that arrives later; that line is served by the next poll.
#[derive(Debug, Default)]
pub struct StdinReplies {
    lines: Option<Receiver<String>>,
}

impl StdinReplies {
    pub fn new() -> Self {
        Self::default()
    }

    fn receiver(&mut self) -> &Receiver<String> {
        self.lines.get_or_insert_with(|| {
            let (tx, rx) = mpsc::channel();
            std::thread::spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                debug!("stdin reader finished");
            });
            rx
        })
    }
}

impl ReplySource for StdinReplies {
    fn prompt(&mut self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{text}");
        let _ = write!(out, "> ");
        let _ = out.flush();
    }

    fn poll(&mut self, timeout: Option<Duration>) -> ReplyPoll {
        let rx = self.receiver();
        match timeout {
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(line) => ReplyPoll::Reply(line),
                Err(RecvTimeoutError::Timeout) => ReplyPoll::TimedOut,
                Err(RecvTimeoutError::Disconnected) => ReplyPoll::Closed,
            },
            None => match rx.recv() {
                Ok(line) => ReplyPoll::Reply(line),
                Err(_) => ReplyPoll::Closed,
            },
        }
    }
}
