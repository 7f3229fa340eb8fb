//! The dialog state machine.
//!
//! One `select` call loops AWAITING_REPLY -> (short code | numeric | invalid)
//! until it returns a [`Selection`], escalates, or the reply source closes.
//! Escalation only happens for sessions explicitly marked
//! [`SessionOrigin::Automated`]; anything else is treated as a live human who
//! may simply be slow.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::Result;
use crate::impediment::{
    Escalate, Escalator, ImpedimentRecord, REASON_TIMEOUT_NO_RESPONSE,
    REASON_TOO_MANY_INVALID_REPLIES, WEIGHT_HIGH, WEIGHT_INVALID_REPLIES,
};
use crate::obs;

use super::backoff::{Backoff, BackoffConfig, Sleeper, ThreadSleeper};
use super::source::{ReplyPoll, ReplySource};

/// Hard cap on the number of options a dialog presents.
pub const MAX_OPTIONS: usize = 10;
/// Number of raw replies kept for diagnostics.
pub const REPLY_HISTORY_LEN: usize = 10;
/// Default explanatory-phrase cap for non-human sessions.
pub const DEFAULT_MAX_NOTE_WORDS: usize = 20;

/// Who is on the other end of the dialog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    /// Not flagged either way: phrase cap applies, no auto-escalation.
    #[default]
    Unspecified,
    /// A live human: phrases of any length, no auto-escalation.
    Human,
    /// A program: phrase cap applies, exhaustion and timeouts escalate.
    Automated,
}

impl SessionOrigin {
    fn escalates(self) -> bool {
        matches!(self, SessionOrigin::Automated)
    }
}

/// Settings for a dialog engine.
#[derive(Debug, Clone)]
pub struct DialogConfig {
    /// Options beyond this are dropped. Clamped to [`MAX_OPTIONS`].
    pub max_options: usize,
    pub max_invalid_attempts: u32,
    /// Recognised short reply codes, matched case-insensitively.
    pub short_codes: Vec<String>,
    /// Per-poll wait for interactive sources. `None` waits forever.
    pub timeout: Option<Duration>,
    pub timeout_retries: u32,
    pub backoff: BackoffConfig,
    pub origin: SessionOrigin,
    pub max_note_words: usize,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            max_options: MAX_OPTIONS,
            max_invalid_attempts: 10,
            short_codes: ["y", "n", "g", "p"].iter().map(|c| c.to_string()).collect(),
            timeout: None,
            timeout_retries: 3,
            backoff: BackoffConfig::default(),
            origin: SessionOrigin::Unspecified,
            max_note_words: DEFAULT_MAX_NOTE_WORDS,
        }
    }
}

/// A successful dialog outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selection {
    /// A short code, optionally followed by an explanatory phrase.
    Code { code: String, note: Option<String> },
    /// An option chosen by its 1-based number.
    Option { index: usize, label: String },
}

impl Selection {
    /// The reply as a caller would echo it: the option label, or the
    /// normalised code plus phrase.
    pub fn as_reply(&self) -> String {
        match self {
            Selection::Code { code, note: None } => code.clone(),
            Selection::Code {
                code,
                note: Some(note),
            } => format!("{code} {note}"),
            Selection::Option { label, .. } => label.clone(),
        }
    }
}

impl std::fmt::Display for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_reply())
    }
}

/// Classification of one normalised reply.
#[derive(Debug, PartialEq, Eq)]
enum Parsed {
    Valid(Selection),
    Invalid,
}

/// Human-in-the-loop dialog engine with escalation.
pub struct DialogEngine {
    config: DialogConfig,
    escalator: Escalator,
    sleeper: Arc<dyn Sleeper>,
    history: Mutex<VecDeque<String>>,
}

impl DialogEngine {
    pub fn new(escalator: Escalator) -> Self {
        Self {
            config: DialogConfig::default(),
            escalator,
            sleeper: Arc::new(ThreadSleeper),
            history: Mutex::new(VecDeque::with_capacity(REPLY_HISTORY_LEN)),
        }
    }

    pub fn with_config(mut self, config: DialogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &DialogConfig {
        &self.config
    }

    pub fn escalator(&self) -> &Escalator {
        &self.escalator
    }

    /// The last [`REPLY_HISTORY_LEN`] raw replies, oldest first.
    pub fn recent_replies(&self) -> Vec<String> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Present `options` and collect a reply from `source`.
    ///
    /// Returns `None` when the dialog escalated or the source closed.
    pub fn select<S: AsRef<str>>(
        &self,
        options: &[S],
        source: &mut dyn ReplySource,
    ) -> Option<Selection> {
        self.select_with_context(options, Map::new(), source)
    }

    /// Like [`select`](Self::select), merging `context` into any impediment raised.
    pub fn select_with_context<S: AsRef<str>>(
        &self,
        options: &[S],
        context: Map<String, Value>,
        source: &mut dyn ReplySource,
    ) -> Option<Selection> {
        let cfg = &self.config;
        let cap = cfg.max_options.min(MAX_OPTIONS);
        let options: Vec<String> = options
            .iter()
            .take(cap)
            .map(|o| o.as_ref().to_string())
            .collect();
        let prompt = self.render_prompt(&options);

        let mut backoff = Backoff::new(cfg.backoff);
        let mut invalid: u32 = 0;
        let mut timeouts: u32 = 0;

        loop {
            source.prompt(&prompt);
            let poll = source.poll(cfg.timeout);
            let closed = matches!(poll, ReplyPoll::Closed);
            let raw = match poll {
                ReplyPoll::Reply(raw) => raw,
                ReplyPoll::TimedOut => {
                    if !cfg.origin.escalates() {
                        debug!("dialog poll timed out, waiting on respondent");
                        continue;
                    }
                    timeouts += 1;
                    if timeouts >= cfg.timeout_retries {
                        self.escalate(
                            REASON_TIMEOUT_NO_RESPONSE,
                            WEIGHT_HIGH,
                            &context,
                            &options,
                            invalid,
                            timeouts,
                        );
                        return None;
                    }
                    continue;
                }
                ReplyPoll::Closed => {
                    if !cfg.origin.escalates() {
                        debug!("reply source closed without a selection");
                        return None;
                    }
                    // Automated callers that run out of replies keep failing
                    // until the invalid-reply budget escalates.
                    String::new()
                }
            };

            self.remember(&raw);
            if let Parsed::Valid(selection) = self.parse(&raw, &options) {
                return Some(selection);
            }

            invalid += 1;
            obs::emit_invalid_reply(invalid, cfg.max_invalid_attempts);
            if cfg.origin.escalates() && invalid >= cfg.max_invalid_attempts {
                self.escalate(
                    REASON_TOO_MANY_INVALID_REPLIES,
                    WEIGHT_INVALID_REPLIES,
                    &context,
                    &options,
                    invalid,
                    timeouts,
                );
                return None;
            }

            // Nobody is left to answer a closed source.
            if closed {
                continue;
            }
            if let Some(delay) = backoff.next_delay() {
                self.sleeper.sleep(delay);
            }
        }
    }

    fn render_prompt(&self, options: &[String]) -> String {
        let mut lines = vec!["Choose an option:".to_string()];
        for (i, opt) in options.iter().enumerate() {
            lines.push(format!("  {}) {}", i + 1, opt));
        }
        let codes: Vec<String> = self
            .config
            .short_codes
            .iter()
            .map(|c| format!("'{c}'"))
            .collect();
        lines.push(format!("Reply {} or option number.", codes.join("/")));
        lines.join("\n")
    }

    fn remember(&self, raw: &str) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() == REPLY_HISTORY_LEN {
            history.pop_front();
        }
        history.push_back(raw.to_string());
    }

    fn parse(&self, raw: &str, options: &[String]) -> Parsed {
        let reply = raw.trim().to_lowercase();
        if reply.is_empty() {
            return Parsed::Invalid;
        }

        for code in &self.config.short_codes {
            let code = code.trim().to_lowercase();
            if code.is_empty() {
                continue;
            }
            if reply == code {
                return Parsed::Valid(Selection::Code { code, note: None });
            }
            if let Some(rest) = reply.strip_prefix(code.as_str()).and_then(|r| r.strip_prefix(' ')) {
                let note = rest.trim();
                let words = note.split_whitespace().count();
                if self.config.origin != SessionOrigin::Human && words > self.config.max_note_words {
                    return Parsed::Invalid;
                }
                return Parsed::Valid(Selection::Code {
                    code,
                    note: Some(note.to_string()),
                });
            }
        }

        if reply.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = reply.parse::<usize>() {
                if (1..=options.len()).contains(&index) {
                    return Parsed::Valid(Selection::Option {
                        index,
                        label: options[index - 1].clone(),
                    });
                }
            }
        }

        Parsed::Invalid
    }

    fn escalate(
        &self,
        reason: &str,
        weight: u32,
        context: &Map<String, Value>,
        options: &[String],
        invalid: u32,
        timeouts: u32,
    ) {
        let mut ctx = context.clone();
        ctx.insert("options".into(), json!(options));
        ctx.insert("recent_replies".into(), json!(self.recent_replies()));
        ctx.insert("invalid_attempts".into(), json!(invalid));
        ctx.insert("timeout_attempts".into(), json!(timeouts));
        if let Err(e) = self.escalator.raise_impediment(reason, ctx, weight) {
            warn!(reason = %reason, error = %e, "failed to record dialog impediment");
        }
    }
}

impl Escalate for DialogEngine {
    fn raise_impediment(
        &self,
        reason: &str,
        context: Map<String, Value>,
        weight: u32,
    ) -> Result<ImpedimentRecord> {
        self.escalator.raise_impediment(reason, context, weight)
    }
}

impl std::fmt::Debug for DialogEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogEngine")
            .field("config", &self.config)
            .field("escalator", &self.escalator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::source::ScriptedReplies;
    use crate::impediment::{ImpedimentSink, MemoryImpedimentLog};

    fn engine(config: DialogConfig) -> (Arc<MemoryImpedimentLog>, DialogEngine) {
        let log = Arc::new(MemoryImpedimentLog::new());
        let engine = DialogEngine::new(Escalator::new(log.clone())).with_config(config);
        (log, engine)
    }

    fn automated() -> DialogConfig {
        DialogConfig {
            origin: SessionOrigin::Automated,
            ..DialogConfig::default()
        }
    }

    #[test]
    fn test_parse_short_code_is_case_insensitive() {
        let (_, engine) = engine(DialogConfig::default());
        assert_eq!(
            engine.parse("  Y ", &[]),
            Parsed::Valid(Selection::Code {
                code: "y".into(),
                note: None
            })
        );
    }

    #[test]
    fn test_parse_code_requires_space_before_phrase() {
        let (_, engine) = engine(DialogConfig::default());
        assert_eq!(engine.parse("yes", &[]), Parsed::Invalid);
    }

    #[test]
    fn test_parse_numeric_zero_is_invalid() {
        let (_, engine) = engine(DialogConfig::default());
        let options = vec!["a".to_string()];
        assert_eq!(engine.parse("0", &options), Parsed::Invalid);
        assert_eq!(engine.parse("-1", &options), Parsed::Invalid);
        assert_eq!(
            engine.parse("99999999999999999999999", &options),
            Parsed::Invalid
        );
    }

    #[test]
    fn test_note_word_cap_boundary() {
        let (_, engine) = engine(automated());
        let twenty = format!("g {}", vec!["w"; 20].join(" "));
        let twenty_one = format!("g {}", vec!["w"; 21].join(" "));
        assert!(matches!(engine.parse(&twenty, &[]), Parsed::Valid(_)));
        assert_eq!(engine.parse(&twenty_one, &[]), Parsed::Invalid);
    }

    #[test]
    fn test_custom_short_codes() {
        let (_, engine) = engine(DialogConfig {
            short_codes: vec!["ok".into(), "Skip".into()],
            ..DialogConfig::default()
        });
        let mut src = ScriptedReplies::new(["y", "skip"]);
        let selection = engine.select(&["a"], &mut src).unwrap();
        assert_eq!(selection.as_reply(), "skip");
    }

    #[test]
    fn test_history_is_bounded() {
        let (_, engine) = engine(DialogConfig {
            max_invalid_attempts: 12,
            ..automated()
        });
        let replies: Vec<String> = (0..15).map(|i| format!("bad{i}")).collect();
        let mut src = ScriptedReplies::new(replies);
        assert!(engine.select(&["a"], &mut src).is_none());
        let history = engine.recent_replies();
        assert_eq!(history.len(), REPLY_HISTORY_LEN);
        assert_eq!(history.first().map(String::as_str), Some("bad2"));
        assert_eq!(history.last().map(String::as_str), Some("bad11"));
    }

    #[test]
    fn test_escalation_context_carries_caller_fields() {
        let (log, engine) = engine(DialogConfig {
            max_invalid_attempts: 1,
            ..automated()
        });
        let mut ctx = Map::new();
        ctx.insert("task".into(), json!("deploy"));
        let mut src = ScriptedReplies::new(["nope"]);
        assert!(engine
            .select_with_context(&["a", "b"], ctx, &mut src)
            .is_none());
        let records = log.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].weight, WEIGHT_INVALID_REPLIES);
        assert_eq!(records[0].context["task"], "deploy");
        assert_eq!(records[0].context["options"], json!(["a", "b"]));
        assert_eq!(records[0].context["recent_replies"], json!(["nope"]));
    }

    #[test]
    fn test_selection_display() {
        let sel = Selection::Code {
            code: "g".into(),
            note: Some("go on".into()),
        };
        assert_eq!(sel.to_string(), "g go on");
    }
}
