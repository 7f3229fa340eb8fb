//! Impediment log: the append-only record of escalations.
//!
//! An impediment is what rolegate writes down when it gives up on something a
//! human needs to look at: a dialog nobody answered, a role that needs the
//! internet but is not allowed it. Records are never edited or removed.
//!
//! The log is an injected [`ImpedimentSink`]; [`JsonFileImpedimentLog`] keeps
//! the records as a JSON array on disk and [`MemoryImpedimentLog`] keeps them
//! in memory for tests and embedding.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::atomic::{read_json_array_or_empty, write_json_atomic};
use crate::error::Result;
use crate::obs;
use crate::secrets::SecretMasker;

/// Reason used when a task or role needs network access that policy denies.
pub const REASON_INTERNET_REQUIRED: &str = "internet_required";
/// Reason used when an automated dialog exhausts its invalid-reply budget.
pub const REASON_TOO_MANY_INVALID_REPLIES: &str = "too_many_invalid_replies";
/// Reason used when an automated dialog exhausts its timeout budget.
pub const REASON_TIMEOUT_NO_RESPONSE: &str = "timeout_no_response";

/// Weight for policy and timeout escalations.
pub const WEIGHT_HIGH: u32 = 5;
/// Weight for invalid-reply exhaustion.
pub const WEIGHT_INVALID_REPLIES: u32 = 3;

/// Default on-disk location of the impediment log.
pub const DEFAULT_IMPEDIMENTS_PATH: &str = ".continue/impediments.json";

/// A single escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpedimentRecord {
    pub reason: String,
    pub weight: u32,
    /// Caller diagnostics, secret-masked before the record is built.
    pub context: Value,
    /// RFC 3339 UTC timestamp, `Z` suffixed.
    pub timestamp: String,
}

impl ImpedimentRecord {
    /// Build a record stamped with the current time.
    pub fn new(reason: impl Into<String>, weight: u32, context: Value) -> Self {
        Self {
            reason: reason.into(),
            weight,
            context,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Destination for impediment records.
pub trait ImpedimentSink: Send + Sync {
    /// Append a record. Implementations must never drop or rewrite earlier records.
    fn append(&self, record: ImpedimentRecord) -> Result<()>;

    /// All records in append order.
    fn records(&self) -> Result<Vec<ImpedimentRecord>>;
}

/// The escalation primitive shared by the dialog engine, the policy oracle
/// and the role arbiter.
pub trait Escalate: Send + Sync {
    fn raise_impediment(
        &self,
        reason: &str,
        context: Map<String, Value>,
        weight: u32,
    ) -> Result<ImpedimentRecord>;
}

// ---------------------------------------------------------------------------
// JsonFileImpedimentLog
// ---------------------------------------------------------------------------

/// JSON-array impediment log on disk.
///
/// Each append is a full read-modify-write of the file, replaced atomically.
/// A missing or corrupt file is treated as an empty log. An in-process mutex
/// serialises appends from the same log instance.
#[derive(Debug)]
pub struct JsonFileImpedimentLog {
    path: PathBuf,
    masker: SecretMasker,
    write_lock: Mutex<()>,
}

impl JsonFileImpedimentLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            masker: SecretMasker::empty(),
            write_lock: Mutex::new(()),
        }
    }

    /// Mask `masker`'s secrets in every record's reason and context on append.
    pub fn with_masker(mut self, masker: SecretMasker) -> Self {
        self.masker = masker;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImpedimentSink for JsonFileImpedimentLog {
    fn append(&self, mut record: ImpedimentRecord) -> Result<()> {
        record.context = self.masker.mask_value(&record.context);
        record.reason = self.masker.mask(&record.reason);

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<ImpedimentRecord> = read_json_array_or_empty(&self.path);
        records.push(record);
        write_json_atomic(&self.path, &records)
    }

    fn records(&self) -> Result<Vec<ImpedimentRecord>> {
        Ok(read_json_array_or_empty(&self.path))
    }
}

// ---------------------------------------------------------------------------
// MemoryImpedimentLog
// ---------------------------------------------------------------------------

/// In-memory impediment log.
#[derive(Debug, Default)]
pub struct MemoryImpedimentLog {
    records: Mutex<Vec<ImpedimentRecord>>,
}

impl MemoryImpedimentLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records with the given reason.
    pub fn count_reason(&self, reason: &str) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.reason == reason)
            .count()
    }
}

impl ImpedimentSink for MemoryImpedimentLog {
    fn append(&self, record: ImpedimentRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }

    fn records(&self) -> Result<Vec<ImpedimentRecord>> {
        Ok(self.records.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

// ---------------------------------------------------------------------------
// Escalator
// ---------------------------------------------------------------------------

/// Builds impediment records and appends them to a sink.
///
/// When a secret masker is set (secret mode), the context is masked before
/// the record leaves this type.
#[derive(Clone)]
pub struct Escalator {
    sink: Arc<dyn ImpedimentSink>,
    secret_mode: Option<SecretMasker>,
}

impl Escalator {
    pub fn new(sink: Arc<dyn ImpedimentSink>) -> Self {
        Self {
            sink,
            secret_mode: None,
        }
    }

    /// Enable secret mode with the given masker.
    pub fn with_secret_mode(mut self, masker: SecretMasker) -> Self {
        self.secret_mode = Some(masker);
        self
    }

    pub fn sink(&self) -> &Arc<dyn ImpedimentSink> {
        &self.sink
    }

    pub fn secret_mode(&self) -> Option<&SecretMasker> {
        self.secret_mode.as_ref()
    }
}

impl std::fmt::Debug for Escalator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Escalator")
            .field("secret_mode", &self.secret_mode.is_some())
            .finish_non_exhaustive()
    }
}

impl Escalate for Escalator {
    fn raise_impediment(
        &self,
        reason: &str,
        context: Map<String, Value>,
        weight: u32,
    ) -> Result<ImpedimentRecord> {
        let context = Value::Object(context);
        let context = match &self.secret_mode {
            Some(masker) => masker.mask_value(&context),
            None => context,
        };
        let record = ImpedimentRecord::new(reason, weight, context);
        self.sink.append(record.clone())?;
        obs::emit_impediment_raised(&record.reason, record.weight);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_record_timestamp_is_utc_rfc3339() {
        let record = ImpedimentRecord::new("r", 1, json!({}));
        assert!(record.timestamp.contains('T'));
        assert!(record.timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&record.timestamp).is_ok());
    }

    #[test]
    fn test_file_log_appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonFileImpedimentLog::new(dir.path().join(".continue/impediments.json"));
        log.append(ImpedimentRecord::new("first", 1, json!({}))).unwrap();
        log.append(ImpedimentRecord::new("second", 2, json!({"k": "v"})))
            .unwrap();

        let records = log.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].reason, "first");
        assert_eq!(records[1].context["k"], "v");

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(log.path()).unwrap()).unwrap();
        assert!(raw.is_array());
    }

    #[test]
    fn test_file_log_heals_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("impediments.json");
        std::fs::write(&path, "not json at all").unwrap();
        let log = JsonFileImpedimentLog::new(&path);
        log.append(ImpedimentRecord::new("after_corruption", 3, json!({})))
            .unwrap();
        let records = log.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason, "after_corruption");
    }

    #[test]
    fn test_file_log_masks_with_its_masker() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonFileImpedimentLog::new(dir.path().join("imp.json"))
            .with_masker(SecretMasker::new(["pa55"]));
        log.append(ImpedimentRecord::new("r", 1, json!({"reply": "pa55"})))
            .unwrap();
        let text = std::fs::read_to_string(log.path()).unwrap();
        assert!(!text.contains("pa55"));
        assert!(text.contains("<REDACTED>"));
    }

    #[test]
    fn test_escalator_masks_in_secret_mode() {
        let sink = Arc::new(MemoryImpedimentLog::new());
        let escalator = Escalator::new(sink.clone()).with_secret_mode(SecretMasker::new(["zz-top"]));
        let record = escalator
            .raise_impediment("leak", ctx(json!({"reply": "zz-top"})), WEIGHT_HIGH)
            .unwrap();
        assert_eq!(record.context["reply"], "<REDACTED>");
        assert_eq!(sink.count_reason("leak"), 1);
    }

    #[test]
    fn test_escalator_without_secret_mode_keeps_context() {
        let sink = Arc::new(MemoryImpedimentLog::new());
        let escalator = Escalator::new(sink.clone());
        let record = escalator
            .raise_impediment("plain", ctx(json!({"reply": "zz-top"})), 1)
            .unwrap();
        assert_eq!(record.context["reply"], "zz-top");
        assert_eq!(sink.records().unwrap().len(), 1);
    }
}
