//! Activation records: the append-only audit trail of every activation attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use super::task::TaskContext;

/// Status of an activation record.
///
/// The built-in statuses are listed as variants; anything a handler returns
/// beyond those is kept verbatim in [`ActivationStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActivationStatus {
    Activated,
    Running,
    Completed,
    Failed,
    BlockedInternet,
    UnknownRole,
    Ok,
    Other(String),
}

impl ActivationStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ActivationStatus::Activated => "activated",
            ActivationStatus::Running => "running",
            ActivationStatus::Completed => "completed",
            ActivationStatus::Failed => "failed",
            ActivationStatus::BlockedInternet => "blocked_internet",
            ActivationStatus::UnknownRole => "unknown_role",
            ActivationStatus::Ok => "ok",
            ActivationStatus::Other(s) => s,
        }
    }
}

impl From<&str> for ActivationStatus {
    fn from(s: &str) -> Self {
        match s {
            "activated" => ActivationStatus::Activated,
            "running" => ActivationStatus::Running,
            "completed" => ActivationStatus::Completed,
            "failed" => ActivationStatus::Failed,
            "blocked_internet" => ActivationStatus::BlockedInternet,
            "unknown_role" => ActivationStatus::UnknownRole,
            "ok" => ActivationStatus::Ok,
            other => ActivationStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for ActivationStatus {
    fn from(s: String) -> Self {
        ActivationStatus::from(s.as_str())
    }
}

impl std::fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActivationStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActivationStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ActivationStatus::from(s))
    }
}

/// One entry of the activation trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationRecord {
    /// Position in the arbiter's total order, starting at 0.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub role: String,
    pub status: ActivationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub task: TaskContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Append-only store of activation records.
#[derive(Debug, Default)]
pub(crate) struct ActivationLedger {
    records: Vec<ActivationRecord>,
}

impl ActivationLedger {
    pub(crate) fn append(
        &mut self,
        role: &str,
        status: ActivationStatus,
        job_id: Option<Uuid>,
        task: &TaskContext,
        result: Option<Value>,
    ) -> ActivationRecord {
        let record = ActivationRecord {
            seq: self.records.len() as u64,
            at: Utc::now(),
            role: role.to_string(),
            status,
            job_id,
            task: task.clone(),
            result,
        };
        self.records.push(record.clone());
        record
    }

    pub(crate) fn records(&self) -> &[ActivationRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_round_trip() {
        for s in [
            "activated",
            "running",
            "completed",
            "failed",
            "blocked_internet",
            "unknown_role",
            "ok",
            "overridden",
        ] {
            assert_eq!(ActivationStatus::from(s).as_str(), s);
        }
        assert_eq!(
            ActivationStatus::from("async_ok"),
            ActivationStatus::Other("async_ok".into())
        );
    }

    #[test]
    fn test_status_serializes_as_plain_string() {
        let json = serde_json::to_string(&ActivationStatus::BlockedInternet).unwrap();
        assert_eq!(json, "\"blocked_internet\"");
        let back: ActivationStatus = serde_json::from_str("\"overridden\"").unwrap();
        assert_eq!(back, ActivationStatus::Other("overridden".into()));
    }

    #[test]
    fn test_ledger_sequence_is_dense() {
        let mut ledger = ActivationLedger::default();
        let task = TaskContext::new();
        ledger.append("a", ActivationStatus::Activated, None, &task, None);
        ledger.append("a", ActivationStatus::Running, None, &task, None);
        let seqs: Vec<u64> = ledger.records().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
    }
}
