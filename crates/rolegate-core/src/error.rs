//! Error taxonomy for rolegate.
//!
//! Expected outcomes (policy denial, invalid replies, timeouts, handler
//! failures) are not errors; they are routed to escalation or recorded as
//! activation statuses. This enum covers the genuinely fallible plumbing.

/// rolegate errors.
#[derive(Debug, thiserror::Error)]
pub enum RolegateError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("backlog item not found: {0}")]
    BacklogItemNotFound(u64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("atomic persist failed for {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for rolegate operations.
pub type Result<T> = std::result::Result<T, RolegateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolegate_error_display() {
        let err = RolegateError::InvalidConfig("network must be an object".to_string());
        assert!(err.to_string().contains("invalid configuration"));

        let err = RolegateError::BacklogItemNotFound(7);
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn test_persist_error_names_path() {
        let err = RolegateError::Persist {
            path: "/tmp/impediments.json".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/impediments.json"));
        assert!(msg.contains("denied"));
    }
}
