//! Secret masking.
//!
//! Only explicit secret values are masked: values of environment variables
//! referenced by the config `secrets` block plus any extras supplied by the
//! caller. Nothing is guessed from patterns.

use serde_json::Value;

use crate::config::RolegateConfig;

/// Replacement text for masked secrets.
pub const REDACTED: &str = "<REDACTED>";

/// A fixed set of secret values to strip from text.
#[derive(Debug, Clone, Default)]
pub struct SecretMasker {
    /// Longest first, so a secret containing another is masked whole.
    values: Vec<String>,
}

impl SecretMasker {
    /// A masker that never changes its input.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a masker from explicit values. Empty strings are ignored.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values: Vec<String> = values
            .into_iter()
            .map(Into::into)
            .filter(|v| !v.is_empty())
            .collect();
        values.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        values.dedup();
        Self { values }
    }

    /// Collect the current values of every env var named in `config.secrets`.
    pub fn from_config(config: &RolegateConfig) -> Self {
        Self::new(
            config
                .secret_env_vars()
                .filter_map(|var| std::env::var(var).ok()),
        )
    }

    /// Return a copy of `self` that also masks `extra`.
    pub fn with_extra<I, S>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            self.values
                .iter()
                .cloned()
                .chain(extra.into_iter().map(Into::into)),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace every known secret in `text` with [`REDACTED`].
    pub fn mask(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.values {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), REDACTED);
            }
        }
        out
    }

    /// Mask every string in a JSON value, object keys included.
    pub fn mask_value(&self, value: &Value) -> Value {
        if self.is_empty() {
            return value.clone();
        }
        match value {
            Value::String(s) => Value::String(self.mask(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.mask_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (self.mask(k), self.mask_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Mask `text` against the config's secrets plus `extra_secrets`.
pub fn mask(text: &str, config: &RolegateConfig, extra_secrets: &[&str]) -> String {
    SecretMasker::from_config(config)
        .with_extra(extra_secrets.iter().copied())
        .mask(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretRef;
    use serde_json::json;

    #[test]
    fn test_mask_replaces_all_occurrences() {
        let masker = SecretMasker::new(["hunter2"]);
        assert_eq!(
            masker.mask("pw=hunter2; again hunter2"),
            "pw=<REDACTED>; again <REDACTED>"
        );
    }

    #[test]
    fn test_longest_secret_masked_first() {
        let masker = SecretMasker::new(["abc", "abcdef"]);
        assert_eq!(masker.mask("token abcdef"), "token <REDACTED>");
    }

    #[test]
    fn test_empty_values_ignored() {
        let masker = SecretMasker::new(["", "x1"]);
        assert_eq!(masker.mask("a x1"), "a <REDACTED>");
        assert!(SecretMasker::new([""]).is_empty());
    }

    #[test]
    fn test_mask_value_walks_nested_json() {
        let masker = SecretMasker::new(["s3cr3t"]);
        let masked = masker.mask_value(&json!({
            "replies": ["s3cr3t", "ok"],
            "nested": {"s3cr3t-key": "prefix-s3cr3t"},
            "n": 4
        }));
        let text = masked.to_string();
        assert!(!text.contains("s3cr3t"));
        assert_eq!(masked["replies"][0], "<REDACTED>");
        assert_eq!(masked["nested"]["<REDACTED>-key"], "prefix-<REDACTED>");
        assert_eq!(masked["n"], 4);
    }

    #[test]
    fn test_from_config_reads_env_vars() {
        std::env::set_var("ROLEGATE_TEST_SECRET_FROM_CONFIG", "tok-998877");
        let mut config = RolegateConfig::default();
        config.secrets.insert(
            "api".into(),
            SecretRef {
                env_var: Some("ROLEGATE_TEST_SECRET_FROM_CONFIG".into()),
            },
        );
        config.secrets.insert(
            "unset".into(),
            SecretRef {
                env_var: Some("ROLEGATE_TEST_SECRET_NEVER_SET".into()),
            },
        );
        assert_eq!(mask("key tok-998877", &config, &[]), "key <REDACTED>");
        assert_eq!(mask("key extra", &config, &["extra"]), "key <REDACTED>");
    }
}
