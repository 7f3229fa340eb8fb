//! Role descriptors.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Per-role network override.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkOverride {
    /// Always allowed, whatever the policy says.
    Allow,
    /// Never allowed, whatever the policy says.
    Deny,
    /// Ask the policy oracle.
    #[default]
    Policy,
}

impl From<Option<bool>> for NetworkOverride {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => NetworkOverride::Allow,
            Some(false) => NetworkOverride::Deny,
            None => NetworkOverride::Policy,
        }
    }
}

/// A logical role that can be nominated for tasks and run jobs.
///
/// `name` is the unique key. Registering a descriptor with an existing name
/// replaces the old one in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    pub name: String,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    #[serde(default)]
    pub network: NetworkOverride,
    /// Concurrency cap for this role's jobs. Zero is treated as one.
    #[serde(default = "default_max_parallel_jobs")]
    pub max_parallel_jobs: usize,
    #[serde(default)]
    pub preferred: bool,
    #[serde(default = "default_weight")]
    pub weight: i64,
}

fn default_max_parallel_jobs() -> usize {
    1
}

fn default_weight() -> i64 {
    1
}

impl RoleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            skills: BTreeSet::new(),
            network: NetworkOverride::Policy,
            max_parallel_jobs: default_max_parallel_jobs(),
            preferred: false,
            weight: default_weight(),
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills.extend(skills.into_iter().map(Into::into));
        self
    }

    pub fn with_network(mut self, network: NetworkOverride) -> Self {
        self.network = network;
        self
    }

    pub fn with_max_parallel_jobs(mut self, max: usize) -> Self {
        self.max_parallel_jobs = max;
        self
    }

    pub fn preferred(mut self) -> Self {
        self.preferred = true;
        self
    }

    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = weight;
        self
    }

    /// The effective concurrency cap (at least one).
    pub fn parallel_limit(&self) -> usize {
        self.max_parallel_jobs.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let role = RoleDescriptor::new("worker");
        assert_eq!(role.network, NetworkOverride::Policy);
        assert_eq!(role.max_parallel_jobs, 1);
        assert_eq!(role.weight, 1);
        assert!(!role.preferred);
    }

    #[test]
    fn test_zero_parallel_limit_is_one() {
        let role = RoleDescriptor::new("worker").with_max_parallel_jobs(0);
        assert_eq!(role.parallel_limit(), 1);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let role: RoleDescriptor =
            serde_json::from_str(r#"{"name": "web", "skills": ["http"], "network": "allow"}"#)
                .unwrap();
        assert_eq!(role.network, NetworkOverride::Allow);
        assert!(role.skills.contains("http"));
        assert_eq!(role.max_parallel_jobs, 1);
        assert_eq!(role.weight, 1);
    }

    #[test]
    fn test_override_from_tri_state() {
        assert_eq!(NetworkOverride::from(Some(true)), NetworkOverride::Allow);
        assert_eq!(NetworkOverride::from(Some(false)), NetworkOverride::Deny);
        assert_eq!(NetworkOverride::from(None), NetworkOverride::Policy);
    }
}
