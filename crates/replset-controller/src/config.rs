//! Operator configuration

use crate::telemetry::LogFormat;
use replset_statemachine::RetryPolicy;
use replset_topology::DEFAULT_CLUSTER_DOMAIN;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by every reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// DNS suffix of the cluster
    pub cluster_domain: String,
    pub agent_image: String,
    pub version_upgrade_hook_image: String,
    pub readiness_probe_image: String,
    /// Database image repository; the tag is the database version
    pub mongodb_repo_url: String,
    pub mongodb_image: String,
    pub agent_log_file: String,
    pub agent_log_level: String,
    pub log_format: LogFormat,
    /// Delay before retrying a step that is waiting on something
    pub not_ready_retry_secs: u64,
    /// Attempts for optimistic-concurrency writes
    pub conflict_retry_attempts: u32,
    pub conflict_retry_backoff_ms: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            agent_image: "quay.io/mongodb/mongodb-agent:12.0.25.7724-1".to_string(),
            version_upgrade_hook_image: "quay.io/mongodb/mongodb-kubernetes-operator-version-upgrade-post-start-hook:1.0.8"
                .to_string(),
            readiness_probe_image: "quay.io/mongodb/mongodb-kubernetes-readinessprobe:1.0.17".to_string(),
            mongodb_repo_url: "docker.io/mongodb".to_string(),
            mongodb_image: "mongodb-community-server".to_string(),
            agent_log_file: "/var/log/mongodb-mms-automation/automation-agent.log".to_string(),
            agent_log_level: "INFO".to_string(),
            log_format: LogFormat::default(),
            not_ready_retry_secs: 10,
            conflict_retry_attempts: 3,
            conflict_retry_backoff_ms: 1000,
        }
    }
}

impl OperatorConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML document; absent fields keep their defaults
    ///
    /// # Errors
    /// Malformed YAML or mistyped fields
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    #[inline]
    #[must_use]
    pub fn with_cluster_domain(mut self, domain: impl Into<String>) -> Self {
        self.cluster_domain = domain.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_not_ready_retry(mut self, delay: Duration) -> Self {
        self.not_ready_retry_secs = delay.as_secs();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_conflict_retry(mut self, policy: RetryPolicy) -> Self {
        self.conflict_retry_attempts = policy.attempts;
        self.conflict_retry_backoff_ms = u64::try_from(policy.backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn not_ready_retry(&self) -> Duration {
        Duration::from_secs(self.not_ready_retry_secs)
    }

    #[must_use]
    pub fn conflict_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.conflict_retry_attempts,
            Duration::from_millis(self.conflict_retry_backoff_ms),
        )
    }

    /// Full database image for a version
    #[must_use]
    pub fn mongodb_image_for(&self, version: &str) -> String {
        format!("{}/{}:{version}", self.mongodb_repo_url, self.mongodb_image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = OperatorConfig::new();
        assert_eq!(config.cluster_domain, "cluster.local");
        assert_eq!(config.not_ready_retry(), Duration::from_secs(10));
        assert_eq!(config.conflict_retry(), RetryPolicy::default());
        assert_eq!(
            config.mongodb_image_for("6.0.5"),
            "docker.io/mongodb/mongodb-community-server:6.0.5"
        );
    }

    #[test]
    fn yaml_overrides_only_given_fields() {
        let config = OperatorConfig::from_yaml_str("clusterDomain: example.org\nlogFormat: json\n").unwrap();
        assert_eq!(config.cluster_domain, "example.org");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.agent_log_level, "INFO");
    }

    #[test]
    fn builders() {
        let config = OperatorConfig::new()
            .with_cluster_domain("corp.internal")
            .with_conflict_retry(RetryPolicy::none());
        assert_eq!(config.cluster_domain, "corp.internal");
        assert_eq!(config.conflict_retry(), RetryPolicy::none());
    }
}
