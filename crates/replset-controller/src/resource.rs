//! The replica-set resource
//!
//! Declared desired state ([`ReplicaSetSpec`]), last reported state
//! ([`ReplicaSetStatus`]) and the annotations the controller keeps on the
//! resource between passes. Names of every derived object are computed here
//! so they stay consistent across modules.

use crate::objects::{Object, ObjectKey, ObjectMeta, OwnerReference, ResourceRequirements};
use replset_topology::{major_minor, CustomRole, RoleRef, DEFAULT_PORT, SCRAM_SHA_1, SCRAM_SHA_256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Annotation holding the serialized state record
pub const STATE_MACHINE_ANNOTATION: &str = "mongodb.com/v1.stateMachine";

/// Annotation holding the spec of the last successful pass
pub const LAST_SUCCESSFUL_CONFIGURATION_ANNOTATION: &str = "mongodb.com/v1.lastSuccessfulConfiguration";

/// Annotation holding the database version of the last successful pass
pub const LAST_VERSION_ANNOTATION: &str = "mongodb.com/v1.lastVersion";

/// Default key of a password inside its secret
pub const DEFAULT_PASSWORD_KEY: &str = "password";

/// Supported authentication modes as written in the spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMode {
    #[serde(rename = "SCRAM")]
    Scram,
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    #[serde(rename = "SCRAM-SHA-1")]
    ScramSha1,
}

impl AuthMode {
    /// Mechanism name understood by the agent
    #[must_use]
    pub const fn mechanism(self) -> &'static str {
        match self {
            Self::Scram | Self::ScramSha256 => SCRAM_SHA_256,
            Self::ScramSha1 => SCRAM_SHA_1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    #[serde(default)]
    pub modes: Vec<AuthMode>,
    /// Leave users the controller does not know about alone
    #[serde(default)]
    pub ignore_unknown_users: Option<bool>,
}

impl Authentication {
    /// Agent mechanisms, deduplicated, defaulting to SCRAM-SHA-256
    #[must_use]
    pub fn mechanisms(&self) -> Vec<&'static str> {
        let mut mechanisms: Vec<&'static str> = Vec::new();
        for mode in &self.modes {
            if !mechanisms.contains(&mode.mechanism()) {
                mechanisms.push(mode.mechanism());
            }
        }
        if mechanisms.is_empty() {
            mechanisms.push(SCRAM_SHA_256);
        }
        mechanisms
    }

    /// Whether the agent removes users it does not know about
    #[must_use]
    pub fn is_authoritative(&self) -> bool {
        !self.ignore_unknown_users.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Accept plain connections too
    #[serde(default)]
    pub optional: bool,
    /// Secret with `tls.crt`/`tls.key` or `tls.pem`
    #[serde(default)]
    pub certificate_key_secret: Option<String>,
    /// Secret with `ca.crt`; preferred over the config map
    #[serde(default)]
    pub ca_certificate_secret: Option<String>,
    #[serde(default)]
    pub ca_config_map: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    #[serde(default)]
    pub authentication: Authentication,
    #[serde(default)]
    pub tls: TlsSpec,
    #[serde(default)]
    pub roles: Vec<CustomRole>,
}

/// Reference to one entry of a secret
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    #[serde(default)]
    pub key: Option<String>,
}

impl SecretKeyRef {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
        }
    }

    /// Entry name, defaulting to `password`
    #[must_use]
    pub fn key_or_default(&self) -> &str {
        self.key.as_deref().unwrap_or(DEFAULT_PASSWORD_KEY)
    }
}

/// A database user managed through the agent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    pub name: String,
    pub db: String,
    pub password_secret_ref: SecretKeyRef,
    #[serde(default)]
    pub roles: Vec<RoleRef>,
    /// Prefix of the derived credentials secret
    pub scram_credentials_secret_name: String,
    #[serde(default)]
    pub connection_string_secret_name: Option<String>,
}

impl UserSpec {
    /// Name of the secret holding derived SCRAM credentials
    #[must_use]
    pub fn scram_credentials_secret(&self) -> String {
        format!("{}-scram-credentials", self.scram_credentials_secret_name)
    }

    /// Name of the connection string secret for a resource
    #[must_use]
    pub fn connection_string_secret(&self, resource: &str) -> String {
        match &self.connection_string_secret_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => normalize_name(&format!("{resource}-{}-{}", self.db, self.name)),
        }
    }
}

/// Agent metrics endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    pub username: String,
    pub password_secret_ref: SecretKeyRef,
    /// Secret with a certificate/key for an https endpoint
    #[serde(default)]
    pub tls_secret_ref: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub metrics_path: Option<String>,
}

/// Default listen port of the metrics endpoint
pub const DEFAULT_PROMETHEUS_PORT: u16 = 9216;

/// Default path of the metrics endpoint
pub const DEFAULT_PROMETHEUS_PATH: &str = "/metrics";

impl PrometheusSpec {
    #[must_use]
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PROMETHEUS_PORT)
    }

    #[must_use]
    pub fn metrics_path_or_default(&self) -> &str {
        self.metrics_path.as_deref().unwrap_or(DEFAULT_PROMETHEUS_PATH)
    }
}

/// Desired state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetSpec {
    pub members: u32,
    /// Signed so that nonsensical input is reported rather than rejected at parse time
    #[serde(default)]
    pub arbiters: i32,
    pub version: String,
    #[serde(default)]
    pub feature_compatibility_version: Option<String>,
    #[serde(default)]
    pub security: Security,
    #[serde(default)]
    pub users: Vec<UserSpec>,
    /// Free-form per-process options merged into every process
    #[serde(default)]
    pub additional_mongod_config: Value,
    #[serde(default)]
    pub prometheus: Option<PrometheusSpec>,
    /// Resources of the database container
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
}

impl ReplicaSetSpec {
    /// Arbiter count clamped at zero
    #[must_use]
    pub fn arbiter_count(&self) -> u32 {
        u32::try_from(self.arbiters).unwrap_or(0)
    }

    /// Port requested through `additional_mongod_config.net.port`
    #[must_use]
    pub fn expected_port(&self) -> u16 {
        self.additional_mongod_config
            .get("net")
            .and_then(|net| net.get("port"))
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
            .unwrap_or(DEFAULT_PORT)
    }

    /// Explicit FCV or `major.minor` of the version
    #[must_use]
    pub fn feature_compatibility_version(&self) -> String {
        self.feature_compatibility_version
            .clone()
            .unwrap_or_else(|| major_minor(&self.version))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Running,
    Failed,
}

/// Last reported state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetStatus {
    #[serde(default)]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub current_mongodb_members: u32,
    #[serde(default)]
    pub current_stateful_set_replicas: u32,
    #[serde(default)]
    pub current_mongodb_arbiters: u32,
    #[serde(default)]
    pub current_stateful_set_arbiters_replicas: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub mongo_uri: String,
    #[serde(default)]
    pub version: String,
}

/// The replica-set resource
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReplicaSet {
    pub meta: ObjectMeta,
    pub spec: ReplicaSetSpec,
    #[serde(default)]
    pub status: ReplicaSetStatus,
}

impl Object for ReplicaSet {
    const KIND: &'static str = "MongoDBCommunity";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

impl ReplicaSet {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: ReplicaSetSpec) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec,
            status: ReplicaSetStatus::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.meta.namespace
    }

    /// Key of a derived object in the same namespace
    #[must_use]
    pub fn key_of(&self, name: impl Into<String>) -> ObjectKey {
        ObjectKey::new(self.namespace(), name)
    }

    /// Metadata for a derived object owned by this resource
    #[must_use]
    pub fn owned_meta(&self, name: impl Into<String>) -> ObjectMeta {
        ObjectMeta::new(self.namespace(), name).with_owner(OwnerReference {
            kind: Self::KIND.to_string(),
            name: self.name().to_string(),
            uid: self.meta.uid.clone(),
        })
    }

    #[must_use]
    pub fn service_name(&self) -> String {
        format!("{}-svc", self.name())
    }

    /// Secret holding the topology document
    #[must_use]
    pub fn topology_secret_name(&self) -> String {
        format!("{}-config", self.name())
    }

    #[must_use]
    pub fn agent_password_secret_name(&self) -> String {
        format!("{}-agent-password", self.name())
    }

    #[must_use]
    pub fn keyfile_secret_name(&self) -> String {
        format!("{}-keyfile", self.name())
    }

    /// Operator-owned secret with the hashed certificate/key bundle
    #[must_use]
    pub fn tls_operator_secret_name(&self) -> String {
        format!("{}-server-certificate-key", self.name())
    }

    /// Operator-owned secret with the hashed CA bundle
    #[must_use]
    pub fn tls_ca_operator_secret_name(&self) -> String {
        format!("{}-ca-certificate", self.name())
    }

    /// Operator-owned secret with the hashed metrics endpoint bundle
    #[must_use]
    pub fn prometheus_operator_secret_name(&self) -> String {
        format!("{}-prometheus-certificate-key", self.name())
    }

    /// Pod group of data-bearing members
    #[must_use]
    pub fn stateful_set_name(&self) -> String {
        self.name().to_string()
    }

    #[must_use]
    pub fn arbiters_stateful_set_name(&self) -> String {
        format!("{}-arb", self.name())
    }

    /// Fully qualified host names of `members` data-bearing pods
    #[must_use]
    pub fn hosts(&self, members: u32, cluster_domain: &str) -> Vec<String> {
        let port = self.spec.expected_port();
        (0..members)
            .map(|i| {
                format!(
                    "{}-{i}.{}.{}.svc.{cluster_domain}:{port}",
                    self.name(),
                    self.service_name(),
                    self.namespace()
                )
            })
            .collect()
    }

    /// Connection URI without credentials
    #[must_use]
    pub fn mongo_uri(&self, members: u32, cluster_domain: &str) -> String {
        format!(
            "mongodb://{}/?replicaSet={}",
            self.hosts(members, cluster_domain).join(","),
            self.name()
        )
    }

    /// Spec accepted by the last successful pass
    ///
    /// # Errors
    /// Malformed annotation contents
    pub fn last_successful_spec(&self) -> Result<Option<ReplicaSetSpec>, serde_json::Error> {
        self.meta
            .annotation(LAST_SUCCESSFUL_CONFIGURATION_ANNOTATION)
            .map(serde_json::from_str)
            .transpose()
    }

    /// Database version of the last successful pass
    #[must_use]
    pub fn last_version(&self) -> Option<&str> {
        self.meta.annotation(LAST_VERSION_ANNOTATION)
    }

    /// The database version differs from the last successful pass
    #[must_use]
    pub fn is_changing_version(&self) -> bool {
        self.last_version().is_some_and(|v| v != self.spec.version)
    }
}

/// Lower-case, `_` to `-`, anything else outside `[a-z0-9.-]` dropped
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .replace('_', "-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> ReplicaSetSpec {
        ReplicaSetSpec {
            members: 3,
            version: "6.0.5".into(),
            ..ReplicaSetSpec::default()
        }
    }

    #[test]
    fn derived_names() {
        let rs = ReplicaSet::new("ns", "example", spec());
        assert_eq!(rs.service_name(), "example-svc");
        assert_eq!(rs.topology_secret_name(), "example-config");
        assert_eq!(rs.agent_password_secret_name(), "example-agent-password");
        assert_eq!(rs.keyfile_secret_name(), "example-keyfile");
        assert_eq!(rs.arbiters_stateful_set_name(), "example-arb");
        assert_eq!(
            rs.mongo_uri(2, "cluster.local"),
            "mongodb://example-0.example-svc.ns.svc.cluster.local:27017,example-1.example-svc.ns.svc.cluster.local:27017/?replicaSet=example"
        );
    }

    #[test]
    fn mechanisms_are_normalized() {
        let auth = Authentication {
            modes: vec![AuthMode::Scram, AuthMode::ScramSha1],
            ignore_unknown_users: None,
        };
        assert_eq!(auth.mechanisms(), vec!["SCRAM-SHA-256", "MONGODB-CR"]);
        assert_eq!(Authentication::default().mechanisms(), vec!["SCRAM-SHA-256"]);
        assert!(Authentication::default().is_authoritative());
    }

    #[test]
    fn expected_port_comes_from_additional_config() {
        let mut s = spec();
        assert_eq!(s.expected_port(), 27017);
        s.additional_mongod_config = json!({"net": {"port": 40333}});
        assert_eq!(s.expected_port(), 40333);
    }

    #[test]
    fn connection_string_secret_name_is_normalized() {
        let user = UserSpec {
            name: "My_User".into(),
            db: "admin".into(),
            ..UserSpec::default()
        };
        assert_eq!(user.connection_string_secret("rs"), "rs-admin-my-user");
    }

    #[test]
    fn spec_parses_from_camel_case() {
        let spec: ReplicaSetSpec = serde_json::from_value(json!({
            "members": 3,
            "version": "6.0.5",
            "security": {"authentication": {"modes": ["SCRAM"]}, "tls": {"enabled": true}},
            "users": [{
                "name": "app",
                "db": "admin",
                "passwordSecretRef": {"name": "app-password"},
                "scramCredentialsSecretName": "app"
            }]
        }))
        .unwrap();
        assert!(spec.security.tls.enabled);
        assert_eq!(spec.users[0].scram_credentials_secret(), "app-scram-credentials");
        assert_eq!(spec.users[0].password_secret_ref.key_or_default(), "password");
        assert_eq!(spec.feature_compatibility_version(), "6.0");
    }
}
