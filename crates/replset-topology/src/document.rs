//! The topology document
//!
//! A [`TopologyDocument`] is the versioned artifact the external agent reads.
//! It is rebuilt in full on every pass and compared against the previously
//! persisted copy with [`TopologyDocument::is_equivalent`], which ignores the
//! version counter.
//!
//! Fields the builder does not model are kept in `extra` so that anything
//! the agent wrote survives a rebuild untouched.

use crate::auth::Auth;
use crate::error::BuildError;
use crate::process::Process;
use crate::roles::CustomRole;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version of every replica set we emit
pub const PROTOCOL_VERSION: &str = "1";

/// A member of the replica set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetMember {
    #[serde(rename = "_id")]
    pub id: u32,
    /// Name of the process backing this member
    pub host: String,
    pub priority: u32,
    pub votes: u32,
    pub arbiter_only: bool,
}

impl ReplicaSetMember {
    /// Data-bearing voting member
    #[must_use]
    pub fn data(id: u32, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            priority: 1,
            votes: 1,
            arbiter_only: false,
        }
    }

    /// Voting member without data that can never become primary
    #[must_use]
    pub fn arbiter(id: u32, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            priority: 0,
            votes: 1,
            arbiter_only: true,
        }
    }
}

/// Replica set descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetConfig {
    #[serde(rename = "_id")]
    pub id: String,
    pub members: Vec<ReplicaSetMember>,
    pub protocol_version: String,
}

/// Whether clients must present certificates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClientCertificateMode {
    #[default]
    Optional,
    Required,
}

/// Deployment wide TLS settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    #[serde(rename = "CAFilePath", default)]
    pub ca_file_path: String,
    #[serde(default)]
    pub client_certificate_mode: ClientCertificateMode,
}

/// Metrics endpoint exposed by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prometheus {
    pub enabled: bool,
    pub username: String,
    pub password: String,
    pub scheme: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_pem_path: String,
    pub listen_address: String,
    pub metrics_path: String,
}

/// The versioned cluster configuration consumed by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyDocument {
    pub version: u64,
    #[serde(default)]
    pub processes: Vec<Process>,
    #[serde(default)]
    pub replica_sets: Vec<ReplicaSetConfig>,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub tls: TlsSettings,
    #[serde(default)]
    pub roles: Vec<CustomRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<Prometheus>,
    /// Fields owned by the agent or not modelled here
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for TopologyDocument {
    fn default() -> Self {
        Self {
            version: 0,
            processes: Vec::new(),
            replica_sets: Vec::new(),
            auth: Auth::disabled(),
            tls: TlsSettings::default(),
            roles: Vec::new(),
            prometheus: None,
            extra: Map::new(),
        }
    }
}

impl TopologyDocument {
    /// Parse a persisted document
    ///
    /// # Errors
    /// Returns [`BuildError::Serialization`] for malformed JSON
    pub fn from_slice(bytes: &[u8]) -> Result<Self, BuildError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize for persistence
    ///
    /// # Errors
    /// Returns [`BuildError::Serialization`] if encoding fails
    pub fn to_json(&self) -> Result<String, BuildError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Equal in every field except `version`
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.processes == other.processes
            && self.replica_sets == other.replica_sets
            && self.auth == other.auth
            && self.tls == other.tls
            && self.roles == other.roles
            && self.prometheus == other.prometheus
            && self.extra == other.extra
    }

    /// Find a process by name
    #[must_use]
    pub fn process(&self, name: &str) -> Option<&Process> {
        self.processes.iter().find(|p| p.name == name)
    }

    /// Mutable lookup of a process by name
    pub fn process_mut(&mut self, name: &str) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.name == name)
    }

    /// Whether any process has TLS switched on
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        !self.tls.ca_file_path.is_empty()
            || self
                .processes
                .iter()
                .any(|p| p.tls_mode().is_some_and(|m| m != "disabled"))
    }

    /// Number of data-bearing members of the first replica set
    #[must_use]
    pub fn data_member_count(&self) -> usize {
        self.replica_sets
            .first()
            .map_or(0, |rs| rs.members.iter().filter(|m| !m.arbiter_only).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> TopologyDocument {
        TopologyDocument {
            version: 3,
            processes: vec![Process::new("rs-0", "rs-0.svc", "rs", "6.0.5", "6.0")],
            replica_sets: vec![ReplicaSetConfig {
                id: "rs".into(),
                members: vec![ReplicaSetMember::data(0, "rs-0")],
                protocol_version: PROTOCOL_VERSION.into(),
            }],
            ..TopologyDocument::default()
        }
    }

    #[test]
    fn equivalence_ignores_version() {
        let a = doc();
        let mut b = doc();
        b.version = 7;
        assert!(a.is_equivalent(&b));
        b.processes[0].version = "7.0.0".into();
        assert!(!a.is_equivalent(&b));
    }

    #[test]
    fn unknown_fields_survive_roundtrip() {
        let raw = json!({
            "version": 2,
            "processes": [],
            "replicaSets": [],
            "auth": {"disabled": true, "authoritativeSet": false, "autoAuthMechanism": "MONGODB-CR"},
            "tls": {"CAFilePath": "", "clientCertificateMode": "OPTIONAL"},
            "mongoDbToolsVersion": {"version": "100.5.2"},
            "options": {"downloadBase": "/var/lib/mongodb-mms-automation"}
        });
        let parsed: TopologyDocument = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.version, 2);
        assert_eq!(parsed.extra["options"]["downloadBase"], json!("/var/lib/mongodb-mms-automation"));
        let encoded = serde_json::to_value(&parsed).unwrap();
        assert_eq!(encoded["mongoDbToolsVersion"]["version"], json!("100.5.2"));
        assert!(encoded.get("prometheus").is_none());
    }

    #[test]
    fn tls_enabled_reads_process_modes() {
        let mut d = doc();
        assert!(!d.tls_enabled());
        d.processes[0].args.set("net.tls.mode", "requireTLS");
        assert!(d.tls_enabled());
    }
}
