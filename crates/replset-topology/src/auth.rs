//! Authentication block of the topology document

use crate::roles::RoleRef;
use serde::{Deserialize, Serialize};

/// Agent name of the SCRAM-SHA-256 mechanism
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Agent name of the SCRAM-SHA-1 mechanism
pub const SCRAM_SHA_1: &str = "MONGODB-CR";

/// Salted credentials for one SCRAM mechanism
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScramCreds {
    pub iteration_count: u32,
    pub salt: String,
    pub server_key: String,
    pub stored_key: String,
}

/// A database user the agent keeps in sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUser {
    #[serde(rename = "user")]
    pub username: String,
    #[serde(rename = "db")]
    pub database: String,
    pub mechanisms: Vec<String>,
    pub roles: Vec<RoleRef>,
    #[serde(default)]
    pub authentication_restrictions: Vec<crate::roles::AuthenticationRestriction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scram_sha256_creds: Option<ScramCreds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scram_sha1_creds: Option<ScramCreds>,
}

/// Authentication settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Auth {
    #[serde(rename = "usersWanted", default)]
    pub users: Vec<AgentUser>,
    pub disabled: bool,
    pub authoritative_set: bool,
    #[serde(default)]
    pub auto_auth_mechanisms: Vec<String>,
    pub auto_auth_mechanism: String,
    #[serde(default)]
    pub deployment_auth_mechanisms: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auto_user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(rename = "keyfile", default, skip_serializing_if = "String::is_empty")]
    pub key_file: String,
    #[serde(rename = "keyfileWindows", default, skip_serializing_if = "String::is_empty")]
    pub key_file_windows: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auto_pwd: String,
}

impl Auth {
    /// Authentication switched off
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            users: Vec::new(),
            disabled: true,
            authoritative_set: false,
            auto_auth_mechanisms: Vec::new(),
            auto_auth_mechanism: SCRAM_SHA_1.to_string(),
            deployment_auth_mechanisms: Vec::new(),
            auto_user: String::new(),
            key: String::new(),
            key_file: String::new(),
            key_file_windows: String::new(),
            auto_pwd: String::new(),
        }
    }
}

impl Default for Auth {
    fn default() -> Self {
        Self::disabled()
    }
}
