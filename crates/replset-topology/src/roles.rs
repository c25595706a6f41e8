//! Custom role definitions carried in the topology document

use serde::{Deserialize, Serialize};

/// Resource a privilege applies to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_resource: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<bool>,
}

/// Set of actions allowed on a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privilege {
    pub resource: Resource,
    pub actions: Vec<String>,
}

/// Reference to an inherited role
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleRef {
    pub role: String,
    pub db: String,
}

/// Restriction on where a role may authenticate from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationRestriction {
    #[serde(default)]
    pub client_source: Vec<String>,
    #[serde(default)]
    pub server_address: Vec<String>,
}

/// A user defined role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRole {
    pub role: String,
    pub db: String,
    #[serde(default)]
    pub privileges: Vec<Privilege>,
    #[serde(default)]
    pub roles: Vec<RoleRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authentication_restrictions: Vec<AuthenticationRestriction>,
}
