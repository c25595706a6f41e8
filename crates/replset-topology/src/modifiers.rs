//! Generic modifiers shared by every deployment
//!
//! TLS and port assignment modifiers live with their rollout coordinators;
//! these cover the remaining fields of the document.

use crate::auth::Auth;
use crate::builder::{Modifier, Stage};
use crate::document::{Prometheus, TopologyDocument};
use crate::error::BuildError;
use crate::roles::CustomRole;
use serde_json::{Map, Value};

/// Replaces the auth block
pub struct AuthModifier(pub Auth);

impl Modifier for AuthModifier {
    fn stage(&self) -> Stage {
        Stage::Auth
    }

    fn name(&self) -> &str {
        "auth"
    }

    fn apply(&self, doc: &mut TopologyDocument) -> Result<(), BuildError> {
        doc.auth = self.0.clone();
        Ok(())
    }
}

/// Sets the custom roles list
pub struct CustomRolesModifier(pub Vec<CustomRole>);

impl Modifier for CustomRolesModifier {
    fn stage(&self) -> Stage {
        Stage::Roles
    }

    fn name(&self) -> &str {
        "custom-roles"
    }

    fn apply(&self, doc: &mut TopologyDocument) -> Result<(), BuildError> {
        doc.roles = self.0.clone();
        Ok(())
    }
}

/// Merges user supplied per-process options into every process
///
/// `net.port` is owned by the port assignment stage and is dropped here.
pub struct AdditionalArgsModifier {
    config: Map<String, Value>,
}

/// Sections the builder fills in itself; they only accept nested options
const STRUCTURED_SECTIONS: [&str; 3] = ["net", "storage", "replication"];

impl AdditionalArgsModifier {
    /// Validate and wrap a free-form configuration value
    ///
    /// # Errors
    /// Returns [`BuildError::InvalidConfiguration`] unless `config` is a map
    /// whose top-level values are maps or scalars, with maps required for
    /// the sections the builder structures
    pub fn new(config: &Value) -> Result<Self, BuildError> {
        let map = match config {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(BuildError::InvalidConfiguration(format!(
                    "additional configuration must be a map, got {other}"
                )))
            }
        };
        for (key, value) in &map {
            let structured = STRUCTURED_SECTIONS.contains(&key.as_str());
            let accepted = match value {
                Value::Object(_) => true,
                Value::Bool(_) | Value::Number(_) | Value::String(_) => !structured,
                Value::Array(_) | Value::Null => false,
            };
            if !accepted {
                let expected = if structured { "a map" } else { "a map or a scalar" };
                return Err(BuildError::InvalidConfiguration(format!(
                    "additional configuration section {key:?} must be {expected}"
                )));
            }
        }
        Ok(Self { config: map })
    }
}

impl Modifier for AdditionalArgsModifier {
    fn stage(&self) -> Stage {
        Stage::AdditionalArgs
    }

    fn name(&self) -> &str {
        "additional-args"
    }

    fn apply(&self, doc: &mut TopologyDocument) -> Result<(), BuildError> {
        let mut config = self.config.clone();
        if let Some(Value::Object(net)) = config.get_mut("net") {
            net.remove("port");
        }
        for process in &mut doc.processes {
            process.args.merge(&config);
        }
        Ok(())
    }
}

/// Enables the agent's metrics endpoint
pub struct MetricsModifier(pub Prometheus);

impl Modifier for MetricsModifier {
    fn stage(&self) -> Stage {
        Stage::Metrics
    }

    fn name(&self) -> &str {
        "metrics"
    }

    fn apply(&self, doc: &mut TopologyDocument) -> Result<(), BuildError> {
        if self.0.password.is_empty() {
            return Err(BuildError::missing("metrics", "metrics password"));
        }
        doc.prometheus = Some(self.0.clone());
        Ok(())
    }
}
