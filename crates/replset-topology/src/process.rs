//! Process entries of the topology document
//!
//! Each [`Process`] describes one `mongod` the agent drives. Startup options
//! live in [`ProcessArgs`], a free-form nested map addressed with dotted
//! paths (`net.port`, `net.tls.mode`, ...), so user supplied configuration
//! can be merged in without a fixed schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default port a process listens on
pub const DEFAULT_PORT: u16 = 27017;

/// Data directory inside the database container
pub const DEFAULT_DB_PATH: &str = "/data";

/// Auth schema version written for every process
pub const AUTH_SCHEMA_VERSION: u32 = 5;

/// Kind of process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessType {
    #[default]
    #[serde(rename = "mongod")]
    Mongod,
}

/// TLS mode of one process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsMode {
    #[serde(rename = "disabled")]
    Disabled,
    #[serde(rename = "allowTLS")]
    Allow,
    #[serde(rename = "preferTLS")]
    Prefer,
    #[serde(rename = "requireTLS")]
    Require,
}

impl TlsMode {
    /// Wire name understood by the agent
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Allow => "allowTLS",
            Self::Prefer => "preferTLS",
            Self::Require => "requireTLS",
        }
    }
}

/// Log destination of a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemLog {
    pub destination: String,
    pub path: String,
}

impl SystemLog {
    /// Log to a file at `path`
    #[must_use]
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            destination: "file".to_string(),
            path: path.into(),
        }
    }
}

impl Default for SystemLog {
    fn default() -> Self {
        Self::file("/var/log/mongodb-mms-automation/mongodb.log")
    }
}

/// Free-form startup options keyed by dotted paths
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessArgs(Map<String, Value>);

impl ProcessArgs {
    /// Empty argument map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the raw map
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Look up a value by dotted path
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Set a value by dotted path, creating intermediate maps
    ///
    /// A non-map value in the middle of the path is replaced by a map.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };
        let mut current = &mut self.0;
        for segment in parents {
            let entry = current
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(next) = entry else {
                return;
            };
            current = next;
        }
        current.insert((*last).to_string(), value.into());
    }

    /// Remove a value by dotted path
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = segments.split_last()?;
        let mut current = &mut self.0;
        for segment in parents {
            current = current.get_mut(*segment)?.as_object_mut()?;
        }
        current.remove(*last)
    }

    /// Deep-merge another map on top of this one; scalars in `other` win
    pub fn merge(&mut self, other: &Map<String, Value>) {
        merge_maps(&mut self.0, other);
    }

    /// Listening port, if set
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.get("net.port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
    }

    /// Set the listening port
    pub fn set_port(&mut self, port: u16) {
        self.set("net.port", port);
    }
}

fn merge_maps(base: &mut Map<String, Value>, other: &Map<String, Value>) {
    for (key, incoming) in other {
        match (base.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge_maps(existing, nested),
            _ => {
                base.insert(key.clone(), incoming.clone());
            }
        }
    }
}

/// One database process managed by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub name: String,
    #[serde(rename = "hostname")]
    pub host_name: String,
    #[serde(rename = "args2_6")]
    pub args: ProcessArgs,
    pub feature_compatibility_version: String,
    pub process_type: ProcessType,
    pub version: String,
    pub auth_schema_version: u32,
    pub system_log: SystemLog,
}

impl Process {
    /// Create a process with the baseline arguments every member carries
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        host_name: impl Into<String>,
        replica_set_name: &str,
        version: impl Into<String>,
        feature_compatibility_version: impl Into<String>,
    ) -> Self {
        let mut args = ProcessArgs::new();
        args.set_port(DEFAULT_PORT);
        args.set("storage.dbPath", DEFAULT_DB_PATH);
        args.set("replication.replSetName", replica_set_name);
        Self {
            name: name.into(),
            host_name: host_name.into(),
            args,
            feature_compatibility_version: feature_compatibility_version.into(),
            process_type: ProcessType::Mongod,
            version: version.into(),
            auth_schema_version: AUTH_SCHEMA_VERSION,
            system_log: SystemLog::default(),
        }
    }

    /// Port this process listens on, falling back to the default
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.args.port().unwrap_or(DEFAULT_PORT)
    }

    /// TLS mode of the process, `None` when TLS was never configured
    #[must_use]
    pub fn tls_mode(&self) -> Option<&str> {
        self.args.get("net.tls.mode").and_then(Value::as_str)
    }
}
