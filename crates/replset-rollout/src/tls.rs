//! TLS rollout coordinator
//!
//! TLS is enabled in four phases so the agent is never told to require TLS
//! on a process whose certificate files are not mounted yet:
//!
//! 1. validate the CA and certificate/key references
//! 2. materialize the combined bundle under a content-hash file name
//! 3. mark the resource rolled out once the mounting runtime objects exist
//! 4. enable TLS in the topology document ([`TlsModifier`])
//!
//! Everything here is pure; reading and writing the objects is up to the
//! caller.

use replset_topology::{
    BuildError, ClientCertificateMode, ContentHash, Modifier, Stage, TlsMode, TopologyDocument,
};
use std::collections::BTreeMap;

/// Annotation set once TLS material is mounted everywhere
pub const ROLLED_OUT_ANNOTATION: &str = "mongodb.com/v1.tlsRolledOut";

/// Entry holding the CA certificate
pub const CA_CERTIFICATE_KEY: &str = "ca.crt";

/// Entry holding the PEM certificate
pub const CERTIFICATE_KEY: &str = "tls.crt";

/// Entry holding the private key
pub const PRIVATE_KEY_KEY: &str = "tls.key";

/// Entry holding a pre-combined certificate and key
pub const COMBINED_PEM_KEY: &str = "tls.pem";

/// Where the CA bundle is mounted
pub const CA_MOUNT_PATH: &str = "/var/lib/tls/ca/";

/// Where the certificate/key bundle is mounted
pub const SERVER_MOUNT_PATH: &str = "/var/lib/tls/server/";

/// Soft failures; the caller retries later
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlsError {
    #[error("CA object {0} not found")]
    CaNotFound(String),

    #[error("CA object {name} has no \"ca.crt\" entry")]
    CaEntryMissing { name: String },

    #[error("certificate object {0} not found")]
    CertificateNotFound(String),

    #[error("certificate object {name} must contain either \"tls.crt\" and \"tls.key\" or \"tls.pem\"")]
    CertificateEntriesMissing { name: String },

    #[error("certificate object {name} holds a \"tls.pem\" that does not match its certificate and key")]
    InconsistentBundle { name: String },
}

/// Rollout phase derived from spec and marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPhase {
    Disabled,
    /// Requested but not yet marked rolled out
    Pending,
    RolledOut,
}

impl TlsPhase {
    #[must_use]
    pub const fn from_flags(enabled: bool, rolled_out: bool) -> Self {
        match (enabled, rolled_out) {
            (false, _) => Self::Disabled,
            (true, false) => Self::Pending,
            (true, true) => Self::RolledOut,
        }
    }

    /// TLS is being turned on and the marker is still missing
    #[inline]
    #[must_use]
    pub const fn is_newly_enabling(self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Read the marker from an annotation map
#[must_use]
pub fn is_rolled_out(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .get(ROLLED_OUT_ANNOTATION)
        .is_some_and(|v| v == "true")
}

/// Certificate followed by key, trailing newlines stripped, joined by a newline
#[must_use]
pub fn combine_pem(certificate: &str, key: &str) -> String {
    format!(
        "{}\n{}",
        certificate.trim_end_matches('\n'),
        key.trim_end_matches('\n')
    )
}

/// Extract the CA certificate from a CA object's entries
///
/// # Errors
/// [`TlsError::CaEntryMissing`] when the entry is absent or empty
pub fn ca_certificate<'a>(name: &str, entries: &'a BTreeMap<String, String>) -> Result<&'a str, TlsError> {
    entries
        .get(CA_CERTIFICATE_KEY)
        .map(String::as_str)
        .filter(|ca| !ca.is_empty())
        .ok_or_else(|| TlsError::CaEntryMissing { name: name.to_string() })
}

/// Resolve the combined certificate/key PEM of a certificate object
///
/// # Errors
/// - [`TlsError::CertificateEntriesMissing`] when neither form is complete
/// - [`TlsError::InconsistentBundle`] when both forms disagree
pub fn certificate_key_pem(name: &str, entries: &BTreeMap<String, String>) -> Result<String, TlsError> {
    let split = match (entries.get(CERTIFICATE_KEY), entries.get(PRIVATE_KEY_KEY)) {
        (Some(cert), Some(key)) if !cert.is_empty() && !key.is_empty() => Some(combine_pem(cert, key)),
        _ => None,
    };
    let combined = entries.get(COMBINED_PEM_KEY).filter(|pem| !pem.is_empty());

    match (split, combined) {
        (Some(split), Some(combined)) if split != *combined => Err(TlsError::InconsistentBundle {
            name: name.to_string(),
        }),
        (Some(split), _) => Ok(split),
        (None, Some(combined)) => Ok(combined.clone()),
        (None, None) => Err(TlsError::CertificateEntriesMissing {
            name: name.to_string(),
        }),
    }
}

/// A PEM payload named by the hash of its contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedPem {
    contents: String,
    file_name: String,
}

impl HashedPem {
    #[must_use]
    pub fn new(contents: impl Into<String>) -> Self {
        let contents = contents.into();
        let file_name = ContentHash::compute(contents.as_bytes()).file_name("pem");
        Self { contents, file_name }
    }

    #[inline]
    #[must_use]
    pub fn contents(&self) -> &str {
        &self.contents
    }

    /// `<sha256-hex>.pem`
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Full path once mounted under `mount_dir`
    #[must_use]
    pub fn path_under(&self, mount_dir: &str) -> String {
        format!("{mount_dir}{}", self.file_name)
    }
}

/// Validated and materialized TLS inputs of one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub ca: HashedPem,
    pub certificate_key: HashedPem,
}

impl TlsMaterial {
    #[must_use]
    pub fn new(ca: &str, certificate_key_pem: String) -> Self {
        Self {
            ca: HashedPem::new(ca),
            certificate_key: HashedPem::new(certificate_key_pem),
        }
    }

    #[must_use]
    pub fn ca_path(&self) -> String {
        self.ca.path_under(CA_MOUNT_PATH)
    }

    #[must_use]
    pub fn certificate_key_path(&self) -> String {
        self.certificate_key.path_under(SERVER_MOUNT_PATH)
    }
}

/// Enables TLS in the topology document once rolled out
#[derive(Debug, Clone)]
pub struct TlsModifier {
    phase: TlsPhase,
    optional: bool,
    ca_path: String,
    certificate_key_path: String,
}

impl TlsModifier {
    /// Modifier for the given phase; paths may be empty unless rolled out
    #[must_use]
    pub fn new(phase: TlsPhase, optional: bool, material: Option<&TlsMaterial>) -> Self {
        Self {
            phase,
            optional,
            ca_path: material.map(TlsMaterial::ca_path).unwrap_or_default(),
            certificate_key_path: material
                .map(TlsMaterial::certificate_key_path)
                .unwrap_or_default(),
        }
    }

    fn mode(&self) -> TlsMode {
        if self.optional {
            TlsMode::Prefer
        } else {
            TlsMode::Require
        }
    }
}

impl Modifier for TlsModifier {
    fn stage(&self) -> Stage {
        Stage::Tls
    }

    fn name(&self) -> &str {
        "tls"
    }

    fn apply(&self, doc: &mut TopologyDocument) -> Result<(), BuildError> {
        if self.phase != TlsPhase::RolledOut {
            return Ok(());
        }
        if self.ca_path.is_empty() || self.certificate_key_path.is_empty() {
            return Err(BuildError::missing("tls", "materialized certificate bundle"));
        }

        doc.tls.ca_file_path = self.ca_path.clone();
        doc.tls.client_certificate_mode = ClientCertificateMode::Optional;
        let mode = self.mode();
        for process in &mut doc.processes {
            process.args.set("net.tls.mode", mode.as_str());
            process.args.set("net.tls.CAFile", self.ca_path.as_str());
            process
                .args
                .set("net.tls.certificateKeyFile", self.certificate_key_path.as_str());
            process.args.set("net.tls.allowConnectionsWithoutCertificates", true);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use replset_topology::TopologyBuilder;

    fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn split_certificate_is_combined() {
        let pem = certificate_key_pem("cert", &entries(&[("tls.crt", "CERT\n\n"), ("tls.key", "KEY\n")])).unwrap();
        assert_eq!(pem, "CERT\nKEY");
    }

    #[test]
    fn leading_whitespace_is_part_of_the_bundle() {
        assert_eq!(combine_pem(" CERT\n", "\tKEY"), " CERT\n\tKEY");
        assert_ne!(
            HashedPem::new(combine_pem(" CERT", "KEY")).file_name(),
            HashedPem::new(combine_pem("CERT", "KEY")).file_name()
        );
    }

    #[test]
    fn combined_only_is_accepted() {
        let pem = certificate_key_pem("cert", &entries(&[("tls.pem", "CERT\nKEY")])).unwrap();
        assert_eq!(pem, "CERT\nKEY");
    }

    #[test]
    fn both_forms_must_agree() {
        let ok = entries(&[("tls.crt", "CERT"), ("tls.key", "KEY"), ("tls.pem", "CERT\nKEY")]);
        assert!(certificate_key_pem("cert", &ok).is_ok());

        let bad = entries(&[("tls.crt", "CERT"), ("tls.key", "KEY"), ("tls.pem", "OTHER")]);
        assert_eq!(
            certificate_key_pem("cert", &bad),
            Err(TlsError::InconsistentBundle { name: "cert".into() })
        );
    }

    #[test]
    fn incomplete_entries_are_rejected() {
        let err = certificate_key_pem("cert", &entries(&[("tls.crt", "CERT")])).unwrap_err();
        assert!(matches!(err, TlsError::CertificateEntriesMissing { .. }));
        assert!(ca_certificate("ca", &entries(&[("ca.crt", "")])).is_err());
        assert_eq!(ca_certificate("ca", &entries(&[("ca.crt", "CA")])), Ok("CA"));
    }

    #[test]
    fn file_name_follows_content() {
        let a = TlsMaterial::new("CA", "CERT\nKEY".into());
        let b = TlsMaterial::new("CA", "CERT2\nKEY".into());
        assert_eq!(a.ca, b.ca);
        assert_ne!(a.certificate_key_path(), b.certificate_key_path());
        assert!(a.certificate_key_path().starts_with(SERVER_MOUNT_PATH));
        assert!(a.ca_path().starts_with(CA_MOUNT_PATH));
    }

    #[test]
    fn marker_parsing() {
        assert!(is_rolled_out(&entries(&[(ROLLED_OUT_ANNOTATION, "true")])));
        assert!(!is_rolled_out(&entries(&[(ROLLED_OUT_ANNOTATION, "false")])));
        assert!(!is_rolled_out(&BTreeMap::new()));
        assert!(TlsPhase::from_flags(true, false).is_newly_enabling());
        assert!(!TlsPhase::from_flags(true, true).is_newly_enabling());
    }

    fn build(modifier: TlsModifier) -> TopologyDocument {
        TopologyBuilder::new("rs", "ns")
            .with_members(3)
            .with_mongodb_version("6.0.5")
            .with_modifier(modifier)
            .build()
            .unwrap()
    }

    #[test]
    fn no_tls_fields_until_rolled_out() {
        let material = TlsMaterial::new("CA", "CERT\nKEY".into());
        let doc = build(TlsModifier::new(TlsPhase::Pending, false, Some(&material)));
        assert!(!doc.tls_enabled());
        assert!(doc.tls.ca_file_path.is_empty());
        assert!(doc.processes.iter().all(|p| p.tls_mode().is_none()));
    }

    #[test]
    fn rolled_out_enables_tls_per_process() {
        let material = TlsMaterial::new("CA", "CERT\nKEY".into());
        let doc = build(TlsModifier::new(TlsPhase::RolledOut, true, Some(&material)));
        assert_eq!(doc.tls.ca_file_path, material.ca_path());
        for p in &doc.processes {
            assert_eq!(p.tls_mode(), Some("preferTLS"));
            assert_eq!(
                p.args.get("net.tls.allowConnectionsWithoutCertificates"),
                Some(&serde_json::json!(true))
            );
        }
        let required = build(TlsModifier::new(TlsPhase::RolledOut, false, Some(&material)));
        assert_eq!(required.processes[0].tls_mode(), Some("requireTLS"));
    }
}
