//! TLS inputs and operator-owned certificate objects
//!
//! Reads the user supplied CA and certificate/key objects, validates them with
//! the rollout coordinator and copies the bundles into operator-owned secrets
//! whose entries are named by content hash. Those secrets are what the pods
//! mount.

use crate::error::StoreError;
use crate::objects::{Secret, Volume, VolumeMount};
use crate::resource::ReplicaSet;
use crate::store::{create_or_update, get_optional, Cluster};
use replset_rollout::tls::{ca_certificate, certificate_key_pem, CA_MOUNT_PATH, SERVER_MOUNT_PATH};
use replset_rollout::{HashedPem, TlsError, TlsMaterial};
use tracing::Span;

/// Volume carrying the hashed CA bundle
pub const CA_VOLUME_NAME: &str = "tls-ca";

/// Volume carrying the hashed certificate/key bundle
pub const SERVER_VOLUME_NAME: &str = "tls-secret";

/// `0640`
const TLS_FILE_MODE: u32 = 416;

async fn read_ca(cluster: &dyn Cluster, resource: &ReplicaSet) -> Result<Result<String, TlsError>, StoreError> {
    let tls = &resource.spec.security.tls;
    if let Some(name) = tls.ca_certificate_secret.as_deref().filter(|n| !n.is_empty()) {
        let Some(secret) = get_optional(cluster.secrets(), &resource.key_of(name)).await? else {
            return Ok(Err(TlsError::CaNotFound(name.to_string())));
        };
        return Ok(ca_certificate(name, &secret.data).map(str::to_string));
    }
    if let Some(name) = tls.ca_config_map.as_deref().filter(|n| !n.is_empty()) {
        let Some(config_map) = get_optional(cluster.config_maps(), &resource.key_of(name)).await? else {
            return Ok(Err(TlsError::CaNotFound(name.to_string())));
        };
        return Ok(ca_certificate(name, &config_map.data).map(str::to_string));
    }
    Ok(Err(TlsError::CaNotFound(String::new())))
}

/// Combined PEM of the certificate/key secret `name`
///
/// # Errors
/// Store failures; problems with the secret itself are the inner error
pub async fn read_certificate_key(
    cluster: &dyn Cluster,
    resource: &ReplicaSet,
    name: &str,
) -> Result<Result<String, TlsError>, StoreError> {
    let Some(secret) = get_optional(cluster.secrets(), &resource.key_of(name)).await? else {
        return Ok(Err(TlsError::CertificateNotFound(name.to_string())));
    };
    Ok(certificate_key_pem(name, &secret.data))
}

/// Validated CA and certificate/key of a resource
///
/// The outer error is a store failure; the inner one means the user
/// supplied objects are missing or incomplete and the caller should wait.
///
/// # Errors
/// Store failures
pub async fn read_material(
    cluster: &dyn Cluster,
    resource: &ReplicaSet,
) -> Result<Result<TlsMaterial, TlsError>, StoreError> {
    let ca = match read_ca(cluster, resource).await? {
        Ok(ca) => ca,
        Err(e) => return Ok(Err(e)),
    };
    let name = resource
        .spec
        .security
        .tls
        .certificate_key_secret
        .clone()
        .unwrap_or_default();
    let pem = match read_certificate_key(cluster, resource, &name).await? {
        Ok(pem) => pem,
        Err(e) => return Ok(Err(e)),
    };
    Ok(Ok(TlsMaterial::new(&ca, pem)))
}

/// Operator-owned secret holding one hashed bundle
#[must_use]
pub fn hashed_secret(resource: &ReplicaSet, name: String, pem: &HashedPem) -> Secret {
    Secret::new(resource.owned_meta(name)).with_entry(pem.file_name(), pem.contents())
}

/// Write the hashed CA and certificate/key secrets
///
/// Older hashed entries are dropped, so the mounted directory only ever
/// holds the current bundle.
///
/// # Errors
/// Store failures
pub async fn ensure_operator_secrets(
    cluster: &dyn Cluster,
    resource: &ReplicaSet,
    material: &TlsMaterial,
    span: &Span,
) -> Result<(), StoreError> {
    create_or_update(
        cluster.secrets(),
        hashed_secret(resource, resource.tls_ca_operator_secret_name(), &material.ca),
    )
    .await?;
    create_or_update(
        cluster.secrets(),
        hashed_secret(resource, resource.tls_operator_secret_name(), &material.certificate_key),
    )
    .await?;
    tracing::debug!(
        parent: span,
        ca = material.ca.file_name(),
        certificate = material.certificate_key.file_name(),
        "operator TLS secrets in place"
    );
    Ok(())
}

/// Volumes the pods need when TLS is requested
#[must_use]
pub fn volumes(resource: &ReplicaSet) -> Vec<Volume> {
    vec![
        Volume::secret(CA_VOLUME_NAME, resource.tls_ca_operator_secret_name(), Some(TLS_FILE_MODE)),
        Volume::secret(SERVER_VOLUME_NAME, resource.tls_operator_secret_name(), Some(TLS_FILE_MODE)),
    ]
}

/// Mounts matching [`volumes`]
#[must_use]
pub fn volume_mounts() -> Vec<VolumeMount> {
    vec![
        VolumeMount::new(CA_VOLUME_NAME, CA_MOUNT_PATH.trim_end_matches('/')).read_only(),
        VolumeMount::new(SERVER_VOLUME_NAME, SERVER_MOUNT_PATH.trim_end_matches('/')).read_only(),
    ]
}
