//! Agent metrics endpoint

use crate::error::ReconcileError;
use crate::objects::{PortSpec, Volume, VolumeMount};
use crate::resource::ReplicaSet;
use crate::store::{create_or_update, Cluster};
use crate::tls::{hashed_secret, read_certificate_key};
use crate::users::read_secret_entry;
use replset_rollout::HashedPem;
use replset_topology::modifiers::MetricsModifier;
use replset_topology::{BuildError, Prometheus};
use tracing::Span;

/// Service port name of the metrics endpoint
pub const PROMETHEUS_PORT_NAME: &str = "prometheus";

/// Where the hashed endpoint bundle is mounted
pub const PROMETHEUS_MOUNT_PATH: &str = "/var/lib/mongodb-mms-automation/secrets/prometheus/";

pub const PROMETHEUS_VOLUME_NAME: &str = "prom-tls";

/// Modifier enabling the endpoint, `None` when metrics are not requested
///
/// A missing password yields a modifier that fails with a retryable build
/// error, so the document is not touched until the secret shows up.
///
/// # Errors
/// Store failures, or a retryable [`BuildError`] when the endpoint
/// certificate is not usable yet
pub async fn modifier(
    cluster: &dyn Cluster,
    resource: &ReplicaSet,
    span: &Span,
) -> Result<Option<MetricsModifier>, ReconcileError> {
    let Some(spec) = &resource.spec.prometheus else {
        return Ok(None);
    };
    let password = read_secret_entry(cluster, resource.namespace(), &spec.password_secret_ref)
        .await?
        .unwrap_or_default();

    let mut prometheus = Prometheus {
        enabled: true,
        username: spec.username.clone(),
        password,
        scheme: "http".to_string(),
        tls_pem_path: String::new(),
        listen_address: format!("0.0.0.0:{}", spec.port_or_default()),
        metrics_path: spec.metrics_path_or_default().to_string(),
    };

    if let Some(name) = spec.tls_secret_ref.as_deref() {
        let pem = read_certificate_key(cluster, resource, name)
            .await?
            .map_err(|e| BuildError::missing("metrics", e.to_string()))?;
        let pem = HashedPem::new(pem);
        create_or_update(
            cluster.secrets(),
            hashed_secret(resource, resource.prometheus_operator_secret_name(), &pem),
        )
        .await?;
        prometheus.scheme = "https".to_string();
        prometheus.tls_pem_path = pem.path_under(PROMETHEUS_MOUNT_PATH);
        tracing::debug!(parent: span, path = %prometheus.tls_pem_path, "metrics endpoint served over https");
    }

    Ok(Some(MetricsModifier(prometheus)))
}

/// Extra service port when metrics are requested
#[must_use]
pub fn service_port(resource: &ReplicaSet) -> Option<PortSpec> {
    resource.spec.prometheus.as_ref().map(|p| PortSpec {
        name: PROMETHEUS_PORT_NAME.to_string(),
        port: p.port_or_default(),
    })
}

/// Volume and mount for the endpoint bundle when https is requested
#[must_use]
pub fn volume(resource: &ReplicaSet) -> Option<(Volume, VolumeMount)> {
    resource.spec.prometheus.as_ref()?.tls_secret_ref.as_ref()?;
    Some((
        Volume::secret(PROMETHEUS_VOLUME_NAME, resource.prometheus_operator_secret_name(), Some(416)),
        VolumeMount::new(PROMETHEUS_VOLUME_NAME, PROMETHEUS_MOUNT_PATH.trim_end_matches('/')).read_only(),
    ))
}
