//! Runtime object construction
//!
//! Builds the desired service and pod groups from the resource. Nothing is
//! written here; callers hand the result to [`crate::store::create_or_update`].

use crate::config::OperatorConfig;
use crate::metrics;
use crate::objects::{
    Container, EnvVar, PodTemplate, PortSpec, Service, ServiceSpec, StatefulSet, StatefulSetSpec, StatefulSetStatus,
    UpdateStrategy, Volume, VolumeClaim, VolumeMount, VolumeSource,
};
use crate::resource::ReplicaSet;
use crate::tls;
use crate::topology::TOPOLOGY_DOCUMENT_KEY;
use crate::users::KEYFILE_PATH;
use replset_rollout::ServicePort;
use std::collections::BTreeMap;

pub const AGENT_CONTAINER_NAME: &str = "mongodb-agent";
pub const MONGOD_CONTAINER_NAME: &str = "mongod";
pub const VERSION_UPGRADE_HOOK_NAME: &str = "mongod-posthook";
pub const READINESS_PROBE_NAME: &str = "mongodb-agent-readinessprobe";

pub const DATA_VOLUME_NAME: &str = "data-volume";
pub const LOGS_VOLUME_NAME: &str = "logs-volume";
pub const HEALTH_STATUS_VOLUME_NAME: &str = "healthstatus";
pub const HOOKS_VOLUME_NAME: &str = "hooks";
pub const SCRIPTS_VOLUME_NAME: &str = "agent-scripts";
pub const TOPOLOGY_VOLUME_NAME: &str = "automation-config";
pub const KEYFILE_VOLUME_NAME: &str = "keyfile";

const DATA_PATH: &str = "/data";
const LOGS_PATH: &str = "/var/log/mongodb-mms-automation";
const HEALTH_STATUS_PATH: &str = "/var/log/mongodb-mms-automation/healthstatus";
const HOOKS_PATH: &str = "/hooks";
const SCRIPTS_PATH: &str = "/opt/scripts";
const TOPOLOGY_PATH: &str = "/var/lib/automation/config";
const SERVICE_ACCOUNT: &str = "mongodb-database";

/// Selector shared by the service and both pod groups
#[must_use]
pub fn labels(resource: &ReplicaSet) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), resource.service_name())])
}

/// Headless service exposing `ports` plus the metrics port when requested
#[must_use]
pub fn service(resource: &ReplicaSet, ports: &[ServicePort]) -> Service {
    let mut specs: Vec<PortSpec> = ports
        .iter()
        .map(|p| PortSpec {
            name: p.name.clone(),
            port: p.port,
        })
        .collect();
    specs.extend(metrics::service_port(resource));
    Service {
        meta: resource.owned_meta(resource.service_name()).with_labels(labels(resource)),
        spec: ServiceSpec {
            cluster_ip: None,
            ports: specs,
            selector: labels(resource),
            publish_not_ready_addresses: true,
        },
    }
}

fn agent_container(resource: &ReplicaSet, config: &OperatorConfig, mounts: &[VolumeMount]) -> Container {
    let command = format!(
        "agent/mongodb-agent -healthCheckFilePath={HEALTH_STATUS_PATH}/agent-health-status.json \
         -serveStatusPort=5000 -cluster={TOPOLOGY_PATH}/{TOPOLOGY_DOCUMENT_KEY} -skipMongoStart \
         -noDaemonize -useLocalMongoDbTools -logFile {} -logLevel {}",
        config.agent_log_file, config.agent_log_level
    );
    Container {
        command: vec!["/bin/bash".into(), "-c".into(), command],
        env: vec![
            EnvVar::new("AGENT_STATUS_FILEPATH", format!("{HEALTH_STATUS_PATH}/agent-health-status.json")),
            EnvVar::new("AUTOMATION_CONFIG_MAP", resource.topology_secret_name()),
            EnvVar::new("HEADLESS_AGENT", "true"),
            EnvVar::new("POD_NAMESPACE", resource.namespace()),
        ],
        volume_mounts: mounts.to_vec(),
        ..Container::new(AGENT_CONTAINER_NAME, &config.agent_image)
    }
}

fn mongod_container(resource: &ReplicaSet, config: &OperatorConfig, mounts: &[VolumeMount]) -> Container {
    let command = format!(
        "while [ ! -f {DATA_PATH}/automation-mongod.conf ]; do sleep 3 ; done ; sleep 2 ; \
         exec mongod -f {DATA_PATH}/automation-mongod.conf"
    );
    Container {
        command: vec!["/bin/sh".into(), "-c".into(), command],
        env: vec![EnvVar::new("AGENT_HEALTH_STATUS_FILEPATH", format!("{HEALTH_STATUS_PATH}/agent-health-status.json"))],
        volume_mounts: mounts.to_vec(),
        resources: resource.spec.resources.clone().unwrap_or_default(),
        ..Container::new(MONGOD_CONTAINER_NAME, config.mongodb_image_for(&resource.spec.version))
    }
}

fn init_containers(config: &OperatorConfig) -> Vec<Container> {
    vec![
        Container {
            command: vec!["cp".into(), "version-upgrade-hook".into(), format!("{HOOKS_PATH}/version-upgrade")],
            volume_mounts: vec![VolumeMount::new(HOOKS_VOLUME_NAME, HOOKS_PATH)],
            ..Container::new(VERSION_UPGRADE_HOOK_NAME, &config.version_upgrade_hook_image)
        },
        Container {
            command: vec!["cp".into(), "/probes/readinessprobe".into(), format!("{SCRIPTS_PATH}/readinessprobe")],
            volume_mounts: vec![VolumeMount::new(SCRIPTS_VOLUME_NAME, SCRIPTS_PATH)],
            ..Container::new(READINESS_PROBE_NAME, &config.readiness_probe_image)
        },
    ]
}

/// Volumes and the mounts shared by both main containers
fn volumes(resource: &ReplicaSet) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut volumes = vec![
        Volume {
            name: DATA_VOLUME_NAME.into(),
            source: VolumeSource::Claim,
        },
        Volume {
            name: LOGS_VOLUME_NAME.into(),
            source: VolumeSource::Claim,
        },
        Volume::empty_dir(HEALTH_STATUS_VOLUME_NAME),
        Volume::empty_dir(HOOKS_VOLUME_NAME),
        Volume::empty_dir(SCRIPTS_VOLUME_NAME),
        Volume::secret(TOPOLOGY_VOLUME_NAME, resource.topology_secret_name(), None),
        Volume::secret(KEYFILE_VOLUME_NAME, resource.keyfile_secret_name(), Some(384)),
    ];
    let keyfile_dir = KEYFILE_PATH.rsplit_once('/').map_or(KEYFILE_PATH, |(dir, _)| dir);
    let mut mounts = vec![
        VolumeMount::new(DATA_VOLUME_NAME, DATA_PATH),
        VolumeMount::new(LOGS_VOLUME_NAME, LOGS_PATH),
        VolumeMount::new(HEALTH_STATUS_VOLUME_NAME, HEALTH_STATUS_PATH),
        VolumeMount::new(HOOKS_VOLUME_NAME, HOOKS_PATH),
        VolumeMount::new(SCRIPTS_VOLUME_NAME, SCRIPTS_PATH),
        VolumeMount::new(TOPOLOGY_VOLUME_NAME, TOPOLOGY_PATH).read_only(),
        VolumeMount::new(KEYFILE_VOLUME_NAME, keyfile_dir),
    ];
    if resource.spec.security.tls.enabled {
        volumes.extend(tls::volumes(resource));
        mounts.extend(tls::volume_mounts());
    }
    if let Some((volume, mount)) = metrics::volume(resource) {
        volumes.push(volume);
        mounts.push(mount);
    }
    (volumes, mounts)
}

/// `OnDelete` while the database version changes, so the agent drives it
#[must_use]
pub fn update_strategy(resource: &ReplicaSet) -> UpdateStrategy {
    if resource.is_changing_version() {
        UpdateStrategy::OnDelete
    } else {
        UpdateStrategy::RollingUpdate
    }
}

fn pod_group(resource: &ReplicaSet, config: &OperatorConfig, name: String, replicas: u32) -> StatefulSet {
    let (volumes, mounts) = volumes(resource);
    StatefulSet {
        meta: resource.owned_meta(name).with_labels(labels(resource)),
        spec: StatefulSetSpec {
            replicas,
            service_name: resource.service_name(),
            selector: labels(resource),
            update_strategy: update_strategy(resource),
            template: PodTemplate {
                labels: labels(resource),
                service_account_name: SERVICE_ACCOUNT.to_string(),
                containers: vec![
                    agent_container(resource, config, &mounts),
                    mongod_container(resource, config, &mounts),
                ],
                init_containers: init_containers(config),
                volumes,
            },
            volume_claim_templates: vec![
                VolumeClaim {
                    name: DATA_VOLUME_NAME.into(),
                    storage: "10G".into(),
                },
                VolumeClaim {
                    name: LOGS_VOLUME_NAME.into(),
                    storage: "2G".into(),
                },
            ],
        },
        status: StatefulSetStatus::default(),
    }
}

/// Pod group of the data-bearing members
#[must_use]
pub fn members_stateful_set(resource: &ReplicaSet, config: &OperatorConfig, replicas: u32) -> StatefulSet {
    pod_group(resource, config, resource.stateful_set_name(), replicas)
}

/// Pod group of the arbiters
#[must_use]
pub fn arbiters_stateful_set(resource: &ReplicaSet, config: &OperatorConfig, replicas: u32) -> StatefulSet {
    pod_group(resource, config, resource.arbiters_stateful_set_name(), replicas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ReplicaSetSpec, LAST_VERSION_ANNOTATION};
    use pretty_assertions::assert_eq;

    fn resource() -> ReplicaSet {
        ReplicaSet::new(
            "ns",
            "rs",
            ReplicaSetSpec {
                members: 3,
                version: "6.0.5".into(),
                ..ReplicaSetSpec::default()
            },
        )
    }

    #[test]
    fn service_is_headless_and_selects_pods() {
        let svc = service(&resource(), &[ServicePort::new("mongodb", 27017)]);
        assert_eq!(svc.meta.name, "rs-svc");
        assert_eq!(svc.spec.cluster_ip, None);
        assert!(svc.spec.publish_not_ready_addresses);
        assert_eq!(svc.spec.selector["app"], "rs-svc");
        assert_eq!(svc.port_numbers(), vec![27017]);
    }

    #[test]
    fn pod_group_layout() {
        let config = OperatorConfig::default();
        let sts = members_stateful_set(&resource(), &config, 3);
        assert_eq!(sts.meta.name, "rs");
        assert_eq!(sts.spec.replicas, 3);
        assert_eq!(sts.spec.service_name, "rs-svc");
        let template = &sts.spec.template;
        let names: Vec<_> = template.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["mongodb-agent", "mongod"]);
        let init: Vec<_> = template.init_containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(init, vec!["mongod-posthook", "mongodb-agent-readinessprobe"]);
        assert_eq!(
            template.container("mongod").unwrap().image,
            "docker.io/mongodb/mongodb-community-server:6.0.5"
        );
        assert!(template.volume(TOPOLOGY_VOLUME_NAME).is_some());
        assert!(template.volume(tls::CA_VOLUME_NAME).is_none());
        assert_eq!(arbiters_stateful_set(&resource(), &config, 1).meta.name, "rs-arb");
    }

    #[test]
    fn tls_adds_mounts_to_both_containers() {
        let mut rs = resource();
        rs.spec.security.tls.enabled = true;
        let sts = members_stateful_set(&rs, &OperatorConfig::default(), 3);
        for container in &sts.spec.template.containers {
            assert!(container.mount(tls::CA_VOLUME_NAME).is_some());
            assert!(container.mount(tls::SERVER_VOLUME_NAME).is_some());
        }
    }

    #[test]
    fn version_change_uses_on_delete() {
        let mut rs = resource();
        assert_eq!(update_strategy(&rs), UpdateStrategy::RollingUpdate);
        rs.meta
            .annotations
            .insert(LAST_VERSION_ANNOTATION.into(), "5.0.15".into());
        assert_eq!(update_strategy(&rs), UpdateStrategy::OnDelete);
    }
}
