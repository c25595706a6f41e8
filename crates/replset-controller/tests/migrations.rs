//! Scaling, TLS and port changes on a running replica set

use pretty_assertions::assert_eq;
use replset_controller::tls::CA_VOLUME_NAME;
use replset_controller::topology::read_live;
use replset_controller::{ObjectKey, Phase};
use replset_rollout::tls::CA_MOUNT_PATH;
use replset_rollout::ROLLED_OUT_ANNOTATION;
use replset_statemachine::Requeue;
use replset_test_utils::fixtures::{enable_tls, replica_set, tls_objects, NAMESPACE};
use replset_test_utils::{converge, harness, seed, ClusterSimulator, MemoryCluster};
use replset_topology::TopologyDocument;
use serde_json::json;
use std::collections::BTreeSet;

fn object(name: &str) -> ObjectKey {
    ObjectKey::new(NAMESPACE, name)
}

async fn live(cluster: &MemoryCluster, key: &ObjectKey) -> TopologyDocument {
    read_live(cluster, &cluster.replica_set(key))
        .await
        .unwrap()
        .expect("document persisted")
}

fn ports(doc: &TopologyDocument) -> Vec<u16> {
    doc.processes.iter().map(|p| p.port()).collect()
}

fn members_replicas(cluster: &MemoryCluster) -> u32 {
    cluster.stateful_sets.get_sync(&object("rs")).unwrap().spec.replicas
}

#[tokio::test]
async fn scaling_up_moves_one_member_per_attempt() {
    let (cluster, sim, reconciler) = harness();
    let key = seed(&cluster, &replica_set("rs", 3));
    converge(&reconciler, &sim, &key, 20).await.unwrap();

    cluster.replica_sets.modify(&key, |rs| rs.spec.members = 5);

    let mut replicas = vec![members_replicas(&cluster)];
    let mut documents = vec![(1, 3)];
    for _ in 0..40 {
        let requeue = reconciler.reconcile(&key).await.unwrap();
        sim.tick();

        let current = members_replicas(&cluster);
        if replicas.last() != Some(&current) {
            replicas.push(current);
        }
        let doc = live(&cluster, &key).await;
        if documents.last().map(|(v, _)| *v) != Some(doc.version) {
            documents.push((doc.version, doc.data_member_count()));
        }
        if requeue == Requeue::Never {
            break;
        }
    }

    assert_eq!(replicas, vec![3, 4, 5]);
    assert_eq!(documents, vec![(1, 3), (2, 4), (3, 5)]);
    let rs = cluster.replica_set(&key);
    assert_eq!(rs.status.phase, Some(Phase::Running));
    assert_eq!(rs.status.current_mongodb_members, 5);
}

#[tokio::test]
async fn scaling_waits_for_pods() {
    let (cluster, sim, reconciler) = harness();
    let key = seed(&cluster, &replica_set("rs", 3));
    converge(&reconciler, &sim, &key, 20).await.unwrap();

    cluster.replica_sets.modify(&key, |rs| rs.spec.members = 5);
    sim.pause_kubelet(true);

    let mut last = Requeue::Immediate;
    for _ in 0..6 {
        last = reconciler.reconcile(&key).await.unwrap();
        sim.tick();
    }

    assert!(matches!(last, Requeue::After(_)), "{last:?}");
    assert_eq!(members_replicas(&cluster), 4);
    let rs = cluster.replica_set(&key);
    assert_eq!(rs.status.current_mongodb_members, 3);
    assert_eq!(rs.status.phase, Some(Phase::Pending));
    assert_eq!(live(&cluster, &key).await.version, 1);

    sim.pause_kubelet(false);
    converge(&reconciler, &sim, &key, 40).await.unwrap();
    assert_eq!(cluster.replica_set(&key).status.current_mongodb_members, 5);
}

async fn run_until(
    reconciler: &replset_controller::Reconciler,
    sim: &ClusterSimulator,
    cluster: &MemoryCluster,
    key: &ObjectKey,
    done: impl Fn(&MemoryCluster) -> bool,
) {
    for _ in 0..20 {
        reconciler.reconcile(key).await.unwrap();
        sim.tick();
        if done(cluster) {
            return;
        }
    }
    panic!("condition never held");
}

#[tokio::test]
async fn tls_is_mounted_before_it_is_required() {
    let (cluster, sim, reconciler) = harness();
    let key = seed(&cluster, &replica_set("rs", 3));
    converge(&reconciler, &sim, &key, 20).await.unwrap();

    let (secret, ca) = tls_objects();
    cluster.secrets.put(secret);
    cluster.config_maps.put(ca);
    cluster.replica_sets.modify(&key, enable_tls);

    run_until(&reconciler, &sim, &cluster, &key, |c| {
        c.replica_set(&key).meta.annotation(ROLLED_OUT_ANNOTATION) == Some("true")
    })
    .await;

    // pods carry the certificates while the processes do not use them yet
    assert!(!live(&cluster, &key).await.tls_enabled());
    let sts = cluster.stateful_sets.get_sync(&object("rs")).unwrap();
    assert!(sts.spec.template.volume(CA_VOLUME_NAME).is_some());

    converge(&reconciler, &sim, &key, 20).await.unwrap();

    let doc = live(&cluster, &key).await;
    assert!(doc.tls_enabled());
    assert!(doc.tls.ca_file_path.starts_with(CA_MOUNT_PATH), "{}", doc.tls.ca_file_path);
    for process in &doc.processes {
        assert_eq!(process.tls_mode(), Some("requireTLS"), "{}", process.name);
    }
    assert_eq!(cluster.replica_set(&key).status.phase, Some(Phase::Running));
}

#[tokio::test]
async fn port_change_flips_one_process_at_a_time() {
    let (cluster, sim, reconciler) = harness();
    let mut rs = replica_set("rs", 3);
    rs.spec.arbiters = 1;
    let key = seed(&cluster, &rs);
    converge(&reconciler, &sim, &key, 20).await.unwrap();
    assert_eq!(ports(&live(&cluster, &key).await), vec![27017; 4]);

    cluster
        .replica_sets
        .modify(&key, |rs| rs.spec.additional_mongod_config = json!({"net": {"port": 40333}}));

    let mut previous = live(&cluster, &key).await;
    let mut flipped = Vec::new();
    for _ in 0..40 {
        let requeue = reconciler.reconcile(&key).await.unwrap();

        let doc = live(&cluster, &key).await;
        if doc.version != previous.version {
            let changed: Vec<&str> = doc
                .processes
                .iter()
                .zip(&previous.processes)
                .filter(|(now, before)| now.port() != before.port())
                .map(|(now, _)| now.name.as_str())
                .collect();
            assert_eq!(changed.len(), 1, "v{} changed {changed:?}", doc.version);
            flipped.push(changed[0].to_string());
        }
        let distinct: BTreeSet<u16> = ports(&doc).into_iter().collect();
        if distinct.len() > 1 {
            let svc = cluster.services.get_sync(&object("rs-svc")).unwrap();
            assert_eq!(svc.spec.ports.len(), 2, "mixed document v{}", doc.version);
        }
        previous = doc;

        sim.tick();
        if requeue == Requeue::Never {
            break;
        }
    }

    assert_eq!(flipped, vec!["rs-0", "rs-1", "rs-2", "rs-arb-0"]);
    assert_eq!(ports(&previous), vec![40333; 4]);
    let svc = cluster.services.get_sync(&object("rs-svc")).unwrap();
    assert_eq!(svc.port_numbers(), vec![40333]);
    assert_eq!(svc.spec.ports[0].name, "mongodb");
    assert_eq!(cluster.replica_set(&key).status.phase, Some(Phase::Running));
}
