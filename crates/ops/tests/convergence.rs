#![forbid(unsafe_code)]

use std::time::Duration;

use kubeassert_apply::Resolver;
use kubeassert_core::{Error, Gvk, ResourceIdentity, RetryPolicy, TargetState};
use kubeassert_kubehub::{mock::MockCluster, DiscoveryApi};
use kubeassert_ops::{delete_resources_at_path, wait_for_condition, wait_for_selector, wait_for_state};
use serde_json::json;

fn fast(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::ZERO)
}

async fn deployment(cluster: &MockCluster) -> ResourceIdentity {
    cluster.serve_kind("apps/v1", "Deployment", "deployments", true);
    let mapping = cluster.resolve(&Gvk::from_api_version("apps/v1", "Deployment")).await.unwrap();
    ResourceIdentity { mapping, namespace: "ns".into(), name: "web".into() }
}

fn web(replicas: i64) -> serde_json::Value {
    json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web", "namespace": "ns"}, "spec": {"replicas": replicas}})
}

#[tokio::test]
async fn times_out_after_exactly_max_attempts() {
    let cluster = MockCluster::new();
    let id = deployment(&cluster).await;
    let err = wait_for_state(&fast(3), &cluster, &id, TargetState::Created).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "err={:?}", err);
    assert_eq!(cluster.count("get"), 3);
}

#[tokio::test]
async fn converges_once_the_resource_appears() {
    let cluster = MockCluster::new();
    let id = deployment(&cluster).await;
    cluster.script_get(Ok(None)).script_get(Ok(None));
    cluster.insert("deployments", "ns", web(1));
    wait_for_state(&fast(5), &cluster, &id, TargetState::Created).await.unwrap();
    assert_eq!(cluster.count("get"), 3);
}

#[tokio::test]
async fn not_found_fetch_counts_as_deleted() {
    let cluster = MockCluster::new();
    let id = deployment(&cluster).await;
    cluster.script_get(Err(Error::NotFound("gone".into())));
    wait_for_state(&fast(1), &cluster, &id, TargetState::Deleted).await.unwrap();
}

#[tokio::test]
async fn transport_errors_abort_the_wait() {
    let cluster = MockCluster::new();
    let id = deployment(&cluster).await;
    cluster.fail("get", 500, "boom");
    let err = wait_for_state(&fast(10), &cluster, &id, TargetState::Deleted).await.unwrap_err();
    assert!(matches!(err, Error::Remote { code: 500, .. }));
    assert_eq!(cluster.count("get"), 1);
}

#[tokio::test]
async fn selector_wait_matches_case_insensitively_and_fails_on_absence() {
    let cluster = MockCluster::new();
    let id = deployment(&cluster).await;
    let err = wait_for_selector(&fast(5), &cluster, &id, "spec.replicas=2").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(cluster.count("get"), 1);

    let mut doc = web(2);
    doc["status"] = json!({"phase": "Running"});
    cluster.insert("deployments", "ns", doc);
    wait_for_selector(&fast(1), &cluster, &id, "status.phase=running").await.unwrap();
    wait_for_selector(&fast(1), &cluster, &id, "spec.replicas=2").await.unwrap();
    assert!(matches!(wait_for_selector(&fast(2), &cluster, &id, "spec.replicas=5").await, Err(Error::Timeout(_))));
}

#[tokio::test]
async fn malformed_selector_makes_no_calls() {
    let cluster = MockCluster::new();
    let id = deployment(&cluster).await;
    for bad in ["spec.replicas", "a=b=c", "spec.replicas="] {
        let err = wait_for_selector(&fast(5), &cluster, &id, bad).await.unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{} gave {:?}", bad, err);
    }
    assert_eq!(cluster.count("get"), 0);
}

#[tokio::test]
async fn condition_wait_normalizes_status() {
    let cluster = MockCluster::new();
    let id = deployment(&cluster).await;
    let mut doc = web(1);
    doc["status"] = json!({"conditions": [{"type": "Available", "status": "True"}]});
    cluster.script_get(Ok(Some(web(1))));
    cluster.insert("deployments", "ns", doc);
    wait_for_condition(&fast(3), &cluster, &id, "Available", "TRUE").await.unwrap();
    assert_eq!(cluster.count("get"), 2);
    let err = wait_for_condition(&fast(2), &cluster, &id, "Progressing", "true").await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
}

#[tokio::test]
async fn bulk_delete_submits_everything_then_waits() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.yaml"), "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  namespace: ns\n").unwrap();
    std::fs::write(
        dir.path().join("b.yaml"),
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n  namespace: ns\n---\napiVersion: v1\nkind: Namespace\nmetadata:\n  name: ns\n",
    )
    .unwrap();

    let cluster = MockCluster::new();
    cluster.serve_kind("v1", "ConfigMap", "configmaps", true).serve_kind("v1", "Namespace", "namespaces", false);
    cluster.insert("configmaps", "ns", json!({"metadata": {"name": "a"}}));
    cluster.insert("namespaces", "", json!({"metadata": {"name": "ns"}}));

    let resolver = Resolver::new(&cluster, None);
    delete_resources_at_path(&fast(2), &cluster, &resolver, dir.path()).await.unwrap();

    assert!(cluster.keys().is_empty());
    let calls = cluster.calls();
    let deletes: Vec<_> = calls.iter().filter(|c| c.starts_with("delete")).cloned().collect();
    assert_eq!(deletes, vec!["delete configmaps ns/a", "delete configmaps ns/b", "delete namespaces /ns"]);
    let first_get = calls.iter().position(|c| c.starts_with("get")).unwrap();
    let last_delete = calls.iter().rposition(|c| c.starts_with("delete")).unwrap();
    assert!(last_delete < first_get);
    assert_eq!(cluster.count("get"), 3);
}

#[tokio::test]
async fn bulk_delete_stops_at_the_first_rejected_deletion() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.yaml"), "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  namespace: ns\n").unwrap();
    std::fs::write(dir.path().join("b.yaml"), "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n  namespace: ns\n").unwrap();

    let cluster = MockCluster::new();
    cluster.serve_kind("v1", "ConfigMap", "configmaps", true);
    cluster.fail("delete", 403, "forbidden");

    let resolver = Resolver::new(&cluster, None);
    let err = delete_resources_at_path(&fast(3), &cluster, &resolver, dir.path()).await.unwrap_err();
    assert!(matches!(err, Error::Remote { code: 403, .. }), "err={:?}", err);
    assert_eq!(cluster.count("delete"), 1);
    assert_eq!(cluster.count("get"), 0);
}

#[tokio::test]
async fn bulk_delete_on_missing_directory_is_not_found() {
    let cluster = MockCluster::new();
    let resolver = Resolver::new(&cluster, None);
    let err = delete_resources_at_path(&fast(1), &cluster, &resolver, std::path::Path::new("/nonexistent/kubeassert")).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(cluster.calls().is_empty());
}
