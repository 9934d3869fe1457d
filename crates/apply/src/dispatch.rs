//! Create/update/delete dispatch through the dynamic client.

use std::time::Instant;

use kubeassert_core::{doc, expects_failure, Error, Operation, ResolvedResource, Result};
use kubeassert_kubehub::DynamicApi;
use metrics::{counter, histogram};
use serde_json::Value as Json;
use tracing::{debug, info};

/// Namespace an operation targets: a non-empty override wins over the embedded one.
pub fn effective_namespace<'a>(ns_override: &'a str, resource: &'a ResolvedResource) -> &'a str {
    if ns_override.is_empty() { resource.namespace() } else { ns_override }
}

/// Document as submitted: the override is written into `metadata.namespace` for namespaced kinds.
fn outgoing_document(ns_override: &str, resource: &ResolvedResource) -> Result<Json> {
    let mut document = resource.document.clone();
    if !ns_override.is_empty() && resource.mapping.namespaced {
        doc::set_namespace(&mut document, ns_override)?;
    }
    Ok(document)
}

/// Apply `operation` to one resource.
///
/// Create is idempotent against an existing resource and delete against an absent one;
/// update requires the resource to exist.
pub async fn apply(dynamic: &dyn DynamicApi, operation: Operation, ns_override: &str, resource: &ResolvedResource) -> Result<()> {
    let t0 = Instant::now();
    let res = apply_inner(dynamic, operation, ns_override, resource).await;
    histogram!("dispatch_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => operation.as_str());
    match &res {
        Ok(_) => { counter!("dispatch_ok", 1u64, "op" => operation.as_str()); }
        Err(_) => { counter!("dispatch_err", 1u64, "op" => operation.as_str()); }
    }
    res
}

async fn apply_inner(dynamic: &dyn DynamicApi, operation: Operation, ns_override: &str, resource: &ResolvedResource) -> Result<()> {
    let mapping = &resource.mapping;
    let (kind, name) = (resource.kind(), resource.name());
    let ns = effective_namespace(ns_override, resource);

    match operation {
        Operation::Create => match dynamic.create(mapping, ns, &outgoing_document(ns_override, resource)?).await {
            Ok(_) => info!(kind, name, ns, state = "created", "resource has been created"),
            Err(e) if e.is_already_exists() => {
                counter!("dispatch_noop", 1u64, "op" => "create");
                debug!(kind, name, ns, state = "exists", "resource already created");
            }
            Err(e) => return Err(e),
        },
        Operation::Update => {
            let live = dynamic
                .get(mapping, ns, name)
                .await?
                .ok_or_else(|| Error::NotFound(format!("{} {}/{} cannot be updated: not found", kind, ns, name)))?;
            let mut document = outgoing_document(ns_override, resource)?;
            if let Some(rv) = doc::resource_version(&live) {
                doc::set_resource_version(&mut document, rv)?;
            }
            dynamic.replace(mapping, ns, &document).await?;
            info!(kind, name, ns, state = "updated", "resource has been updated");
        }
        Operation::Delete => match dynamic.delete(mapping, ns, name).await {
            Ok(()) => info!(kind, name, ns, state = "deleted", "resource has been deleted"),
            Err(e) if e.is_not_found() => {
                counter!("dispatch_noop", 1u64, "op" => "delete");
                debug!(kind, name, ns, state = "absent", "resource already deleted");
            }
            Err(e) => return Err(e),
        },
    }
    Ok(())
}

/// Apply `operation` to each resource in order; stops at the first error.
pub async fn apply_many(dynamic: &dyn DynamicApi, operation: Operation, ns_override: &str, resources: &[ResolvedResource]) -> Result<()> {
    for resource in resources {
        apply(dynamic, operation, ns_override, resource).await?;
    }
    Ok(())
}

/// Compare an operation outcome with the expected result token (`fail` expects an error).
pub fn check_result(operation: &str, target: &str, expected_result: &str, outcome: Result<()>) -> Result<()> {
    match (expects_failure(expected_result), outcome) {
        (false, Err(e)) => Err(Error::UnexpectedResult(format!("unexpected error when '{}' '{}': '{}'", operation, target, e))),
        (true, Ok(())) => Err(Error::UnexpectedResult(format!("expected error when '{}' '{}', but received none", operation, target))),
        (true, Err(e)) => {
            debug!(operation, target, error = %e, "operation failed as expected");
            Ok(())
        }
        (false, Ok(())) => Ok(()),
    }
}

/// Set a dotted field on the live resource and submit it back.
///
/// Values that parse as integers are stored as numbers, anything else as a string.
pub async fn update_field(dynamic: &dyn DynamicApi, resource: &ResolvedResource, key: &str, value: &str) -> Result<()> {
    let path = doc::split_path(key);
    if path.is_empty() {
        return Err(Error::Format(format!("empty field key '{}'", key)));
    }
    let (kind, name, ns) = (resource.kind(), resource.name(), resource.namespace());
    let mut live = dynamic
        .get(&resource.mapping, ns, name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("{} {}/{} cannot be updated: not found", kind, ns, name)))?;
    let new_value = match value.parse::<i64>() {
        Ok(n) => Json::from(n),
        Err(_) => Json::String(value.to_string()),
    };
    doc::set_path(&mut live, &path, new_value)?;
    dynamic.replace(&resource.mapping, ns, &live).await?;
    info!(kind, name, ns, field = %key, value, "resource field has been updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeassert_core::ResourceMapping;
    use serde_json::json;

    fn resource(namespaced: bool, doc: Json) -> ResolvedResource {
        ResolvedResource {
            mapping: ResourceMapping { group: String::new(), version: "v1".into(), kind: "ConfigMap".into(), plural: "configmaps".into(), namespaced },
            document: doc,
        }
    }

    #[test]
    fn override_wins_over_embedded_namespace() {
        let r = resource(true, json!({"metadata": {"name": "cm", "namespace": "embedded"}}));
        assert_eq!(effective_namespace("", &r), "embedded");
        assert_eq!(effective_namespace("other", &r), "other");
        let out = outgoing_document("other", &r).unwrap();
        assert_eq!(out["metadata"]["namespace"], "other");
        let untouched = outgoing_document("", &r).unwrap();
        assert_eq!(untouched, r.document);
    }

    #[test]
    fn cluster_scoped_documents_are_not_stamped() {
        let r = resource(false, json!({"metadata": {"name": "crb"}}));
        let out = outgoing_document("ns", &r).unwrap();
        assert!(out["metadata"].get("namespace").is_none());
    }

    #[test]
    fn check_result_matrix() {
        assert!(check_result("create", "f.yaml", "succeed", Ok(())).is_ok());
        assert!(check_result("create", "f.yaml", "FAIL", Err(Error::Remote { code: 403, message: "denied".into() })).is_ok());
        let e = check_result("create", "f.yaml", "fail", Ok(())).unwrap_err();
        assert!(matches!(e, Error::UnexpectedResult(ref m) if m.contains("but received none")));
        let e = check_result("create", "f.yaml", "", Err(Error::Remote { code: 403, message: "denied".into() })).unwrap_err();
        assert!(matches!(e, Error::UnexpectedResult(ref m) if m.contains("denied")));
    }
}
