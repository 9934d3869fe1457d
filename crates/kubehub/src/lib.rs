//! kubeassert kubehub – discovery, dynamic client and cluster connection wiring.
//!
//! The three remote capabilities are traits so that resolution, dispatch and polling
//! stay independent of a live API server. `Kube*` types are the kube-rs backed
//! implementations; `connect` builds all three from a kubeconfig.

#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use kube::{
    api::{Api, DeleteParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, DynamicObject, ErrorResponse},
    discovery::{Discovery, Scope},
    Client, Config,
};
use kubeassert_core::{Error, Gvk, ResourceMapping, Result};
use serde_json::Value as Json;
use tracing::{debug, info};

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// Typed access used by kind-specific helpers; the core only probes the server version.
#[async_trait::async_trait]
pub trait TypedApi: Send + Sync {
    async fn server_version(&self) -> Result<String>;
}

/// Maps a group/version/kind onto its REST endpoint.
#[async_trait::async_trait]
pub trait DiscoveryApi: Send + Sync {
    /// Fails with `Error::Discovery` when the kind is not served at call time.
    async fn resolve(&self, gvk: &Gvk) -> Result<ResourceMapping>;
}

/// Schema-agnostic CRUD over resource documents.
///
/// An empty `namespace` addresses cluster-scoped kinds (or the client's default
/// namespace for namespaced kinds).
#[async_trait::async_trait]
pub trait DynamicApi: Send + Sync {
    /// `Ok(None)` when the resource does not exist.
    async fn get(&self, mapping: &ResourceMapping, namespace: &str, name: &str) -> Result<Option<Json>>;
    async fn create(&self, mapping: &ResourceMapping, namespace: &str, document: &Json) -> Result<Json>;
    async fn replace(&self, mapping: &ResourceMapping, namespace: &str, document: &Json) -> Result<Json>;
    async fn delete(&self, mapping: &ResourceMapping, namespace: &str, name: &str) -> Result<()>;
}

/// Classify kube errors into the shared taxonomy.
pub fn classify(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ErrorResponse { code: 404, message, .. }) => Error::NotFound(message),
        kube::Error::Api(ErrorResponse { code: 409, reason, message, .. }) if reason == "AlreadyExists" => Error::AlreadyExists(message),
        kube::Error::Api(ae) => Error::Remote { code: ae.code, message: ae.message },
        other => Error::Remote { code: 0, message: other.to_string() },
    }
}

pub fn api_resource(mapping: &ResourceMapping) -> ApiResource {
    ApiResource {
        group: mapping.group.clone(),
        version: mapping.version.clone(),
        api_version: mapping.group_version(),
        kind: mapping.kind.clone(),
        plural: mapping.plural.clone(),
    }
}

#[derive(Clone)]
pub struct KubeTyped {
    client: Client,
}

impl KubeTyped {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Underlying client for kind-specific typed helpers.
    pub fn client(&self) -> Client {
        self.client.clone()
    }
}

#[async_trait::async_trait]
impl TypedApi for KubeTyped {
    async fn server_version(&self) -> Result<String> {
        let info: k8s_openapi::apimachinery::pkg::version::Info = self.client.apiserver_version().await.map_err(classify)?;
        Ok(info.git_version)
    }
}

/// Discovery index; every `resolve` re-runs discovery so newly installed CRDs are seen.
#[derive(Clone)]
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl DiscoveryApi for KubeDiscovery {
    async fn resolve(&self, gvk: &Gvk) -> Result<ResourceMapping> {
        let discovery = Discovery::new(self.client.clone())
            .filter(&[gvk.group.as_str()])
            .run()
            .await
            .map_err(classify)?;
        if let Some(group) = discovery.get(&gvk.group) {
            for (ar, caps) in group.versioned_resources(&gvk.version) {
                if ar.kind == gvk.kind {
                    let namespaced = matches!(caps.scope, Scope::Namespaced);
                    debug!(gvk = %gvk, plural = %ar.plural, namespaced, "discovery resolved");
                    return Ok(ResourceMapping { group: ar.group, version: ar.version, kind: ar.kind, plural: ar.plural, namespaced });
                }
            }
        }
        Err(Error::Discovery(format!("GVK not found: {}", gvk)))
    }
}

#[derive(Clone)]
pub struct KubeDynamic {
    client: Client,
}

impl KubeDynamic {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, mapping: &ResourceMapping, namespace: &str) -> Api<DynamicObject> {
        let ar = api_resource(mapping);
        if !mapping.namespaced {
            Api::all_with(self.client.clone(), &ar)
        } else if namespace.is_empty() {
            Api::default_namespaced_with(self.client.clone(), &ar)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        }
    }
}

fn to_object(document: &Json) -> Result<DynamicObject> {
    serde_json::from_value(document.clone()).map_err(|e| Error::Decode(format!("document is not a valid object: {}", e)))
}

fn to_json(obj: &DynamicObject) -> Result<Json> {
    serde_json::to_value(obj).map_err(|e| Error::Decode(format!("serializing DynamicObject: {}", e)))
}

#[async_trait::async_trait]
impl DynamicApi for KubeDynamic {
    async fn get(&self, mapping: &ResourceMapping, namespace: &str, name: &str) -> Result<Option<Json>> {
        match self.api(mapping, namespace).get_opt(name).await.map_err(classify)? {
            Some(obj) => Ok(Some(to_json(&obj)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, mapping: &ResourceMapping, namespace: &str, document: &Json) -> Result<Json> {
        let obj = to_object(document)?;
        let created = self.api(mapping, namespace).create(&PostParams::default(), &obj).await.map_err(classify)?;
        to_json(&created)
    }

    async fn replace(&self, mapping: &ResourceMapping, namespace: &str, document: &Json) -> Result<Json> {
        let obj = to_object(document)?;
        let name = obj.metadata.name.clone().ok_or_else(|| Error::Decode("document missing metadata.name".into()))?;
        let replaced = self.api(mapping, namespace).replace(&name, &PostParams::default(), &obj).await.map_err(classify)?;
        to_json(&replaced)
    }

    async fn delete(&self, mapping: &ResourceMapping, namespace: &str, name: &str) -> Result<()> {
        self.api(mapping, namespace).delete(name, &DeleteParams::default()).await.map_err(classify)?;
        Ok(())
    }
}

/// All three handles for one cluster.
#[derive(Clone)]
pub struct KubeHandles {
    pub typed: Arc<KubeTyped>,
    pub dynamic: Arc<KubeDynamic>,
    pub discovery: Arc<KubeDiscovery>,
}

impl KubeHandles {
    pub fn from_client(client: Client) -> Self {
        Self {
            typed: Arc::new(KubeTyped::new(client.clone())),
            dynamic: Arc::new(KubeDynamic::new(client.clone())),
            discovery: Arc::new(KubeDiscovery::new(client)),
        }
    }
}

fn kubeconfig_path_from(kubeconfig_env: Option<OsString>, home: Option<OsString>) -> PathBuf {
    match kubeconfig_env {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => {
            let mut p = home.map(PathBuf::from).unwrap_or_default();
            p.push(".kube");
            p.push("config");
            p
        }
    }
}

/// `$KUBECONFIG` when set, else `$HOME/.kube/config`.
pub fn kubeconfig_path() -> PathBuf {
    kubeconfig_path_from(std::env::var_os("KUBECONFIG"), std::env::var_os("HOME"))
}

/// Connect using the default kubeconfig location.
pub async fn connect() -> anyhow::Result<KubeHandles> {
    connect_with(&kubeconfig_path()).await
}

/// Build a client from `path`, verify the API server answers, and return the handles.
pub async fn connect_with(path: &Path) -> anyhow::Result<KubeHandles> {
    if !path.exists() {
        return Err(anyhow!("expected kubeconfig to exist at '{}'", path.display()));
    }
    let kubeconfig = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context("loading kubeconfig")?;
    let client = Client::try_from(config).context("creating kube client")?;
    let handles = KubeHandles::from_client(client);
    let version = handles.typed.server_version().await.context("probing API server version")?;
    info!(kubeconfig = %path.display(), server = %version, "connected to cluster");
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: format!("{} happened", reason), reason: reason.into(), code })
    }

    #[test]
    fn classify_maps_api_codes() {
        assert!(classify(api_err(404, "NotFound")).is_not_found());
        assert!(classify(api_err(409, "AlreadyExists")).is_already_exists());
        match classify(api_err(409, "Conflict")) {
            Error::Remote { code, message } => {
                assert_eq!(code, 409);
                assert!(message.contains("Conflict"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(classify(api_err(403, "Forbidden")), Error::Remote { code: 403, .. }));
    }

    #[test]
    fn api_resource_uses_group_version() {
        let m = ResourceMapping { group: "apps".into(), version: "v1".into(), kind: "Deployment".into(), plural: "deployments".into(), namespaced: true };
        let ar = api_resource(&m);
        assert_eq!(ar.api_version, "apps/v1");
        assert_eq!(ar.plural, "deployments");
        let core = ResourceMapping { group: String::new(), version: "v1".into(), kind: "Namespace".into(), plural: "namespaces".into(), namespaced: false };
        assert_eq!(api_resource(&core).api_version, "v1");
    }

    #[test]
    fn kubeconfig_path_prefers_env() {
        let p = kubeconfig_path_from(Some("/tmp/kc".into()), Some("/home/u".into()));
        assert_eq!(p, PathBuf::from("/tmp/kc"));
        let p = kubeconfig_path_from(Some("".into()), Some("/home/u".into()));
        assert_eq!(p, PathBuf::from("/home/u/.kube/config"));
        let p = kubeconfig_path_from(None, Some("/home/u".into()));
        assert_eq!(p, PathBuf::from("/home/u/.kube/config"));
    }

    #[tokio::test]
    async fn connect_with_missing_kubeconfig_fails_fast() {
        let err = connect_with(Path::new("/nonexistent/kubeassert/config")).await.err().expect("should fail");
        assert!(err.to_string().contains("expected kubeconfig to exist"), "err={}", err);
    }

    #[test]
    fn to_object_requires_object_shape() {
        assert!(to_object(&serde_json::json!("scalar")).is_err());
        let obj = to_object(&serde_json::json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm"}})).unwrap();
        assert_eq!(obj.metadata.name.as_deref(), Some("cm"));
    }
}
