//! In-memory cluster implementing all three client traits, for tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use kubeassert_core::{doc, Error, Gvk, ResourceMapping, Result};
use serde_json::Value as Json;

use crate::{DiscoveryApi, DynamicApi, TypedApi};

type Key = (String, String, String);

/// Simple in-memory cluster: a discovery table, an object store keyed by
/// `(plural, namespace, name)`, and a call log.
///
/// `replace` enforces `metadata.resourceVersion` like the API server does.
#[derive(Default)]
pub struct MockCluster {
    kinds: Mutex<Vec<ResourceMapping>>,
    objects: Mutex<BTreeMap<Key, Json>>,
    scripted_gets: Mutex<VecDeque<Result<Option<Json>>>>,
    failures: Mutex<HashMap<&'static str, (u16, String)>>,
    calls: Mutex<Vec<String>>,
    next_rv: Mutex<u64>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a served kind.
    pub fn serve(&self, mapping: ResourceMapping) -> &Self {
        self.kinds.lock().unwrap().push(mapping);
        self
    }

    /// Convenience for `serve` from parts; `plural` is the REST resource name.
    pub fn serve_kind(&self, api_version: &str, kind: &str, plural: &str, namespaced: bool) -> &Self {
        let gvk = Gvk::from_api_version(api_version, kind);
        self.serve(ResourceMapping { group: gvk.group, version: gvk.version, kind: gvk.kind, plural: plural.to_string(), namespaced })
    }

    /// Store an object directly, bypassing the call log.
    pub fn insert(&self, plural: &str, namespace: &str, document: Json) {
        let name = doc::name(&document).unwrap_or("").to_string();
        self.objects.lock().unwrap().insert((plural.to_string(), namespace.to_string(), name), document);
    }

    pub fn object(&self, plural: &str, namespace: &str, name: &str) -> Option<Json> {
        self.objects.lock().unwrap().get(&(plural.to_string(), namespace.to_string(), name.to_string())).cloned()
    }

    /// Keys of all stored objects in `(plural, namespace, name)` order.
    pub fn keys(&self) -> Vec<Key> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Queue answers for upcoming `get` calls; the store answers once the queue is drained.
    pub fn script_get(&self, answer: Result<Option<Json>>) -> &Self {
        self.scripted_gets.lock().unwrap().push_back(answer);
        self
    }

    /// Make every call of `verb` (`get`, `create`, `replace`, `delete`, `resolve`) fail.
    pub fn fail(&self, verb: &'static str, code: u16, message: &str) -> &Self {
        self.failures.lock().unwrap().insert(verb, (code, message.to_string()));
        self
    }

    /// Recorded calls, e.g. `create configmaps test-ns/cm`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.split(' ').next() == Some(verb)).count()
    }

    fn record(&self, verb: &'static str, target: String) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{} {}", verb, target));
        match self.failures.lock().unwrap().get(verb) {
            Some((code, message)) => Err(Error::Remote { code: *code, message: message.clone() }),
            None => Ok(()),
        }
    }

    fn bump_rv(&self) -> String {
        let mut rv = self.next_rv.lock().unwrap();
        *rv += 1;
        rv.to_string()
    }
}

fn key(mapping: &ResourceMapping, namespace: &str, name: &str) -> Key {
    let ns = if mapping.namespaced { namespace } else { "" };
    (mapping.plural.clone(), ns.to_string(), name.to_string())
}

#[async_trait::async_trait]
impl TypedApi for MockCluster {
    async fn server_version(&self) -> Result<String> {
        Ok("v0.0.0-mock".into())
    }
}

#[async_trait::async_trait]
impl DiscoveryApi for MockCluster {
    async fn resolve(&self, gvk: &Gvk) -> Result<ResourceMapping> {
        self.record("resolve", gvk.to_string())?;
        self.kinds
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.group == gvk.group && m.version == gvk.version && m.kind == gvk.kind)
            .cloned()
            .ok_or_else(|| Error::Discovery(format!("GVK not found: {}", gvk)))
    }
}

#[async_trait::async_trait]
impl DynamicApi for MockCluster {
    async fn get(&self, mapping: &ResourceMapping, namespace: &str, name: &str) -> Result<Option<Json>> {
        self.record("get", format!("{} {}/{}", mapping.plural, namespace, name))?;
        if let Some(answer) = self.scripted_gets.lock().unwrap().pop_front() {
            return answer;
        }
        Ok(self.objects.lock().unwrap().get(&key(mapping, namespace, name)).cloned())
    }

    async fn create(&self, mapping: &ResourceMapping, namespace: &str, document: &Json) -> Result<Json> {
        let name = doc::name(document).unwrap_or("").to_string();
        self.record("create", format!("{} {}/{}", mapping.plural, namespace, name))?;
        let k = key(mapping, namespace, &name);
        if self.objects.lock().unwrap().contains_key(&k) {
            return Err(Error::AlreadyExists(format!("{} \"{}\" already exists", mapping.plural, name)));
        }
        let mut stored = document.clone();
        doc::set_resource_version(&mut stored, &self.bump_rv())?;
        if mapping.namespaced && !namespace.is_empty() {
            doc::set_namespace(&mut stored, namespace)?;
        }
        self.objects.lock().unwrap().insert(k, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, mapping: &ResourceMapping, namespace: &str, document: &Json) -> Result<Json> {
        let name = doc::name(document).unwrap_or("").to_string();
        self.record("replace", format!("{} {}/{}", mapping.plural, namespace, name))?;
        let k = key(mapping, namespace, &name);
        let current_rv = match self.objects.lock().unwrap().get(&k) {
            Some(live) => doc::resource_version(live).map(|s| s.to_string()),
            None => return Err(Error::NotFound(format!("{} \"{}\" not found", mapping.plural, name))),
        };
        if doc::resource_version(document).map(|s| s.to_string()) != current_rv {
            return Err(Error::Remote { code: 409, message: format!("{} \"{}\": the object has been modified", mapping.plural, name) });
        }
        let mut stored = document.clone();
        doc::set_resource_version(&mut stored, &self.bump_rv())?;
        self.objects.lock().unwrap().insert(k, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, mapping: &ResourceMapping, namespace: &str, name: &str) -> Result<()> {
        self.record("delete", format!("{} {}/{}", mapping.plural, namespace, name))?;
        match self.objects.lock().unwrap().remove(&key(mapping, namespace, name)) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("{} \"{}\" not found", mapping.plural, name))),
        }
    }
}
