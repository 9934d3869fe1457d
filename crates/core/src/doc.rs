//! Schema-agnostic access into resource documents (`serde_json::Value` trees).

use serde_json::{Map, Value as Json};

use crate::{Error, Result};

/// Split a dotted path into segments, dropping empty ones (`.spec..replicas` -> `[spec, replicas]`).
pub fn split_path(key: &str) -> Vec<String> {
    key.split('.').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()
}

/// Walk nested maps along `path`. Arrays and scalars terminate the walk.
pub fn lookup<'a, S: AsRef<str>>(doc: &'a Json, path: &[S]) -> Option<&'a Json> {
    let mut cur = doc;
    for seg in path {
        cur = cur.as_object()?.get(seg.as_ref())?;
    }
    Some(cur)
}

/// Scalar view of the value at `path`: strings as-is, numbers and booleans rendered.
pub fn lookup_scalar<S: AsRef<str>>(doc: &Json, path: &[S]) -> Option<String> {
    match lookup(doc, path)? {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Set `value` at `path`, creating intermediate maps as needed.
pub fn set_path<S: AsRef<str>>(doc: &mut Json, path: &[S], value: Json) -> Result<()> {
    let (last, parents) = path
        .split_last()
        .ok_or_else(|| Error::Format("empty field path".into()))?;
    let mut cur = doc;
    for seg in parents {
        let obj = cur
            .as_object_mut()
            .ok_or_else(|| Error::Format(format!("'{}' is not reachable through a map", seg.as_ref())))?;
        cur = obj.entry(seg.as_ref().to_string()).or_insert_with(|| Json::Object(Map::new()));
    }
    let obj = cur
        .as_object_mut()
        .ok_or_else(|| Error::Format(format!("cannot set '{}' on a non-map value", last.as_ref())))?;
    obj.insert(last.as_ref().to_string(), value);
    Ok(())
}

fn str_at<'a>(doc: &'a Json, path: &[&str]) -> Option<&'a str> {
    lookup(doc, path).and_then(|v| v.as_str())
}

pub fn api_version(doc: &Json) -> Option<&str> {
    str_at(doc, &["apiVersion"])
}

pub fn kind(doc: &Json) -> Option<&str> {
    str_at(doc, &["kind"])
}

pub fn name(doc: &Json) -> Option<&str> {
    str_at(doc, &["metadata", "name"])
}

/// Embedded namespace, empty when absent.
pub fn namespace(doc: &Json) -> &str {
    str_at(doc, &["metadata", "namespace"]).unwrap_or("")
}

pub fn resource_version(doc: &Json) -> Option<&str> {
    str_at(doc, &["metadata", "resourceVersion"])
}

pub fn set_namespace(doc: &mut Json, ns: &str) -> Result<()> {
    set_path(doc, &["metadata", "namespace"], Json::String(ns.to_string()))
}

pub fn set_resource_version(doc: &mut Json, rv: &str) -> Result<()> {
    set_path(doc, &["metadata", "resourceVersion"], Json::String(rv.to_string()))
}
