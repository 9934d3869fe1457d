//! Resource resolution: file(s) -> templated text -> YAML documents -> mapped resources.

use std::path::{Path, PathBuf};

use kubeassert_core::{doc, Error, Gvk, ResolvedResource, Result};
use kubeassert_kubehub::DiscoveryApi;
use serde::Deserialize;
use serde_json::Value as Json;
use tracing::debug;
use walkdir::WalkDir;

use crate::template::Templater;

pub const RESOURCE_EXTENSION: &str = "yaml";

fn max_yaml_bytes() -> usize {
    std::env::var("KUBEASSERT_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000) // 1 MiB default
}

pub fn is_resource_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(RESOURCE_EXTENSION)
}

/// Resource files under `root` in lexical path order (a file root yields itself).
pub fn resource_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(Error::NotFound(format!("path '{}' does not exist", root.display())));
    }
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(root).sort_by(|a, b| a.file_name().cmp(b.file_name())) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            match e.into_io_error() {
                Some(io) => Error::io(path, io),
                None => Error::Decode(format!("filesystem loop at {}", path.display())),
            }
        })?;
        if entry.file_type().is_file() && is_resource_file(entry.path()) {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

/// Split a multi-document YAML stream and convert each non-empty document.
pub fn decode_documents(text: &str, origin: &Path) -> Result<Vec<Json>> {
    if text.len() > max_yaml_bytes() {
        return Err(Error::Decode(format!("{}: YAML payload too large (>{} bytes)", origin.display(), max_yaml_bytes())));
    }
    let mut out = Vec::new();
    for (idx, de) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let val = serde_yaml::Value::deserialize(de).map_err(|e| Error::Decode(format!("{} (document {}): {}", origin.display(), idx, e)))?;
        if val.is_null() {
            continue;
        }
        let json = serde_json::to_value(val).map_err(|e| Error::Decode(format!("{} (document {}): converting YAML to JSON: {}", origin.display(), idx, e)))?;
        check_document(&json).map_err(|m| Error::Decode(format!("{} (document {}): {}", origin.display(), idx, m)))?;
        out.push(json);
    }
    Ok(out)
}

fn check_document(json: &Json) -> std::result::Result<(), String> {
    if !json.is_object() {
        return Err("document is not a map".into());
    }
    if doc::api_version(json).is_none() {
        return Err("YAML missing apiVersion".into());
    }
    if doc::kind(json).is_none() {
        return Err("YAML missing kind".into());
    }
    if doc::name(json).map(|n| n.is_empty()).unwrap_or(true) {
        return Err("YAML missing metadata.name".into());
    }
    Ok(())
}

/// Turns resource files into `ResolvedResource`s using the discovery index.
pub struct Resolver<'a> {
    discovery: &'a dyn DiscoveryApi,
    templater: Option<&'a dyn Templater>,
}

impl<'a> Resolver<'a> {
    pub fn new(discovery: &'a dyn DiscoveryApi, templater: Option<&'a dyn Templater>) -> Self {
        Self { discovery, templater }
    }

    fn read(&self, path: &Path) -> Result<Vec<Json>> {
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("resource file '{}' does not exist", path.display())),
            _ => Error::io(path, e),
        })?;
        let text = match self.templater {
            Some(t) => t.render(&raw, path)?,
            None => raw,
        };
        decode_documents(&text, path)
    }

    /// Attach the discovery mapping to a decoded document.
    pub async fn resolve_document(&self, document: Json) -> Result<ResolvedResource> {
        let gvk = Gvk::from_api_version(doc::api_version(&document).unwrap_or(""), doc::kind(&document).unwrap_or(""));
        let mapping = self.discovery.resolve(&gvk).await?;
        debug!(gvk = %gvk, plural = %mapping.plural, name = ?doc::name(&document), "resolved resource");
        Ok(ResolvedResource { mapping, document })
    }

    /// Resolve a file holding exactly one document.
    pub async fn resolve_one(&self, path: &Path) -> Result<ResolvedResource> {
        let mut docs = self.read(path)?;
        match docs.len() {
            0 => Err(Error::Decode(format!("{}: no documents found", path.display()))),
            1 => self.resolve_document(docs.remove(0)).await,
            n => Err(Error::Decode(format!("{}: expected a single document, found {}", path.display(), n))),
        }
    }

    /// Resolve every document of a file, or of every resource file below a directory,
    /// preserving file order then document order.
    pub async fn resolve_many(&self, path: &Path) -> Result<Vec<ResolvedResource>> {
        let mut out = Vec::new();
        for file in resource_files(path)? {
            for document in self.read(&file)? {
                out.push(self.resolve_document(document).await?);
            }
        }
        Ok(out)
    }
}
