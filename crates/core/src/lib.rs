//! kubeassert core types: resource mappings, operations, retry policy and selectors.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub mod doc;
mod error;

pub use error::{Error, Result};

/// Group/version/kind as declared by a document's `apiVersion` + `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    /// `apps/v1` -> group `apps`, version `v1`; `v1` -> core group.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };
        Self { group, version, kind: kind.to_string() }
    }

    /// Parse `v1/Kind` or `group/v1/Kind`.
    pub fn parse_key(key: &str) -> Result<Self> {
        let parts: Vec<_> = key.split('/').collect();
        match parts.as_slice() {
            [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(Self { group: String::new(), version: version.to_string(), kind: kind.to_string() }),
            [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(Self { group: group.to_string(), version: version.to_string(), kind: kind.to_string() }),
            _ => Err(Error::Format(format!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key))),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// Binding between a kind and the REST endpoint addressing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceMapping {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// REST resource name, e.g. `deployments`.
    pub plural: String,
    pub namespaced: bool,
}

impl ResourceMapping {
    pub fn group_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }
}

/// A decoded document with its discovery mapping attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResource {
    pub mapping: ResourceMapping,
    pub document: Json,
}

impl ResolvedResource {
    pub fn name(&self) -> &str {
        doc::name(&self.document).unwrap_or("")
    }

    pub fn namespace(&self) -> &str {
        doc::namespace(&self.document)
    }

    pub fn kind(&self) -> &str {
        &self.mapping.kind
    }

    /// Identity used by the poller: the embedded namespace unless `ns_override` is non-empty.
    pub fn identity(&self, ns_override: &str) -> ResourceIdentity {
        let namespace = if ns_override.is_empty() { self.namespace() } else { ns_override };
        ResourceIdentity { mapping: self.mapping.clone(), namespace: namespace.to_string(), name: self.name().to_string() }
    }
}

/// Addressable remote resource: mapping + namespace + name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdentity {
    pub mapping: ResourceMapping,
    /// Empty for cluster-scoped kinds.
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.mapping.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" | "submit" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(Error::UnsupportedOperation(other.to_string())),
        }
    }
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of an existence poll.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TargetState {
    Created,
    Deleted,
}

impl FromStr for TargetState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(TargetState::Created),
            "deleted" => Ok(TargetState::Deleted),
            other => Err(Error::Format(format!("unknown state '{}' (expect created or deleted)", other))),
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetState::Created => "created",
            TargetState::Deleted => "deleted",
        })
    }
}

pub const DEFAULT_WAITER_TRIES: u32 = 40;
pub const DEFAULT_WAITER_INTERVAL: Duration = Duration::from_secs(30);

/// Bounded retry budget for convergence polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    /// `max_attempts` below 1 is raised to 1.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), interval }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_WAITER_TRIES, DEFAULT_WAITER_INTERVAL)
    }
}

/// `<dotted.path>=<value>` selector used by field-convergence polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelector {
    pub path: Vec<String>,
    pub value: String,
}

impl FieldSelector {
    pub fn parse(selector: &str) -> Result<Self> {
        let mut split = selector.split('=');
        let (key, value) = match (split.next(), split.next(), split.next()) {
            (Some(k), Some(v), None) if !v.is_empty() => (k, v),
            _ => return Err(Error::Format(format!("selector '{}' should meet format '<key>=<value>'", selector))),
        };
        let path = doc::split_path(key);
        if path.is_empty() {
            return Err(Error::Format(format!("found empty 'key' in selector '{}' of form '<key>=<value>'", selector)));
        }
        Ok(Self { path, value: value.to_string() })
    }

    pub fn key(&self) -> String {
        self.path.join(".")
    }

    /// Case-insensitive comparison against the scalar at `path`.
    pub fn matches(&self, document: &Json) -> bool {
        doc::lookup_scalar(document, &self.path).map(|v| v.to_lowercase() == self.value.to_lowercase()).unwrap_or(false)
    }
}

/// Condition status normalization: first character upper-cased, the rest lower-cased.
///
/// Applied to both sides of a comparison, so `true`, `TRUE` and `True` are equal.
pub fn normalize_status(status: &str) -> String {
    let mut chars = status.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Interpret a result-checking token: `fail` (any case) expects an error.
pub fn expects_failure(expected_result: &str) -> bool {
    expected_result.eq_ignore_ascii_case("fail")
}

pub mod prelude {
    pub use super::{Error, FieldSelector, Gvk, Operation, ResolvedResource, ResourceIdentity, ResourceMapping, Result, RetryPolicy, TargetState};
}
