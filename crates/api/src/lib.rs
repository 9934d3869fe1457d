//! kubeassert public API: the client context that test steps drive.
//!
//! `ClientContext` owns the three cluster handles plus the per-suite settings
//! (resource root, template arguments, retry policy) and exposes each assertion or
//! mutation as one async method. Every method validates the handles first.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kubeassert_apply::{apply, apply_many, check_result, update_field, Resolver, Templater};
use kubeassert_core::{Error, FieldSelector, Operation, ResolvedResource, Result, RetryPolicy, TargetState, DEFAULT_WAITER_TRIES};
use kubeassert_kubehub::{DiscoveryApi, DynamicApi, TypedApi};
use kubeassert_ops::{poll, wait_for_condition, wait_for_state, FieldConvergence};
use tracing::info;

pub use kubeassert_apply::{template_arguments_to_map, TemplateArgument, TemplateArguments};

pub const DEFAULT_FILES_PATH: &str = "templates";

const CONNECT_HINT: &str = "call 'connect' or 'with_handles' before using this method";

pub struct ClientContext {
    typed: Option<Arc<dyn TypedApi>>,
    dynamic: Option<Arc<dyn DynamicApi>>,
    discovery: Option<Arc<dyn DiscoveryApi>>,
    files_path: PathBuf,
    template_arguments: TemplateArguments,
    retry: RetryPolicy,
    timestamps: BTreeMap<String, DateTime<Utc>>,
}

impl Default for ClientContext {
    fn default() -> Self {
        Self {
            typed: None,
            dynamic: None,
            discovery: None,
            files_path: PathBuf::from(DEFAULT_FILES_PATH),
            template_arguments: TemplateArguments::new(),
            retry: RetryPolicy::default(),
            timestamps: BTreeMap::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, raw: Option<String>) -> Result<Option<T>> {
    match raw {
        Some(s) if !s.trim().is_empty() => s
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Validation(format!("{} must be a non-negative integer, got '{}'", var, s))),
        _ => Ok(None),
    }
}

impl ClientContext {
    /// Unconnected context with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings from `KUBEASSERT_FILES_PATH`, `KUBEASSERT_WAITER_TRIES` and
    /// `KUBEASSERT_WAITER_INTERVAL_SECS`; unset or empty variables keep the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut ctx = Self::default();
        if let Some(p) = lookup("KUBEASSERT_FILES_PATH").filter(|p| !p.is_empty()) {
            ctx.files_path = PathBuf::from(p);
        }
        let defaults = RetryPolicy::default();
        let tries = parse_env::<u32>("KUBEASSERT_WAITER_TRIES", lookup("KUBEASSERT_WAITER_TRIES"))?;
        let secs = parse_env::<u64>("KUBEASSERT_WAITER_INTERVAL_SECS", lookup("KUBEASSERT_WAITER_INTERVAL_SECS"))?;
        // zero falls back to the default, like an unset variable
        let tries = tries.filter(|t| *t > 0).unwrap_or(DEFAULT_WAITER_TRIES);
        let interval = secs.filter(|s| *s > 0).map(Duration::from_secs).unwrap_or(defaults.interval());
        ctx.retry = RetryPolicy::new(tries, interval);
        Ok(ctx)
    }

    pub fn with_files_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.files_path = path.into();
        self
    }

    pub fn with_template_arguments(mut self, args: TemplateArguments) -> Self {
        self.template_arguments = args;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Install handles directly (tests, or clients built elsewhere).
    pub fn with_handles(mut self, typed: Arc<dyn TypedApi>, dynamic: Arc<dyn DynamicApi>, discovery: Arc<dyn DiscoveryApi>) -> Self {
        self.typed = Some(typed);
        self.dynamic = Some(dynamic);
        self.discovery = Some(discovery);
        self
    }

    /// Connect through the default kubeconfig and install the kube-backed handles.
    pub async fn connect(&mut self) -> anyhow::Result<()> {
        let handles = kubeassert_kubehub::connect().await?;
        let typed: Arc<dyn TypedApi> = handles.typed;
        let dynamic: Arc<dyn DynamicApi> = handles.dynamic;
        let discovery: Arc<dyn DiscoveryApi> = handles.discovery;
        self.typed = Some(typed);
        self.dynamic = Some(dynamic);
        self.discovery = Some(discovery);
        Ok(())
    }

    pub fn files_path(&self) -> &Path {
        &self.files_path
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn template_arguments(&self) -> &TemplateArguments {
        &self.template_arguments
    }

    /// Typed handle for kind-specific helpers.
    pub fn typed(&self) -> Result<&dyn TypedApi> {
        self.validate()?;
        self.typed.as_deref().ok_or_else(|| Error::Validation(format!("typed client handle is not set; {}", CONNECT_HINT)))
    }

    /// Fails naming the first missing handle (dynamic, discovery, typed).
    pub fn validate(&self) -> Result<()> {
        let missing = if self.dynamic.is_none() {
            Some("dynamic")
        } else if self.discovery.is_none() {
            Some("discovery")
        } else if self.typed.is_none() {
            Some("typed")
        } else {
            None
        };
        match missing {
            Some(handle) => Err(Error::Validation(format!("{} client handle is not set; {}", handle, CONNECT_HINT))),
            None => Ok(()),
        }
    }

    fn clients(&self) -> Result<(&dyn DynamicApi, &dyn DiscoveryApi)> {
        self.validate()?;
        match (self.dynamic.as_deref(), self.discovery.as_deref()) {
            (Some(d), Some(disc)) => Ok((d, disc)),
            _ => Err(Error::Validation(format!("client handles are not set; {}", CONNECT_HINT))),
        }
    }

    fn resolver<'a>(&'a self, discovery: &'a dyn DiscoveryApi) -> Resolver<'a> {
        let templater: &dyn Templater = &self.template_arguments;
        Resolver::new(discovery, Some(templater))
    }

    /// Resource file name resolved against the resource root.
    pub fn resource_path(&self, file: &str) -> PathBuf {
        self.files_path.join(file)
    }

    /// Resolve a file or directory below the resource root without touching the resources.
    pub async fn resolve_resources(&self, path: &str) -> Result<Vec<ResolvedResource>> {
        let (_, discovery) = self.clients()?;
        self.resolver(discovery).resolve_many(&self.resource_path(path)).await
    }

    pub async fn resource_operation(&self, operation: &str, file: &str) -> Result<()> {
        self.resource_operation_in_namespace(operation, file, "").await
    }

    /// Apply `operation` to the single resource in `file`; a non-empty `namespace` wins
    /// over the embedded one.
    pub async fn resource_operation_in_namespace(&self, operation: &str, file: &str, namespace: &str) -> Result<()> {
        let (dynamic, discovery) = self.clients()?;
        let operation: Operation = operation.parse()?;
        let resource = self.resolver(discovery).resolve_one(&self.resource_path(file)).await?;
        apply(dynamic, operation, namespace, &resource).await
    }

    pub async fn multi_resource_operation(&self, operation: &str, path: &str) -> Result<()> {
        self.multi_resource_operation_in_namespace(operation, path, "").await
    }

    /// Apply `operation` to every document of a file or every resource file below a
    /// directory, in order, stopping at the first error.
    pub async fn multi_resource_operation_in_namespace(&self, operation: &str, path: &str, namespace: &str) -> Result<()> {
        let (dynamic, discovery) = self.clients()?;
        let operation: Operation = operation.parse()?;
        let resources = self.resolver(discovery).resolve_many(&self.resource_path(path)).await?;
        apply_many(dynamic, operation, namespace, &resources).await
    }

    pub async fn resource_operation_with_result(&self, operation: &str, file: &str, expected_result: &str) -> Result<()> {
        self.resource_operation_with_result_in_namespace(operation, file, "", expected_result).await
    }

    /// Like `resource_operation_in_namespace`, but `expected_result` of `fail` asserts
    /// that the operation errors. An unknown operation token counts as an error outcome.
    pub async fn resource_operation_with_result_in_namespace(&self, operation: &str, file: &str, namespace: &str, expected_result: &str) -> Result<()> {
        self.validate()?;
        let outcome = self.resource_operation_in_namespace(operation, file, namespace).await;
        check_result(operation, file, expected_result, outcome)
    }

    /// Wait until the resource in `file` is `created` or `deleted`.
    pub async fn resource_should_be(&self, file: &str, state: &str) -> Result<()> {
        let (dynamic, discovery) = self.clients()?;
        let state: TargetState = state.parse()?;
        let resource = self.resolver(discovery).resolve_one(&self.resource_path(file)).await?;
        wait_for_state(&self.retry, dynamic, &resource.identity(""), state).await
    }

    /// Wait until `<dotted.path>=<value>` holds on the resource in `file`.
    pub async fn resource_should_converge_to_selector(&self, file: &str, selector: &str) -> Result<()> {
        let (dynamic, discovery) = self.clients()?;
        let selector = FieldSelector::parse(selector)?;
        let resource = self.resolver(discovery).resolve_one(&self.resource_path(file)).await?;
        poll(&self.retry, dynamic, &resource.identity(""), &FieldConvergence(selector)).await
    }

    pub async fn resource_condition_should_be(&self, file: &str, condition_type: &str, status: &str) -> Result<()> {
        let (dynamic, discovery) = self.clients()?;
        let resource = self.resolver(discovery).resolve_one(&self.resource_path(file)).await?;
        wait_for_condition(&self.retry, dynamic, &resource.identity(""), condition_type, status).await
    }

    /// Set `key` (dotted path) to `value` on the live resource described by `file`.
    pub async fn update_resource_with_field(&self, file: &str, key: &str, value: &str) -> Result<()> {
        let (dynamic, discovery) = self.clients()?;
        let resource = self.resolver(discovery).resolve_one(&self.resource_path(file)).await?;
        update_field(dynamic, &resource, key, value).await
    }

    /// Delete everything below `path` (used as given) and wait for it to disappear.
    pub async fn delete_resources_at_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let (dynamic, discovery) = self.clients()?;
        let resolver = self.resolver(discovery);
        kubeassert_ops::delete_resources_at_path(&self.retry, dynamic, &resolver, path.as_ref()).await
    }

    /// Bulk delete rooted at the resource root.
    pub async fn delete_all_test_resources(&self) -> Result<()> {
        self.delete_resources_at_path(&self.files_path).await
    }

    /// Record the current time under `name`, replacing any earlier value.
    pub fn set_timestamp(&mut self, name: &str) -> DateTime<Utc> {
        let now = Utc::now();
        self.timestamps.insert(name.to_string(), now);
        info!(name, time = %now.to_rfc3339(), "memorizing timestamp");
        now
    }

    pub fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.timestamps.get(name).copied()
    }
}
