//! kubeassert ops: convergence polling and bulk teardown.
//!
//! One bounded retry loop (`poll`) serves every wait: it fetches the resource,
//! hands the observation to a `Predicate`, and either returns, fails, or sleeps
//! for the policy interval and tries again.

#![forbid(unsafe_code)]

use std::path::Path;
use std::time::Instant;

use kubeassert_apply::{apply, resource_files, Resolver};
use kubeassert_core::{normalize_status, Error, FieldSelector, Operation, ResourceIdentity, Result, RetryPolicy, TargetState};
use kubeassert_kubehub::DynamicApi;
use metrics::{counter, histogram};
use serde_json::Value as Json;
use tracing::{debug, info};

/// Outcome of evaluating one observation.
#[derive(Debug)]
pub enum Evaluation {
    Satisfied,
    Retry,
    Fatal(Error),
}

/// Convergence condition checked against the fetched resource (`None` when absent).
pub trait Predicate {
    /// Human readable target, used in logs and timeout errors.
    fn describe(&self) -> String;
    fn evaluate(&self, identity: &ResourceIdentity, state: Option<&Json>) -> Evaluation;
}

fn absent(identity: &ResourceIdentity) -> Evaluation {
    Evaluation::Fatal(Error::NotFound(format!("{} is not found", identity)))
}

/// Satisfied when presence matches the target state.
#[derive(Debug, Clone, Copy)]
pub struct Existence(pub TargetState);

impl Predicate for Existence {
    fn describe(&self) -> String {
        self.0.to_string()
    }

    fn evaluate(&self, identity: &ResourceIdentity, state: Option<&Json>) -> Evaluation {
        match (self.0, state.is_some()) {
            (TargetState::Created, true) | (TargetState::Deleted, false) => Evaluation::Satisfied,
            (_, exists) => {
                debug!(resource = %identity, exists, "resource presence does not match yet");
                Evaluation::Retry
            }
        }
    }
}

/// Satisfied when the selector's path holds the expected value (case-insensitive).
#[derive(Debug, Clone)]
pub struct FieldConvergence(pub FieldSelector);

impl Predicate for FieldConvergence {
    fn describe(&self) -> String {
        format!("{}={}", self.0.key(), self.0.value)
    }

    fn evaluate(&self, identity: &ResourceIdentity, state: Option<&Json>) -> Evaluation {
        match state {
            None => absent(identity),
            Some(doc) if self.0.matches(doc) => Evaluation::Satisfied,
            Some(_) => Evaluation::Retry,
        }
    }
}

/// Satisfied when `status.conditions` holds an entry of `condition_type` whose status
/// equals the expected one after `normalize_status`.
#[derive(Debug, Clone)]
pub struct ConditionMatch {
    pub condition_type: String,
    pub status: String,
}

impl ConditionMatch {
    pub fn new(condition_type: impl Into<String>, status: &str) -> Self {
        Self { condition_type: condition_type.into(), status: normalize_status(status) }
    }
}

impl Predicate for ConditionMatch {
    fn describe(&self) -> String {
        format!("condition {}={}", self.condition_type, self.status)
    }

    fn evaluate(&self, identity: &ResourceIdentity, state: Option<&Json>) -> Evaluation {
        let doc = match state {
            Some(doc) => doc,
            None => return absent(identity),
        };
        let conds = match doc.pointer("/status/conditions").and_then(|v| v.as_array()) {
            Some(c) => c,
            None => return Evaluation::Retry,
        };
        let found = conds.iter().any(|c| {
            let ty = c.get("type").and_then(|v| v.as_str());
            let st = c.get("status").and_then(|v| v.as_str());
            matches!((ty, st), (Some(t), Some(s)) if t == self.condition_type && normalize_status(s) == self.status)
        });
        if found { Evaluation::Satisfied } else { Evaluation::Retry }
    }
}

/// Poll `identity` until `predicate` is satisfied or `policy.max_attempts()` fetches
/// have been made.
///
/// Not-found fetch errors count as absence; any other fetch error is returned at once.
pub async fn poll<P: Predicate + ?Sized>(policy: &RetryPolicy, dynamic: &dyn DynamicApi, identity: &ResourceIdentity, predicate: &P) -> Result<()> {
    let t0 = Instant::now();
    let target = predicate.describe();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        counter!("poll_attempts", 1u64);
        info!(resource = %identity, attempt, max = policy.max_attempts(), target = %target, "waiting for resource");
        let state = match dynamic.get(&identity.mapping, &identity.namespace, &identity.name).await {
            Ok(state) => state,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        match predicate.evaluate(identity, state.as_ref()) {
            Evaluation::Satisfied => {
                histogram!("poll_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
                info!(resource = %identity, attempt, target = %target, "resource converged");
                return Ok(());
            }
            Evaluation::Fatal(e) => return Err(e),
            Evaluation::Retry => {}
        }
        if attempt >= policy.max_attempts() {
            counter!("poll_timeout", 1u64);
            return Err(Error::Timeout(format!("waiter timed out waiting for {} to become {} after {} attempts", identity, target, attempt)));
        }
        tokio::time::sleep(policy.interval()).await;
    }
}

pub async fn wait_for_state(policy: &RetryPolicy, dynamic: &dyn DynamicApi, identity: &ResourceIdentity, state: TargetState) -> Result<()> {
    poll(policy, dynamic, identity, &Existence(state)).await
}

/// Parses `selector` before any fetch; a malformed selector is a format error.
pub async fn wait_for_selector(policy: &RetryPolicy, dynamic: &dyn DynamicApi, identity: &ResourceIdentity, selector: &str) -> Result<()> {
    let selector = FieldSelector::parse(selector)?;
    poll(policy, dynamic, identity, &FieldConvergence(selector)).await
}

pub async fn wait_for_condition(policy: &RetryPolicy, dynamic: &dyn DynamicApi, identity: &ResourceIdentity, condition_type: &str, status: &str) -> Result<()> {
    poll(policy, dynamic, identity, &ConditionMatch::new(condition_type, status)).await
}

/// Delete every resource under `root`, then wait for each to disappear.
///
/// Both phases walk the tree in the same lexical order; the first failure stops the walk.
pub async fn delete_resources_at_path(policy: &RetryPolicy, dynamic: &dyn DynamicApi, resolver: &Resolver<'_>, root: &Path) -> Result<()> {
    let files = resource_files(root)?;
    for file in &files {
        for resource in resolver.resolve_many(file).await? {
            apply(dynamic, Operation::Delete, "", &resource).await?;
            info!(file = %file.display(), resource = %resource.identity(""), "submitted deletion");
        }
    }
    for file in resource_files(root)? {
        for resource in resolver.resolve_many(&file).await? {
            wait_for_state(policy, dynamic, &resource.identity(""), TargetState::Deleted).await?;
        }
    }
    Ok(())
}
