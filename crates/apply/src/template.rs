//! Parameter substitution applied to resource files before decoding.

use std::collections::BTreeMap;
use std::path::Path;

use kubeassert_core::{Error, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid placeholder regex"));

/// Renders raw resource text before it is decoded.
pub trait Templater: Send + Sync {
    fn render(&self, source: &str, origin: &Path) -> Result<String>;
}

/// Named values substituted into `{{ .Key }}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateArguments {
    values: BTreeMap<String, String>,
}

impl TemplateArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<BTreeMap<String, String>> for TemplateArguments {
    fn from(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }
}

impl Templater for TemplateArguments {
    fn render(&self, source: &str, origin: &Path) -> Result<String> {
        let mut missing: Vec<String> = Vec::new();
        let out = PLACEHOLDER.replace_all(source, |caps: &Captures| match self.values.get(&caps[1]) {
            Some(v) => v.clone(),
            None => {
                missing.push(caps[1].to_string());
                String::new()
            }
        });
        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Err(Error::Template(format!("{}: no value for {}", origin.display(), missing.join(", "))));
        }
        Ok(out.into_owned())
    }
}

/// Declares one template argument sourced from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateArgument {
    pub key: String,
    pub env_var: String,
    pub mandatory: bool,
    pub default: Option<String>,
}

impl TemplateArgument {
    pub fn new(key: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self { key: key.into(), env_var: env_var.into(), mandatory: false, default: None }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Resolve declared arguments: environment value, else default.
///
/// A mandatory argument with neither is an error; an optional one is left out.
pub fn template_arguments_to_map(args: &[TemplateArgument]) -> Result<TemplateArguments> {
    template_arguments_with(args, |name| std::env::var(name).ok())
}

fn template_arguments_with(args: &[TemplateArgument], lookup: impl Fn(&str) -> Option<String>) -> Result<TemplateArguments> {
    let mut out = TemplateArguments::new();
    for arg in args {
        match lookup(&arg.env_var).filter(|v| !v.is_empty()).or_else(|| arg.default.clone()) {
            Some(v) => out.insert(arg.key.clone(), v),
            None if arg.mandatory => {
                return Err(Error::Template(format!("mandatory argument '{}' has no value (set {})", arg.key, arg.env_var)));
            }
            None => {}
        }
    }
    Ok(out)
}
