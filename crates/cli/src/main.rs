use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kubeassert_api::{ClientContext, TemplateArguments};
use kubeassert_core::RetryPolicy;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "kubeassertctl", version, about = "Assert and mutate Kubernetes resources from YAML files")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Root that resource file names are resolved against
    #[arg(long = "files-path", env = "KUBEASSERT_FILES_PATH", global = true)]
    files_path: Option<PathBuf>,

    /// Poll attempts before a wait times out
    #[arg(long = "tries", env = "KUBEASSERT_WAITER_TRIES", global = true)]
    tries: Option<u32>,

    /// Seconds between poll attempts
    #[arg(long = "interval-secs", env = "KUBEASSERT_WAITER_INTERVAL_SECS", global = true)]
    interval_secs: Option<u64>,

    /// Template argument, e.g. --set Namespace=demo (repeatable)
    #[arg(long = "set", value_parser = parse_key_val, global = true)]
    set: Vec<(String, String)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create, update or delete the single resource in a file
    Apply {
        /// create | submit | update | delete
        operation: String,
        file: String,
        /// Namespace override (wins over the embedded one)
        #[arg(long = "ns", default_value = "")]
        namespace: String,
        /// Expected result: `fail` asserts the operation errors
        #[arg(long = "expect")]
        expect: Option<String>,
    },
    /// Apply an operation to every document of a file or directory
    ApplyMany {
        operation: String,
        path: String,
        #[arg(long = "ns", default_value = "")]
        namespace: String,
    },
    /// Wait until a resource is `created` or `deleted`
    Wait { file: String, state: String },
    /// Wait until `<dotted.path>=<value>` holds
    Converge { file: String, selector: String },
    /// Wait until a status condition has the given status
    Condition { file: String, condition_type: String, status: String },
    /// Set a dotted field on the live resource
    SetField { file: String, key: String, value: String },
    /// Delete everything below a directory (default: the files path) and wait for it to go
    DeleteAll { path: Option<PathBuf> },
    /// Show how files map onto served resources
    Resolve { path: String },
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn init_tracing() {
    let env = std::env::var("KUBEASSERT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KUBEASSERT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KUBEASSERT_METRICS_ADDR; expected host:port");
        }
    }
}

fn build_context(cli: &Cli) -> ClientContext {
    let mut ctx = ClientContext::new();
    if let Some(p) = &cli.files_path {
        ctx = ctx.with_files_path(p.clone());
    }
    let defaults = RetryPolicy::default();
    let tries = cli.tries.filter(|t| *t > 0).unwrap_or(defaults.max_attempts());
    let interval = cli.interval_secs.filter(|s| *s > 0).map(Duration::from_secs).unwrap_or(defaults.interval());
    ctx = ctx.with_retry_policy(RetryPolicy::new(tries, interval));
    let mut args = TemplateArguments::new();
    for (k, v) in &cli.set {
        args.insert(k.clone(), v.clone());
    }
    ctx.with_template_arguments(args)
}

fn done(output: Output, command: &str, target: &str) {
    match output {
        Output::Human => println!("ok • {} • {}", command, target),
        Output::Json => println!("{}", serde_json::json!({ "command": command, "target": target, "ok": true })),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut ctx = build_context(&cli);
    ctx.connect().await.context("connecting to cluster")?;
    info!(files_path = %ctx.files_path().display(), tries = ctx.retry_policy().max_attempts(), "client context ready");

    match &cli.command {
        Commands::Apply { operation, file, namespace, expect } => {
            match expect {
                Some(expected) => ctx.resource_operation_with_result_in_namespace(operation, file, namespace, expected).await?,
                None => ctx.resource_operation_in_namespace(operation, file, namespace).await?,
            }
            done(cli.output, operation, file);
        }
        Commands::ApplyMany { operation, path, namespace } => {
            ctx.multi_resource_operation_in_namespace(operation, path, namespace).await?;
            done(cli.output, operation, path);
        }
        Commands::Wait { file, state } => {
            ctx.resource_should_be(file, state).await?;
            done(cli.output, state, file);
        }
        Commands::Converge { file, selector } => {
            ctx.resource_should_converge_to_selector(file, selector).await?;
            done(cli.output, selector, file);
        }
        Commands::Condition { file, condition_type, status } => {
            ctx.resource_condition_should_be(file, condition_type, status).await?;
            done(cli.output, &format!("{}={}", condition_type, status), file);
        }
        Commands::SetField { file, key, value } => {
            ctx.update_resource_with_field(file, key, value).await?;
            done(cli.output, &format!("{}={}", key, value), file);
        }
        Commands::DeleteAll { path } => {
            match path {
                Some(root) => ctx.delete_resources_at_path(root).await?,
                None => ctx.delete_all_test_resources().await?,
            }
            let root = path.as_deref().unwrap_or_else(|| ctx.files_path());
            done(cli.output, "delete-all", &root.display().to_string());
        }
        Commands::Resolve { path } => {
            let resources = ctx.resolve_resources(path).await?;
            match cli.output {
                Output::Human => {
                    for r in &resources {
                        let scope = if r.mapping.namespaced { "namespaced" } else { "cluster" };
                        let ns = if r.namespace().is_empty() { "-" } else { r.namespace() };
                        println!("{} • {} • {} • {}/{}", r.mapping.group_version(), r.kind(), scope, ns, r.name());
                    }
                }
                Output::Json => {
                    let rows: Vec<_> = resources
                        .iter()
                        .map(|r| serde_json::json!({ "mapping": r.mapping, "namespace": r.namespace(), "name": r.name() }))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_val_pairs() {
        assert_eq!(parse_key_val("Namespace=demo").unwrap(), ("Namespace".to_string(), "demo".to_string()));
        assert_eq!(parse_key_val("Url=a=b").unwrap().1, "a=b");
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn context_from_flags() {
        let cli = Cli::parse_from(["kubeassertctl", "--files-path", "suite", "--tries", "2", "--set", "Name=web", "wait", "d.yaml", "created"]);
        let ctx = build_context(&cli);
        assert_eq!(ctx.resource_path("d.yaml"), PathBuf::from("suite/d.yaml"));
        assert_eq!(ctx.retry_policy().max_attempts(), 2);
        assert_eq!(ctx.template_arguments().get("Name"), Some("web"));
        assert!(matches!(cli.command, Commands::Wait { .. }));
    }
}
