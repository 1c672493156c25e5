use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::info;

use ferry_apply::{apply_manifest, load};
use ferry_converge::{abandons_phase, reaches_phase, update_with, PhaseWait};
use ferry_core::config::{PollSettings, UpdatePolicy};
use ferry_core::naming::api_version;
use ferry_core::{Phase, Registry, ResourceRef, VersionedObject};
use ferry_kubehub::{ClientContext, MemoryStore};

#[derive(Parser, Debug)]
#[command(name = "ferryctl", version, about = "Ferry CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Default namespace for documents without one (default: FERRY_NAMESPACE or "default")
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve a group/version/kind to its handler, verb and path
    Locate {
        /// GVK key, e.g. "v1/ConfigMap" or "mongodb.com/v1/MongoDB"
        gvk: String,
        /// Use the built-in registry instead of cluster discovery
        #[arg(long = "offline", action = ArgAction::SetTrue)]
        offline: bool,
    },
    /// Create-or-patch every document in a manifest
    Apply {
        /// Manifest path, or "-" for stdin
        #[arg(short = 'f', long = "filename")]
        file: String,
    },
    /// Push each document as a versioned update, merging on conflicts
    Update {
        /// Manifest path, or "-" for stdin
        #[arg(short = 'f', long = "filename")]
        file: String,
        /// Conflict retry budget (default: FERRY_UPDATE_RETRIES or 10)
        #[arg(long = "retries")]
        retries: Option<u32>,
    },
    /// Wait until an object reaches (or leaves) a status phase
    Wait {
        /// GVK key, e.g. "mongodb.com/v1/MongoDB"
        gvk: String,
        /// Object name
        name: String,
        /// Target phase
        #[arg(long = "phase", default_value = "Running")]
        phase: String,
        /// Wait for the object to leave --phase instead
        #[arg(long = "abandon", action = ArgAction::SetTrue)]
        abandon: bool,
        /// Timeout in seconds (default: FERRY_POLL_TIMEOUT_SECS or 600)
        #[arg(long = "timeout")]
        timeout: Option<u64>,
        /// Poll interval in seconds (default: FERRY_POLL_INTERVAL_SECS or 3)
        #[arg(long = "interval")]
        interval: Option<u64>,
        /// Regex that status.message must match as well
        #[arg(long = "message")]
        message: Option<String>,
        /// Keep waiting through Failed/Unsupported phases
        #[arg(long = "ignore-errors", action = ArgAction::SetTrue)]
        ignore_errors: bool,
        /// Message fragment that makes a failed phase transient (repeatable)
        #[arg(long = "tolerate")]
        tolerate: Vec<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("FERRY_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FERRY_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid FERRY_METRICS_ADDR; expected host:port");
        }
    }
}

fn parse_gvk(key: &str) -> Option<(String, String, String)> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => Some((String::new(), (*version).to_string(), (*kind).to_string())),
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => {
            Some(((*group).to_string(), (*version).to_string(), (*kind).to_string()))
        }
        _ => None,
    }
}

fn read_manifest(file: &str) -> Result<String> {
    if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(file).with_context(|| format!("reading {}", file))
}

async fn connect(namespace: Option<&str>) -> Result<ClientContext> {
    let ctx = ClientContext::connect().await.context("connecting to cluster")?;
    Ok(match namespace {
        Some(ns) => ctx.with_default_namespace(ns),
        None => ctx,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ns = cli.namespace.as_deref();

    match cli.command {
        Commands::Locate { gvk, offline } => {
            let (group, version, kind) = parse_gvk(&gvk).ok_or_else(|| anyhow!("invalid GVK key {:?}; expected [group/]version/kind", gvk))?;
            info!(gvk = %gvk, offline, "locate invoked");
            let ctx = if offline {
                ClientContext::new(Registry::with_builtins(), Arc::new(MemoryStore::new()))
            } else {
                connect(ns).await?
            };
            let ep = ctx.registry().locate(&group, &version, &kind)?;
            match cli.output {
                Output::Human => {
                    let scope = if ep.namespaced { "namespaced" } else { "cluster" };
                    println!("{} • {} • {} • {}", ep.handler, ep.verb_kind, scope, ep.path_template());
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&ep)?),
            }
        }
        Commands::Apply { file } => {
            let text = read_manifest(&file)?;
            let ctx = connect(ns).await?;
            info!(file = %file, "apply invoked");
            let results = apply_manifest(&ctx, &text, ns).await?;
            match cli.output {
                Output::Human => {
                    for r in &results {
                        let rv = r.new_rv.as_deref().unwrap_or("-");
                        println!("{:<9} {} rv={}", format!("{:?}", r.outcome).to_lowercase(), r.reference, rv);
                        for w in &r.warnings {
                            println!("  warning: {}", w);
                        }
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&results)?),
            }
        }
        Commands::Update { file, retries } => {
            let text = read_manifest(&file)?;
            let ctx = connect(ns).await?;
            let policy = retries.map(|max_retries| UpdatePolicy { max_retries }).unwrap_or_else(UpdatePolicy::from_env);
            info!(file = %file, retries = policy.max_retries, "update invoked");
            let default_ns = ctx.default_namespace().to_string();
            let mut out = Vec::new();
            for doc in load(&text)? {
                let mut obj = VersionedObject::from_document(doc?, Some(&default_ns))?;
                update_with(&ctx, &mut obj, policy).await?;
                match cli.output {
                    Output::Human => println!("updated {} rv={}", obj.reference(), obj.version_token().unwrap_or("-")),
                    Output::Json => out.push(json!({ "reference": obj.reference(), "rv": obj.version_token(), "generation": obj.generation() })),
                }
            }
            if cli.output == Output::Json {
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
        }
        Commands::Wait { gvk, name, phase, abandon, timeout, interval, message, ignore_errors, tolerate } => {
            let (group, version, kind) = parse_gvk(&gvk).ok_or_else(|| anyhow!("invalid GVK key {:?}; expected [group/]version/kind", gvk))?;
            let ctx = connect(ns).await?;
            let ep = ctx.registry().locate(&group, &version, &kind)?;
            let obj_ns = if ep.namespaced { Some(ctx.default_namespace()) } else { None };
            let reference = ResourceRef::new(&api_version(&group, &version), &kind, obj_ns, &name);
            let mut obj = ctx.load(&reference).await?;

            let mut settings = PollSettings::from_env();
            if let Some(secs) = timeout {
                settings = settings.with_timeout(Duration::from_secs(secs));
            }
            if let Some(secs) = interval {
                settings = settings.with_interval(Duration::from_secs(secs.max(1)));
            }
            let phase = Phase::parse(&phase);
            info!(target_ref = %reference, phase = %phase, abandon, "wait invoked");
            let outcome = if abandon {
                abandons_phase(&ctx, &mut obj, phase, settings).await?
            } else {
                let mut wait = PhaseWait { settings, message: None, ignore_errors, tolerated: tolerate };
                if let Some(re) = message {
                    wait = wait.with_message(regex::Regex::new(&re).with_context(|| format!("invalid --message regex {:?}", re))?);
                }
                reaches_phase(&ctx, &mut obj, phase, &wait).await?
            };
            match cli.output {
                Output::Human => println!(
                    "{} phase={} after {:.1}s ({} checks)",
                    reference,
                    outcome.last_observed_phase.as_ref().map(|p| p.as_str()).unwrap_or("-"),
                    outcome.elapsed.as_secs_f64(),
                    outcome.ticks
                ),
                Output::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "reference": reference,
                        "phase": outcome.last_observed_phase,
                        "elapsed_ms": outcome.elapsed.as_millis() as u64,
                        "ticks": outcome.ticks,
                        "message": obj.message(),
                    }))?
                ),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gvk_keys_parse_with_and_without_group() {
        assert_eq!(parse_gvk("v1/ConfigMap"), Some((String::new(), "v1".into(), "ConfigMap".into())));
        assert_eq!(parse_gvk("mongodb.com/v1/MongoDB"), Some(("mongodb.com".into(), "v1".into(), "MongoDB".into())));
        assert_eq!(parse_gvk("ConfigMap"), None);
        assert_eq!(parse_gvk("a/b/c/d"), None);
        assert_eq!(parse_gvk("v1/"), None);
    }

    #[test]
    fn cli_parses_wait_flags() {
        let cli = Cli::try_parse_from([
            "ferryctl", "-o", "json", "--ns", "prod", "wait", "mongodb.com/v1/MongoDB", "rs", "--phase", "Failed", "--timeout", "30",
            "--tolerate", "agents", "--tolerate", "backup",
        ])
        .unwrap();
        assert_eq!(cli.output, Output::Json);
        assert_eq!(cli.namespace.as_deref(), Some("prod"));
        match cli.command {
            Commands::Wait { phase, timeout, tolerate, abandon, .. } => {
                assert_eq!(phase, "Failed");
                assert_eq!(timeout, Some(30));
                assert_eq!(tolerate, vec!["agents".to_string(), "backup".to_string()]);
                assert!(!abandon);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
