//! Dashplan CLI
//!
//! # Usage
//!
//! ```bash
//! # Print the plan for an intent
//! dashplan plan "dashboard de cursos em São Paulo"
//!
//! # Execute against fixture data, streaming NDJSON events to stdout
//! dashplan run "painel de empresas" --fixtures fixtures.json \
//!     --config dashplan.toml --param company_id=acme-01 --profile acme
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides the default `dashplan=info`.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dashplan::streaming::write_event;
use dashplan::{
    DashplanConfig, DataSourceDescriptor, DataSourceKind, ExecutionContext,
    InMemoryAuthProfileStore, InMemoryDataSourceRegistry, QueryPlanner, StaticToolExecutor,
    StrategicExecutionController, StreamEventType,
};
use futures::StreamExt;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Instrument};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dashplan")]
#[command(version)]
#[command(about = "Plan and execute natural-language dashboard requests", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE", env = "DASHPLAN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the plan for an intent as JSON
    Plan {
        intent: String,

        /// Single-line output
        #[arg(long)]
        compact: bool,
    },

    /// Plan and execute an intent against fixture data
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    intent: String,

    /// JSON object mapping data source ids to payloads
    #[arg(long, value_name = "FILE")]
    fixtures: PathBuf,

    /// Parameter for every sub-query (repeatable); JSON values are parsed
    #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, Value)>,

    /// Credential profile to use
    #[arg(long)]
    profile: Option<String>,

    /// Print the per-sub-query results to stderr when done
    #[arg(long)]
    report: bool,
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.verbose {
        "dashplan=debug"
    } else {
        "dashplan=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => DashplanConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => DashplanConfig::default(),
    };
    config.apply_env_overrides()?;

    match cli.command {
        Commands::Plan { intent, compact } => plan_command(&config, &intent, compact),
        Commands::Run(args) => {
            let span = tracing::info_span!("run", id = %Uuid::new_v4());
            run_command(config, args).instrument(span).await
        }
    }
}

fn plan_command(config: &DashplanConfig, intent: &str, compact: bool) -> anyhow::Result<()> {
    let plan = QueryPlanner::new(config.planner.clone()).plan(intent)?;
    let rendered = if compact {
        serde_json::to_string(&plan)?
    } else {
        serde_json::to_string_pretty(&plan)?
    };
    println!("{}", rendered);
    Ok(())
}

async fn run_command(config: DashplanConfig, args: RunArgs) -> anyhow::Result<()> {
    let plan = QueryPlanner::new(config.planner.clone()).plan(&args.intent)?;
    let tools = StaticToolExecutor::from_json_file(&args.fixtures)
        .with_context(|| format!("loading fixtures from {}", args.fixtures.display()))?;

    // Fixture ids without a configured descriptor are served as plain REST sources.
    let registry = InMemoryDataSourceRegistry::from_descriptors(config.data_sources.clone());
    let configured = registry.ids().await;
    for id in tools.data_sources() {
        if !configured.contains(&id) {
            registry
                .register(DataSourceDescriptor::new(id, DataSourceKind::Rest))
                .await;
        }
    }
    let profiles = InMemoryAuthProfileStore::from_profiles(config.auth_profiles.clone());

    let controller = Arc::new(
        StrategicExecutionController::new(Arc::new(registry), Arc::new(profiles), Arc::new(tools))
            .with_config(config.executor.clone()),
    );

    let mut ctx = ExecutionContext::new();
    if let Some(profile) = args.profile {
        ctx = ctx.with_auth_profile(profile);
    }
    for (key, value) in args.params {
        ctx = ctx.with_param(key, value);
    }

    info!(
        "Running {} sub-queries ({:?})",
        plan.sub_queries.len(),
        plan.streaming_strategy
    );
    let mut stream = controller.execute(plan, ctx);
    while let Some(event) = stream.next().await {
        write_event(&mut std::io::stdout().lock(), &event)?;
    }
    let report = stream.finish().await?;

    if args.report {
        eprintln!("{}", serde_json::to_string_pretty(&report.results)?);
    }
    for request in report.clarifications() {
        warn!(
            "{} needs input ({}): {}",
            request.query_id,
            request.missing_params.join(", "),
            request.question
        );
    }

    if report.terminal.event_type == StreamEventType::Error {
        anyhow::bail!(
            "{}",
            report
                .terminal
                .message
                .clone()
                .unwrap_or_else(|| "execution failed".to_string())
        );
    }
    Ok(())
}
