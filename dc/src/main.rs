//! dbcoord - database ownership election and port relay
//!
//! CLI entry point for running in-process simulations and inspecting config.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use dbcoord::candidate::{CandidateHandle, CandidateState, OwnerCandidate};
use dbcoord::cli::{Cli, Command, OutputFormat, get_log_path};
use dbcoord::client::{ClientHandle, ClientMetrics, ClientProxy, Connection};
use dbcoord::config::Config;
use dbcoord::relay::{Relay, RelayMetrics};
use dbcoord::{ContextId, CoordinationBus, engine, lock};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level_str = cli_log_level.or(config_log_level);
    let level = match level_str.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Simulate {
            candidates,
            clients,
            resource,
            ops,
            failover,
            format,
        } => {
            let plan = SimulationPlan {
                candidates,
                clients,
                resource,
                ops,
                failover,
            };
            let report = cmd_simulate(&config, &plan).await?;
            print_report(&report, format)
        }
        Command::Config => {
            let yaml = serde_yaml::to_string(&config).context("Failed to render configuration")?;
            print!("{}", yaml);
            Ok(())
        }
    }
}

/// What `simulate` was asked to do
struct SimulationPlan {
    candidates: usize,
    clients: usize,
    resource: String,
    ops: usize,
    failover: bool,
}

/// Outcome of a simulation run
#[derive(Debug, Serialize)]
struct SimulationReport {
    resource: String,
    lock_backend: &'static str,
    engine_backend: &'static str,
    first_owner: Option<ContextId>,
    terminated: Option<ContextId>,
    final_owner: Option<ContextId>,
    owners_at_end: Vec<ContextId>,
    ops_ok: usize,
    ops_failed: usize,
    errors: Vec<String>,
    relay: RelayMetrics,
    clients: Vec<ClientMetrics>,
}

async fn cmd_simulate(config: &Config, plan: &SimulationPlan) -> Result<SimulationReport> {
    info!(
        candidates = plan.candidates,
        clients = plan.clients,
        resource = %plan.resource,
        ops = plan.ops,
        failover = plan.failover,
        "cmd_simulate: starting"
    );

    let bus = CoordinationBus::new(config.bus.capacity);
    let (relay, relay_task) = Relay::spawn(&config.relay);
    let locks = lock::from_config(&config.lock);
    let engine = engine::from_config(&config.engine);

    let candidates: Vec<CandidateHandle> = (0..plan.candidates)
        .map(|_| {
            OwnerCandidate::new(
                &config.candidate,
                bus.clone(),
                relay.clone(),
                Arc::clone(&locks),
                Arc::clone(&engine),
            )
            .spawn()
        })
        .collect();
    let clients: Vec<ClientHandle> = (0..plan.clients)
        .map(|_| ClientProxy::spawn(&config.client, bus.clone(), relay.clone()).0)
        .collect();

    let connections: Vec<Connection> = join_all(clients.iter().map(|c| c.request_resource(plan.resource.as_str())))
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .context("Failed to connect clients")?;

    let first_owner = connections.first().and_then(Connection::owner);
    let mut report = SimulationReport {
        resource: plan.resource.clone(),
        lock_backend: locks.backend(),
        engine_backend: engine.backend(),
        first_owner: first_owner.clone(),
        terminated: None,
        final_owner: None,
        owners_at_end: Vec::new(),
        ops_ok: 0,
        ops_failed: 0,
        errors: Vec::new(),
        relay: RelayMetrics::default(),
        clients: Vec::new(),
    };

    let half = if plan.failover { plan.ops / 2 } else { plan.ops };
    run_ops(&connections, 0..half, &mut report).await;

    if plan.failover
        && let Some(owner) = &first_owner
        && let Some(candidate) = candidates.iter().find(|c| c.id() == owner)
    {
        info!(%owner, "cmd_simulate: terminating owner");
        candidate.terminate().await;
        report.terminated = Some(owner.clone());
    }

    run_ops(&connections, half..plan.ops, &mut report).await;

    report.final_owner = connections.first().and_then(Connection::owner);
    for candidate in &candidates {
        if let Ok(CandidateState::Owner) = candidate.state(plan.resource.as_str()).await {
            report.owners_at_end.push(candidate.id().clone());
        }
    }
    report.relay = relay.metrics().await.context("Failed to read relay metrics")?;
    for client in &clients {
        if let Ok(metrics) = client.metrics().await {
            report.clients.push(metrics);
        }
    }

    for client in &clients {
        let _ = client.shutdown().await;
    }
    for candidate in &candidates {
        // Terminated candidates are already gone
        let _ = candidate.shutdown().await;
    }
    relay.shutdown().await.context("Failed to stop relay")?;
    relay_task.await.context("Relay task failed")?;

    Ok(report)
}

/// Send ops `range` from every client, one round per op
async fn run_ops(connections: &[Connection], range: std::ops::Range<usize>, report: &mut SimulationReport) {
    for op in range {
        let sql = format!("SELECT {} AS op", op);
        let results = join_all(connections.iter().map(|c| c.send(sql.clone()))).await;
        for result in results {
            match result {
                Ok(_) => report.ops_ok += 1,
                Err(e) => {
                    warn!(op, error = %e, "run_ops: operation failed");
                    report.ops_failed += 1;
                    report.errors.push(e.to_string());
                }
            }
        }
    }
}

fn print_report(report: &SimulationReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(report).context("Failed to render report")?;
        println!("{}", json);
        return Ok(());
    }

    let show = |id: &Option<ContextId>| id.as_ref().map(|i| i.to_string()).unwrap_or_else(|| "-".to_string());

    println!("{} {}", "Resource:".bold(), report.resource.cyan());
    println!("  Lock backend:   {}", report.lock_backend);
    println!("  Engine backend: {}", report.engine_backend);
    println!("  First owner:    {}", show(&report.first_owner).green());
    if report.terminated.is_some() {
        println!("  Terminated:     {}", show(&report.terminated).red());
    }
    println!("  Final owner:    {}", show(&report.final_owner).green());

    let owners = report.owners_at_end.len();
    let owners_line = format!("{}", owners);
    println!(
        "  Owners at end:  {}",
        if owners <= 1 { owners_line.green() } else { owners_line.red() }
    );

    let ok = format!("{} ok", report.ops_ok);
    let failed = format!("{} failed", report.ops_failed);
    println!(
        "{} {}, {}",
        "Operations:".bold(),
        ok.green(),
        if report.ops_failed == 0 { failed.dimmed() } else { failed.red() }
    );
    for error in &report.errors {
        println!("  {} {}", "✗".red(), error);
    }

    println!("{}", "Relay:".bold());
    println!("  Handoffs served:   {}", report.relay.handoffs_served);
    println!("  No-provider:       {}", report.relay.no_provider_replies);
    println!("  Handoff timeouts:  {}", report.relay.handoff_timeouts);
    println!("  Providers replaced: {}", report.relay.providers_replaced);

    let requeued: u64 = report.clients.iter().map(|c| c.ops_requeued).sum();
    let supersessions: u64 = report.clients.iter().map(|c| c.supersessions).sum();
    println!("{}", "Clients:".bold());
    println!("  Supersessions:  {}", supersessions);
    println!("  Ops requeued:   {}", requeued);

    Ok(())
}
