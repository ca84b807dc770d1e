//! MCP Tool Hub - many tool servers behind one endpoint

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use mcp_toolhub::{
    cli::{Cli, Command},
    config::Config,
    gateway::{Gateway, GatewayServer},
    setup_tracing,
    transport::StdioConnector,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Some(Command::Check) => run_check(cli.config.as_deref()),
        Some(Command::Tools { ref query, limit }) => {
            run_tools(cli.config.as_deref(), query.as_deref(), limit).await
        }
        Some(Command::Serve { port, ref host }) => {
            run_server(cli.config.as_deref(), port, host.clone()).await
        }
        None => run_server(cli.config.as_deref(), None, None).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    Config::load(path).context("Failed to load configuration")
}

/// Validate configuration and print the configured backends
fn run_check(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;

    println!("Configuration OK");
    println!(
        "  listen: {}:{}  essential: {}  limit: {}/{}",
        config.server.host,
        config.server.port,
        config.exposure.essential.len(),
        config.exposure.default_limit,
        config.exposure.max_limit
    );
    println!("\n{} backend(s):", config.backends.len());
    let mut ids: Vec<&String> = config.backends.keys().collect();
    ids.sort();
    for id in ids {
        let backend = &config.backends[id];
        let status = if backend.enabled { "enabled" } else { "disabled" };
        let (program, args) = backend
            .program_and_args()
            .with_context(|| format!("Invalid command for backend '{id}'"))?;
        println!("  {id} [{status}]");
        println!("     command: {program} {}", args.join(" "));
        if !backend.description.is_empty() {
            println!("     {}", backend.description);
        }
    }
    Ok(())
}

/// Connect configured backends, print the exposed operations, then disconnect
async fn run_tools(
    path: Option<&Path>,
    query: Option<&str>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let gateway = Gateway::new(config, Arc::new(StdioConnector));

    let connected = gateway.connect_configured().await;
    info!(connected, operations = gateway.catalog().len(), "Backends connected");

    let exposure = gateway.list_operations(query, limit);
    let summary = exposure.tier.summary(&exposure.rationale);
    let tools: Vec<_> = exposure
        .tier
        .operations()
        .map(|op| {
            serde_json::json!({
                "name": op.name,
                "backend": op.backend_id,
                "description": op.description,
            })
        })
        .collect();
    let output = serde_json::json!({ "tools": tools, "exposure": summary });
    println!("{}", serde_json::to_string_pretty(&output)?);

    let report = gateway.shutdown().await;
    for failure in &report.failures {
        warn!(backend = %failure.backend, error = %failure.error, "Backend shutdown failed");
    }
    Ok(())
}

/// Run the hub server
async fn run_server(
    path: Option<&Path>,
    port: Option<u16>,
    host: Option<String>,
) -> anyhow::Result<()> {
    let mut config = load_config(path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        backends = config.backends.len(),
        "Starting MCP Tool Hub"
    );

    GatewayServer::new(config, Arc::new(StdioConnector))
        .run()
        .await
        .context("Gateway error")?;

    info!("Tool hub shutdown complete");
    Ok(())
}
