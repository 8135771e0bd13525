#![forbid(unsafe_code)]

use npagent::config::{load_config, AgentConfig, Cli, Commands};
use npagent::{HubAgent, LinkError, SignalHandler};

use async_trait::async_trait;
use clap::Parser;
use np_common::signal::Payload;
use np_common::{Identity, Signal, SignalType};
use std::io::IsTerminal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const CYAN: &str = "\x1b[36m";

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };

    if let Some(ref path) = cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open log file {path:?}: {e}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}

fn resolve_config(cli: &Cli) -> anyhow::Result<AgentConfig> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(ref hub) = cli.hub {
        config.hub_url = hub.clone();
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
    Ok(config)
}

/// Logs every delivered signal.
struct LogSignals;

#[async_trait]
impl SignalHandler for LogSignals {
    async fn handle(&self, signal: &Signal) -> anyhow::Result<()> {
        info!(
            kind = %signal.signal_type,
            source = %signal.source,
            payload = %serde_json::Value::Object(signal.payload.clone()),
            "signal"
        );
        Ok(())
    }
}

async fn run_agent(cli: &Cli, name: &str) -> anyhow::Result<()> {
    let config = resolve_config(cli)?;
    let agent = HubAgent::new(name, &config)?.with_handler(LogSignals);

    if std::io::stderr().is_terminal() {
        let v = env!("CARGO_PKG_VERSION");
        eprintln!();
        eprintln!("  {BOLD}◈ npagent{RESET} {DIM}v{v}{RESET}");
        eprintln!("  {DIM}Identity{RESET}   {CYAN}{}{RESET}", agent.identity());
        eprintln!("  {DIM}Hub{RESET}        {}", config.hub_url);
        eprintln!();
    }

    match agent.start().await {
        Ok(()) => info!(peers = agent.peers().len(), "connected"),
        Err(LinkError::Timeout) => warn!("hub not reachable yet, still retrying"),
        Err(e) => return Err(e.into()),
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    agent.stop().await;
    println!("{}", agent.synapse_report());
    Ok(())
}

fn parse_payload(raw: &str) -> anyhow::Result<Payload> {
    match serde_json::from_str(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        other => anyhow::bail!("payload must be a JSON object, got: {other}"),
    }
}

async fn send_one(
    cli: &Cli,
    name: &str,
    to: &str,
    signal_type: &str,
    payload: &str,
) -> anyhow::Result<()> {
    let signal_type: SignalType = signal_type.parse().map_err(anyhow::Error::msg)?;
    let payload = parse_payload(payload)?;
    let config = resolve_config(cli)?;

    let agent = HubAgent::new(name, &config)?;
    agent.start().await?;
    let sent = if to.is_empty() {
        agent.broadcast(signal_type, payload).await
    } else {
        agent.transmit(to, signal_type, payload).await
    };
    agent.stop().await;

    if !sent? {
        anyhow::bail!("signal was not sent");
    }
    let target = if to.is_empty() { "*" } else { to };
    println!("{signal_type} -> {target}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli)?;

    match &cli.command {
        Commands::Run { name } => run_agent(&cli, name).await?,
        Commands::Send {
            name,
            to,
            signal_type,
            payload,
        } => send_one(&cli, name, to, signal_type, payload).await?,
        Commands::Identity { name } => {
            let identity = Identity::generate(name);
            println!("{identity}");
            println!("agent_id    {}", identity.agent_id);
            println!("neural_hash {}", identity.neural_hash);
            println!("created_at  {}", identity.created_at.to_rfc3339());
        }
    }

    Ok(())
}
