use anyhow::{bail, Result};
use std::time::Duration;
use switchyard_app::report::{checkpoint_report, verification_report};
use switchyard_app::{load_gateway_config, Invocation, Mode, Repl, USAGE};
use switchyard_ledger::AuditLedger;
use switchyard_runtime::{build_gateway, GatewayConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let invocation = Invocation::parse(std::env::args().skip(1))?;
    if invocation.mode == Mode::Help {
        println!("{}", USAGE);
        return Ok(());
    }
    let config = load_gateway_config(invocation.config.as_deref())?;

    match invocation.mode {
        Mode::Verify => verify(&config),
        Mode::Checkpoint => checkpoint(&config),
        Mode::Repl | Mode::Help => interactive(config).await,
    }
}

fn verify(config: &GatewayConfig) -> Result<()> {
    let ledger = AuditLedger::open(&config.ledger)?;
    let (intact, report) = verification_report(&ledger)?;
    println!("{}", report);
    ledger.shutdown()?;
    if !intact {
        bail!("audit ledger failed verification");
    }
    Ok(())
}

fn checkpoint(config: &GatewayConfig) -> Result<()> {
    let ledger = AuditLedger::open(&config.ledger)?;
    println!("{}", checkpoint_report(&ledger.checkpoint()?));
    ledger.shutdown()?;
    Ok(())
}

async fn interactive(config: GatewayConfig) -> Result<()> {
    let engine = build_gateway(config)?;
    let sweeper = engine.spawn_session_sweeper(SWEEP_INTERVAL);

    let user = std::env::var("USER").unwrap_or_else(|_| "local".to_string());
    let session_id = format!("cli-{}", user);
    info!("Starting interactive session {}", session_id);

    let outcome = Repl::new(engine.clone(), session_id).run().await;

    sweeper.abort();
    if !engine.shutdown().await {
        warn!("Shutdown timed out with turns still in flight");
    }
    outcome
}
