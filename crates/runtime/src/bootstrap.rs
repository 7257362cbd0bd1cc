//! Composition root: wires concrete collaborators into an [`Orchestrator`].

use crate::config::GatewayConfig;
use crate::orchestrator::{Collaborators, Orchestrator};
use crate::summarizer::ProviderSummarizer;
use std::sync::Arc;
use std::time::Duration;
use switchyard_ledger::{AuditLedger, LedgerError};
use switchyard_memory::{JsonlSessionStore, StoreError};
use switchyard_providers::{ProviderClient, ProviderSet};
use switchyard_tools::workspace_registry;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Build the gateway with API keys from the process environment.
pub fn build_gateway(config: GatewayConfig) -> Result<Arc<Orchestrator>, BootstrapError> {
    build_gateway_with(config, |key| std::env::var(key).ok())
}

/// Build the gateway with API keys from `lookup`.
pub fn build_gateway_with<F>(config: GatewayConfig, lookup: F) -> Result<Arc<Orchestrator>, BootstrapError>
where
    F: Fn(&str) -> Option<String>,
{
    let timeout = Duration::from_secs(config.orchestration.provider_timeout_secs);
    let providers = ProviderSet::from_lookup(lookup, timeout);
    let credentials = providers.credentials();
    if credentials.is_empty() {
        warn!("No provider API keys found; every turn will use the fallback model and fail");
    }
    let provider: Arc<dyn ProviderClient> = Arc::new(providers);

    std::fs::create_dir_all(&config.sessions.workspace_dir)?;
    let tools = Arc::new(workspace_registry(&config.sessions.workspace_dir));
    let store = Arc::new(JsonlSessionStore::new(&config.sessions.store_dir)?);
    let ledger = Arc::new(AuditLedger::open(&config.ledger)?);
    let summarizer = Arc::new(ProviderSummarizer::cheapest(provider.clone(), &credentials));
    info!("Compaction summaries use {}", summarizer.model());

    let parts = Collaborators {
        provider,
        credentials,
        tools,
        store,
        summarizer,
        audit: ledger.clone(),
        ledger: Some(ledger),
    };
    Ok(Arc::new(Orchestrator::new(config, parts)))
}
