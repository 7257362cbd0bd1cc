//! Switchyard runtime: the orchestration loop and everything it is wired with.

pub mod bootstrap;
pub mod config;
pub mod gate;
pub mod metrics;
pub mod orchestrator;
pub mod summarizer;
pub mod turn;

pub use bootstrap::{build_gateway, build_gateway_with, BootstrapError};
pub use config::{load_config, ConfigError, GatewayConfig, OrchestrationConfig, SessionConfig};
pub use gate::{GatePermit, RequestGate};
pub use orchestrator::{Collaborators, Orchestrator, CONTINUE_PROMPT};
pub use summarizer::ProviderSummarizer;
pub use turn::{EventSender, ThinkingSetting, TurnEvent, TurnReply, TurnRequest, ABORT_MARKER};
