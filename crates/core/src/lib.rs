pub mod audit;
pub mod classifier;
pub mod error;
pub mod routing;
pub mod types;

pub use audit::{AuditEntry, AuditSink, NoopAudit};
pub use classifier::{Classification, Classifier, ClassifierConfig, Intent, ThinkingBudgets};
pub use error::{friendly_message, EngineError, EngineResult, ErrorKind, Locale};
pub use routing::{
    cheapest_model, model_spec, CooldownInfo, CooldownTracker, Credentials, ModelSelector,
    ModelSpec, Provider, RoutePlan, RoutingConfig, RoutingTable, Selection, FALLBACK_MODEL,
};
pub use types::*;
